use bytes::Bytes;
use glob_match::glob_match;

use crate::commands::CommandParser;
use crate::frame::Frame;
use crate::store::State;
use crate::Error;

/// Lists the live string keys of the active database matching a glob
/// pattern (`*` being the common case).
///
/// Ref: <https://redis.io/docs/latest/commands/keys>
#[derive(Debug, PartialEq)]
pub struct Keys {
    pub pattern: String,
}

impl Keys {
    pub fn apply(self, state: &mut State) -> Frame {
        let mut matched: Vec<String> = state
            .string_keys()
            .into_iter()
            .filter(|key| glob_match(&self.pattern, key))
            .collect();
        // Map order is arbitrary; a stable reply is nicer to test against.
        matched.sort();

        Frame::Array(
            matched
                .into_iter()
                .map(|key| Frame::Bulk(Bytes::from(key)))
                .collect(),
        )
    }
}

impl TryFrom<&mut CommandParser> for Keys {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let pattern = parser.next_string()?;
        Ok(Self { pattern })
    }
}
