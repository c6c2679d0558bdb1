use crate::commands::CommandParser;
use crate::frame::Frame;
use crate::store::State;
use crate::Error;

/// Reports the kind of value a key holds: `string`, `stream`, or `none`.
///
/// Ref: <https://redis.io/docs/latest/commands/type>
#[derive(Debug, PartialEq)]
pub struct Type {
    pub key: String,
}

impl Type {
    pub fn apply(self, state: &mut State) -> Frame {
        Frame::Simple(state.key_type(&self.key).to_string())
    }
}

impl TryFrom<&mut CommandParser> for Type {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        Ok(Self { key })
    }
}
