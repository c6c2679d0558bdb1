use bytes::Bytes;

use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::State;
use crate::Error;

/// Reports server state. Only the replication section carries real data;
/// any requested section (or none) falls through to it.
///
/// Ref: <https://redis.io/docs/latest/commands/info>
#[derive(Debug, PartialEq)]
pub struct Info {
    pub sections: Vec<String>,
}

impl Info {
    pub fn apply(self, state: &mut State) -> Frame {
        let body = format!(
            "# Replication\nrole:{}\nmaster_replid:{}\nmaster_repl_offset:{}",
            state.role.wire_name(),
            state.repl_id,
            state.self_offset,
        );

        Frame::Bulk(Bytes::from(body))
    }
}

impl TryFrom<&mut CommandParser> for Info {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let mut sections = vec![];

        loop {
            match parser.next_string() {
                Ok(section) => sections.push(section),
                Err(CommandParserError::EndOfStream) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Self { sections })
    }
}
