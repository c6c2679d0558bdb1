use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::State;
use crate::Error;

/// Removes keys of any type; replies with how many existed.
///
/// Ref: <https://redis.io/docs/latest/commands/del>
#[derive(Debug, PartialEq)]
pub struct Del {
    pub keys: Vec<String>,
}

impl Del {
    pub fn apply(self, state: &mut State) -> Frame {
        let mut count = 0;
        for key in self.keys {
            if state.remove(&key) {
                count += 1;
            }
        }
        Frame::Integer(count)
    }
}

impl TryFrom<&mut CommandParser> for Del {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let mut keys = vec![];

        loop {
            match parser.next_string() {
                Ok(key) => keys.push(key),
                Err(CommandParserError::EndOfStream) if !keys.is_empty() => {
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(Self { keys })
    }
}
