use bytes::Bytes;

use crate::commands::CommandParser;
use crate::frame::Frame;
use crate::Error;

/// Returns a copy of the argument as a bulk string.
///
/// Ref: <https://redis.io/docs/latest/commands/echo>
#[derive(Debug, PartialEq)]
pub struct Echo {
    pub message: Bytes,
}

impl Echo {
    pub fn apply(self) -> Frame {
        Frame::Bulk(self.message)
    }
}

impl TryFrom<&mut CommandParser> for Echo {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let message = parser.next_bytes()?;
        Ok(Self { message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Command, CommandParserError};

    #[test]
    fn echoes_message() {
        let cmd = Command::try_from(Frame::command(&["ECHO", "hey"])).unwrap();
        let Command::Echo(echo) = cmd else { unreachable!() };
        assert_eq!(echo.apply(), Frame::Bulk(Bytes::from("hey")));
    }

    #[test]
    fn missing_message() {
        let err = Command::try_from(Frame::command(&["ECHO"])).err().unwrap();
        let err = err.downcast_ref::<CommandParserError>().unwrap();
        assert_eq!(*err, CommandParserError::EndOfStream);
    }
}
