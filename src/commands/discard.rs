use crate::commands::CommandParser;
use crate::connection::Session;
use crate::frame::Frame;
use crate::Error;

/// Drops the open transaction buffer without running it.
///
/// Ref: <https://redis.io/docs/latest/commands/discard>
#[derive(Debug, PartialEq)]
pub struct Discard;

impl Discard {
    pub fn exec(self, session: &mut Session) -> Frame {
        match session.txn.take() {
            Some(_) => Frame::Simple("OK".to_string()),
            None => Frame::Error("ERR DISCARD without MULTI".to_string()),
        }
    }
}

impl TryFrom<&mut CommandParser> for Discard {
    type Error = Error;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}
