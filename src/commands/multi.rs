use crate::commands::CommandParser;
use crate::connection::Session;
use crate::frame::Frame;
use crate::Error;

/// Opens the connection's transaction buffer. Until EXEC or DISCARD, every
/// other command queues instead of running.
///
/// Ref: <https://redis.io/docs/latest/commands/multi>
#[derive(Debug, PartialEq)]
pub struct Multi;

impl Multi {
    pub fn exec(self, session: &mut Session) -> Frame {
        if session.txn.is_some() {
            return Frame::Error("ERR MULTI calls can not be nested".to_string());
        }

        session.txn = Some(Vec::new());
        Frame::Simple("OK".to_string())
    }
}

impl TryFrom<&mut CommandParser> for Multi {
    type Error = Error;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}
