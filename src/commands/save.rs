use crate::commands::CommandParser;
use crate::frame::Frame;
use crate::store::State;
use crate::Error;

/// Flushes all databases to the snapshot file.
///
/// Ref: <https://redis.io/docs/latest/commands/save>
#[derive(Debug, PartialEq)]
pub struct Save;

impl Save {
    pub fn apply(self, state: &mut State) -> Frame {
        match state.save() {
            Ok(()) => Frame::Simple("OK".to_string()),
            Err(e) => Frame::Error(format!("ERR {e}")),
        }
    }
}

impl TryFrom<&mut CommandParser> for Save {
    type Error = Error;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}
