use crate::commands::CommandParser;
use crate::frame::Frame;
use crate::store::State;
use crate::Error;

/// Switches the active logical database, creating it on first reference.
///
/// Ref: <https://redis.io/docs/latest/commands/select>
#[derive(Debug, PartialEq)]
pub struct Select {
    pub index: usize,
}

impl Select {
    pub fn apply(self, state: &mut State) -> Frame {
        state.select(self.index);
        Frame::Simple("OK".to_string())
    }
}

impl TryFrom<&mut CommandParser> for Select {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let index = parser
            .next_string()?
            .parse::<usize>()
            .map_err(|_| "value is not an integer or out of range")?;
        Ok(Self { index })
    }
}
