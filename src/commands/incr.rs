use crate::commands::CommandParser;
use crate::frame::Frame;
use crate::store::State;
use crate::Error;

/// Increments the number stored at key by one, creating it from zero when
/// missing.
///
/// Ref: <https://redis.io/docs/latest/commands/incr>
#[derive(Debug, PartialEq)]
pub struct Incr {
    pub key: String,
}

impl Incr {
    pub fn apply(self, state: &mut State) -> Frame {
        match state.incr(&self.key) {
            Ok(value) => Frame::Integer(value),
            Err(e) => Frame::Error(e.to_string()),
        }
    }
}

impl TryFrom<&mut CommandParser> for Incr {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        Ok(Self { key })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::commands::Command;

    fn state() -> State {
        State::for_tests()
    }

    fn incr(state: &mut State, key: &str) -> Frame {
        let cmd = Command::try_from(Frame::command(&["INCR", key])).unwrap();
        let Command::Incr(incr) = cmd else { unreachable!() };
        incr.apply(state)
    }

    #[test]
    fn non_existing_key_counts_from_zero() {
        let mut state = state();
        assert_eq!(incr(&mut state, "key1"), Frame::Integer(1));
        assert_eq!(incr(&mut state, "key1"), Frame::Integer(2));
    }

    #[test]
    fn existing_integer_is_incremented() {
        let mut state = state();
        state.set("key1".to_string(), Bytes::from("41"), None);
        assert_eq!(incr(&mut state, "key1"), Frame::Integer(42));
    }

    #[test]
    fn invalid_value_type() {
        let mut state = state();
        state.set("key1".to_string(), Bytes::from("value"), None);
        assert_eq!(
            incr(&mut state, "key1"),
            Frame::Error("ERR value is not an integer or out of range".to_string())
        );
        assert_eq!(state.get("key1").unwrap(), Some(Bytes::from("value")));
    }

    #[test]
    fn out_of_range() {
        let mut state = state();
        state.set(
            "key1".to_string(),
            Bytes::from("999223372036854775808"),
            None,
        );
        assert_eq!(
            incr(&mut state, "key1"),
            Frame::Error("ERR value is not an integer or out of range".to_string())
        );
    }
}
