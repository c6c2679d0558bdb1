use bytes::Bytes;

use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::State;
use crate::Error;

/// `CONFIG GET name...` over the persistence settings. Replies a flat
/// array of name/value pairs.
///
/// Ref: <https://redis.io/docs/latest/commands/config-get>
#[derive(Debug, PartialEq)]
pub struct ConfigGet {
    pub names: Vec<String>,
}

impl ConfigGet {
    pub fn apply(self, state: &mut State) -> Frame {
        let mut pairs = Vec::with_capacity(self.names.len() * 2);

        for name in self.names {
            let value = match name.as_str() {
                "dir" => state.dir.clone(),
                "dbfilename" => state.dbfilename.clone(),
                other => {
                    return Frame::Error(format!("ERR unsupported config option: {other}"));
                }
            };
            pairs.push(Frame::Bulk(Bytes::from(name)));
            pairs.push(Frame::Bulk(Bytes::from(value)));
        }

        Frame::Array(pairs)
    }
}

impl TryFrom<&mut CommandParser> for ConfigGet {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let subcommand = parser.next_string()?;
        if !subcommand.eq_ignore_ascii_case("GET") {
            return Err("expected GET subcommand with at least one option name".into());
        }

        let mut names = vec![parser.next_string()?];
        loop {
            match parser.next_string() {
                Ok(name) => names.push(name),
                Err(CommandParserError::EndOfStream) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Self { names })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;

    fn state() -> State {
        let mut state = State::for_tests();
        state.dir = "/data".to_string();
        state.dbfilename = "dump.rdb".to_string();
        state
    }

    #[test]
    fn returns_flat_pairs() {
        let cmd = Command::try_from(Frame::command(&["CONFIG", "GET", "dir", "dbfilename"]))
            .unwrap();
        let Command::ConfigGet(config) = cmd else { unreachable!() };

        assert_eq!(
            config.apply(&mut state()),
            Frame::Array(vec![
                Frame::Bulk(Bytes::from("dir")),
                Frame::Bulk(Bytes::from("/data")),
                Frame::Bulk(Bytes::from("dbfilename")),
                Frame::Bulk(Bytes::from("dump.rdb")),
            ])
        );
    }

    #[test]
    fn unsupported_name_is_an_error() {
        let config = ConfigGet {
            names: vec!["maxmemory".to_string()],
        };
        assert_eq!(
            config.apply(&mut state()),
            Frame::Error("ERR unsupported config option: maxmemory".to_string())
        );
    }

    #[test]
    fn requires_get_subcommand() {
        let err = Command::try_from(Frame::command(&["CONFIG", "SET", "dir", "/x"]))
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "expected GET subcommand with at least one option name"
        );
    }
}
