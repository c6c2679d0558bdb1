pub mod config;
pub mod del;
pub mod discard;
pub mod echo;
pub mod exec;
pub mod get;
pub mod incr;
pub mod info;
pub mod keys;
pub mod multi;
pub mod ping;
pub mod psync;
pub mod replconf;
pub mod save;
pub mod select;
pub mod set;
pub mod type_;
pub mod wait;
pub mod xadd;
pub mod xrange;
pub mod xread;

use std::{str, vec};

use bytes::Bytes;
use thiserror::Error as ThisError;

use crate::connection::Session;
use crate::frame::Frame;
use crate::replication;
use crate::store::{State, Store};
use crate::Error;

use config::ConfigGet;
use del::Del;
use discard::Discard;
use echo::Echo;
use exec::Exec;
use get::Get;
use incr::Incr;
use info::Info;
use keys::Keys;
use multi::Multi;
use ping::Ping;
use psync::Psync;
use replconf::Replconf;
use save::Save;
use select::Select;
use set::Set;
use type_::Type;
use wait::Wait;
use xadd::XAdd;
use xrange::XRange;
use xread::XRead;

#[derive(Debug, PartialEq)]
pub enum Command {
    Ping(Ping),
    Echo(Echo),
    Info(Info),
    Set(Set),
    Get(Get),
    Del(Del),
    Incr(Incr),
    Type(Type),
    Keys(Keys),
    Select(Select),
    ConfigGet(ConfigGet),
    Save(Save),
    XAdd(XAdd),
    XRange(XRange),
    XRead(XRead),
    Multi(Multi),
    Exec(Exec),
    Discard(Discard),
    Replconf(Replconf),
    Psync(Psync),
    Wait(Wait),
}

impl Command {
    /// Lower-cased command name of an array frame, if it has one. Used for
    /// the transaction queueing decision before full parsing.
    pub fn name(frame: &Frame) -> Option<String> {
        let parts = match frame {
            Frame::Array(parts) => parts,
            _ => return None,
        };

        match parts.first() {
            Some(Frame::Simple(s)) => Some(s.to_lowercase()),
            Some(Frame::Bulk(bytes)) => str::from_utf8(bytes).ok().map(|s| s.to_lowercase()),
            _ => None,
        }
    }

    /// Whether the command mutates state that followers must see. The raw
    /// frame of such a command is fanned out to every follower.
    pub fn is_write(&self) -> bool {
        matches!(self, Command::Set(_) | Command::Del(_))
    }

    /// Executes a dispatched command. Synchronous commands run under one
    /// acquisition of the coordination guard; the blocking ones (`XREAD
    /// BLOCK`, `WAIT`) and the link-management ones take their own path.
    /// `None` means nothing should be written back on the dispatch path
    /// (the command already wrote, or deliberately stays silent).
    pub async fn exec(self, store: &Store, session: &mut Session) -> crate::Result<Option<Frame>> {
        match self {
            Command::Multi(cmd) => Ok(Some(cmd.exec(session))),
            Command::Exec(cmd) => Ok(Some(cmd.exec(store, session))),
            Command::Discard(cmd) => Ok(Some(cmd.exec(session))),
            Command::XRead(cmd) => Ok(Some(cmd.exec(store).await)),
            Command::Wait(cmd) => Ok(Some(cmd.exec(store).await)),
            Command::Replconf(cmd) => cmd.exec(store, session),
            Command::Psync(cmd) => cmd.exec(store, session),
            cmd => {
                let replicate = cmd.is_write();
                let is_xadd = matches!(cmd, Command::XAdd(_));

                let reply = {
                    let mut state = store.lock();
                    let reply = cmd.apply(&mut state);
                    if replicate && !matches!(reply, Frame::Error(_)) {
                        replication::propagate(&mut state, &session.raw);
                    }
                    reply
                };

                if is_xadd && !matches!(reply, Frame::Error(_)) {
                    store.notify_stream_append();
                }

                Ok(Some(reply))
            }
        }
    }

    /// Synchronous core, run with the guard already held. This is also the
    /// execution path for queued commands inside EXEC, where the blocking
    /// commands degrade to their immediate variants.
    pub(crate) fn apply(self, state: &mut State) -> Frame {
        match self {
            Command::Ping(cmd) => cmd.apply(),
            Command::Echo(cmd) => cmd.apply(),
            Command::Info(cmd) => cmd.apply(state),
            Command::Set(cmd) => cmd.apply(state),
            Command::Get(cmd) => cmd.apply(state),
            Command::Del(cmd) => cmd.apply(state),
            Command::Incr(cmd) => cmd.apply(state),
            Command::Type(cmd) => cmd.apply(state),
            Command::Keys(cmd) => cmd.apply(state),
            Command::Select(cmd) => cmd.apply(state),
            Command::ConfigGet(cmd) => cmd.apply(state),
            Command::Save(cmd) => cmd.apply(state),
            Command::XAdd(cmd) => cmd.apply(state),
            Command::XRange(cmd) => cmd.apply(state),
            Command::XRead(cmd) => cmd.scan(state),
            Command::Wait(cmd) => cmd.count(state),
            Command::Multi(_) | Command::Exec(_) | Command::Discard(_) => {
                Frame::Error("ERR transaction control inside MULTI is not supported".to_string())
            }
            Command::Replconf(_) | Command::Psync(_) => {
                Frame::Error("ERR replication commands inside MULTI are not supported".to_string())
            }
        }
    }
}

impl TryFrom<Frame> for Command {
    type Error = Error;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        // Clients send commands as RESP arrays.
        let frames = match frame {
            Frame::Array(array) => array,
            frame => {
                return Err(Box::new(CommandParserError::InvalidFrame {
                    expected: "array".to_string(),
                    actual: frame,
                }))
            }
        };

        let parser = &mut CommandParser {
            parts: frames.into_iter(),
        };

        let command_name = parser.parse_command_name()?;

        match &command_name[..] {
            "ping" => Ping::try_from(parser).map(Command::Ping),
            "echo" => Echo::try_from(parser).map(Command::Echo),
            "info" => Info::try_from(parser).map(Command::Info),
            "set" => Set::try_from(parser).map(Command::Set),
            "get" => Get::try_from(parser).map(Command::Get),
            "del" => Del::try_from(parser).map(Command::Del),
            "incr" => Incr::try_from(parser).map(Command::Incr),
            "type" => Type::try_from(parser).map(Command::Type),
            "keys" => Keys::try_from(parser).map(Command::Keys),
            "select" => Select::try_from(parser).map(Command::Select),
            "config" => ConfigGet::try_from(parser).map(Command::ConfigGet),
            "save" => Save::try_from(parser).map(Command::Save),
            "xadd" => XAdd::try_from(parser).map(Command::XAdd),
            "xrange" => XRange::try_from(parser).map(Command::XRange),
            "xread" => XRead::try_from(parser).map(Command::XRead),
            "multi" => Multi::try_from(parser).map(Command::Multi),
            "exec" => Exec::try_from(parser).map(Command::Exec),
            "discard" => Discard::try_from(parser).map(Command::Discard),
            "replconf" => Replconf::try_from(parser).map(Command::Replconf),
            "psync" => Psync::try_from(parser).map(Command::Psync),
            "wait" => Wait::try_from(parser).map(Command::Wait),
            name => Err(format!("unknown command '{}'", name).into()),
        }
    }
}

pub(crate) struct CommandParser {
    parts: vec::IntoIter<Frame>,
}

impl CommandParser {
    fn parse_command_name(&mut self) -> Result<String, CommandParserError> {
        let command_name = self.parts.next().ok_or(CommandParserError::EndOfStream)?;

        match command_name {
            Frame::Simple(s) => Ok(s.to_lowercase()),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map(|s| s.to_lowercase())
                .map_err(CommandParserError::InvalidUTF8String),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple string".to_string(),
                actual: frame,
            }),
        }
    }

    pub(crate) fn next_string(&mut self) -> Result<String, CommandParserError> {
        let frame = self.parts.next().ok_or(CommandParserError::EndOfStream)?;

        match frame {
            // Both `Simple` and `Bulk` representations may be strings.
            Frame::Simple(s) => Ok(s),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map(|s| s.to_string())
                .map_err(CommandParserError::InvalidUTF8String),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    pub(crate) fn next_bytes(&mut self) -> Result<Bytes, CommandParserError> {
        let frame = self.parts.next().ok_or(CommandParserError::EndOfStream)?;

        match frame {
            Frame::Simple(s) => Ok(Bytes::from(s)),
            Frame::Bulk(bytes) => Ok(bytes),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum CommandParserError {
    #[error("protocol error; invalid frame, expected {expected}, got {actual}")]
    InvalidFrame { expected: String, actual: Frame },
    #[error("protocol error; invalid UTF-8 string")]
    InvalidUTF8String(#[from] str::Utf8Error),
    #[error("wrong number of arguments")]
    EndOfStream,
}
