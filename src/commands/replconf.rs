use tracing::debug;

use crate::commands::{CommandParser, CommandParserError};
use crate::connection::Session;
use crate::frame::Frame;
use crate::replication::Follower;
use crate::store::Store;
use crate::Error;

/// Replication-link configuration. `listening-port` registers the peer as
/// a follower, `capa` records its capabilities, `ACK` reports its applied
/// offset (and never gets a reply), `GETACK` asks for one.
#[derive(Debug, PartialEq)]
pub struct Replconf {
    pub args: Vec<String>,
}

impl Replconf {
    pub fn is_getack(&self) -> bool {
        self.args
            .first()
            .is_some_and(|arg| arg.eq_ignore_ascii_case("GETACK"))
    }

    pub fn exec(self, store: &Store, session: &mut Session) -> crate::Result<Option<Frame>> {
        let Some(subcommand) = self.args.first() else {
            return Ok(Some(Frame::Error(
                "ERR wrong number of arguments".to_string(),
            )));
        };

        if subcommand.eq_ignore_ascii_case("listening-port") {
            let Some(port) = self.args.get(1).and_then(|p| p.parse::<u16>().ok()) else {
                return Ok(Some(Frame::Error(
                    "ERR invalid listening-port".to_string(),
                )));
            };

            let mut state = store.lock();
            let follower = state
                .followers
                .entry(session.addr)
                .or_insert_with(|| Follower::new(session.outbound.clone()));
            follower.listening_port = port;
            debug!("registered follower {} (listening on {port})", session.addr);

            return Ok(Some(Frame::Simple("OK".to_string())));
        }

        if subcommand.eq_ignore_ascii_case("capa") {
            let mut state = store.lock();
            let Some(follower) = state.followers.get_mut(&session.addr) else {
                return Ok(Some(Frame::Error(
                    "ERR no follower registered for this connection".to_string(),
                )));
            };

            // Capabilities arrive as repeated pairs: `capa psync2 capa eof`.
            for pair in self.args.chunks(2) {
                if let [word, capability] = pair {
                    if word.eq_ignore_ascii_case("capa") {
                        follower.capabilities.push(capability.clone());
                    }
                }
            }

            return Ok(Some(Frame::Simple("OK".to_string())));
        }

        if subcommand.eq_ignore_ascii_case("ACK") {
            let Some(offset) = self.args.get(1).and_then(|o| o.parse::<u64>().ok()) else {
                debug!("discarding malformed ACK from {}", session.addr);
                return Ok(None);
            };

            {
                let mut state = store.lock();
                if let Some(follower) = state.followers.get_mut(&session.addr) {
                    follower.acked_offset = offset;
                }
            }
            store.notify_ack();

            // ACKs are one-way.
            return Ok(None);
        }

        if subcommand.eq_ignore_ascii_case("GETACK") {
            let offset = store.lock().self_offset.to_string();
            return Ok(Some(Frame::command(&["REPLCONF", "ACK", &offset])));
        }

        Ok(Some(Frame::Error(format!(
            "ERR unsupported REPLCONF option: {subcommand}"
        ))))
    }
}

impl TryFrom<&mut CommandParser> for Replconf {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let mut args = vec![];

        loop {
            match parser.next_string() {
                Ok(arg) => args.push(arg),
                Err(CommandParserError::EndOfStream) if !args.is_empty() => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Self { args })
    }
}
