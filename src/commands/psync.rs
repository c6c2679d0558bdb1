use bytes::Bytes;
use tracing::info;

use crate::commands::CommandParser;
use crate::connection::{self, Session};
use crate::frame::Frame;
use crate::snapshot;
use crate::store::Store;
use crate::Error;

/// Full-resync request from a registered follower. The reply is two
/// frames: the FULLRESYNC header, then a snapshot of the live databases.
/// From here on the connection doubles as the follower's write stream.
#[derive(Debug, PartialEq)]
pub struct Psync {
    pub repl_id: String,
    pub offset: String,
}

impl Psync {
    pub fn exec(self, store: &Store, session: &mut Session) -> crate::Result<Option<Frame>> {
        let mut state = store.lock();
        let baseline = state.self_offset;

        let Some(follower) = state.followers.get_mut(&session.addr) else {
            return Ok(Some(Frame::Error(
                "ERR PSYNC from an unregistered follower".to_string(),
            )));
        };

        // The replica picks up `baseline` from the FULLRESYNC header and
        // reports absolute offsets in its ACKs from then on. Seeding both
        // counters here keeps them in that frame; registration time is too
        // early, since the offset can move between REPLCONF and PSYNC.
        follower.expected_offset = baseline;
        follower.acked_offset = baseline;

        let header = Frame::Simple(format!("FULLRESYNC {} {}", state.repl_id, baseline));
        let transfer = Frame::Snapshot(Bytes::from(snapshot::encode(&state.databases)));

        // Both frames go through the connection's writer so nothing can
        // interleave between header and payload.
        connection::send(&session.outbound, &header);
        connection::send(&session.outbound, &transfer);

        info!("started full resync for follower {}", session.addr);
        Ok(None)
    }
}

impl TryFrom<&mut CommandParser> for Psync {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let repl_id = parser.next_string()?;
        let offset = parser.next_string()?;
        Ok(Self { repl_id, offset })
    }
}
