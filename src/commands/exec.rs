use bytes::Bytes;

use crate::commands::{Command, CommandParser};
use crate::connection::Session;
use crate::frame::Frame;
use crate::replication;
use crate::store::Store;
use crate::Error;

/// Runs the queued transaction. The coordination guard is held across the
/// whole batch, so no other connection observes an intermediate state.
/// Queued frames are only converted to commands here, which is where
/// arity and argument errors surface.
///
/// Ref: <https://redis.io/docs/latest/commands/exec>
#[derive(Debug, PartialEq)]
pub struct Exec;

impl Exec {
    pub fn exec(self, store: &Store, session: &mut Session) -> Frame {
        let Some(queued) = session.txn.take() else {
            return Frame::Error("ERR EXEC without MULTI".to_string());
        };

        if queued.is_empty() {
            return Frame::Array(vec![]);
        }

        let mut replies = Vec::with_capacity(queued.len());
        let mut stream_appended = false;

        {
            let mut state = store.lock();

            for frame in queued {
                // Re-serialization is deterministic, so followers receive
                // the same bytes a direct dispatch would have propagated.
                let raw = Bytes::from(frame.serialize());

                let cmd = match Command::try_from(frame) {
                    Ok(cmd) => cmd,
                    Err(e) => {
                        replies.push(Frame::Error(format!("ERR {e}")));
                        continue;
                    }
                };

                let replicate = cmd.is_write();
                let is_xadd = matches!(cmd, Command::XAdd(_));

                let reply = cmd.apply(&mut state);
                let failed = matches!(reply, Frame::Error(_));

                if replicate && !failed {
                    replication::propagate(&mut state, &raw);
                }
                stream_appended |= is_xadd && !failed;

                replies.push(reply);
            }
        }

        if stream_appended {
            store.notify_stream_append();
        }

        Frame::Array(replies)
    }
}

impl TryFrom<&mut CommandParser> for Exec {
    type Error = Error;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}
