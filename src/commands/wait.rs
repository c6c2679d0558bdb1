use crate::commands::CommandParser;
use crate::frame::Frame;
use crate::replication;
use crate::store::{State, Store};
use crate::Error;

/// Barrier over the follower set: probes every follower with `REPLCONF
/// GETACK *` and replies with how many acknowledged their expected offset
/// at or before the deadline. The requested follower count is accepted but
/// does not cut the wait short.
///
/// Ref: <https://redis.io/docs/latest/commands/wait>
#[derive(Debug, PartialEq)]
pub struct Wait {
    pub numreplicas: i64,
    pub timeout_ms: u64,
}

impl Wait {
    pub async fn exec(self, store: &Store) -> Frame {
        let acked = replication::wait_for_acks(store, self.timeout_ms).await;
        Frame::Integer(acked)
    }

    /// Immediate count, used when the command runs inside EXEC.
    pub fn count(self, state: &mut State) -> Frame {
        let acked = state
            .followers
            .values()
            .filter(|follower| follower.acked_offset >= follower.expected_offset)
            .count();
        Frame::Integer(acked as i64)
    }
}

impl TryFrom<&mut CommandParser> for Wait {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let numreplicas = parser
            .next_string()?
            .parse::<i64>()
            .map_err(|_| "value is not an integer or out of range")?;
        let timeout_ms = parser
            .next_string()?
            .parse::<u64>()
            .map_err(|_| "timeout is negative")?;

        Ok(Self {
            numreplicas,
            timeout_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::Config;

    #[test]
    fn parses_count_and_timeout() {
        let cmd = Command::try_from(Frame::command(&["WAIT", "2", "500"])).unwrap();
        assert_eq!(
            cmd,
            Command::Wait(Wait {
                numreplicas: 2,
                timeout_ms: 500,
            })
        );
    }

    #[test]
    fn rejects_negative_timeout() {
        let err = Command::try_from(Frame::command(&["WAIT", "2", "-1"]))
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "timeout is negative");
    }

    #[tokio::test]
    async fn no_followers_returns_zero_immediately() {
        let store = Store::new(&Config::default());
        let wait = Wait {
            numreplicas: 3,
            timeout_ms: 60_000,
        };

        // Must not consume the timeout when the follower set is empty.
        let started = std::time::Instant::now();
        assert_eq!(wait.exec(&store).await, Frame::Integer(0));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }
}
