use std::time::{Duration, SystemTime};

use bytes::Bytes;

use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::State;
use crate::Error;

/// Stores a string value, overwriting any previous entry. `EX seconds` and
/// `PX millis` attach a relative expiry; when both appear the later one
/// wins. A non-positive duration stores the entry without an expiry.
///
/// Ref: <https://redis.io/docs/latest/commands/set>
#[derive(Debug, PartialEq)]
pub struct Set {
    pub key: String,
    pub value: Bytes,
    pub expire: Option<Duration>,
}

impl Set {
    pub fn apply(self, state: &mut State) -> Frame {
        let expires_at = self.expire.map(|ttl| SystemTime::now() + ttl);
        state.set(self.key, self.value, expires_at);
        Frame::Simple("OK".to_string())
    }
}

impl TryFrom<&mut CommandParser> for Set {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        let value = parser.next_bytes()?;
        let mut expire = None;

        loop {
            let option = match parser.next_string() {
                Ok(option) => option,
                Err(CommandParserError::EndOfStream) => break,
                Err(e) => return Err(e.into()),
            };

            let is_px = option.eq_ignore_ascii_case("PX");
            if !is_px && !option.eq_ignore_ascii_case("EX") {
                // Unrecognized options are skipped.
                continue;
            }

            let amount = parser
                .next_string()?
                .parse::<i64>()
                .map_err(|_| "value is not an integer or out of range")?;

            expire = (amount > 0).then(|| {
                if is_px {
                    Duration::from_millis(amount as u64)
                } else {
                    Duration::from_secs(amount as u64)
                }
            });
        }

        Ok(Self { key, value, expire })
    }
}
