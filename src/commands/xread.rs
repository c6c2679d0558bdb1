use std::time::Duration;

use bytes::Bytes;

use crate::commands::xrange::record_frame;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::{State, Store, StoreError};
use crate::stream::{self, StreamId, StreamRecord};
use crate::Error;

/// Reads entries strictly newer than a per-stream cutoff. `$` means "the
/// stream head at the moment of the call". With `BLOCK ms` the command
/// waits for appends up to the deadline; `BLOCK 0` and the plain form are
/// non-blocking probes.
///
/// Ref: <https://redis.io/docs/latest/commands/xread>
#[derive(Debug, PartialEq)]
pub struct XRead {
    pub block_ms: Option<u64>,
    /// `(stream key, cutoff)`; a `None` cutoff is `$`, resolved at call
    /// time.
    pub pairs: Vec<(String, Option<StreamId>)>,
}

impl XRead {
    pub async fn exec(self, store: &Store) -> Frame {
        // Subscribing before the first scan closes the wakeup race: an
        // append between scan and await still flips the channel.
        let mut appends = store.subscribe_streams();

        let resolved = {
            let mut state = store.lock();
            resolve(&mut state, &self.pairs)
        };

        let deadline = self
            .block_ms
            .filter(|ms| *ms > 0)
            .map(|ms| tokio::time::Instant::now() + Duration::from_millis(ms));

        loop {
            match collect(&mut store.lock(), &resolved) {
                Ok(captured) if !captured.is_empty() => return reply(captured),
                Ok(_) => {}
                Err(e) => return Frame::Error(e.to_string()),
            }

            let Some(deadline) = deadline else {
                return Frame::Null;
            };

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    return match collect(&mut store.lock(), &resolved) {
                        Ok(captured) if !captured.is_empty() => reply(captured),
                        Ok(_) => Frame::Null,
                        Err(e) => Frame::Error(e.to_string()),
                    };
                }
                changed = appends.changed() => {
                    if changed.is_err() {
                        return Frame::Null;
                    }
                    // Rescan on append.
                }
            }
        }
    }

    /// Immediate scan, used when the command runs inside EXEC.
    pub fn scan(self, state: &mut State) -> Frame {
        let resolved = resolve(state, &self.pairs);
        match collect(state, &resolved) {
            Ok(captured) if !captured.is_empty() => reply(captured),
            Ok(_) => Frame::Null,
            Err(e) => Frame::Error(e.to_string()),
        }
    }
}

fn resolve(state: &mut State, pairs: &[(String, Option<StreamId>)]) -> Vec<(String, StreamId)> {
    pairs
        .iter()
        .map(|(key, cutoff)| {
            let cutoff = cutoff.unwrap_or_else(|| state.stream_last_id(key));
            (key.clone(), cutoff)
        })
        .collect()
}

fn collect(
    state: &mut State,
    pairs: &[(String, StreamId)],
) -> Result<Vec<(String, Vec<StreamRecord>)>, StoreError> {
    let mut captured = Vec::new();
    for (key, cutoff) in pairs {
        let records = state.stream_entries_after(key, *cutoff)?;
        if !records.is_empty() {
            captured.push((key.clone(), records));
        }
    }
    Ok(captured)
}

/// `[[streamKey, [entry...]], ...]` over the streams that produced data.
fn reply(captured: Vec<(String, Vec<StreamRecord>)>) -> Frame {
    Frame::Array(
        captured
            .into_iter()
            .map(|(key, records)| {
                Frame::Array(vec![
                    Frame::Bulk(Bytes::from(key)),
                    Frame::Array(records.iter().map(record_frame).collect()),
                ])
            })
            .collect(),
    )
}

impl TryFrom<&mut CommandParser> for XRead {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let mut block_ms = None;

        loop {
            let word = parser.next_string()?;
            if word.eq_ignore_ascii_case("BLOCK") {
                let timeout = parser
                    .next_string()?
                    .parse::<u64>()
                    .map_err(|_| "timeout is not an integer or out of range")?;
                block_ms = Some(timeout);
            } else if word.eq_ignore_ascii_case("STREAMS") {
                break;
            } else {
                return Err(format!("unsupported XREAD option: {word}").into());
            }
        }

        // After STREAMS: the first half names streams, the second half
        // carries one cutoff per stream.
        let mut rest = vec![];
        loop {
            match parser.next_string() {
                Ok(token) => rest.push(token),
                Err(CommandParserError::EndOfStream) => break,
                Err(e) => return Err(e.into()),
            }
        }

        if rest.is_empty() || rest.len() % 2 != 0 {
            return Err(CommandParserError::EndOfStream.into());
        }

        let half = rest.len() / 2;
        let mut pairs = Vec::with_capacity(half);
        for i in 0..half {
            let cutoff = stream::parse_cutoff(&rest[half + i])?;
            pairs.push((rest[i].clone(), cutoff));
        }

        Ok(Self { block_ms, pairs })
    }
}
