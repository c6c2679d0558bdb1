use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error as ThisError;

/// Identifier of one stream entry: a milliseconds timestamp plus a sequence
/// number disambiguating entries within the same millisecond. Ordering is
/// lexicographic on the pair. `0-0` is reserved and never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

pub const ZERO_ID: StreamId = StreamId { ms: 0, seq: 0 };
pub const MAX_ID: StreamId = StreamId {
    ms: u64::MAX,
    seq: u64::MAX,
};

impl StreamId {
    pub fn new(ms: u64, seq: u64) -> StreamId {
        StreamId { ms, seq }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum IdError {
    #[error("The ID specified in XADD must be greater than 0-0")]
    ReservedZero,
    #[error("The ID specified in XADD is equal or smaller than the target stream top item")]
    NotMonotonic,
    #[error("Invalid stream ID specified as stream command argument")]
    Malformed,
}

/// The id argument accepted by XADD: fully explicit, explicit milliseconds
/// with an auto-generated sequence, or fully auto-generated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IdSpec {
    Auto,
    AutoSeq { ms: u64 },
    Explicit(StreamId),
}

impl IdSpec {
    pub fn parse(raw: &str) -> Result<IdSpec, IdError> {
        if raw == "*" {
            return Ok(IdSpec::Auto);
        }

        let (ms_part, seq_part) = split_id(raw);
        let ms = ms_part.parse::<u64>().map_err(|_| IdError::Malformed)?;

        match seq_part {
            // A bare milliseconds part auto-generates the sequence.
            None | Some("*") => Ok(IdSpec::AutoSeq { ms }),
            Some(seq) => {
                let seq = seq.parse::<u64>().map_err(|_| IdError::Malformed)?;
                Ok(IdSpec::Explicit(StreamId::new(ms, seq)))
            }
        }
    }
}

fn split_id(raw: &str) -> (&str, Option<&str>) {
    match raw.split_once('-') {
        Some((ms, seq)) => (ms, Some(seq)),
        None => (raw, None),
    }
}

/// Parses an XRANGE boundary. `-` and `+` alias the minimum and maximum
/// ids; a missing sequence defaults to 0 at the start of a range and to the
/// maximum at its end.
pub fn parse_range_start(raw: &str) -> Result<StreamId, IdError> {
    if raw == "-" {
        return Ok(ZERO_ID);
    }
    parse_bound(raw, 0)
}

pub fn parse_range_end(raw: &str) -> Result<StreamId, IdError> {
    if raw == "+" {
        return Ok(MAX_ID);
    }
    parse_bound(raw, u64::MAX)
}

/// Parses an XREAD cutoff. `$` means "whatever the stream's last id is at
/// the moment of the call" and is resolved by the caller.
pub fn parse_cutoff(raw: &str) -> Result<Option<StreamId>, IdError> {
    if raw == "$" {
        return Ok(None);
    }
    Ok(Some(parse_bound(raw, 0)?))
}

fn parse_bound(raw: &str, default_seq: u64) -> Result<StreamId, IdError> {
    let (ms_part, seq_part) = split_id(raw);
    let ms = ms_part.parse::<u64>().map_err(|_| IdError::Malformed)?;
    let seq = match seq_part {
        Some(seq) => seq.parse::<u64>().map_err(|_| IdError::Malformed)?,
        None => default_seq,
    };
    Ok(StreamId::new(ms, seq))
}

/// One appended entry. Field order is preserved as given to XADD.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRecord {
    pub id: StreamId,
    pub fields: Vec<(String, String)>,
}

/// An append-only stream. Entries are strictly increasing in id and
/// `last_id` always matches the most recent entry (`0-0` when empty).
#[derive(Clone, Debug, PartialEq)]
pub struct Stream {
    pub entries: Vec<StreamRecord>,
    pub last_id: StreamId,
}

impl Stream {
    pub fn new() -> Stream {
        Stream {
            entries: Vec::new(),
            last_id: ZERO_ID,
        }
    }

    /// Resolves `spec` against the stream head and validates it, following
    /// the XADD rules: auto parts derive from `now_ms` and the last id, the
    /// reserved `0-0` is rejected, and ids must grow strictly.
    pub fn next_id(&self, spec: IdSpec, now_ms: u64) -> Result<StreamId, IdError> {
        let id = match spec {
            IdSpec::Auto => {
                let ms = now_ms;
                StreamId::new(ms, self.auto_seq(ms))
            }
            IdSpec::AutoSeq { ms } => StreamId::new(ms, self.auto_seq(ms)),
            IdSpec::Explicit(id) => id,
        };

        if id == ZERO_ID {
            return Err(IdError::ReservedZero);
        }

        if id <= self.last_id {
            return Err(IdError::NotMonotonic);
        }

        Ok(id)
    }

    fn auto_seq(&self, ms: u64) -> u64 {
        if ms == self.last_id.ms {
            self.last_id.seq + 1
        } else {
            0
        }
    }

    /// Appends a validated entry. Callers must have obtained `id` from
    /// [`Stream::next_id`].
    pub fn add(&mut self, id: StreamId, fields: Vec<(String, String)>) {
        self.entries.push(StreamRecord { id, fields });
        self.last_id = id;
    }

    /// Entries with `start <= id <= end`, in order.
    pub fn range(&self, start: StreamId, end: StreamId) -> impl Iterator<Item = &StreamRecord> {
        self.entries
            .iter()
            .filter(move |record| record.id >= start && record.id <= end)
    }

    /// Entries strictly greater than `cutoff`, in order.
    pub fn after(&self, cutoff: StreamId) -> impl Iterator<Item = &StreamRecord> {
        self.entries.iter().filter(move |record| record.id > cutoff)
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

/// Wall-clock milliseconds used for auto-generated ids.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<(String, String)> {
        vec![("temperature".to_string(), "36".to_string())]
    }

    #[test]
    fn id_ordering_is_lexicographic() {
        assert!(StreamId::new(1, 0) > StreamId::new(0, 99));
        assert!(StreamId::new(1, 1) > StreamId::new(1, 0));
        assert!(StreamId::new(2, 0) > StreamId::new(1, u64::MAX));
    }

    #[test]
    fn id_display() {
        assert_eq!(StreamId::new(1526985054069, 3).to_string(), "1526985054069-3");
    }

    #[test]
    fn parse_spec_variants() {
        assert_eq!(IdSpec::parse("*"), Ok(IdSpec::Auto));
        assert_eq!(IdSpec::parse("5-*"), Ok(IdSpec::AutoSeq { ms: 5 }));
        assert_eq!(IdSpec::parse("5"), Ok(IdSpec::AutoSeq { ms: 5 }));
        assert_eq!(
            IdSpec::parse("5-7"),
            Ok(IdSpec::Explicit(StreamId::new(5, 7)))
        );
        assert_eq!(IdSpec::parse("five"), Err(IdError::Malformed));
        assert_eq!(IdSpec::parse("5-x"), Err(IdError::Malformed));
    }

    #[test]
    fn rejects_reserved_zero() {
        let stream = Stream::new();
        let err = stream
            .next_id(IdSpec::Explicit(ZERO_ID), 0)
            .unwrap_err();
        assert_eq!(err, IdError::ReservedZero);
    }

    #[test]
    fn rejects_non_monotonic() {
        let mut stream = Stream::new();
        stream.add(StreamId::new(5, 5), fields());

        for spec in ["5-5", "5-4", "4-9"] {
            let spec = IdSpec::parse(spec).unwrap();
            assert_eq!(stream.next_id(spec, 0), Err(IdError::NotMonotonic));
        }
    }

    #[test]
    fn auto_seq_increments_within_same_millisecond() {
        let mut stream = Stream::new();
        stream.add(StreamId::new(5, 5), fields());

        let id = stream.next_id(IdSpec::AutoSeq { ms: 5 }, 0).unwrap();
        assert_eq!(id, StreamId::new(5, 6));

        let id = stream.next_id(IdSpec::AutoSeq { ms: 6 }, 0).unwrap();
        assert_eq!(id, StreamId::new(6, 0));
    }

    #[test]
    fn auto_seq_on_empty_stream_avoids_zero_zero() {
        // `0-*` on a fresh stream resolves to 0-1; 0-0 stays reserved.
        let stream = Stream::new();
        let id = stream.next_id(IdSpec::AutoSeq { ms: 0 }, 0).unwrap();
        assert_eq!(id, StreamId::new(0, 1));
    }

    #[test]
    fn fully_auto_uses_clock() {
        let mut stream = Stream::new();
        let id = stream.next_id(IdSpec::Auto, 1000).unwrap();
        assert_eq!(id, StreamId::new(1000, 0));
        stream.add(id, fields());

        // Same clock tick bumps the sequence.
        let id = stream.next_id(IdSpec::Auto, 1000).unwrap();
        assert_eq!(id, StreamId::new(1000, 1));
    }

    #[test]
    fn range_bounds() {
        assert_eq!(parse_range_start("-").unwrap(), ZERO_ID);
        assert_eq!(parse_range_end("+").unwrap(), MAX_ID);
        assert_eq!(parse_range_start("5").unwrap(), StreamId::new(5, 0));
        assert_eq!(parse_range_end("5").unwrap(), StreamId::new(5, u64::MAX));
        assert_eq!(parse_range_start("5-2").unwrap(), StreamId::new(5, 2));
    }

    #[test]
    fn range_is_inclusive() {
        let mut stream = Stream::new();
        for seq in 1..=5 {
            stream.add(StreamId::new(0, seq), fields());
        }

        let captured: Vec<_> = stream
            .range(StreamId::new(0, 2), StreamId::new(0, 4))
            .map(|r| r.id.seq)
            .collect();
        assert_eq!(captured, vec![2, 3, 4]);
    }

    #[test]
    fn after_is_exclusive() {
        let mut stream = Stream::new();
        for seq in 1..=3 {
            stream.add(StreamId::new(0, seq), fields());
        }

        let captured: Vec<_> = stream
            .after(StreamId::new(0, 1))
            .map(|r| r.id.seq)
            .collect();
        assert_eq!(captured, vec![2, 3]);
    }

    #[test]
    fn cutoff_dollar_is_latest() {
        assert_eq!(parse_cutoff("$").unwrap(), None);
        assert_eq!(parse_cutoff("7-1").unwrap(), Some(StreamId::new(7, 1)));
        assert_eq!(parse_cutoff("7").unwrap(), Some(StreamId::new(7, 0)));
    }

    #[test]
    fn entries_stay_strictly_increasing() {
        // Invariant check across a mixed sequence of accepted XADDs.
        let mut stream = Stream::new();
        let specs = ["1-1", "1-*", "3", "*", "5-0"];
        for raw in specs {
            let spec = IdSpec::parse(raw).unwrap();
            if let Ok(id) = stream.next_id(spec, 4) {
                stream.add(id, fields());
            }
        }

        for pair in stream.entries.windows(2) {
            assert!(pair[0].id < pair[1].id);
        }
        assert_eq!(stream.last_id, stream.entries.last().unwrap().id);
    }
}
