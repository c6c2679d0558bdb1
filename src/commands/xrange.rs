use bytes::Bytes;

use crate::commands::CommandParser;
use crate::frame::Frame;
use crate::store::State;
use crate::stream::{self, StreamId, StreamRecord};
use crate::Error;

/// Inclusive range scan over a stream. `-` and `+` alias the minimum and
/// maximum ids; a partial id fills in 0 at the start and the maximum at
/// the end.
///
/// Ref: <https://redis.io/docs/latest/commands/xrange>
#[derive(Debug, PartialEq)]
pub struct XRange {
    pub key: String,
    pub start: StreamId,
    pub end: StreamId,
}

impl XRange {
    pub fn apply(self, state: &mut State) -> Frame {
        match state.xrange(&self.key, self.start, self.end) {
            Ok(records) => Frame::Array(records.iter().map(record_frame).collect()),
            Err(e) => Frame::Error(e.to_string()),
        }
    }
}

/// `[id, [field, value, ...]]`, preserving field order within the entry.
pub(crate) fn record_frame(record: &StreamRecord) -> Frame {
    let mut pairs = Vec::with_capacity(record.fields.len() * 2);
    for (field, value) in &record.fields {
        pairs.push(Frame::Bulk(Bytes::copy_from_slice(field.as_bytes())));
        pairs.push(Frame::Bulk(Bytes::copy_from_slice(value.as_bytes())));
    }

    Frame::Array(vec![
        Frame::Bulk(Bytes::from(record.id.to_string())),
        Frame::Array(pairs),
    ])
}

impl TryFrom<&mut CommandParser> for XRange {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        let start = stream::parse_range_start(&parser.next_string()?)?;
        let end = stream::parse_range_end(&parser.next_string()?)?;

        Ok(Self { key, start, end })
    }
}
