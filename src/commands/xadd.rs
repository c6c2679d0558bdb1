use bytes::Bytes;

use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::State;
use crate::stream::{self, IdSpec};
use crate::Error;

/// Appends an entry to a stream, creating the stream on first use. The id
/// argument is `ms-seq`, `ms-*`, or `*`; auto parts derive from the clock
/// and the stream head.
///
/// Ref: <https://redis.io/docs/latest/commands/xadd>
#[derive(Debug, PartialEq)]
pub struct XAdd {
    pub key: String,
    pub id: IdSpec,
    pub fields: Vec<(String, String)>,
}

impl XAdd {
    pub fn apply(self, state: &mut State) -> Frame {
        match state.xadd(&self.key, self.id, self.fields, stream::now_ms()) {
            Ok(id) => Frame::Bulk(Bytes::from(id.to_string())),
            Err(e) => Frame::Error(e.to_string()),
        }
    }
}

impl TryFrom<&mut CommandParser> for XAdd {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        let id = IdSpec::parse(&parser.next_string()?)?;

        let mut fields = vec![];
        loop {
            let field = match parser.next_string() {
                Ok(field) => field,
                Err(CommandParserError::EndOfStream) if !fields.is_empty() => break,
                Err(e) => return Err(e.into()),
            };
            // A field without a value is an arity error.
            let value = parser.next_string()?;
            fields.push((field, value));
        }

        Ok(Self { key, id, fields })
    }
}
