use std::io::Write;

use crate::buffer::PendingBuffer;
use crate::config::TailPolicy;
use crate::error::MergeError;
use crate::sink::OutputSink;

/// Turns arbitrarily split chunks from one source into whole records.
///
/// Invariant: between calls a source's [`PendingBuffer`] never contains the
/// delimiter, so whatever it holds is the unfinished start of one record.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Reassembler {
    delimiter: u8,
    tail: TailPolicy,
}

impl Reassembler {
    pub fn new(delimiter: u8, tail: TailPolicy) -> Self {
        Self { delimiter, tail }
    }

    /// Feeds one freshly read chunk.
    ///
    /// Everything up to and including the last delimiter in `chunk` is written
    /// right after the pending bytes in a single logical write; the rest
    /// becomes the new pending record.
    pub fn ingest<W: Write>(
        &self,
        pending: &mut PendingBuffer,
        chunk: &[u8],
        sink: &mut OutputSink<W>,
    ) -> Result<(), MergeError> {
        let Some(last) = chunk.iter().rposition(|byte| *byte == self.delimiter) else {
            return pending.append(chunk);
        };

        let (complete, rest) = chunk.split_at(last + 1);
        pending.flush_with(sink, complete)?;
        pending.append(rest)
    }

    /// Applies the tail policy once the source has closed.
    pub fn finish<W: Write>(
        &self,
        pending: &mut PendingBuffer,
        sink: &mut OutputSink<W>,
    ) -> Result<(), MergeError> {
        if pending.is_empty() {
            return Ok(());
        }
        match self.tail {
            TailPolicy::Discard => {
                pending.clear();
                Ok(())
            }
            TailPolicy::Terminate => pending.flush_with(sink, &[self.delimiter]),
        }
    }
}
