use std::io::Write;

use crate::error::MergeError;

/// The single shared output stream.
///
/// Every write is complete or fatal: `Write::write_all` already retries
/// interrupted calls and short writes, and each logical write is flushed
/// before returning so records reach the consumer without delay.
pub struct OutputSink<W: Write> {
    writer: W,
    bytes_written: u64,
}

impl<W: Write> OutputSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            bytes_written: 0,
        }
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), MergeError> {
        self.write_parts(&[bytes])
    }

    /// Writes several slices as one logical operation; failure of any part
    /// fails the whole write.
    pub fn write_parts(&mut self, parts: &[&[u8]]) -> Result<(), MergeError> {
        for part in parts.iter().filter(|part| !part.is_empty()) {
            self.writer.write_all(part).map_err(MergeError::Write)?;
            self.bytes_written += part.len() as u64;
        }
        self.writer.flush().map_err(MergeError::Write)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}
