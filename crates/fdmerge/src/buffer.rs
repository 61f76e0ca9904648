use std::io::Write;

use crate::config::GrowthPolicy;
use crate::error::MergeError;
use crate::sink::OutputSink;

/// Bytes of one source's not-yet-terminated record.
///
/// Storage is allocated in whole pages, grown per [`GrowthPolicy`], and only
/// ever released as a whole by a flush or [`PendingBuffer::clear`].
#[derive(Debug)]
pub struct PendingBuffer {
    bytes: Vec<u8>,
    capacity: usize,
    page_bytes: usize,
    growth: GrowthPolicy,
}

impl PendingBuffer {
    pub fn new(page_bytes: usize, growth: GrowthPolicy) -> Self {
        Self {
            bytes: Vec::new(),
            capacity: 0,
            page_bytes,
            growth,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reserved storage in bytes; zero after a release.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn append(&mut self, data: &[u8]) -> Result<(), MergeError> {
        if data.is_empty() {
            return Ok(());
        }
        let required = self.bytes.len() + data.len();
        if required > self.capacity {
            let target = self
                .growth
                .capacity_for(required, self.capacity, self.page_bytes);
            self.bytes.try_reserve_exact(target - self.bytes.len())?;
            self.capacity = target;
        }
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    /// Writes the buffered bytes and then `trailer` as one logical write, and
    /// releases the storage whether or not the write succeeded.
    pub fn flush_with<W: Write>(
        &mut self,
        sink: &mut OutputSink<W>,
        trailer: &[u8],
    ) -> Result<(), MergeError> {
        let result = sink.write_parts(&[self.bytes.as_slice(), trailer]);
        self.clear();
        result
    }

    /// Writes the buffered bytes unchanged, then releases the storage.
    pub fn flush_and_clear<W: Write>(&mut self, sink: &mut OutputSink<W>) -> Result<(), MergeError> {
        self.flush_with(sink, &[])
    }

    pub fn clear(&mut self) {
        self.bytes = Vec::new();
        self.capacity = 0;
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    struct Refuse;

    impl Write for Refuse {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn capacity_tracks_the_new_length_not_the_old_capacity() {
        let mut buf = PendingBuffer::new(4096, GrowthPolicy::PageExact);
        buf.append(b"abc").unwrap();
        assert_eq!(buf.capacity(), 4096);

        buf.append(&[b'x'; 4093]).unwrap();
        assert_eq!(buf.len(), 4096);
        assert_eq!(buf.capacity(), 4096);

        buf.append(b"y").unwrap();
        assert_eq!(buf.capacity(), 8192);

        buf.append(&[b'z'; 10_000]).unwrap();
        assert_eq!(buf.len(), 14_097);
        assert_eq!(buf.capacity(), 16_384);
    }

    #[test]
    fn doubling_growth_stays_page_aligned() {
        let mut buf = PendingBuffer::new(4096, GrowthPolicy::Doubling);
        buf.append(&[0; 5000]).unwrap();
        assert_eq!(buf.capacity(), 8192);
        buf.append(&[0; 4000]).unwrap();
        assert_eq!(buf.capacity(), 16_384);
    }

    #[test]
    fn flush_writes_content_then_releases_storage() {
        let mut sink = OutputSink::new(Vec::new());
        let mut buf = PendingBuffer::new(4096, GrowthPolicy::PageExact);
        buf.append(b"partial").unwrap();
        buf.flush_with(&mut sink, b"\n").unwrap();

        assert_eq!(sink.get_ref(), b"partial\n");
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 0);
    }

    #[test]
    fn flush_and_clear_writes_content_without_trailer() {
        let mut sink = OutputSink::new(Vec::new());
        let mut buf = PendingBuffer::new(4096, GrowthPolicy::PageExact);
        buf.append(&[b'r'; 5000]).unwrap();
        assert_eq!(buf.capacity(), 8192);

        buf.flush_and_clear(&mut sink).unwrap();
        assert_eq!(sink.get_ref().len(), 5000);
        assert!(sink.get_ref().iter().all(|byte| *byte == b'r'));
        assert_eq!(sink.bytes_written(), 5000);
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 0);
    }

    #[test]
    fn failed_flush_still_releases_storage() {
        let mut sink = OutputSink::new(Refuse);
        let mut buf = PendingBuffer::new(4096, GrowthPolicy::PageExact);
        buf.append(b"lost").unwrap();

        let err = buf.flush_and_clear(&mut sink).unwrap_err();
        assert!(matches!(err, MergeError::Write(_)));
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 0);
    }

    #[test]
    fn clear_is_safe_on_an_empty_buffer() {
        let mut buf = PendingBuffer::new(4096, GrowthPolicy::PageExact);
        buf.clear();
        buf.append(b"gone").unwrap();
        buf.clear();
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 0);
    }

    #[test]
    fn empty_append_allocates_nothing() {
        let mut buf = PendingBuffer::new(4096, GrowthPolicy::PageExact);
        buf.append(b"").unwrap();
        assert_eq!(buf.capacity(), 0);
    }
}
