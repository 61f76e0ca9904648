use std::io::{self, Write};
use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg};

/// The standard descriptors (0, 1, 2) that were closed when the program was
/// started.
///
/// The Rust runtime reopens closed standard descriptors on `/dev/null` before
/// `main`, so this has to be captured earlier (from a constructor) and handed
/// over explicitly.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ClosedStdio(u8);

impl ClosedStdio {
    /// Checks descriptors 0 to 2 right now.
    pub fn detect() -> Self {
        let bits = (0..=2)
            .filter(|fd| matches!(fcntl(*fd, FcntlArg::F_GETFD), Err(Errno::EBADF)))
            .fold(0u8, |bits, fd| bits | 1 << fd);
        Self(bits)
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0b111)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, handle: RawFd) -> bool {
        (0..=2).contains(&handle) && self.0 & (1 << handle) != 0
    }
}

/// Stands in for an output descriptor that was closed at startup: every write
/// fails with `EBADF`, as it would have on the real descriptor.
#[derive(Debug, Default)]
pub struct ClosedOutput;

impl Write for ClosedOutput {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::from_raw_os_error(Errno::EBADF as i32))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
