use std::fs::File;
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg};
use tracing::debug;

use crate::buffer::PendingBuffer;
use crate::config::MergeConfig;
use crate::error::{MergeError, SourceFailure, SourceFault};

/// Descriptor number of the merged output; never accepted as a source.
pub const OUTPUT_HANDLE: RawFd = 1;

#[derive(Debug)]
pub enum SourceState {
    Open(File),
    Closed,
}

/// One input channel, identified by the descriptor number it was given as.
#[derive(Debug)]
pub struct Source {
    handle: RawFd,
    state: SourceState,
    pending: Option<PendingBuffer>,
}

impl Source {
    pub fn handle(&self) -> RawFd {
        self.handle
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SourceState::Open(_))
    }

    pub fn channel(&self) -> Option<&File> {
        match &self.state {
            SourceState::Open(file) => Some(file),
            SourceState::Closed => None,
        }
    }

    pub(crate) fn channel_mut(&mut self) -> Option<&mut File> {
        match &mut self.state {
            SourceState::Open(file) => Some(file),
            SourceState::Closed => None,
        }
    }

    /// Buffered partial record; `None` in raw mode.
    pub fn pending(&self) -> Option<&PendingBuffer> {
        self.pending.as_ref()
    }

    pub(crate) fn pending_mut(&mut self) -> Option<&mut PendingBuffer> {
        self.pending.as_mut()
    }

    /// Moves the source to `Closed` and releases its descriptor explicitly so
    /// that a failing close can be reported.
    pub(crate) fn release(&mut self) -> Result<(), SourceFault> {
        match std::mem::replace(&mut self.state, SourceState::Closed) {
            SourceState::Open(file) => match nix::unistd::close(file.into_raw_fd()) {
                Ok(()) | Err(Errno::EINTR) => Ok(()),
                Err(errno) => Err(SourceFault::Close(errno)),
            },
            SourceState::Closed => Ok(()),
        }
    }

    /// Moves the source to `Closed`, dropping its descriptor and pending bytes.
    pub(crate) fn abandon(&mut self) {
        self.state = SourceState::Closed;
        if let Some(pending) = self.pending.as_mut() {
            pending.clear();
        }
    }
}

/// Validates handle operands: decimal, non-negative, not the output
/// descriptor, and unique. Returns them sorted ascending.
pub fn parse_handles<S: AsRef<str>>(raw: &[S]) -> Result<Vec<RawFd>, MergeError> {
    let handles = raw
        .iter()
        .map(|value| parse_handle(value.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    validated(handles)
}

fn parse_handle(raw: &str) -> Result<RawFd, MergeError> {
    let handle = raw
        .parse::<RawFd>()
        .ok()
        .filter(|handle| *handle >= 0)
        .ok_or_else(|| MergeError::InvalidHandle {
            raw: raw.to_string(),
        })?;
    if handle == OUTPUT_HANDLE {
        return Err(MergeError::ReservedHandle);
    }
    Ok(handle)
}

/// All sources of one run, in ascending handle order.
#[derive(Debug)]
pub struct SourceTable {
    sources: Vec<Source>,
}

impl SourceTable {
    /// Takes ownership of every handle that names an open descriptor.
    ///
    /// Handles that are not open, including standard descriptors the runtime
    /// reopened after finding them closed, become closed sources right away
    /// and are returned as failures.
    pub fn acquire(
        handles: Vec<RawFd>,
        config: &MergeConfig,
    ) -> Result<(Self, Vec<SourceFailure>), MergeError> {
        let handles = validated(handles)?;
        let mut failures = Vec::new();
        let sources = handles
            .into_iter()
            .map(|handle| {
                let pending = config
                    .mode
                    .is_delimited()
                    .then(|| PendingBuffer::new(config.limits.page_bytes, config.growth));
                let opened = !config.closed_stdio.contains(handle)
                    && fcntl(handle, FcntlArg::F_GETFD).is_ok();
                let state = if opened {
                    SourceState::Open(File::from(adopt(handle)))
                } else {
                    failures.push(SourceFailure::new(handle, SourceFault::NotPollable));
                    SourceState::Closed
                };
                debug!(
                    fd = handle,
                    open = matches!(state, SourceState::Open(_)),
                    "acquired source"
                );
                Source {
                    handle,
                    state,
                    pending,
                }
            })
            .collect();
        Ok((Self { sources }, failures))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn open_count(&self) -> usize {
        self.sources.iter().filter(|source| source.is_open()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Source> {
        self.sources.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Source> {
        self.sources.get_mut(index)
    }
}

fn validated(mut handles: Vec<RawFd>) -> Result<Vec<RawFd>, MergeError> {
    if handles.is_empty() {
        return Err(MergeError::NoSources);
    }
    if let Some(handle) = handles.iter().find(|handle| **handle < 0) {
        return Err(MergeError::InvalidHandle {
            raw: handle.to_string(),
        });
    }
    if handles.contains(&OUTPUT_HANDLE) {
        return Err(MergeError::ReservedHandle);
    }
    handles.sort_unstable();
    if let Some(pair) = handles.windows(2).find(|pair| pair[0] == pair[1]) {
        return Err(MergeError::DuplicateHandle(pair[0]));
    }
    Ok(handles)
}

#[allow(unsafe_code)]
fn adopt(handle: RawFd) -> OwnedFd {
    // SAFETY: the handle was checked to be open, is unique within the table,
    // and was handed to this process for its exclusive use.
    unsafe { OwnedFd::from_raw_fd(handle) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::stdio::ClosedStdio;

    #[test]
    fn handles_are_sorted() {
        assert_eq!(parse_handles(&["7", "0", "3"]).unwrap(), vec![0, 3, 7]);
    }

    #[test]
    fn output_handle_is_reserved() {
        assert!(matches!(
            parse_handles(&["3", "1"]),
            Err(MergeError::ReservedHandle)
        ));
    }

    #[test]
    fn stderr_handle_is_accepted() {
        assert_eq!(parse_handles(&["2"]).unwrap(), vec![2]);
    }

    #[test]
    fn duplicates_are_rejected_after_sorting() {
        let err = parse_handles(&["5", "3", "5"]).unwrap_err();
        assert!(matches!(err, MergeError::DuplicateHandle(5)));
        assert!(err.is_usage());
    }

    #[test]
    fn malformed_handles_are_rejected() {
        for raw in ["-3", "abc", "", "3x", " 3", "99999999999"] {
            let err = parse_handles(&[raw]).unwrap_err();
            assert!(
                matches!(err, MergeError::InvalidHandle { raw: ref r } if r == raw),
                "{raw:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn no_handles_is_an_error() {
        let none: [&str; 0] = [];
        assert!(matches!(parse_handles(&none), Err(MergeError::NoSources)));
    }

    #[test]
    fn acquire_rejects_what_parsing_would() {
        let config = MergeConfig::default();
        assert!(matches!(
            SourceTable::acquire(vec![4, 1], &config),
            Err(MergeError::ReservedHandle)
        ));
        assert!(matches!(
            SourceTable::acquire(vec![9, 9], &config),
            Err(MergeError::DuplicateHandle(9))
        ));
        assert!(matches!(
            SourceTable::acquire(Vec::new(), &config),
            Err(MergeError::NoSources)
        ));
    }

    #[test]
    fn unopened_handle_becomes_a_closed_source() {
        let (table, failures) =
            SourceTable::acquire(vec![999_983], &MergeConfig::default()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.open_count(), 0);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].handle, 999_983);
        assert!(matches!(failures[0].fault, SourceFault::NotPollable));
    }

    #[test]
    fn stdio_closed_at_startup_is_not_adopted() {
        let config = MergeConfig {
            closed_stdio: ClosedStdio::from_bits(0b001),
            ..MergeConfig::new(Mode::delimited(b'\n'))
        };
        let (table, failures) = SourceTable::acquire(vec![0], &config).unwrap();

        assert!(!table.is_empty());
        let stdin = table.get(0).unwrap();
        assert_eq!(stdin.handle(), 0);
        assert!(!stdin.is_open());
        assert!(stdin.pending().is_some_and(PendingBuffer::is_empty));
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].fault, SourceFault::NotPollable));
    }
}
