use std::collections::TryReserveError;
use std::io;
use std::os::fd::RawFd;

use nix::errno::Errno;
use thiserror::Error;

/// Errors that stop a merge before it starts or abort it midway.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no file descriptors given")]
    NoSources,
    #[error("invalid file descriptor `{raw}`")]
    InvalidHandle { raw: String },
    #[error("file descriptor 1 is reserved for the merged output")]
    ReservedHandle,
    #[error("duplicate file descriptor `{0}` not allowed")]
    DuplicateHandle(RawFd),
    #[error("waiting for readable descriptors failed: {0}")]
    Wait(#[source] Errno),
    #[error("failed to write merged output: {0}")]
    Write(#[source] io::Error),
    #[error("failed to grow record buffer: {0}")]
    Alloc(#[from] TryReserveError),
}

impl MergeError {
    /// True for errors detected while validating handles, before any output.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            MergeError::NoSources
                | MergeError::InvalidHandle { .. }
                | MergeError::ReservedHandle
                | MergeError::DuplicateHandle(_)
        )
    }
}

/// Why a single source was closed abnormally.
#[derive(Debug, Error)]
pub enum SourceFault {
    #[error("I/O error")]
    Io,
    #[error("not pollable")]
    NotPollable,
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("close failed: {0}")]
    Close(#[source] Errno),
}

#[derive(Debug, Error)]
#[error("fd {handle}: {fault}")]
pub struct SourceFailure {
    pub handle: RawFd,
    #[source]
    pub fault: SourceFault,
}

impl SourceFailure {
    pub fn new(handle: RawFd, fault: SourceFault) -> Self {
        Self { handle, fault }
    }
}

/// Receives each per-source failure as soon as it is observed.
pub trait FailureSink {
    fn on_failure(&mut self, failure: &SourceFailure);
}
