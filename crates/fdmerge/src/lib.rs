#![deny(unsafe_code)]
//! Merge the byte streams of several inherited, readable descriptors into one
//! output stream.
//!
//! Two modes are supported:
//! - raw: chunks are forwarded as soon as they are read.
//! - delimited: each source is reassembled into delimiter-terminated records
//!   so a record from one source is never spliced with part of another's.
//!
//! The loop is single-threaded and level-triggered; the only blocking point is
//! the readiness wait across all open sources.

mod buffer;
mod config;
mod error;
mod merge;
mod reassembler;
mod sink;
mod source;
mod stdio;

pub use buffer::PendingBuffer;
pub use config::{
    GrowthPolicy, MergeConfig, MergeLimits, Mode, TailPolicy, DEFAULT_CHUNK_BYTES,
    DEFAULT_PAGE_BYTES,
};
pub use error::{FailureSink, MergeError, SourceFailure, SourceFault};
pub use merge::{merge, MergeOutcome, Merger};
pub use reassembler::Reassembler;
pub use sink::OutputSink;
pub use source::{parse_handles, Source, SourceState, SourceTable, OUTPUT_HANDLE};
pub use stdio::{ClosedOutput, ClosedStdio};
