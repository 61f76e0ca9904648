use std::io::{self, Write};
use std::os::fd::RawFd;

use clap::Parser;
use fdmerge::{
    parse_handles, ClosedOutput, ClosedStdio, FailureSink, MergeConfig, MergeError, MergeOutcome,
    Merger, Mode, SourceFailure, TailPolicy, OUTPUT_HANDLE,
};
use thiserror::Error;

#[derive(Debug, Parser)]
#[command(name = "merge", version)]
#[command(about = "Merge already-open descriptors onto stdout without splicing records")]
pub struct Args {
    /// Drop an unterminated trailing record when its source closes instead of
    /// emitting it with a synthetic delimiter.
    #[arg(short = 'D')]
    pub discard_partial: bool,

    /// Records are terminated by a null byte.
    #[arg(short = '0', overrides_with_all = ["delimiter", "lines"])]
    pub null: bool,

    /// Records are terminated by DELIM (a single byte; empty means null).
    #[arg(short = 'd', value_name = "DELIM", overrides_with_all = ["null", "lines"])]
    pub delimiter: Option<String>,

    /// Records are terminated by a newline.
    #[arg(short = 'L', overrides_with_all = ["null", "delimiter"])]
    pub lines: bool,

    /// Numbers of already-open, readable descriptors to merge. Options are
    /// only recognised before the first one.
    #[arg(value_name = "HANDLE", required = true, trailing_var_arg = true)]
    pub handles: Vec<String>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid delimiter `{0}`: must be a single byte")]
    InvalidDelimiter(String),
    #[error(transparent)]
    Merge(#[from] MergeError),
}

impl Args {
    pub fn mode(&self) -> Result<Mode, Error> {
        let delimiter = if self.null {
            Some(0)
        } else if let Some(raw) = self.delimiter.as_deref() {
            Some(parse_delimiter(raw)?)
        } else if self.lines {
            Some(b'\n')
        } else {
            None
        };

        let tail = if self.discard_partial {
            TailPolicy::Discard
        } else {
            TailPolicy::Terminate
        };
        Ok(delimiter.map_or(Mode::Raw, |delimiter| {
            Mode::delimited(delimiter).with_tail(tail)
        }))
    }
}

fn parse_delimiter(raw: &str) -> Result<u8, Error> {
    match raw.as_bytes() {
        [] => Ok(0),
        [byte] => Ok(*byte),
        _ => Err(Error::InvalidDelimiter(raw.to_string())),
    }
}

/// Prints each per-source failure on stderr as it happens, independently of
/// the log filter.
struct StderrFailures;

impl FailureSink for StderrFailures {
    fn on_failure(&mut self, failure: &SourceFailure) {
        eprintln!("merge: {failure}");
    }
}

/// Merges onto stdout. `closed` lists the standard descriptors that were
/// closed at startup; a closed stdout makes the first write fail.
pub fn run(args: Args, closed: ClosedStdio) -> Result<MergeOutcome, Error> {
    let config = MergeConfig {
        closed_stdio: closed,
        ..MergeConfig::new(args.mode()?)
    };
    let handles = parse_handles(&args.handles)?;
    if closed.contains(OUTPUT_HANDLE) {
        merge_into(handles, config, ClosedOutput)
    } else {
        merge_into(handles, config, io::stdout().lock())
    }
}

fn merge_into<W: Write>(
    handles: Vec<RawFd>,
    config: MergeConfig,
    output: W,
) -> Result<MergeOutcome, Error> {
    Ok(Merger::new(handles, config, output)?
        .with_failure_sink(StderrFailures)
        .run()?)
}
