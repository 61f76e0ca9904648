mod command;

use std::io::{self, IsTerminal};
use std::process::ExitCode;
use std::sync::atomic::{AtomicU8, Ordering};

use clap::Parser;
use fdmerge::ClosedStdio;
use tracing_subscriber::EnvFilter;

/// Exit status for every kind of failure, the same one clap uses for usage errors.
const FAILURE: u8 = 2;

/// Environment variable holding the log filter (`EnvFilter` syntax).
const LOG_ENV: &str = "MERGE_LOG";

/// Standard descriptors found closed at exec time, before the runtime
/// replaced them with `/dev/null`.
static CLOSED_AT_EXEC: AtomicU8 = AtomicU8::new(0);

#[ctor::ctor]
fn record_closed_stdio() {
    CLOSED_AT_EXEC.store(ClosedStdio::detect().bits(), Ordering::Relaxed);
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .without_time()
        .init();
}

fn main() -> ExitCode {
    let args = command::Args::parse();
    init_logging();

    let closed = ClosedStdio::from_bits(CLOSED_AT_EXEC.load(Ordering::Relaxed));
    match command::run(args, closed) {
        Ok(outcome) if outcome.is_success() => ExitCode::SUCCESS,
        Ok(outcome) => {
            tracing::debug!(failures = outcome.failures.len(), "merge finished with failures");
            ExitCode::from(FAILURE)
        }
        Err(err) => {
            eprintln!("merge: {err}");
            ExitCode::from(FAILURE)
        }
    }
}
