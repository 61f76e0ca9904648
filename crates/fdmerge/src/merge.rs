use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, RawFd};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, trace};

use crate::config::{MergeConfig, Mode};
use crate::error::{FailureSink, MergeError, SourceFailure, SourceFault};
use crate::reassembler::Reassembler;
use crate::sink::OutputSink;
use crate::source::SourceTable;

/// Result of a run that was not aborted by a fatal error.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub failures: Vec<SourceFailure>,
    pub bytes_written: u64,
}

impl MergeOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The event loop: owns every source, the output sink and the read buffer.
pub struct Merger<W: Write> {
    sources: SourceTable,
    reassembler: Option<Reassembler>,
    sink: OutputSink<W>,
    chunk: Vec<u8>,
    failures: Vec<SourceFailure>,
    failure_sink: Option<Box<dyn FailureSink>>,
    open: usize,
}

impl<W: Write> Merger<W> {
    /// Validates `handles` and takes ownership of the open ones.
    pub fn new(handles: Vec<RawFd>, config: MergeConfig, output: W) -> Result<Self, MergeError> {
        let (sources, rejected) = SourceTable::acquire(handles, &config)?;
        let reassembler = match config.mode {
            Mode::Raw => None,
            Mode::Delimited { delimiter, tail } => Some(Reassembler::new(delimiter, tail)),
        };
        let open = sources.open_count();
        debug!(
            sources = sources.len(),
            open,
            delimited = reassembler.is_some(),
            "merge configured"
        );

        Ok(Self {
            sources,
            reassembler,
            sink: OutputSink::new(output),
            chunk: vec![0u8; config.limits.chunk_bytes.max(1)],
            failures: rejected,
            failure_sink: None,
            open,
        })
    }

    /// Routes every per-source failure to `sink` as it happens, including
    /// handles rejected while acquiring.
    pub fn with_failure_sink(mut self, sink: impl FailureSink + 'static) -> Self {
        self.failure_sink = Some(Box::new(sink));
        self
    }

    pub fn sources(&self) -> &SourceTable {
        &self.sources
    }

    /// Runs until every source is closed.
    ///
    /// Per-source problems end up in [`MergeOutcome::failures`]; only wait,
    /// write and allocation failures abort the run.
    pub fn run(mut self) -> Result<MergeOutcome, MergeError> {
        for failure in &self.failures {
            debug!(fd = failure.handle, "{}", failure.fault);
            if let Some(sink) = self.failure_sink.as_mut() {
                sink.on_failure(failure);
            }
        }

        while self.open > 0 {
            for (index, revents) in self.wait()? {
                self.dispatch(index, revents)?;
            }
        }
        Ok(MergeOutcome {
            failures: self.failures,
            bytes_written: self.sink.bytes_written(),
        })
    }

    /// Blocks until at least one open source has an event; returns the
    /// table index and events of each, in ascending handle order.
    fn wait(&self) -> Result<Vec<(usize, PollFlags)>, MergeError> {
        let (indices, mut fds): (Vec<usize>, Vec<PollFd<'_>>) = self
            .sources
            .iter()
            .enumerate()
            .filter_map(|(index, source)| {
                source
                    .channel()
                    .map(|file| (index, PollFd::new(file.as_fd(), PollFlags::POLLIN)))
            })
            .unzip();

        loop {
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => break,
                Err(Errno::EINTR | Errno::EAGAIN) => continue,
                Err(errno) => return Err(MergeError::Wait(errno)),
            }
        }

        Ok(indices
            .into_iter()
            .zip(fds.iter())
            .filter_map(|(index, fd)| {
                fd.revents()
                    .filter(|revents| !revents.is_empty())
                    .map(|revents| (index, revents))
            })
            .collect())
    }

    fn dispatch(&mut self, index: usize, revents: PollFlags) -> Result<(), MergeError> {
        if revents.contains(PollFlags::POLLIN) {
            self.on_readable(index)
        } else if revents.contains(PollFlags::POLLHUP) {
            self.on_hangup(index)
        } else if revents.contains(PollFlags::POLLERR) {
            self.on_invalid(index, SourceFault::Io);
            Ok(())
        } else if revents.contains(PollFlags::POLLNVAL) {
            self.on_invalid(index, SourceFault::NotPollable);
            Ok(())
        } else {
            Ok(())
        }
    }

    fn on_readable(&mut self, index: usize) -> Result<(), MergeError> {
        let Some(file) = self
            .sources
            .get_mut(index)
            .and_then(|source| source.channel_mut())
        else {
            return Ok(());
        };
        let read = read_retrying(file, &mut self.chunk);
        self.on_read(index, read)
    }

    /// Handles the result of one bounded read into `self.chunk`.
    fn on_read(&mut self, index: usize, read: io::Result<usize>) -> Result<(), MergeError> {
        let Some(source) = self.sources.get_mut(index) else {
            return Ok(());
        };
        let handle = source.handle();

        let nread = match read {
            Ok(0) => return self.on_hangup(index),
            Ok(nread) => nread,
            Err(err) => {
                self.report(SourceFailure::new(handle, SourceFault::Read(err)));
                return self.on_hangup(index);
            }
        };
        trace!(fd = handle, bytes = nread, "read chunk");

        let chunk = &self.chunk[..nread];
        match (self.reassembler.as_ref(), source.pending_mut()) {
            (Some(reassembler), Some(pending)) => {
                reassembler.ingest(pending, chunk, &mut self.sink)
            }
            _ => self.sink.write_all(chunk),
        }
    }

    /// End of stream: apply the tail policy, then release the descriptor.
    fn on_hangup(&mut self, index: usize) -> Result<(), MergeError> {
        let Some(source) = self.sources.get_mut(index) else {
            return Ok(());
        };
        if !source.is_open() {
            return Ok(());
        }
        let handle = source.handle();

        if let (Some(reassembler), Some(pending)) =
            (self.reassembler.as_ref(), source.pending_mut())
        {
            reassembler.finish(pending, &mut self.sink)?;
        }
        let released = source.release();
        self.open -= 1;
        debug!(fd = handle, remaining = self.open, "source closed");

        if let Err(fault) = released {
            self.report(SourceFailure::new(handle, fault));
        }
        Ok(())
    }

    /// Error or invalid notification: drop buffered bytes without a trailing
    /// delimiter and close the source.
    fn on_invalid(&mut self, index: usize, fault: SourceFault) {
        let Some(source) = self.sources.get_mut(index) else {
            return;
        };
        if !source.is_open() {
            return;
        }
        let handle = source.handle();
        source.abandon();
        self.open -= 1;
        self.report(SourceFailure::new(handle, fault));
    }

    fn report(&mut self, failure: SourceFailure) {
        debug!(fd = failure.handle, "{}", failure.fault);
        if let Some(sink) = self.failure_sink.as_mut() {
            sink.on_failure(&failure);
        }
        self.failures.push(failure);
    }
}

fn read_retrying(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match file.read(buf) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

/// Convenience wrapper: merge `handles` into `output` with `config`.
pub fn merge<W: Write>(
    handles: Vec<RawFd>,
    config: MergeConfig,
    output: W,
) -> Result<MergeOutcome, MergeError> {
    Merger::new(handles, config, output)?.run()
}
