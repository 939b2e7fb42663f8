//! Sort progress observers.

use std::fmt;
use std::time::Duration;

use bytesize::ByteSize;

use crate::run::Run;

/// Sorting phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Input splitting into sorted runs.
    Partition,
    /// K-way merge of the runs into the output.
    Merge,
    /// Temporary data removal.
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Partition => "partition",
            Phase::Merge => "merge",
            Phase::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Receives sorter progress events. Observers have no influence on the sorting result.
pub trait SortObserver: Send + Sync {
    fn phase_started(&self, _phase: Phase) {}

    fn phase_finished(&self, _phase: Phase, _elapsed: Duration) {}

    /// Called after a run has been written. `bytes` is the serialized chunk size.
    fn run_written(&self, _run: &Run, _lines: usize, _bytes: u64) {}
}

/// Observer ignoring all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl SortObserver for NoopObserver {}

/// Observer reporting events through the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogObserver;

impl SortObserver for LogObserver {
    fn phase_started(&self, phase: Phase) {
        log::info!("{} phase started", phase);
    }

    fn phase_finished(&self, phase: Phase, elapsed: Duration) {
        log::info!("{} phase finished in {:.3}s", phase, elapsed.as_secs_f64());
    }

    fn run_written(&self, run: &Run, lines: usize, bytes: u64) {
        log::debug!(
            "run {} written to {} (lines: {}, size: {})",
            run.index(),
            run.path().display(),
            lines,
            ByteSize::b(bytes),
        );
    }
}
