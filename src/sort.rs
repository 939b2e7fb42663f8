//! External sorter.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytesize::ByteSize;

use crate::buffer::{LineBuffer, LineBufferBuilder, DEFAULT_CHUNK_SIZE};
use crate::line::LineReader;
use crate::merger::{MergeStats, RunMerger};
use crate::observer::{NoopObserver, Phase, SortObserver};
use crate::run::{discover_runs, Run};

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Input file can't be opened or read.
    SourceUnavailable(io::Error),
    /// Temporary directory creation or listing error.
    TempDir(io::Error),
    /// Chunk size must be positive.
    InvalidChunkSize(u64),
    /// Run with the given index can't be written.
    RunWriteFailed(usize, io::Error),
    /// Run with the given index can't be opened or read.
    RunReadFailed(usize, io::Error),
    /// Output can't be written. Already written output must be considered invalid.
    SinkWriteFailed(io::Error),
    /// Temporary file or directory can't be removed.
    TempCleanupFailed(PathBuf, io::Error),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::SourceUnavailable(err) => Some(err),
            SortError::TempDir(err) => Some(err),
            SortError::InvalidChunkSize(_) => None,
            SortError::RunWriteFailed(_, err) => Some(err),
            SortError::RunReadFailed(_, err) => Some(err),
            SortError::SinkWriteFailed(err) => Some(err),
            SortError::TempCleanupFailed(_, err) => Some(err),
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::SourceUnavailable(err) => write!(f, "input data source unavailable: {}", err),
            SortError::TempDir(err) => write!(f, "temporary directory not available: {}", err),
            SortError::InvalidChunkSize(size) => write!(f, "invalid chunk size: {}", size),
            SortError::RunWriteFailed(index, err) => write!(f, "run {} not written: {}", index, err),
            SortError::RunReadFailed(index, err) => write!(f, "run {} not read: {}", index, err),
            SortError::SinkWriteFailed(err) => write!(f, "output not written: {}", err),
            SortError::TempCleanupFailed(path, err) => {
                write!(f, "temporary data {} not removed: {}", path.display(), err)
            }
        }
    }
}

/// Completed sort summary.
#[derive(Debug)]
pub struct SortReport {
    /// Number of merged runs.
    pub runs: usize,
    /// Number of lines written to the output.
    pub lines: u64,
    /// Number of bytes written to the output.
    pub bytes: u64,
    /// Temporary data cleanup error. Does not affect the output validity.
    pub cleanup_error: Option<SortError>,
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder {
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Serialized chunk size limit.
    chunk_size: u64,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Leave runs on disk after a successful merge.
    keep_runs: bool,
    /// Progress observer.
    observer: Arc<dyn SortObserver>,
}

impl ExternalSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter, SortError> {
        ExternalSorter::new(
            self.tmp_dir.as_deref(),
            self.chunk_size,
            self.rw_buf_size,
            self.keep_runs,
            self.observer,
        )
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets serialized chunk size in bytes a run is flushed at.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> ExternalSorterBuilder {
        self.chunk_size = chunk_size;
        return self;
    }

    /// Sets run read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Leaves temporary runs on disk after a successful sort.
    pub fn with_keep_runs(mut self, keep_runs: bool) -> ExternalSorterBuilder {
        self.keep_runs = keep_runs;
        return self;
    }

    /// Sets progress observer.
    pub fn with_observer(mut self, observer: impl SortObserver + 'static) -> ExternalSorterBuilder {
        self.observer = Arc::new(observer);
        return self;
    }
}

impl Default for ExternalSorterBuilder {
    fn default() -> Self {
        ExternalSorterBuilder {
            tmp_dir: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            rw_buf_size: None,
            keep_runs: false,
            observer: Arc::new(NoopObserver),
        }
    }
}

/// External sorter.
pub struct ExternalSorter {
    /// Directory to be used to store temporary data.
    tmp_dir: PathBuf,
    /// Whether the temporary directory was created by the sorter and must be removed.
    owns_tmp_dir: bool,
    /// Chunk buffer builder.
    buffer_builder: LineBufferBuilder,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Leave runs on disk after a successful merge.
    keep_runs: bool,
    /// Progress observer.
    observer: Arc<dyn SortObserver>,
}

impl ExternalSorter {
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `tmp_path` - Directory to be used to store temporary data. It is created if absent. If the parameter
    ///   is [`None`] a unique directory inside the default OS temporary directory will be used.
    /// * `chunk_size` - Serialized size of buffered lines a run is flushed at. Must be positive.
    /// * `rw_buf_size` - Runs file read/write buffer size.
    /// * `keep_runs` - Leave runs on disk after a successful sort.
    /// * `observer` - Progress observer.
    pub fn new(
        tmp_path: Option<&Path>,
        chunk_size: u64,
        rw_buf_size: Option<usize>,
        keep_runs: bool,
        observer: Arc<dyn SortObserver>,
    ) -> Result<Self, SortError> {
        if chunk_size == 0 {
            return Err(SortError::InvalidChunkSize(chunk_size));
        }

        let (tmp_dir, owns_tmp_dir) = Self::init_tmp_directory(tmp_path)?;
        log::info!("chunk size: {}", ByteSize::b(chunk_size));

        return Ok(ExternalSorter {
            tmp_dir,
            owns_tmp_dir,
            buffer_builder: LineBufferBuilder::new(chunk_size),
            rw_buf_size,
            keep_runs,
            observer,
        });
    }

    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<(PathBuf, bool), SortError> {
        let (tmp_dir, created) = if let Some(tmp_path) = tmp_path {
            let created = !tmp_path.exists();
            fs::create_dir_all(tmp_path).map_err(SortError::TempDir)?;
            (tmp_path.to_path_buf(), created)
        } else {
            let tmp_dir = tempfile::Builder::new()
                .prefix("line-sort-")
                .tempdir()
                .map_err(SortError::TempDir)?;
            (tmp_dir.keep(), true)
        };

        log::info!("using {} as a temporary directory", tmp_dir.display());

        return Ok((tmp_dir, created));
    }

    /// Returns the directory runs are stored in.
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    /// Sorts `input_path` file lines and writes them to `output_path`.
    /// The output file is overwritten if it exists.
    ///
    /// On error the runs written so far are left in the temporary directory.
    pub fn sort_file(&self, input_path: &Path, output_path: &Path) -> Result<SortReport, SortError> {
        let input = fs::File::open(input_path).map_err(SortError::SourceUnavailable)?;
        let input = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, input),
            None => io::BufReader::new(input),
        };

        let runs = self.observe(Phase::Partition, || self.partition(input))?;

        return self.complete(runs, output_path);
    }

    /// Merges runs found in the temporary directory into `output_path`.
    /// Can be used to finish a sort whose merge phase failed.
    ///
    /// Fails without touching the output if the directory did not exist before the sorter was built
    /// and holds no runs.
    pub fn merge_dir(&self, output_path: &Path) -> Result<SortReport, SortError> {
        let runs = discover_runs(&self.tmp_dir).map_err(SortError::TempDir)?;
        if runs.is_empty() && self.owns_tmp_dir {
            return Err(SortError::TempDir(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no runs to merge, {} did not exist", self.tmp_dir.display()),
            )));
        }
        log::info!("{} runs found in {}", runs.len(), self.tmp_dir.display());

        return self.complete(runs, output_path);
    }

    /// Splits the input into sorted runs.
    /// Each run holds the lines accumulated until their serialized size reached the chunk size.
    pub fn partition(&self, input: impl BufRead) -> Result<Vec<Run>, SortError> {
        fs::create_dir_all(&self.tmp_dir).map_err(SortError::TempDir)?;

        let mut chunk_buf = self.buffer_builder.build();
        let mut runs = Vec::new();

        for line in LineReader::new(input) {
            let line = line.map_err(SortError::SourceUnavailable)?;
            chunk_buf.push(line);

            if chunk_buf.is_full() {
                runs.push(self.create_run(chunk_buf, runs.len())?);
                chunk_buf = self.buffer_builder.build();
            }
        }

        if !chunk_buf.is_empty() {
            runs.push(self.create_run(chunk_buf, runs.len())?);
        }

        log::debug!("partitioning done, {} runs created", runs.len());

        return Ok(runs);
    }

    /// Merges sorted runs into `sink`. Every run reader is closed on return.
    pub fn merge(&self, runs: &[Run], sink: impl Write) -> Result<MergeStats, SortError> {
        let mut cursors = Vec::with_capacity(runs.len());
        for run in runs {
            let reader = run
                .open(self.rw_buf_size)
                .map_err(|err| SortError::RunReadFailed(run.index(), err))?;
            cursors.push((run.index(), reader));
        }

        return RunMerger::new(cursors).merge_into(sink);
    }

    /// Removes the runs and, if it was created by the sorter, the temporary directory.
    /// Every removal is attempted, the first failure is returned.
    pub fn cleanup(&self, runs: &[Run]) -> Result<(), SortError> {
        let mut result = Ok(());

        for run in runs {
            if let Err(err) = run.remove() {
                log::warn!("run {} not removed: {}", run.path().display(), err);
                if result.is_ok() {
                    result = Err(SortError::TempCleanupFailed(run.path().to_path_buf(), err));
                }
            }
        }

        if self.owns_tmp_dir {
            if let Err(err) = fs::remove_dir(&self.tmp_dir) {
                log::warn!("temporary directory {} not removed: {}", self.tmp_dir.display(), err);
                if result.is_ok() {
                    result = Err(SortError::TempCleanupFailed(self.tmp_dir.clone(), err));
                }
            }
        }

        return result;
    }

    fn complete(&self, runs: Vec<Run>, output_path: &Path) -> Result<SortReport, SortError> {
        let stats = self.observe(Phase::Merge, || self.merge_to_path(&runs, output_path))?;

        let cleanup_error = if self.keep_runs {
            log::info!("runs kept in {}", self.tmp_dir.display());
            None
        } else {
            self.observe(Phase::Cleanup, || self.cleanup(&runs)).err()
        };

        log::info!(
            "sorting done (runs: {}, lines: {}, size: {})",
            runs.len(),
            stats.lines,
            ByteSize::b(stats.bytes),
        );

        return Ok(SortReport {
            runs: runs.len(),
            lines: stats.lines,
            bytes: stats.bytes,
            cleanup_error,
        });
    }

    fn merge_to_path(&self, runs: &[Run], output_path: &Path) -> Result<MergeStats, SortError> {
        let file = fs::File::create(output_path).map_err(SortError::SinkWriteFailed)?;
        let mut writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };

        let stats = self.merge(runs, &mut writer)?;

        let file = writer
            .into_inner()
            .map_err(|err| SortError::SinkWriteFailed(err.into_error()))?;
        file.sync_all().map_err(SortError::SinkWriteFailed)?;

        return Ok(stats);
    }

    fn create_run(&self, mut buffer: LineBuffer, index: usize) -> Result<Run, SortError> {
        log::debug!("sorting chunk {} ({} lines) ...", index, buffer.len());
        #[cfg(feature = "memory-stats")]
        log::debug!("chunk {} occupies {} in memory", index, ByteSize::b(buffer.heap_size() as u64));
        buffer.sort();

        let (lines, bytes) = (buffer.len(), buffer.mem_size());
        let run = Run::create(&self.tmp_dir, index, buffer, self.rw_buf_size)
            .map_err(|err| SortError::RunWriteFailed(index, err))?;
        self.observer.run_written(&run, lines, bytes);

        return Ok(run);
    }

    fn observe<R>(&self, phase: Phase, f: impl FnOnce() -> R) -> R {
        self.observer.phase_started(phase);
        let started = Instant::now();
        let result = f();
        self.observer.phase_finished(phase, started.elapsed());

        return result;
    }
}

impl Drop for ExternalSorter {
    /// Removes the temporary directory created by the sorter if nothing was left in it.
    /// A directory still holding runs is kept.
    fn drop(&mut self) {
        if self.owns_tmp_dir && self.tmp_dir.exists() {
            if let Err(err) = fs::remove_dir(&self.tmp_dir) {
                log::debug!("temporary directory {} kept: {}", self.tmp_dir.display(), err);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::{self, ErrorKind, Read};
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{ExternalSorter, ExternalSorterBuilder, SortError};
    use crate::line::Line;
    use crate::observer::{Phase, SortObserver};
    use crate::run::Run;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn sorter(dir: &Path, chunk_size: u64) -> ExternalSorter {
        ExternalSorterBuilder::new()
            .with_tmp_dir(dir)
            .with_chunk_size(chunk_size)
            .build()
            .unwrap()
    }

    fn read_run(run: &Run) -> Vec<Line> {
        run.open(None).unwrap().collect::<io::Result<_>>().unwrap()
    }

    #[rstest]
    #[case(1)]
    #[case(7)]
    #[case(64)]
    #[case(u64::MAX)]
    fn test_external_sorter(tmp_dir: tempfile::TempDir, #[case] chunk_size: u64) {
        let input_sorted: Vec<String> = (0..100).map(|i| format!("{:03}", i)).collect();

        let mut input_shuffled = input_sorted.clone();
        input_shuffled.shuffle(&mut rand::thread_rng());
        let input = input_shuffled.join("\n");

        let sorter = sorter(&tmp_dir.path().join("runs"), chunk_size);
        let runs = sorter.partition(input.as_bytes()).unwrap();

        let mut output = Vec::new();
        let stats = sorter.merge(&runs, &mut output).unwrap();

        let expected = input_sorted.join("\n") + "\n";
        assert_eq!(String::from_utf8(output).unwrap(), expected);
        assert_eq!(stats.lines, 100);
    }

    #[rstest]
    fn test_partition(tmp_dir: tempfile::TempDir) {
        let sorter = sorter(tmp_dir.path(), 12);
        let runs = sorter.partition(&b"banana\napple\ncherry\napple\n"[..]).unwrap();

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].index(), 0);
        assert_eq!(runs[1].index(), 1);
        assert_eq!(read_run(&runs[0]), vec![b"apple".to_vec(), b"banana".to_vec()]);
        assert_eq!(read_run(&runs[1]), vec![b"apple".to_vec(), b"cherry".to_vec()]);

        let mut output = Vec::new();
        sorter.merge(&runs, &mut output).unwrap();
        assert_eq!(output, b"apple\napple\nbanana\ncherry\n");
    }

    #[rstest]
    #[case(b"", 1, 0)]
    #[case(b"\n", 1, 1)]
    #[case(b"a\nb\nc\nd", 1, 4)]
    #[case(b"a\nb\nc\nd", 3, 2)]
    #[case(b"a\nb\nc\nd", 4, 2)]
    #[case(b"a\nb\nc\nd", 5, 2)]
    #[case(b"a\nb\nc\nd", 7, 1)]
    #[case(b"a\nb\nc\nd", 8, 1)]
    fn test_partition_runs_count(
        tmp_dir: tempfile::TempDir,
        #[case] input: &[u8],
        #[case] chunk_size: u64,
        #[case] expected: usize,
    ) {
        let sorter = sorter(tmp_dir.path(), chunk_size);
        let runs = sorter.partition(input).unwrap();
        assert_eq!(runs.len(), expected);
    }

    #[rstest]
    fn test_zero_chunk_size(tmp_dir: tempfile::TempDir) {
        let result = ExternalSorterBuilder::new()
            .with_tmp_dir(tmp_dir.path())
            .with_chunk_size(0)
            .build();
        assert!(matches!(result, Err(SortError::InvalidChunkSize(0))));
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::Other, "device gone"))
        }
    }

    #[rstest]
    fn test_partition_source_error(tmp_dir: tempfile::TempDir) {
        let sorter = sorter(tmp_dir.path(), 16);
        let result = sorter.partition(io::BufReader::new(FailingReader));
        assert!(matches!(result, Err(SortError::SourceUnavailable(_))));
    }

    #[rstest]
    fn test_partition_run_write_error(tmp_dir: tempfile::TempDir) {
        let sorter = sorter(tmp_dir.path(), 1);
        fs::create_dir(tmp_dir.path().join("temp_1.txt")).unwrap();

        let result = sorter.partition(&b"b\na\nc\n"[..]);
        assert!(matches!(result, Err(SortError::RunWriteFailed(1, _))));
        // already written runs are not rolled back
        assert!(tmp_dir.path().join("temp_0.txt").exists());
    }

    #[rstest]
    fn test_merge_missing_run(tmp_dir: tempfile::TempDir) {
        let sorter = sorter(tmp_dir.path(), 1);
        let runs = sorter.partition(&b"b\na\n"[..]).unwrap();
        runs[1].remove().unwrap();

        let mut output = Vec::new();
        let result = sorter.merge(&runs, &mut output);
        assert!(matches!(result, Err(SortError::RunReadFailed(1, _))));
        assert!(output.is_empty());
    }

    #[rstest]
    fn test_cleanup(tmp_dir: tempfile::TempDir) {
        let runs_dir = tmp_dir.path().join("runs");
        let sorter = sorter(&runs_dir, 1);
        let runs = sorter.partition(&b"b\na\n"[..]).unwrap();

        sorter.cleanup(&runs).unwrap();
        assert!(!runs_dir.exists());
    }

    #[rstest]
    fn test_cleanup_keeps_existing_dir(tmp_dir: tempfile::TempDir) {
        let sorter = sorter(tmp_dir.path(), 1);
        let runs = sorter.partition(&b"b\na\n"[..]).unwrap();

        sorter.cleanup(&runs).unwrap();
        assert!(tmp_dir.path().exists());
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[rstest]
    fn test_cleanup_failure(tmp_dir: tempfile::TempDir) {
        let sorter = sorter(tmp_dir.path(), 1);
        let runs = sorter.partition(&b"b\na\n"[..]).unwrap();
        runs[0].remove().unwrap();

        let result = sorter.cleanup(&runs);
        match result {
            Err(SortError::TempCleanupFailed(path, _)) => assert_eq!(path, runs[0].path()),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!runs[1].path().exists());
    }

    #[test]
    fn test_default_tmp_dir() {
        let sorter = ExternalSorterBuilder::new().build().unwrap();
        let tmp_dir = sorter.tmp_dir().to_path_buf();
        assert!(tmp_dir.is_dir());

        sorter.cleanup(&[]).unwrap();
        assert!(!tmp_dir.exists());
    }

    #[test]
    fn test_default_tmp_dir_removed_after_failure() {
        let sorter = ExternalSorterBuilder::new().build().unwrap();
        let tmp_dir = sorter.tmp_dir().to_path_buf();
        let missing = tmp_dir.join("missing.txt");

        let result = sorter.sort_file(&missing, &tmp_dir.join("output.txt"));
        assert!(matches!(result, Err(SortError::SourceUnavailable(_))));
        assert!(tmp_dir.is_dir());

        drop(sorter);
        assert!(!tmp_dir.exists());
    }

    #[test]
    fn test_unused_default_tmp_dir_removed_on_drop() {
        let sorter = ExternalSorterBuilder::new().build().unwrap();
        let tmp_dir = sorter.tmp_dir().to_path_buf();

        drop(sorter);
        assert!(!tmp_dir.exists());
    }

    #[rstest]
    fn test_tmp_dir_with_runs_kept_on_drop(tmp_dir: tempfile::TempDir) {
        let runs_dir = tmp_dir.path().join("runs");
        let sorter = sorter(&runs_dir, 1);
        fs::create_dir(runs_dir.join("temp_1.txt")).unwrap();

        let result = sorter.partition(&b"b\na\n"[..]);
        assert!(matches!(result, Err(SortError::RunWriteFailed(1, _))));

        drop(sorter);
        assert!(runs_dir.join("temp_0.txt").exists());
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl SortObserver for Arc<RecordingObserver> {
        fn phase_started(&self, phase: Phase) {
            self.events.lock().unwrap().push(format!("start {}", phase));
        }

        fn phase_finished(&self, phase: Phase, _elapsed: Duration) {
            self.events.lock().unwrap().push(format!("finish {}", phase));
        }

        fn run_written(&self, run: &Run, lines: usize, bytes: u64) {
            self.events
                .lock()
                .unwrap()
                .push(format!("run {} {} {}", run.index(), lines, bytes));
        }
    }

    #[rstest]
    fn test_observer(tmp_dir: tempfile::TempDir) {
        let input_path = tmp_dir.path().join("input.txt");
        let output_path = tmp_dir.path().join("output.txt");
        fs::write(&input_path, b"banana\napple\ncherry\n").unwrap();

        let observer = Arc::new(RecordingObserver::default());
        let sorter = ExternalSorterBuilder::new()
            .with_tmp_dir(&tmp_dir.path().join("runs"))
            .with_chunk_size(12)
            .with_observer(observer.clone())
            .build()
            .unwrap();

        let report = sorter.sort_file(&input_path, &output_path).unwrap();
        assert_eq!(report.runs, 2);
        assert!(report.cleanup_error.is_none());

        let events = observer.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "start partition",
                "run 0 2 12",
                "run 1 1 6",
                "finish partition",
                "start merge",
                "finish merge",
                "start cleanup",
                "finish cleanup",
            ]
        );
    }
}
