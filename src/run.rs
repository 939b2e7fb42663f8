//! Sorted runs stored on the file system.

use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use crate::line::{Line, LineReader};

const RUN_FILE_PREFIX: &str = "temp_";
const RUN_FILE_SUFFIX: &str = ".txt";

/// Reader over a run file.
pub type RunReader = LineReader<io::BufReader<fs::File>>;

/// Sorted run: a file holding lines in ascending order, one per `\n` terminated row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Run {
    index: usize,
    path: PathBuf,
}

impl Run {
    /// Returns the path of the run with the given index inside `dir`.
    pub fn path_for(dir: &Path, index: usize) -> PathBuf {
        dir.join(format!("{}{}{}", RUN_FILE_PREFIX, index, RUN_FILE_SUFFIX))
    }

    /// Writes `lines` to a new run file and makes sure they reached the storage.
    /// An existing file with the same index is overwritten.
    pub fn create(
        dir: &Path,
        index: usize,
        lines: impl IntoIterator<Item = Line>,
        buf_size: Option<usize>,
    ) -> io::Result<Run> {
        let path = Self::path_for(dir, index);
        let file = fs::File::create(&path)?;

        let mut writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };

        for line in lines.into_iter() {
            writer.write_all(&line)?;
            writer.write_all(b"\n")?;
        }

        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;

        return Ok(Run { index, path });
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the run for forward reading.
    pub fn open(&self, buf_size: Option<usize>) -> io::Result<RunReader> {
        let file = fs::File::open(&self.path)?;
        let reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        return Ok(LineReader::new(reader));
    }

    /// Deletes the run file.
    pub fn remove(&self) -> io::Result<()> {
        fs::remove_file(&self.path)
    }
}

/// Lists run files stored in `dir` ordered by their index. Files not named like runs are ignored.
pub fn discover_runs(dir: &Path) -> io::Result<Vec<Run>> {
    let mut runs = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let name = entry.file_name();
        let index = name
            .to_str()
            .and_then(|name| name.strip_prefix(RUN_FILE_PREFIX))
            .and_then(|name| name.strip_suffix(RUN_FILE_SUFFIX))
            .and_then(parse_run_index);

        if let Some(index) = index {
            runs.push(Run {
                index,
                path: entry.path(),
            });
        }
    }

    runs.sort_by_key(|run| run.index);

    return Ok(runs);
}

/// Parses a canonical run index: ASCII digits without leading zeros.
fn parse_run_index(index: &str) -> Option<usize> {
    let canonical = !index.is_empty()
        && index.bytes().all(|b| b.is_ascii_digit())
        && (index == "0" || !index.starts_with('0'));
    if !canonical {
        return None;
    }

    index.parse().ok()
}
