//! Binary heap run merger.

use std::io::{self, prelude::*};

use rayon::prelude::*;

use crate::heap::{HeapEntry, MinHeap};
use crate::line::{Line, LineSource};
use crate::sort::SortError;

/// Merge output statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Number of lines written.
    pub lines: u64,
    /// Number of bytes written including line separators.
    pub bytes: u64,
}

/// Binary heap merger implementation.
/// Merges multiple sorted runs into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of lines,
/// *n* is the number of runs.
///
/// The heap holds at most one pending line per run. A run cursor is dropped as soon as it is
/// exhausted. After the first error the merger yields nothing.
pub struct RunMerger<C: LineSource> {
    items: MinHeap<HeapEntry>,
    cursors: Vec<Option<C>>,
    run_ids: Vec<usize>,
    initiated: bool,
    finished: bool,
}

impl<C> RunMerger<C>
where
    C: LineSource + Send,
{
    /// Creates an instance of a merger.
    /// Lines of every run should be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `runs` - Pairs of run identifier and cursor over the run lines. The identifier is only
    ///   used for error reporting.
    pub fn new<I>(runs: I) -> Self
    where
        I: IntoIterator<Item = (usize, C)>,
    {
        let (run_ids, cursors): (Vec<usize>, Vec<Option<C>>) =
            runs.into_iter().map(|(id, cursor)| (id, Some(cursor))).unzip();
        let items = MinHeap::with_capacity(cursors.len());

        return RunMerger {
            items,
            cursors,
            run_ids,
            initiated: false,
            finished: false,
        };
    }

    /// Writes all merged lines to `sink`, each followed by `\n`, and flushes it.
    pub fn merge_into<W: Write>(self, mut sink: W) -> Result<MergeStats, SortError> {
        let mut stats = MergeStats::default();

        for line in self {
            let line = line?;
            sink.write_all(&line)
                .and_then(|_| sink.write_all(b"\n"))
                .map_err(SortError::SinkWriteFailed)?;

            stats.lines += 1;
            stats.bytes += line.len() as u64 + 1;
        }
        sink.flush().map_err(SortError::SinkWriteFailed)?;

        return Ok(stats);
    }

    /// Reads the head line of every run. The runs are independent so the reads are done in
    /// parallel; the heap is filled sequentially afterwards.
    fn prime(&mut self) -> Result<(), SortError> {
        let heads: Vec<io::Result<Option<Line>>> = self
            .cursors
            .par_iter_mut()
            .map(|cursor| match cursor {
                Some(cursor) => cursor.next_line(),
                None => Ok(None),
            })
            .collect();

        for (pos, head) in heads.into_iter().enumerate() {
            match head {
                Ok(Some(line)) => self.items.push(HeapEntry { line, run: pos }),
                Ok(None) => {
                    log::trace!("run {} is empty", self.run_ids[pos]);
                    self.cursors[pos] = None;
                }
                Err(err) => return Err(SortError::RunReadFailed(self.run_ids[pos], err)),
            }
        }

        return Ok(());
    }

    fn refill(&mut self, pos: usize) -> Result<(), SortError> {
        let cursor = match self.cursors[pos].as_mut() {
            Some(cursor) => cursor,
            None => return Ok(()),
        };

        match cursor.next_line() {
            Ok(Some(line)) => self.items.push(HeapEntry { line, run: pos }),
            Ok(None) => {
                log::trace!("run {} exhausted", self.run_ids[pos]);
                self.cursors[pos] = None;
            }
            Err(err) => return Err(SortError::RunReadFailed(self.run_ids[pos], err)),
        }

        return Ok(());
    }

    fn finish(&mut self) {
        self.finished = true;
        self.items = MinHeap::new();
        self.cursors.clear();
    }
}

impl<C> Iterator for RunMerger<C>
where
    C: LineSource + Send,
{
    type Item = Result<Line, SortError>;

    /// Returns the next line from the runs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if !self.initiated {
            self.initiated = true;
            if let Err(err) = self.prime() {
                self.finish();
                return Some(Err(err));
            }
        }

        let entry = match self.items.pop() {
            Some(entry) => entry,
            None => {
                self.finish();
                return None;
            }
        };

        if let Err(err) = self.refill(entry.run) {
            self.finish();
            return Some(Err(err));
        }

        return Some(Ok(entry.line));
    }
}
