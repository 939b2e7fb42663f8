//! `line-sort` sorts text files that do not fit into memory.
//!
//! Sorting is achieved in two passes. During the first pass the input is read line by line into a buffer
//! limited by the serialized size of its content; every time the limit is reached the buffer is sorted and
//! saved to a temporary file (a *run*). During the second pass all runs are merged into the output using
//! a binary min-heap holding the current head line of every run.
//! For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Byte-wise order:**
//!   lines are compared as raw bytes, no UTF-8 validation or locale aware collation is performed.
//! * **Memory bound:**
//!   the chunk buffer is bounded by a configurable size (500 MiB by default).
//! * **Recoverable:**
//!   runs are left on disk if the merge fails and can be merged again with [`ExternalSorter::merge_dir`].
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use bytesize::MIB;
//! use env_logger;
//! use log;
//!
//! use line_sort::{ExternalSorterBuilder, LogObserver};
//!
//! fn main() {
//!     env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();
//!
//!     let sorter = ExternalSorterBuilder::new()
//!         .with_tmp_dir(Path::new("./temp"))
//!         .with_chunk_size(50 * MIB)
//!         .with_observer(LogObserver)
//!         .build()
//!         .unwrap();
//!
//!     let report = sorter.sort_file(Path::new("input.txt"), Path::new("output.txt")).unwrap();
//!     if let Some(err) = report.cleanup_error {
//!         log::warn!("{}", err);
//!     }
//! }
//! ```

pub mod buffer;
pub mod heap;
pub mod line;
pub mod merger;
pub mod observer;
pub mod run;
pub mod sort;

pub use buffer::{LineBuffer, LineBufferBuilder, DEFAULT_CHUNK_SIZE};
pub use heap::{HeapEntry, MinHeap};
pub use line::{Line, LineReader, LineSource};
pub use merger::{MergeStats, RunMerger};
pub use observer::{LogObserver, NoopObserver, Phase, SortObserver};
pub use run::{discover_runs, Run};
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortReport};
