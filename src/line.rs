//! Line type and forward-only line cursors.

use std::io::{self, prelude::*};

/// A single line without its terminator. Ordered byte-wise.
pub type Line = Vec<u8>;

/// Forward cursor over lines. Each call either yields the next line or reports that the source
/// is exhausted (`Ok(None)`). Sources are not rewindable.
pub trait LineSource {
    /// Advances the cursor by one line.
    fn next_line(&mut self) -> io::Result<Option<Line>>;
}

impl<I> LineSource for I
where
    I: Iterator<Item = io::Result<Line>>,
{
    fn next_line(&mut self) -> io::Result<Option<Line>> {
        self.next().transpose()
    }
}

/// Splits a buffered byte stream into lines.
///
/// Lines are separated by `\n`. CRLF input is normalized: a `\r` directly preceding the separator
/// is dropped as well, so a line whose content genuinely ends with `\r` loses that byte.
/// A `\r` not followed by `\n` is kept. The last line is yielded even if it is not terminated.
/// No UTF-8 validation is performed.
pub struct LineReader<R> {
    inner: R,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R) -> Self {
        LineReader { inner }
    }
}

impl<R: BufRead> Iterator for LineReader<R> {
    type Item = io::Result<Line>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = Vec::new();
        match self.inner.read_until(b'\n', &mut line) {
            Ok(0) => None,
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                }
                Some(Ok(line))
            }
            Err(err) => Some(Err(err)),
        }
    }
}
