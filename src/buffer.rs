//! Size limited chunk buffer.

use crate::line::Line;

/// Default chunk size limit (500 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 500 * bytesize::MIB;

/// Line buffer builder.
#[derive(Clone, Copy, Debug)]
pub struct LineBufferBuilder {
    buffer_limit: u64,
}

impl LineBufferBuilder {
    pub fn new(buffer_limit: u64) -> Self {
        LineBufferBuilder { buffer_limit }
    }

    pub fn limit(&self) -> u64 {
        self.buffer_limit
    }

    /// Creates a new empty buffer.
    pub fn build(&self) -> LineBuffer {
        LineBuffer::new(self.buffer_limit)
    }
}

impl Default for LineBufferBuilder {
    fn default() -> Self {
        LineBufferBuilder {
            buffer_limit: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Buffer limited by the size of its content serialized as newline joined text.
///
/// The size is maintained incrementally: the first line contributes its length, every next one
/// its length plus one separator byte.
pub struct LineBuffer {
    limit: u64,
    current_size: u64,
    inner: Vec<Line>,
}

impl LineBuffer {
    pub fn new(limit: u64) -> Self {
        LineBuffer {
            limit,
            current_size: 0,
            inner: Vec::new(),
        }
    }

    /// Adds a new line to the buffer.
    pub fn push(&mut self, line: Line) {
        if !self.inner.is_empty() {
            self.current_size += 1;
        }
        self.current_size += line.len() as u64;
        self.inner.push(line);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns serialized size of the buffered lines.
    pub fn mem_size(&self) -> u64 {
        self.current_size
    }

    /// Checks if the buffer reached the limit.
    pub fn is_full(&self) -> bool {
        self.current_size >= self.limit
    }

    /// Sorts buffered lines in ascending byte order.
    pub fn sort(&mut self) {
        self.inner.sort_unstable();
    }

    /// Returns the number of bytes the buffer occupies on the heap.
    #[cfg(feature = "memory-stats")]
    pub fn heap_size(&self) -> usize {
        deepsize::DeepSizeOf::deep_size_of(&self.inner)
    }
}

impl IntoIterator for LineBuffer {
    type Item = Line;
    type IntoIter = <Vec<Line> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{LineBufferBuilder, DEFAULT_CHUNK_SIZE};

    #[test]
    fn test_default_limit() {
        assert_eq!(LineBufferBuilder::default().limit(), 524_288_000);
        assert_eq!(DEFAULT_CHUNK_SIZE, 500 * 1024 * 1024);
    }

    #[rstest]
    #[case(vec![], 0)]
    #[case(vec!["abc"], 3)]
    #[case(vec!["", ""], 1)]
    #[case(vec!["banana", "apple"], 12)]
    #[case(vec!["a", "bb", "ccc"], 8)]
    fn test_mem_size_matches_joined_length(#[case] lines: Vec<&str>, #[case] expected: u64) {
        let mut buffer = LineBufferBuilder::new(u64::MAX).build();
        for line in &lines {
            buffer.push(line.as_bytes().to_vec());
        }

        assert_eq!(buffer.mem_size(), expected);
        assert_eq!(buffer.mem_size(), lines.join("\n").len() as u64);
    }

    #[test]
    fn test_line_buffer() {
        let builder = LineBufferBuilder::new(12);
        let mut buffer = builder.build();

        buffer.push(b"banana".to_vec());
        assert_eq!(buffer.is_full(), false);
        buffer.push(b"apple".to_vec());
        assert_eq!(buffer.is_full(), true);
        assert_eq!(buffer.len(), 2);

        buffer.sort();
        let data = Vec::from_iter(buffer);
        assert_eq!(data, vec![b"apple".to_vec(), b"banana".to_vec()]);
    }

    #[test]
    fn test_sort_is_bytewise() {
        let mut buffer = LineBufferBuilder::default().build();
        for line in ["b", "B", "a", "ab", "", "\u{e9}"] {
            buffer.push(line.as_bytes().to_vec());
        }
        buffer.sort();

        let data: Vec<String> = buffer
            .into_iter()
            .map(|line| String::from_utf8(line).unwrap())
            .collect();
        assert_eq!(data, vec!["", "B", "a", "ab", "b", "\u{e9}"]);
    }

    #[cfg(feature = "memory-stats")]
    #[test]
    fn test_heap_size() {
        let mut buffer = LineBufferBuilder::default().build();
        buffer.push(b"hello!".to_vec());
        assert!(buffer.heap_size() >= 6);
    }
}
