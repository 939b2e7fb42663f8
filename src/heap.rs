//! Array backed binary min-heap.

use std::cmp::Ordering;

use crate::line::Line;

/// Binary min-heap. The smallest element is always at index 0, children of element `i` are
/// located at `2i + 1` and `2i + 2`.
pub struct MinHeap<T: Ord> {
    items: Vec<T>,
}

impl<T: Ord> MinHeap<T> {
    pub fn new() -> Self {
        MinHeap { items: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        MinHeap {
            items: Vec::with_capacity(capacity),
        }
    }

    /// Adds an item to the heap. Time complexity is O(log n).
    pub fn push(&mut self, item: T) {
        self.items.push(item);
        self.sift_up(self.items.len() - 1);
    }

    /// Removes the smallest item from the heap and returns it. Time complexity is O(log n).
    pub fn pop(&mut self) -> Option<T> {
        let last = self.items.pop()?;
        if self.items.is_empty() {
            return Some(last);
        }

        let min = std::mem::replace(&mut self.items[0], last);
        self.sift_down(0);

        return Some(min);
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.items[idx] >= self.items[parent] {
                break;
            }
            self.items.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.items.len();
        loop {
            let left = 2 * idx + 1;
            if left >= len {
                break;
            }

            let right = left + 1;
            let smallest = if right < len && self.items[right] < self.items[left] {
                right
            } else {
                left
            };

            if self.items[idx] <= self.items[smallest] {
                break;
            }
            self.items.swap(idx, smallest);
            idx = smallest;
        }
    }
}

impl<T: Ord> Default for MinHeap<T> {
    fn default() -> Self {
        MinHeap::new()
    }
}

/// Merge heap entry: the current head line of a run and the run it was read from.
/// Entries are ordered by line only, the run index is a payload.
#[derive(Debug)]
pub struct HeapEntry {
    pub line: Line,
    pub run: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.line == other.line
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.line.cmp(&other.line)
    }
}
