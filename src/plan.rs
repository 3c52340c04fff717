//! Phase and batch partitioning
//!
//! All index arithmetic for splitting features into phases and contexts into
//! batches lives here. Both use the same rule: `ceil(total / size)` chunks,
//! chunk `i` covering `[i * size, min((i + 1) * size, total))`.

/// A contiguous chunk `[start, end)` of a partitioned range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk index
    pub index: usize,
    /// First element (inclusive)
    pub start: usize,
    /// Last element (exclusive)
    pub end: usize,
}

impl Chunk {
    /// Number of elements in the chunk
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Check if the chunk is empty (never produced by [`Chunks`])
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Iterator over the chunks of `0..total` in pieces of at most `size`
#[derive(Debug, Clone)]
pub struct Chunks {
    total: usize,
    size: usize,
    next: usize,
}

impl Chunks {
    /// Partition `0..total` into chunks of at most `size` elements.
    ///
    /// `size` must be positive; a zero size yields no chunks.
    pub fn new(total: usize, size: usize) -> Self {
        Self {
            total,
            size,
            next: 0,
        }
    }

    /// Number of chunks, `ceil(total / size)`
    pub fn count_chunks(&self) -> usize {
        if self.size == 0 {
            0
        } else {
            self.total.div_ceil(self.size)
        }
    }
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.next >= self.count_chunks() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        let start = index * self.size;
        let end = (start + self.size).min(self.total);
        Some(Chunk { index, start, end })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count_chunks() - self.next.min(self.count_chunks());
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks {}

/// Feature phases: `(phase index, feature slice)` for `n_features` in phases of `per_phase`
pub fn phases(n_features: usize, per_phase: usize) -> Chunks {
    Chunks::new(n_features, per_phase)
}

/// Context batches: `(batch index, context slice)` for `n_contexts` in batches of `batch_size`
pub fn batches(n_contexts: usize, batch_size: usize) -> Chunks {
    Chunks::new(n_contexts, batch_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_with_remainder() {
        let chunks: Vec<Chunk> = phases(45, 20).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], Chunk { index: 0, start: 0, end: 20 });
        assert_eq!(chunks[1], Chunk { index: 1, start: 20, end: 40 });
        assert_eq!(chunks[2], Chunk { index: 2, start: 40, end: 45 });
        assert_eq!(chunks[2].len(), 5);
    }

    #[test]
    fn test_phases_exact_multiple() {
        // no empty trailing phase and no over-wide last phase
        let chunks: Vec<Chunk> = phases(40, 20).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], Chunk { index: 1, start: 20, end: 40 });
        assert!(chunks.iter().all(|c| c.len() == 20));
    }

    #[test]
    fn test_phase_larger_than_total() {
        let chunks: Vec<Chunk> = phases(7, 20).collect();
        assert_eq!(chunks, vec![Chunk { index: 0, start: 0, end: 7 }]);
    }

    #[test]
    fn test_batches_cover_every_context_once() {
        let chunks: Vec<Chunk> = batches(10, 3).collect();
        assert_eq!(chunks.len(), 4);
        let covered: Vec<usize> = chunks.iter().flat_map(|c| c.start..c.end).collect();
        assert_eq!(covered, (0..10).collect::<Vec<_>>());
        assert_eq!(chunks.last().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_and_zero_size() {
        assert_eq!(phases(0, 5).count(), 0);
        assert_eq!(Chunks::new(5, 0).count(), 0);
        assert_eq!(batches(4, 2).len(), 2);
    }
}
