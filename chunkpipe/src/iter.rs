//! Lazy iterators over a live [`ChunkPipe`].
//!
//! Neither iterator holds a lock between calls to `next`. Each refill takes the structure lock
//! shared just long enough to copy the next run out, so producers and consumers keep going while
//! an iterator is alive. An iterator tracks an absolute stream position: elements pushed after it
//! was created are visited once it gets there, and if consumers pop past it, it picks up at the
//! new front.

use crate::chunk::ChunkSlot;
use crate::pipe::ChunkPipe;
use std::iter::FusedIterator;

/// Yields copies of single elements, oldest first
pub struct ValueIter<'a, T> {
    pipe: &'a ChunkPipe<T>,
    cursor: u64,
    hint: Option<ChunkSlot<T>>,
    prefetch: usize,
    buffer: std::vec::IntoIter<T>,
    finished: bool,
}

impl<'a, T: Clone + Send + Sync + 'static> ValueIter<'a, T> {
    pub(crate) fn new(pipe: &'a ChunkPipe<T>, prefetch: usize) -> Self {
        Self {
            pipe,
            cursor: pipe.front_position(),
            hint: None,
            prefetch: prefetch.max(1),
            buffer: Vec::new().into_iter(),
            finished: false,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Iterator for ValueIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if let Some(value) = self.buffer.next() {
            return Some(value);
        }
        if self.finished {
            return None;
        }
        let mut run = Vec::with_capacity(self.prefetch);
        self.pipe
            .read_run(&mut self.cursor, &mut self.hint, 1, self.prefetch, &mut run);
        if run.is_empty() {
            self.finished = true;
            return None;
        }
        self.buffer = run.into_iter();
        self.buffer.next()
    }
}

impl<T: Clone + Send + Sync + 'static> FusedIterator for ValueIter<'_, T> {}

/// Yields copies of chunk contents, oldest first.
///
/// Consecutive chunks are coalesced until a batch holds at least `min` elements, and no batch
/// holds more than `max`; a longer chunk is handed out over several batches. With the default
/// bounds every batch is exactly one chunk's valid range.
pub struct ChunkIter<'a, T> {
    pipe: &'a ChunkPipe<T>,
    cursor: u64,
    hint: Option<ChunkSlot<T>>,
    min: usize,
    max: usize,
    finished: bool,
}

impl<'a, T: Clone + Send + Sync + 'static> ChunkIter<'a, T> {
    pub(crate) fn new(pipe: &'a ChunkPipe<T>, min: usize, max: usize) -> Self {
        let min = min.max(1);
        Self {
            pipe,
            cursor: pipe.front_position(),
            hint: None,
            min,
            max: max.max(min),
            finished: false,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Iterator for ChunkIter<'_, T> {
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Vec<T>> {
        if self.finished {
            return None;
        }
        let mut batch = Vec::new();
        self.pipe
            .read_run(&mut self.cursor, &mut self.hint, self.min, self.max, &mut batch);
        if batch.is_empty() {
            self.finished = true;
            return None;
        }
        Some(batch)
    }
}

impl<T: Clone + Send + Sync + 'static> FusedIterator for ChunkIter<'_, T> {}

#[cfg(test)]
mod tests {
    use crate::config::ChunkPipeConfig;
    use crate::pipe::ChunkPipe;

    fn pipe_of(chunks: &[&[u32]], config: ChunkPipeConfig) -> ChunkPipe<u32> {
        let pipe = ChunkPipe::with_config(config.with_small_append_threshold(0)).unwrap();
        for chunk in chunks {
            pipe.push(chunk).unwrap();
        }
        pipe
    }

    #[test]
    fn test_value_iter_order() {
        let pipe = pipe_of(&[&[1, 2], &[3], &[4, 5, 6]], ChunkPipeConfig::default());
        assert_eq!(pipe.value_iter().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(pipe.len(), 6);
    }

    #[test]
    fn test_value_iter_small_prefetch() {
        let pipe = pipe_of(
            &[&[1, 2, 3, 4, 5], &[6, 7]],
            ChunkPipeConfig::default().with_value_prefetch(2),
        );
        assert_eq!(pipe.value_iter().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_chunk_iter_defaults_follow_chunks() {
        let pipe = pipe_of(&[&[1, 2], &[3], &[4, 5, 6]], ChunkPipeConfig::default());
        pipe.pop_front();
        assert_eq!(
            pipe.chunk_iter().collect::<Vec<_>>(),
            vec![vec![2], vec![3], vec![4, 5, 6]]
        );
    }

    #[test]
    fn test_chunk_iter_coalesces_and_splits() {
        let pipe = pipe_of(
            &[&[1], &[2, 3], &[4], &[5, 6, 7, 8, 9, 10, 11, 12, 13, 14]],
            ChunkPipeConfig::default().with_iter_batches(4, 6),
        );
        let batches: Vec<Vec<u32>> = pipe.chunk_iter().collect();
        assert_eq!(
            batches,
            vec![
                vec![1, 2, 3, 4],
                vec![5, 6, 7, 8, 9, 10],
                vec![11, 12, 13, 14],
            ]
        );
        assert!(batches.iter().all(|batch| batch.len() <= 6));
    }

    #[test]
    fn test_chunk_iter_short_tail() {
        let pipe = pipe_of(
            &[&[1, 2, 3, 4, 5, 6, 7]],
            ChunkPipeConfig::default().with_iter_batches(3, 3),
        );
        assert_eq!(
            pipe.chunk_iter().collect::<Vec<_>>(),
            vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]
        );
    }

    #[test]
    fn test_value_iter_sees_later_pushes() {
        let pipe = pipe_of(&[&[1, 2]], ChunkPipeConfig::default().with_value_prefetch(1));
        let mut iter = pipe.value_iter();
        assert_eq!(iter.next(), Some(1));
        pipe.push(&[3]).unwrap();
        assert_eq!(iter.collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_value_iter_resumes_at_front() {
        let pipe = pipe_of(
            &[&[1, 2, 3], &[4, 5, 6]],
            ChunkPipeConfig::default().with_value_prefetch(1),
        );
        let mut iter = pipe.value_iter();
        assert_eq!(iter.next(), Some(1));
        pipe.pop_chunk_front();
        pipe.pop_front();
        assert_eq!(iter.collect::<Vec<_>>(), vec![5, 6]);
    }

    #[test]
    fn test_iterators_are_fused() {
        let pipe = pipe_of(&[&[1]], ChunkPipeConfig::default());
        let mut values = pipe.value_iter();
        let mut chunks = pipe.chunk_iter();
        assert_eq!(values.next(), Some(1));
        assert_eq!(values.next(), None);
        assert_eq!(chunks.next(), Some(vec![1]));
        assert_eq!(chunks.next(), None);
        pipe.push(&[2]).unwrap();
        assert_eq!(values.next(), None);
        assert_eq!(chunks.next(), None);
    }

    #[test]
    fn test_iter_over_drained_pipe() {
        let pipe = pipe_of(&[&[1, 2]], ChunkPipeConfig::default());
        pipe.pop_front();
        pipe.pop_front();
        assert_eq!(pipe.value_iter().next(), None);
        pipe.push(&[3]).unwrap();
        assert_eq!(pipe.value_iter().collect::<Vec<_>>(), vec![3]);
        assert_eq!(pipe.chunk_iter().collect::<Vec<_>>(), vec![vec![3]]);
    }
}
