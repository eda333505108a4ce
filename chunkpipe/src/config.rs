use crate::allocator::DEFAULT_MAX_PER_BUCKET;
use crate::error::ChunkPipeErrors;
use crate::index::IndexKind;
use crate::recycler::DEFAULT_RECYCLER_CAPACITY;

pub const DEFAULT_SMALL_APPEND_THRESHOLD: usize = 64;
pub const DEFAULT_MERGE_CHUNK_CAPACITY: usize = 1024;
pub const DEFAULT_TAIL_SLACK: usize = 16;
pub const DEFAULT_VALUE_PREFETCH: usize = 256;

/// Backend a pipe builds for itself when no allocator is injected
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AllocatorKind {
    /// [`crate::allocator::TrackingAllocator`]
    Tracking { limit: Option<usize> },
    /// [`crate::allocator::BucketAllocator`]
    Bucketed {
        max_per_bucket: usize,
        limit: Option<usize>,
    },
}

impl Default for AllocatorKind {
    fn default() -> Self {
        AllocatorKind::Tracking { limit: None }
    }
}

impl AllocatorKind {
    pub fn bucketed() -> Self {
        AllocatorKind::Bucketed {
            max_per_bucket: DEFAULT_MAX_PER_BUCKET,
            limit: None,
        }
    }
}

/// Tunables of a [`crate::pipe::ChunkPipe`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkPipeConfig {
    /// Pushes shorter than this merge into the tail chunk when it has room
    pub small_append_threshold: usize,
    /// Upper bound on the capacity reserved for a chunk opened by a short push
    pub merge_chunk_capacity: usize,
    /// Spare slots reserved behind a long push so short trailers can merge into it. Capped at
    /// `small_append_threshold`.
    pub tail_slack: usize,
    /// Drained chunk headers kept for reuse
    pub recycler_capacity: usize,
    /// Positional index, `None` to rely on list walks
    pub index: Option<IndexKind>,
    /// Chunk iterators coalesce chunks until a batch holds at least this many elements
    pub iter_min_batch: usize,
    /// Chunk iterators split chunks holding more than this many elements
    pub iter_max_batch: usize,
    /// Elements a value iterator copies out per refill
    pub value_prefetch: usize,
    pub allocator: AllocatorKind,
}

impl Default for ChunkPipeConfig {
    fn default() -> Self {
        Self {
            small_append_threshold: DEFAULT_SMALL_APPEND_THRESHOLD,
            merge_chunk_capacity: DEFAULT_MERGE_CHUNK_CAPACITY,
            tail_slack: DEFAULT_TAIL_SLACK,
            recycler_capacity: DEFAULT_RECYCLER_CAPACITY,
            index: None,
            iter_min_batch: 1,
            iter_max_batch: usize::MAX,
            value_prefetch: DEFAULT_VALUE_PREFETCH,
            allocator: AllocatorKind::default(),
        }
    }
}

impl ChunkPipeConfig {
    pub fn with_small_append_threshold(mut self, threshold: usize) -> Self {
        self.small_append_threshold = threshold;
        self
    }

    pub fn with_merge_chunk_capacity(mut self, capacity: usize) -> Self {
        self.merge_chunk_capacity = capacity;
        self
    }

    pub fn with_tail_slack(mut self, slack: usize) -> Self {
        self.tail_slack = slack;
        self
    }

    pub fn with_recycler_capacity(mut self, capacity: usize) -> Self {
        self.recycler_capacity = capacity;
        self
    }

    pub fn with_index(mut self, index: IndexKind) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_iter_batches(mut self, min: usize, max: usize) -> Self {
        self.iter_min_batch = min;
        self.iter_max_batch = max;
        self
    }

    pub fn with_value_prefetch(mut self, prefetch: usize) -> Self {
        self.value_prefetch = prefetch;
        self
    }

    pub fn with_allocator(mut self, allocator: AllocatorKind) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn validate(&self) -> Result<(), ChunkPipeErrors> {
        if self.iter_min_batch == 0 {
            return Err(ChunkPipeErrors::InvalidConfig(
                "iter_min_batch must be at least 1",
            ));
        }
        if self.iter_max_batch < self.iter_min_batch {
            return Err(ChunkPipeErrors::InvalidConfig(
                "iter_max_batch must not be below iter_min_batch",
            ));
        }
        if self.value_prefetch == 0 {
            return Err(ChunkPipeErrors::InvalidConfig(
                "value_prefetch must be at least 1",
            ));
        }
        if let AllocatorKind::Bucketed {
            max_per_bucket: 0, ..
        } = self.allocator
        {
            return Err(ChunkPipeErrors::InvalidConfig(
                "bucketed allocator needs room for at least one vector per class",
            ));
        }
        if let Some(index) = &self.index {
            index.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(ChunkPipeConfig::default().validate(), Ok(()));
        assert_eq!(
            ChunkPipeConfig::default()
                .with_index(IndexKind::default())
                .with_allocator(AllocatorKind::bucketed())
                .validate(),
            Ok(())
        );
    }

    #[test]
    fn test_rejects_inverted_batches() {
        let config = ChunkPipeConfig::default().with_iter_batches(16, 8);
        assert!(matches!(
            config.validate(),
            Err(ChunkPipeErrors::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_zero_batches() {
        let config = ChunkPipeConfig::default().with_iter_batches(0, 8);
        assert!(config.validate().is_err());
        let config = ChunkPipeConfig::default().with_value_prefetch(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_small_fanout() {
        let config = ChunkPipeConfig::default().with_index(IndexKind::BPlusTree { fanout: 2 });
        assert!(config.validate().is_err());
        let config = ChunkPipeConfig::default().with_index(IndexKind::SkipList {
            max_level: 0,
            seed: 1,
        });
        assert!(config.validate().is_err());
    }
}
