//! Ordered maps from stream position to the chunk starting there.
//!
//! Both structures answer the same question: given a position, which entry has the greatest key
//! at or below it, and how far past that key is the position. They never delete; the pipe
//! verifies every hit and rebuilds the index once enough entries went stale.

pub mod bptree;
pub mod skip_list;

pub use bptree::BPlusTree;
pub use skip_list::SkipList;

pub const DEFAULT_FANOUT: usize = 128;
pub const DEFAULT_MAX_LEVEL: usize = 16;
pub const DEFAULT_SKIP_LIST_SEED: u64 = 0x5eed_c4a1;

pub trait PositionIndex<V: Copy>: Send + Sync {
    /// Maps `position` to `value`, replacing any entry already at that position
    fn insert(&mut self, position: u64, value: V);

    /// Entry with the greatest position `<= position`, plus the residual offset past it
    fn find(&self, position: u64) -> Option<(V, u64)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);
}

/// Which index structure a pipe maintains
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// B+ tree with at most `fanout` children per node
    BPlusTree { fanout: usize },
    /// Skip list with randomized levels, reproducible through `seed`
    SkipList { max_level: usize, seed: u64 },
}

impl Default for IndexKind {
    fn default() -> Self {
        IndexKind::BPlusTree {
            fanout: DEFAULT_FANOUT,
        }
    }
}

impl IndexKind {
    pub fn skip_list() -> Self {
        IndexKind::SkipList {
            max_level: DEFAULT_MAX_LEVEL,
            seed: DEFAULT_SKIP_LIST_SEED,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::ChunkPipeErrors> {
        use crate::error::ChunkPipeErrors::InvalidConfig;
        match *self {
            IndexKind::BPlusTree { fanout } if fanout < 4 => {
                Err(InvalidConfig("index fanout must be at least 4"))
            }
            IndexKind::SkipList { max_level, .. } if max_level == 0 || max_level > 32 => {
                Err(InvalidConfig("skip list max_level must be within 1..=32"))
            }
            _ => Ok(()),
        }
    }

    pub fn build<V: Copy + Send + Sync + 'static>(&self) -> Box<dyn PositionIndex<V>> {
        match *self {
            IndexKind::BPlusTree { fanout } => Box::new(BPlusTree::new(fanout)),
            IndexKind::SkipList { max_level, seed } => Box::new(SkipList::new(max_level, seed)),
        }
    }
}
