pub use super::allocator::{Allocator, BucketAllocator, TrackingAllocator};
pub use super::arena::Arena;
pub use super::chunk::{Chunk, ChunkSlot, StorageOrigin};
pub use super::config::{AllocatorKind, ChunkPipeConfig};
pub use super::error;
pub use super::error::ChunkPipeErrors;
pub use super::index::{BPlusTree, IndexKind, PositionIndex, SkipList};
pub use super::iter::{ChunkIter, ValueIter};
pub use super::pipe::{ChunkPipe, ChunkPipeBuilder, PipeStats};
pub use super::recycler::{HeaderRecycler, RecyclerStats};
pub use super::slot::Slot;
