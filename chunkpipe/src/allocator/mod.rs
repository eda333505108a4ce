//! Storage allocators backing chunk payloads.
//!
//! The pipe only ever talks to [`Allocator`]; which backend sits behind it is chosen through
//! [`crate::config::AllocatorKind`] or injected directly with
//! [`crate::pipe::ChunkPipeBuilder::allocator`].

pub mod bucketed;
pub mod tracking;

pub use bucketed::*;
pub use tracking::*;

use crate::error::ChunkPipeErrors;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Expectation of an allocator
pub trait Allocator<T>: Send + Sync {
    /// Hand out empty storage able to hold at least `capacity` elements.
    ///
    /// The contents of the backing memory are unspecified, hence the empty [`Vec`].
    fn allocate(&self, capacity: usize) -> Result<Vec<T>, ChunkPipeErrors>;

    /// Take back storage previously handed out by [`Allocator::allocate`]
    fn free(&self, storage: Vec<T>);

    /// Bytes currently lent out
    fn size(&self) -> usize;
}

pub(crate) fn bytes_for<T>(capacity: usize) -> usize {
    capacity.saturating_mul(std::mem::size_of::<T>())
}

/// Outstanding-bytes counter with an optional budget, shared by the backends
#[derive(Debug, Default)]
pub(crate) struct Budget {
    outstanding: AtomicUsize,
    limit: Option<usize>,
}

impl Budget {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        Self {
            outstanding: AtomicUsize::new(0),
            limit,
        }
    }

    /// Claims `bytes` against the limit; fails without claiming anything if it does not fit
    pub(crate) fn claim(&self, bytes: usize) -> bool {
        match self.limit {
            None => {
                self.outstanding.fetch_add(bytes, Ordering::AcqRel);
                true
            }
            Some(limit) => self
                .outstanding
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    current.checked_add(bytes).filter(|total| *total <= limit)
                })
                .is_ok(),
        }
    }

    /// Records bytes already handed out, ignoring the limit
    pub(crate) fn charge(&self, bytes: usize) {
        self.outstanding.fetch_add(bytes, Ordering::AcqRel);
    }

    pub(crate) fn release(&self, bytes: usize) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

/// Fallible fresh allocation shared by the backends
pub(crate) fn reserve<T>(capacity: usize) -> Result<Vec<T>, ChunkPipeErrors> {
    let mut storage = Vec::new();
    storage.try_reserve_exact(capacity).map_err(|_| {
        tracing::warn!("System allocator refused {} elements", capacity);
        ChunkPipeErrors::AllocationFailed {
            requested: capacity,
        }
    })?;
    Ok(storage)
}
