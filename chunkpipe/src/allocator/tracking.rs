use super::{bytes_for, reserve, Allocator, Budget};
use crate::error::ChunkPipeErrors;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Plain heap allocation that keeps track of how many bytes are lent out.
///
/// With a limit set, requests that would push the outstanding total past it fail instead of
/// reaching the system allocator.
#[derive(Debug)]
pub struct TrackingAllocator<T> {
    budget: Budget,
    allocations: AtomicUsize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for TrackingAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TrackingAllocator<T> {
    pub fn new() -> Self {
        Self::with_limit(None)
    }

    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            budget: Budget::new(limit),
            allocations: AtomicUsize::new(0),
            _marker: PhantomData,
        }
    }

    /// Number of live allocations
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Acquire)
    }
}

impl<T> Allocator<T> for TrackingAllocator<T> {
    fn allocate(&self, capacity: usize) -> Result<Vec<T>, ChunkPipeErrors> {
        let requested = bytes_for::<T>(capacity);
        if !self.budget.claim(requested) {
            tracing::warn!(
                "Allocation of {} bytes refused, {} bytes already outstanding",
                requested,
                self.budget.outstanding()
            );
            return Err(ChunkPipeErrors::AllocationFailed {
                requested: capacity,
            });
        }
        let storage = reserve::<T>(capacity).inspect_err(|_| self.budget.release(requested))?;
        // the system allocator may round up
        self.budget
            .charge(bytes_for::<T>(storage.capacity()).saturating_sub(requested));
        self.allocations.fetch_add(1, Ordering::AcqRel);
        Ok(storage)
    }

    fn free(&self, storage: Vec<T>) {
        self.budget.release(bytes_for::<T>(storage.capacity()));
        let _ = self
            .allocations
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            });
    }

    fn size(&self) -> usize {
        self.budget.outstanding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_tracks_outstanding() {
        let allocator = TrackingAllocator::<u64>::new();
        let first = allocator.allocate(16).unwrap();
        let second = allocator.allocate(4).unwrap();
        assert!(first.is_empty() && first.capacity() >= 16);
        assert!(allocator.size() >= 20 * 8);
        assert_eq!(allocator.allocations(), 2);

        allocator.free(first);
        allocator.free(second);
        assert_eq!(allocator.size(), 0);
        assert_eq!(allocator.allocations(), 0);
    }

    #[test]
    fn test_limit_refuses_request() {
        let allocator = TrackingAllocator::<u32>::with_limit(Some(64));
        let storage = allocator.allocate(8).unwrap();
        assert_eq!(
            allocator.allocate(64),
            Err(ChunkPipeErrors::AllocationFailed { requested: 64 })
        );
        allocator.free(storage);
        assert!(allocator.allocate(16).is_ok());
    }

    #[test]
    fn test_zero_sized_elements() {
        let allocator = TrackingAllocator::<()>::new();
        let storage = allocator.allocate(1000).unwrap();
        assert_eq!(allocator.size(), 0);
        allocator.free(storage);
    }
}
