use super::{bytes_for, reserve, Allocator, Budget};
use crate::error::ChunkPipeErrors;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const DEFAULT_MAX_PER_BUCKET: usize = 64;

/// Allocator keeping freed storage in power-of-two size classes.
///
/// Every vector parked in class `c` has a capacity of at least `c`, so a request is served
/// from the class of its capacity rounded up to the next power of two. Each class holds at
/// most `max_per_bucket` vectors; anything past that goes back to the system.
#[derive(Debug)]
pub struct BucketAllocator<T> {
    buckets: DashMap<usize, Vec<Vec<T>>>,
    max_per_bucket: usize,
    budget: Budget,
    pooled_bytes: AtomicUsize,
}

impl<T> Default for BucketAllocator<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PER_BUCKET, None)
    }
}

impl<T> BucketAllocator<T> {
    pub fn new(max_per_bucket: usize, limit: Option<usize>) -> Self {
        Self {
            buckets: DashMap::new(),
            max_per_bucket,
            budget: Budget::new(limit),
            pooled_bytes: AtomicUsize::new(0),
        }
    }

    /// Class a request of `capacity` elements is served from
    fn request_class(capacity: usize) -> usize {
        capacity.max(1).checked_next_power_of_two().unwrap_or(capacity)
    }

    /// Class a returned vector of `capacity` elements can serve
    fn storage_class(capacity: usize) -> usize {
        match capacity {
            0 => 0,
            capacity => 1 << (usize::BITS - 1 - capacity.leading_zeros()),
        }
    }

    /// Bytes sitting in the free lists, ready for reuse
    pub fn pooled(&self) -> usize {
        self.pooled_bytes.load(Ordering::Acquire)
    }

    /// Vectors parked in the class serving `capacity`
    pub fn pooled_in_class(&self, capacity: usize) -> usize {
        self.buckets
            .get(&Self::request_class(capacity))
            .map(|bucket| bucket.len())
            .unwrap_or(0)
    }

    /// Returns every pooled vector to the system
    pub fn shrink(&self) -> usize {
        let released = self.pooled_bytes.swap(0, Ordering::AcqRel);
        self.buckets.clear();
        released
    }
}

impl<T: Send + Sync> Allocator<T> for BucketAllocator<T> {
    fn allocate(&self, capacity: usize) -> Result<Vec<T>, ChunkPipeErrors> {
        let class = Self::request_class(capacity);
        let reused = self
            .buckets
            .get_mut(&class)
            .and_then(|mut bucket| bucket.pop());
        if let Some(storage) = reused {
            let bytes = bytes_for::<T>(storage.capacity());
            if self.budget.claim(bytes) {
                self.pooled_bytes.fetch_sub(bytes, Ordering::AcqRel);
                return Ok(storage);
            }
            // over budget: park it again and report the failure below
            self.buckets.entry(class).or_default().push(storage);
        } else {
            let requested = bytes_for::<T>(class);
            if self.budget.claim(requested) {
                let storage =
                    reserve::<T>(class).inspect_err(|_| self.budget.release(requested))?;
                self.budget
                    .charge(bytes_for::<T>(storage.capacity()).saturating_sub(requested));
                return Ok(storage);
            }
        }
        tracing::warn!(
            "Bucket allocation of {} elements refused, {} bytes outstanding",
            class,
            self.budget.outstanding()
        );
        Err(ChunkPipeErrors::AllocationFailed {
            requested: capacity,
        })
    }

    fn free(&self, mut storage: Vec<T>) {
        let bytes = bytes_for::<T>(storage.capacity());
        self.budget.release(bytes);
        let class = Self::storage_class(storage.capacity());
        if class == 0 {
            return;
        }
        storage.clear();
        let mut bucket = self.buckets.entry(class).or_default();
        if bucket.len() < self.max_per_bucket {
            bucket.push(storage);
            self.pooled_bytes.fetch_add(bytes, Ordering::AcqRel);
        }
    }

    fn size(&self) -> usize {
        self.budget.outstanding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classes() {
        assert_eq!(BucketAllocator::<u8>::request_class(0), 1);
        assert_eq!(BucketAllocator::<u8>::request_class(100), 128);
        assert_eq!(BucketAllocator::<u8>::request_class(128), 128);
        assert_eq!(BucketAllocator::<u8>::storage_class(128), 128);
        assert_eq!(BucketAllocator::<u8>::storage_class(200), 128);
        assert_eq!(BucketAllocator::<u8>::storage_class(0), 0);
    }

    #[test]
    fn test_freed_storage_is_reused() {
        let allocator = BucketAllocator::<u32>::new(4, None);
        let mut storage = allocator.allocate(100).unwrap();
        assert!(storage.capacity() >= 128);
        storage.extend_from_slice(&[1, 2, 3]);
        let pointer = storage.as_ptr();
        allocator.free(storage);
        assert_eq!(allocator.size(), 0);
        assert!(allocator.pooled() > 0);
        assert_eq!(allocator.pooled_in_class(128), 1);

        let reused = allocator.allocate(120).unwrap();
        assert_eq!(reused.as_ptr(), pointer);
        assert!(reused.is_empty());
        assert_eq!(allocator.pooled(), 0);
    }

    #[test]
    fn test_bucket_bound() {
        let allocator = BucketAllocator::<u8>::new(2, None);
        let storages: Vec<_> = (0..4).map(|_| allocator.allocate(8).unwrap()).collect();
        for storage in storages {
            allocator.free(storage);
        }
        assert_eq!(allocator.pooled_in_class(8), 2);
        assert_eq!(allocator.shrink(), 16);
        assert_eq!(allocator.pooled_in_class(8), 0);
    }

    #[test]
    fn test_limit() {
        let allocator = BucketAllocator::<u8>::new(2, Some(32));
        let storage = allocator.allocate(32).unwrap();
        assert_eq!(
            allocator.allocate(1),
            Err(ChunkPipeErrors::AllocationFailed { requested: 1 })
        );
        allocator.free(storage);
        assert!(allocator.allocate(20).is_ok());
    }
}
