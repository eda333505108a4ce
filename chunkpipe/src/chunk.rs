use crate::slot::Slot;
use derivative::Derivative;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub type ChunkSlot<T> = Slot<Chunk<T>>;

/// Where a chunk's storage came from, and so where it goes once drained
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum StorageOrigin {
    /// Lent by the pipe's [`crate::allocator::Allocator`]
    #[default]
    Pooled,
    /// Taken over from the caller through a zero-copy push
    Adopted,
}

/// Element storage of a chunk together with its valid range.
///
/// `offset` counts elements popped from the front, `size` is one past the last element still
/// present. Only `[offset, size)` lives in `storage`.
#[derive(Debug)]
pub(crate) struct ChunkBody<T> {
    storage: VecDeque<T>,
    offset: usize,
    size: usize,
}

impl<T> Default for ChunkBody<T> {
    fn default() -> Self {
        Self {
            storage: VecDeque::new(),
            offset: 0,
            size: 0,
        }
    }
}

impl<T> ChunkBody<T> {
    fn from_storage(storage: Vec<T>) -> Self {
        let size = storage.len();
        Self {
            storage: VecDeque::from(storage),
            offset: 0,
            size,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Elements in the valid range
    pub fn len(&self) -> usize {
        self.check();
        self.size - self.offset
    }

    pub fn is_drained(&self) -> bool {
        self.offset == self.size
    }

    /// Trailing capacity a short push may merge into
    pub fn spare_capacity(&self) -> usize {
        self.storage.capacity() - self.storage.len()
    }

    /// Element `index` positions past the first valid one
    pub fn get(&self, index: usize) -> Option<&T> {
        self.storage.get(index)
    }

    pub fn pop_front(&mut self) -> Option<T> {
        let value = self.storage.pop_front()?;
        self.offset += 1;
        self.check();
        Some(value)
    }

    pub fn pop_back(&mut self) -> Option<T> {
        let value = self.storage.pop_back()?;
        self.size -= 1;
        self.check();
        Some(value)
    }

    /// Moves every valid element out, leaving the body drained
    pub fn drain_all(&mut self) -> Vec<T> {
        let drained: Vec<T> = self.storage.drain(..).collect();
        self.offset = self.size;
        drained
    }

    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, T> {
        self.storage.iter()
    }

    fn check(&self) {
        assert!(
            self.offset <= self.size,
            "chunk offset {} ran past size {}",
            self.offset,
            self.size
        );
        debug_assert_eq!(self.storage.len(), self.size - self.offset);
    }
}

impl<T: Clone> ChunkBody<T> {
    /// Appends into spare capacity. The caller checks [`ChunkBody::spare_capacity`] first.
    pub fn extend_from_slice(&mut self, data: &[T]) {
        debug_assert!(data.len() <= self.spare_capacity());
        self.storage.extend(data.iter().cloned());
        self.size = self.offset + self.storage.len();
    }

    /// Clones up to `limit` elements starting `skip` positions into the valid range
    pub fn clone_run(&self, skip: usize, limit: usize, out: &mut Vec<T>) -> usize {
        let before = out.len();
        out.extend(self.storage.iter().skip(skip).take(limit).cloned());
        out.len() - before
    }
}

/// A linked segment of the pipe.
///
/// The header fields (`base`, links, origin) only change under the pipe's exclusive lock. The
/// body sits behind its own mutex so single-element operations can run while the structure is
/// only read-locked.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Chunk<T> {
    /// Absolute stream position of storage index 0
    pub(crate) base: u64,
    pub(crate) prev: Option<ChunkSlot<T>>,
    pub(crate) next: Option<ChunkSlot<T>>,
    pub(crate) origin: StorageOrigin,
    #[derivative(Debug = "ignore")]
    body: Mutex<ChunkBody<T>>,
}

impl<T> Default for Chunk<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Chunk<T> {
    /// A header without storage, ready for [`Chunk::reset`]
    pub fn empty() -> Self {
        Self {
            base: 0,
            prev: None,
            next: None,
            origin: StorageOrigin::Pooled,
            body: Mutex::new(ChunkBody::default()),
        }
    }

    /// Points a (possibly recycled) header at fresh storage
    pub fn reset(&mut self, storage: Vec<T>, base: u64, origin: StorageOrigin) {
        self.base = base;
        self.prev = None;
        self.next = None;
        self.origin = origin;
        *self.body_mut() = ChunkBody::from_storage(storage);
    }

    /// Takes the storage back out, cleared, leaving a header fit for recycling
    pub fn strip(&mut self) -> (Vec<T>, StorageOrigin) {
        self.prev = None;
        self.next = None;
        let body = std::mem::take(self.body_mut());
        let mut storage = Vec::from(body.storage);
        storage.clear();
        (storage, self.origin)
    }

    // Poisoning only happens if an element's Clone/Drop panicked; the bounds are still
    // consistent at every point such a panic can occur.
    pub(crate) fn lock_body(&self) -> MutexGuard<'_, ChunkBody<T>> {
        self.body.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn body_mut(&mut self) -> &mut ChunkBody<T> {
        self.body.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Absolute position of the first valid element
    pub fn front_position(&self) -> u64 {
        self.base + self.lock_body().offset as u64
    }

    /// Absolute position one past the last valid element
    pub fn end_position(&self) -> u64 {
        self.base + self.lock_body().size as u64
    }
}

impl<T: Clone> Chunk<T> {
    /// Clone of the element at absolute `position`, if it is still in the valid range
    pub fn read_at(&self, position: u64) -> Option<T> {
        let body = self.lock_body();
        let start = self.base + body.offset() as u64;
        if position < start {
            return None;
        }
        usize::try_from(position - start)
            .ok()
            .and_then(|index| body.get(index).cloned())
    }
}
