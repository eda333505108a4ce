use crate::allocator::{Allocator, BucketAllocator, TrackingAllocator};
use crate::arena::Arena;
use crate::chunk::{Chunk, ChunkSlot, StorageOrigin};
use crate::config::{AllocatorKind, ChunkPipeConfig};
use crate::error::ChunkPipeErrors;
use crate::index::{IndexKind, PositionIndex};
use crate::iter::{ChunkIter, ValueIter};
use crate::recycler::{HeaderRecycler, RecyclerStats};
use derivative::Derivative;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Stale index entries tolerated regardless of how few chunks are live
const MIN_STALE_BEFORE_REBUILD: usize = 64;

/// A chunk opened by a short push reserves room for this many threshold-sized pushes
const MERGE_RESERVE_FACTOR: usize = 4;

/// Snapshot of a pipe's bookkeeping
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct PipeStats {
    pub valid_size: usize,
    pub chunks: usize,
    pub index_entries: usize,
    pub stale_index_hits: usize,
    pub allocated_bytes: usize,
    pub recycler: RecyclerStats,
}

/// Everything guarded by the structure lock
pub(crate) struct PipeInner<T> {
    arena: Arena<Chunk<T>>,
    head: Option<ChunkSlot<T>>,
    tail: Option<ChunkSlot<T>>,
    /// Where the stream ended when the list last ran empty
    drained_end: u64,
    index: Option<Box<dyn PositionIndex<ChunkSlot<T>>>>,
    /// Index entries left behind by unlinked chunks since the last rebuild
    stale_entries: usize,
}

pub(crate) struct Walk<'a, T> {
    inner: &'a PipeInner<T>,
    cursor: Option<ChunkSlot<T>>,
}

impl<'a, T> Iterator for Walk<'a, T> {
    type Item = (ChunkSlot<T>, &'a Chunk<T>);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor?;
        let chunk = self.inner.arena.get(slot)?;
        self.cursor = chunk.next;
        Some((slot, chunk))
    }
}

impl<T> PipeInner<T> {
    fn new(index: Option<Box<dyn PositionIndex<ChunkSlot<T>>>>) -> Self {
        Self {
            arena: Arena::new(),
            head: None,
            tail: None,
            drained_end: 0,
            index,
            stale_entries: 0,
        }
    }

    pub(crate) fn walk(&self) -> Walk<'_, T> {
        Walk {
            inner: self,
            cursor: self.head,
        }
    }

    pub(crate) fn chunk(&self, slot: ChunkSlot<T>) -> Option<&Chunk<T>> {
        self.arena.get(slot)
    }

    pub(crate) fn front_position(&self) -> u64 {
        self.head
            .and_then(|head| self.arena.get(head))
            .map(|chunk| chunk.front_position())
            .unwrap_or(self.drained_end)
    }

    fn end_position(&self) -> u64 {
        self.tail
            .and_then(|tail| self.arena.get(tail))
            .map(|chunk| chunk.end_position())
            .unwrap_or(self.drained_end)
    }

    /// A chunk at or before the one holding `position`, as close to it as the hint and the
    /// index allow. Walking forward from it through `next` reaches the position.
    pub(crate) fn locate(
        &self,
        position: u64,
        hint: Option<ChunkSlot<T>>,
    ) -> Option<ChunkSlot<T>> {
        let usable = |slot: ChunkSlot<T>| {
            self.arena
                .get(slot)
                .is_some_and(|chunk| chunk.base <= position)
        };
        if let Some(slot) = hint.filter(|slot| usable(*slot)) {
            return Some(slot);
        }
        if let Some(index) = &self.index {
            if let Some((slot, _)) = index.find(position).filter(|(slot, _)| usable(*slot)) {
                return Some(slot);
            }
        }
        self.head
    }

    fn reindex(&mut self) {
        let Some(index) = self.index.as_mut() else {
            return;
        };
        index.clear();
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let Some(chunk) = self.arena.get(slot) else {
                break;
            };
            index.insert(chunk.base, slot);
            cursor = chunk.next;
        }
        self.stale_entries = 0;
        tracing::debug!(
            "Rebuilt position index over {} chunks",
            self.arena.len()
        );
    }
}

impl<T: Clone> PipeInner<T> {
    /// Linear lookup, subtracting each chunk's valid length from `index`
    fn walk_get(&self, mut index: usize) -> Option<T> {
        for (_, chunk) in self.walk() {
            let body = chunk.lock_body();
            if index < body.len() {
                return body.get(index).cloned();
            }
            index -= body.len();
        }
        None
    }
}

/// Double-ended buffer of element chunks.
///
/// Bulk pushes append whole chunks at the tail; elements or whole chunks come off either end.
/// All operations take `&self`, so a pipe can be shared between threads directly.
///
/// # Locking
/// Two tiers. Single-element pops, reads and short pushes merging into the tail take the
/// structure lock shared plus the mutex of the one chunk they touch, so a producer at the tail
/// and a consumer at the head only meet when both work on the same chunk. Linking, unlinking,
/// index maintenance, whole-chunk pops and snapshots take the structure lock exclusively. A
/// fast-path pop that drains its chunk drops both locks and comes back exclusively to unlink
/// it, so readers may briefly see drained chunks still in the list.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct ChunkPipe<T> {
    #[derivative(Debug = "ignore")]
    inner: RwLock<PipeInner<T>>,
    valid_size: AtomicUsize,
    stale_hits: AtomicUsize,
    config: ChunkPipeConfig,
    #[derivative(Debug = "ignore")]
    allocator: Arc<dyn Allocator<T>>,
    #[derivative(Debug = "ignore")]
    recycler: Arc<HeaderRecycler<T>>,
}

/// Builds a [`ChunkPipe`] from a config plus optional injected collaborators
pub struct ChunkPipeBuilder<T> {
    config: ChunkPipeConfig,
    allocator: Option<Arc<dyn Allocator<T>>>,
    recycler: Option<Arc<HeaderRecycler<T>>>,
}

impl<T: Send + Sync + 'static> Default for ChunkPipeBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> ChunkPipeBuilder<T> {
    pub fn new() -> Self {
        Self {
            config: ChunkPipeConfig::default(),
            allocator: None,
            recycler: None,
        }
    }

    pub fn config(mut self, config: ChunkPipeConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the allocator picked by [`ChunkPipeConfig::allocator`]
    pub fn allocator(mut self, allocator: Arc<dyn Allocator<T>>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Shares a recycler instead of creating one sized by [`ChunkPipeConfig::recycler_capacity`]
    pub fn recycler(mut self, recycler: Arc<HeaderRecycler<T>>) -> Self {
        self.recycler = Some(recycler);
        self
    }

    pub fn build(self) -> Result<ChunkPipe<T>, ChunkPipeErrors> {
        self.config.validate()?;
        let allocator: Arc<dyn Allocator<T>> = match self.allocator {
            Some(allocator) => allocator,
            None => match self.config.allocator {
                AllocatorKind::Tracking { limit } => Arc::new(TrackingAllocator::with_limit(limit)),
                AllocatorKind::Bucketed {
                    max_per_bucket,
                    limit,
                } => Arc::new(BucketAllocator::new(max_per_bucket, limit)),
            },
        };
        let recycler = self
            .recycler
            .unwrap_or_else(|| Arc::new(HeaderRecycler::new(self.config.recycler_capacity)));
        Ok(ChunkPipe::from_parts(self.config, allocator, recycler))
    }
}

impl<T: Send + Sync + 'static> Default for ChunkPipe<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> ChunkPipe<T> {
    pub fn new() -> Self {
        let config = ChunkPipeConfig::default();
        let recycler = Arc::new(HeaderRecycler::new(config.recycler_capacity));
        Self::from_parts(config, Arc::new(TrackingAllocator::new()), recycler)
    }

    pub fn with_config(config: ChunkPipeConfig) -> Result<Self, ChunkPipeErrors> {
        ChunkPipeBuilder::new().config(config).build()
    }

    pub fn builder() -> ChunkPipeBuilder<T> {
        ChunkPipeBuilder::new()
    }

    fn from_parts(
        config: ChunkPipeConfig,
        allocator: Arc<dyn Allocator<T>>,
        recycler: Arc<HeaderRecycler<T>>,
    ) -> Self {
        let index = config.index.map(|kind| kind.build());
        Self {
            inner: RwLock::new(PipeInner::new(index)),
            valid_size: AtomicUsize::new(0),
            stale_hits: AtomicUsize::new(0),
            config,
            allocator,
            recycler,
        }
    }

    pub fn config(&self) -> &ChunkPipeConfig {
        &self.config
    }

    // Every mutation leaves the list linked consistently before anything can panic, so a
    // poisoned lock still guards valid state.
    fn read(&self) -> RwLockReadGuard<'_, PipeInner<T>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PipeInner<T>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Elements currently retrievable
    pub fn len(&self) -> usize {
        self.valid_size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `data` as its own chunk without copying it.
    ///
    /// The pipe owns the vector from here on; its storage is dropped, not handed to the
    /// allocator, once the chunk drains.
    pub fn push_vec(&self, data: Vec<T>) -> &Self {
        if !data.is_empty() {
            self.link(data, StorageOrigin::Adopted);
        }
        self
    }

    fn link(&self, storage: Vec<T>, origin: StorageOrigin) {
        let len = storage.len();
        let mut header = self.recycler.get().unwrap_or_default();
        let mut guard = self.write();
        let inner = &mut *guard;
        let base = inner.end_position();
        header.reset(storage, base, origin);
        header.prev = inner.tail;
        let slot = inner.arena.insert(header);
        match inner.tail.and_then(|tail| inner.arena.get_mut(tail)) {
            Some(tail) => tail.next = Some(slot),
            None => inner.head = Some(slot),
        }
        inner.tail = Some(slot);
        if let Some(index) = inner.index.as_mut() {
            index.insert(base, slot);
        }
        self.valid_size.fetch_add(len, Ordering::AcqRel);
        tracing::trace!(
            "Linked chunk {:?} at position {} holding {} elements",
            slot,
            base,
            len
        );
    }

    /// Takes `slot` out of the list, returning its storage and header for reuse.
    ///
    /// Whatever is still in the chunk's valid range is dropped; callers account for it.
    fn unlink(&self, inner: &mut PipeInner<T>, slot: ChunkSlot<T>) {
        let Ok(mut chunk) = inner.arena.remove(slot) else {
            return;
        };
        match chunk.prev.and_then(|prev| inner.arena.get_mut(prev)) {
            Some(prev) => prev.next = chunk.next,
            None => inner.head = chunk.next,
        }
        match chunk.next.and_then(|next| inner.arena.get_mut(next)) {
            Some(next) => next.prev = chunk.prev,
            None => inner.tail = chunk.prev,
        }
        if inner.head.is_none() {
            inner.drained_end = chunk.base + chunk.body_mut().size() as u64;
        }
        let (storage, origin) = chunk.strip();
        match origin {
            StorageOrigin::Pooled => self.allocator.free(storage),
            StorageOrigin::Adopted => drop(storage),
        }
        self.recycler.put(chunk);
        tracing::trace!("Unlinked chunk {:?}", slot);

        if inner.index.is_some() {
            inner.stale_entries += 1;
            if inner.stale_entries > inner.arena.len().max(MIN_STALE_BEFORE_REBUILD) {
                inner.reindex();
            }
        }
    }

    /// Unlinks `slot` if it is still drained once the structure lock is held exclusively
    fn release_drained(&self, slot: ChunkSlot<T>) {
        let mut guard = self.write();
        let inner = &mut *guard;
        let drained = inner
            .arena
            .get_mut(slot)
            .is_some_and(|chunk| chunk.body_mut().is_drained());
        if drained {
            self.unlink(inner, slot);
        }
    }

    /// Removes and returns the oldest element
    pub fn pop_front(&self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        {
            let inner = self.read();
            let head = inner.head?;
            if let Some(chunk) = inner.chunk(head) {
                let mut body = chunk.lock_body();
                if let Some(value) = body.pop_front() {
                    self.valid_size.fetch_sub(1, Ordering::AcqRel);
                    let drained = body.is_drained();
                    drop(body);
                    drop(inner);
                    if drained {
                        self.release_drained(head);
                    }
                    return Some(value);
                }
            }
        }
        // the head drained under us and is waiting to be unlinked
        let mut guard = self.write();
        let inner = &mut *guard;
        while let Some(head) = inner.head {
            let (value, drained) = {
                let body = inner.arena.get_mut(head)?.body_mut();
                (body.pop_front(), body.is_drained())
            };
            if drained {
                self.unlink(inner, head);
            }
            if value.is_some() {
                self.valid_size.fetch_sub(1, Ordering::AcqRel);
                return value;
            }
        }
        None
    }

    /// Removes and returns the newest element
    pub fn pop_end(&self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        {
            let inner = self.read();
            let tail = inner.tail?;
            if let Some(chunk) = inner.chunk(tail) {
                let mut body = chunk.lock_body();
                if let Some(value) = body.pop_back() {
                    self.valid_size.fetch_sub(1, Ordering::AcqRel);
                    let drained = body.is_drained();
                    drop(body);
                    drop(inner);
                    if drained {
                        self.release_drained(tail);
                    }
                    return Some(value);
                }
            }
        }
        let mut guard = self.write();
        let inner = &mut *guard;
        while let Some(tail) = inner.tail {
            let (value, drained) = {
                let body = inner.arena.get_mut(tail)?.body_mut();
                (body.pop_back(), body.is_drained())
            };
            if drained {
                self.unlink(inner, tail);
            }
            if value.is_some() {
                self.valid_size.fetch_sub(1, Ordering::AcqRel);
                return value;
            }
        }
        None
    }

    /// Removes the head chunk, returning its valid range
    pub fn pop_chunk_front(&self) -> Option<Vec<T>> {
        self.pop_chunk(|inner| inner.head)
    }

    /// Removes the tail chunk, returning its valid range
    pub fn pop_chunk_end(&self) -> Option<Vec<T>> {
        self.pop_chunk(|inner| inner.tail)
    }

    fn pop_chunk(&self, end: impl Fn(&PipeInner<T>) -> Option<ChunkSlot<T>>) -> Option<Vec<T>> {
        if self.is_empty() {
            return None;
        }
        let mut guard = self.write();
        let inner = &mut *guard;
        while let Some(slot) = end(&*inner) {
            let values = inner.arena.get_mut(slot)?.body_mut().drain_all();
            self.unlink(inner, slot);
            if !values.is_empty() {
                self.valid_size.fetch_sub(values.len(), Ordering::AcqRel);
                return Some(values);
            }
        }
        None
    }

    /// Drops every element
    pub fn clear(&self) {
        let mut guard = self.write();
        let inner = &mut *guard;
        while let Some(head) = inner.head {
            let dropped = inner
                .arena
                .get_mut(head)
                .map(|chunk| chunk.body_mut().len())
                .unwrap_or(0);
            self.unlink(inner, head);
            self.valid_size.fetch_sub(dropped, Ordering::AcqRel);
        }
        if let Some(index) = inner.index.as_mut() {
            index.clear();
            inner.stale_entries = 0;
        }
    }

    /// Starts maintaining a positional index, built over the chunks already linked
    pub fn enable_index(&self, kind: IndexKind) -> Result<(), ChunkPipeErrors> {
        kind.validate()?;
        let mut guard = self.write();
        guard.index = Some(kind.build());
        guard.reindex();
        tracing::debug!("Enabled {:?} position index", kind);
        Ok(())
    }

    pub fn disable_index(&self) {
        self.write().index = None;
    }

    pub fn has_index(&self) -> bool {
        self.read().index.is_some()
    }

    /// Drops stale entries by rebuilding the index from the live list
    pub fn rebuild_index(&self) {
        self.write().reindex();
    }

    pub fn stats(&self) -> PipeStats {
        let inner = self.read();
        PipeStats {
            valid_size: self.len(),
            chunks: inner.arena.len(),
            index_entries: inner.index.as_ref().map(|index| index.len()).unwrap_or(0),
            stale_index_hits: self.stale_hits.load(Ordering::Relaxed),
            allocated_bytes: self.allocator.size(),
            recycler: self.recycler.stats(),
        }
    }

    /// Absolute position of the oldest element, or of the next push if empty
    pub(crate) fn front_position(&self) -> u64 {
        self.read().front_position()
    }
}

impl<T: Clone + Send + Sync + 'static> ChunkPipe<T> {
    /// Appends a copy of `data` at the tail.
    ///
    /// Short inputs merge into the tail chunk's spare capacity; anything else gets a chunk of
    /// its own from the allocator. Either all of `data` goes in or, when the allocator refuses,
    /// nothing does.
    pub fn push(&self, data: &[T]) -> Result<&Self, ChunkPipeErrors> {
        if data.is_empty() {
            return Ok(self);
        }
        let short = data.len() < self.config.small_append_threshold;
        if short && self.merge_into_tail(data) {
            return Ok(self);
        }
        let capacity = self.chunk_capacity(data.len());
        let mut storage = match self.allocator.allocate(capacity) {
            Err(_) if capacity > data.len() => self.allocator.allocate(data.len())?,
            result => result?,
        };
        storage.extend_from_slice(data);
        self.link(storage, StorageOrigin::Pooled);
        Ok(self)
    }

    /// Capacity to request for a chunk opened by a push of `len` elements
    fn chunk_capacity(&self, len: usize) -> usize {
        let threshold = self.config.small_append_threshold;
        if len < threshold {
            let reserve = threshold
                .saturating_mul(MERGE_RESERVE_FACTOR)
                .min(self.config.merge_chunk_capacity);
            len.max(reserve)
        } else {
            len.saturating_add(self.config.tail_slack.min(threshold))
        }
    }

    fn merge_into_tail(&self, data: &[T]) -> bool {
        let inner = self.read();
        let Some(chunk) = inner.tail.and_then(|tail| inner.chunk(tail)) else {
            return false;
        };
        let mut body = chunk.lock_body();
        if body.spare_capacity() < data.len() {
            return false;
        }
        body.extend_from_slice(data);
        self.valid_size.fetch_add(data.len(), Ordering::AcqRel);
        true
    }

    /// Clone of the element `index` positions behind the front.
    ///
    /// Only stable while no other thread pushes or pops; use [`ChunkPipe::value_slice`] for a
    /// consistent view.
    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.len() {
            return None;
        }
        let inner = self.read();
        let head = inner.chunk(inner.head?)?;
        let front = {
            let body = head.lock_body();
            if index < body.len() {
                return body.get(index).cloned();
            }
            head.base + body.offset() as u64
        };
        if let Some(position_index) = &inner.index {
            let position = front + index as u64;
            if let Some((slot, _)) = position_index.find(position) {
                if let Some(value) = inner.chunk(slot).and_then(|chunk| chunk.read_at(position)) {
                    return Some(value);
                }
                self.stale_hits.fetch_add(1, Ordering::Relaxed);
            }
        }
        inner.walk_get(index)
    }

    /// Oldest element without removing it
    pub fn front(&self) -> Option<T> {
        self.get(0)
    }

    /// Newest element without removing it
    pub fn back(&self) -> Option<T> {
        let inner = self.read();
        let mut cursor = inner.tail;
        while let Some(slot) = cursor {
            let chunk = inner.chunk(slot)?;
            let body = chunk.lock_body();
            if let Some(value) = body.len().checked_sub(1).and_then(|last| body.get(last)) {
                return Some(value.clone());
            }
            cursor = chunk.prev;
        }
        None
    }

    /// Every valid element, flattened into a new vector
    pub fn value_slice(&self) -> Vec<T> {
        let mut values = Vec::new();
        self.value_slice_into(&mut values);
        values
    }

    /// Like [`ChunkPipe::value_slice`], reusing the capacity of `values`
    pub fn value_slice_into(&self, values: &mut Vec<T>) {
        values.clear();
        let inner = self.write();
        values.reserve(self.len());
        for (_, chunk) in inner.walk() {
            values.extend(chunk.lock_body().iter().cloned());
        }
    }

    /// One vector per live chunk, oldest first
    pub fn chunk_slice(&self) -> Vec<Vec<T>> {
        let inner = self.write();
        inner
            .walk()
            .map(|(_, chunk)| chunk.lock_body().iter().cloned().collect::<Vec<T>>())
            .filter(|values| !values.is_empty())
            .collect()
    }

    /// Lazy iterator over element copies, oldest first
    pub fn value_iter(&self) -> ValueIter<'_, T> {
        ValueIter::new(self, self.config.value_prefetch)
    }

    /// Lazy iterator over chunk copies, coalesced and split per
    /// [`ChunkPipeConfig::iter_min_batch`] and [`ChunkPipeConfig::iter_max_batch`]
    pub fn chunk_iter(&self) -> ChunkIter<'_, T> {
        ChunkIter::new(self, self.config.iter_min_batch, self.config.iter_max_batch)
    }

    /// Copies a run starting at `cursor` into `out`, moving on to following chunks until
    /// `out` holds at least `min` elements, and never past `max`.
    ///
    /// A cursor the front already moved past jumps forward to the front.
    pub(crate) fn read_run(
        &self,
        cursor: &mut u64,
        hint: &mut Option<ChunkSlot<T>>,
        min: usize,
        max: usize,
        out: &mut Vec<T>,
    ) {
        let inner = self.read();
        let mut current = inner.locate(*cursor, *hint);
        while let Some(slot) = current {
            let Some(chunk) = inner.chunk(slot) else {
                break;
            };
            {
                let body = chunk.lock_body();
                let start = chunk.base + body.offset() as u64;
                *cursor = (*cursor).max(start);
                let skip = usize::try_from(*cursor - start).unwrap_or(usize::MAX);
                let copied = body.clone_run(skip, max - out.len(), out);
                *cursor += copied as u64;
            }
            *hint = Some(slot);
            if out.len() >= min {
                break;
            }
            current = chunk.next;
        }
    }

    #[cfg(test)]
    fn get_by_walk(&self, index: usize) -> Option<T> {
        self.read().walk_get(index)
    }
}
