use crate::chunk::Chunk;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

pub const DEFAULT_RECYCLER_CAPACITY: usize = 1024;

/// Counters describing how well the recycler is doing
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct RecyclerStats {
    pub pooled: usize,
    pub hits: usize,
    pub misses: usize,
    pub discarded: usize,
}

/// Bounded LIFO pool of drained chunk headers.
///
/// Headers handed to [`HeaderRecycler::put`] must already be stripped of their storage. The
/// recycler is a pure optimization: a miss just means the pipe boxes a fresh header.
///
/// One instance may be shared by several pipes of the same element type through an `Arc`.
#[derive(Debug)]
pub struct HeaderRecycler<T> {
    headers: Mutex<Vec<Box<Chunk<T>>>>,
    capacity: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
    discarded: AtomicUsize,
}

impl<T> Default for HeaderRecycler<T> {
    fn default() -> Self {
        Self::new(DEFAULT_RECYCLER_CAPACITY)
    }
}

impl<T> HeaderRecycler<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            headers: Mutex::new(Vec::new()),
            capacity,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
        }
    }

    /// Most recently returned header, if any
    pub fn get(&self) -> Option<Box<Chunk<T>>> {
        let header = self
            .headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match header {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        header
    }

    /// Returns a header to the pool. Gives `false` if the pool was full and the header dropped.
    pub fn put(&self, mut header: Box<Chunk<T>>) -> bool {
        header.prev = None;
        header.next = None;
        let mut headers = self.headers.lock().unwrap_or_else(PoisonError::into_inner);
        if headers.len() >= self.capacity {
            drop(headers);
            self.discarded.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Recycler full ({}), discarding chunk header", self.capacity);
            return false;
        }
        headers.push(header);
        true
    }

    pub fn len(&self) -> usize {
        self.headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RecyclerStats {
        RecyclerStats {
            pooled: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_get() {
        let recycler: HeaderRecycler<u8> = HeaderRecycler::new(4);
        assert!(recycler.get().is_none());
        assert_eq!(recycler.stats().misses, 1);
    }

    #[test]
    fn test_put_get_is_lifo() {
        let recycler = HeaderRecycler::new(4);
        let mut first = Box::new(Chunk::<u8>::empty());
        first.base = 1;
        let mut second = Box::new(Chunk::<u8>::empty());
        second.base = 2;
        assert!(recycler.put(first));
        assert!(recycler.put(second));

        assert_eq!(recycler.get().map(|header| header.base), Some(2));
        assert_eq!(recycler.get().map(|header| header.base), Some(1));
        assert!(recycler.get().is_none());

        let stats = recycler.stats();
        assert_eq!((stats.hits, stats.misses), (2, 1));
    }

    #[test]
    fn test_bounded() {
        let recycler = HeaderRecycler::new(2);
        for _ in 0..5 {
            recycler.put(Box::new(Chunk::<u32>::empty()));
        }
        assert_eq!(recycler.len(), 2);
        assert_eq!(recycler.stats().discarded, 3);
    }

    #[test]
    fn test_put_clears_links() {
        let recycler = HeaderRecycler::new(1);
        let mut header = Box::new(Chunk::<u32>::empty());
        header.next = Some(crate::slot::Slot::new(3, 1));
        recycler.put(header);
        assert!(recycler.get().unwrap().next.is_none());
    }
}
