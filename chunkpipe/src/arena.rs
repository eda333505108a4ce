use crate::error::ChunkPipeErrors;
use crate::slot::Slot;

struct ArenaEntry<V> {
    generation: usize,
    value: Option<Box<V>>,
}

/// Sparse, generational storage for boxed values.
///
/// Removing an entry hands the box back to the caller (so it can be recycled) and bumps the
/// generation of the slot, which is then reused by a later insert.
pub struct Arena<V> {
    entries: Vec<ArenaEntry<V>>,
    free_list: Vec<usize>,
    live: usize,
}

impl<V> Default for Arena<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Arena<V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, value: Box<V>) -> Slot<V> {
        self.live += 1;
        if let Some(id) = self.free_list.pop() {
            let entry = &mut self.entries[id];
            debug_assert!(entry.value.is_none());
            entry.value = Some(value);
            return Slot::new(id, entry.generation);
        }
        self.entries.push(ArenaEntry {
            generation: 0,
            value: Some(value),
        });
        Slot::new(self.entries.len() - 1, 0)
    }

    pub fn remove(&mut self, slot: Slot<V>) -> Result<Box<V>, ChunkPipeErrors> {
        let entry = self
            .entries
            .get_mut(slot.id())
            .ok_or(ChunkPipeErrors::NonexistentSlot)?;
        if entry.generation != slot.generation() {
            return Err(ChunkPipeErrors::GenerationMismatch);
        }
        let value = entry.value.take().ok_or(ChunkPipeErrors::NonexistentSlot)?;
        entry.generation += 1;
        self.free_list.push(slot.id());
        self.live -= 1;
        Ok(value)
    }

    pub fn get(&self, slot: Slot<V>) -> Option<&V> {
        self.entries
            .get(slot.id())
            .filter(|entry| entry.generation == slot.generation())
            .and_then(|entry| entry.value.as_deref())
    }

    pub fn get_mut(&mut self, slot: Slot<V>) -> Option<&mut V> {
        self.entries
            .get_mut(slot.id())
            .filter(|entry| entry.generation == slot.generation())
            .and_then(|entry| entry.value.as_deref_mut())
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Total number of entries ever allocated, live or free
    pub fn total_data_len(&self) -> usize {
        self.entries.len()
    }
}
