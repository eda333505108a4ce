use super::PositionIndex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const HEAD: usize = 0;

struct SkipNode<V> {
    position: u64,
    /// `None` only for the head sentinel
    value: Option<V>,
    forward: Vec<Option<usize>>,
}

/// Skip list with randomized levels, nodes kept in a flat vector and linked by index
pub struct SkipList<V> {
    nodes: Vec<SkipNode<V>>,
    level: usize,
    max_level: usize,
    rng: SmallRng,
}

impl<V: Copy> SkipList<V> {
    pub fn new(max_level: usize, seed: u64) -> Self {
        assert!(
            (1..=32).contains(&max_level),
            "skip list max_level must be within 1..=32"
        );
        Self {
            nodes: vec![Self::head(max_level)],
            level: 1,
            max_level,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    fn head(max_level: usize) -> SkipNode<V> {
        SkipNode {
            position: 0,
            value: None,
            forward: vec![None; max_level],
        }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    fn random_level(&mut self) -> usize {
        let mut level = 1;
        while level < self.max_level && self.rng.random_bool(0.5) {
            level += 1;
        }
        level
    }

    /// Last node at `level` whose position satisfies `before`, starting from `from`
    fn advance(&self, mut from: usize, level: usize, before: impl Fn(u64) -> bool) -> usize {
        while let Some(next) = self.nodes[from].forward[level] {
            if !before(self.nodes[next].position) {
                break;
            }
            from = next;
        }
        from
    }
}

impl<V: Copy + Send + Sync> PositionIndex<V> for SkipList<V> {
    fn insert(&mut self, position: u64, value: V) {
        let mut update = vec![HEAD; self.max_level];
        let mut current = HEAD;
        for level in (0..self.level).rev() {
            current = self.advance(current, level, |key| key < position);
            update[level] = current;
        }

        if let Some(next) = self.nodes[current].forward[0] {
            if self.nodes[next].position == position {
                self.nodes[next].value = Some(value);
                return;
            }
        }

        let level = self.random_level();
        if level > self.level {
            // update[] already points at HEAD for the new levels
            self.level = level;
        }
        let id = self.nodes.len();
        let mut forward = vec![None; level];
        for (height, link) in forward.iter_mut().enumerate() {
            *link = self.nodes[update[height]].forward[height];
            self.nodes[update[height]].forward[height] = Some(id);
        }
        self.nodes.push(SkipNode {
            position,
            value: Some(value),
            forward,
        });
    }

    fn find(&self, position: u64) -> Option<(V, u64)> {
        let mut current = HEAD;
        for level in (0..self.level).rev() {
            current = self.advance(current, level, |key| key <= position);
        }
        if current == HEAD {
            return None;
        }
        let node = &self.nodes[current];
        node.value.map(|value| (value, position - node.position))
    }

    fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.nodes.push(Self::head(self.max_level));
        self.level = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    #[test]
    fn test_empty_list() {
        let list: SkipList<u32> = SkipList::new(8, 1);
        assert_eq!(list.find(10), None);
        assert!(list.is_empty());
    }

    #[test]
    fn test_find_residual() {
        let mut list = SkipList::new(8, 1);
        list.insert(5, "first");
        list.insert(12, "second");
        assert_eq!(list.find(4), None);
        assert_eq!(list.find(5), Some(("first", 0)));
        assert_eq!(list.find(11), Some(("first", 6)));
        assert_eq!(list.find(40), Some(("second", 28)));
    }

    #[test]
    fn test_many_inserts() {
        let mut keys: Vec<u64> = (1..=4_000).map(|key| key * 10).collect();
        keys.shuffle(&mut SmallRng::seed_from_u64(3));
        let mut list = SkipList::new(16, 42);
        for key in &keys {
            list.insert(*key, *key / 10);
        }
        assert_eq!(list.len(), 4_000);
        assert!(list.level() > 1);
        assert_eq!(list.find(9), None);
        for position in 10..40_010u64 {
            assert_eq!(list.find(position), Some((position / 10, position % 10)));
        }
    }

    #[test]
    fn test_replace_existing_key() {
        let mut list = SkipList::new(4, 9);
        list.insert(7, 1u8);
        list.insert(7, 2u8);
        assert_eq!(list.len(), 1);
        assert_eq!(list.find(7), Some((2, 0)));
    }

    #[test]
    fn test_clear() {
        let mut list = SkipList::new(4, 9);
        for key in 0..50u64 {
            list.insert(key, key);
        }
        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.find(20), None);
    }
}
