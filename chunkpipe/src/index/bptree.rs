use super::PositionIndex;

enum Node<V> {
    Leaf {
        keys: Vec<u64>,
        values: Vec<V>,
    },
    /// `children[i]` holds keys in `[keys[i - 1], keys[i])`
    Internal {
        keys: Vec<u64>,
        children: Vec<Box<Node<V>>>,
    },
}

struct Inserted<V> {
    new_key: bool,
    split: Option<(u64, Node<V>)>,
}

/// Insert-only B+ tree keyed by position.
///
/// Nodes hold up to `fanout` children (leaves up to `fanout - 1` keys). Keys mostly arrive in
/// ascending order, so a node overflowing at its right edge splits off only the new key, leaving
/// the left node full instead of half empty.
pub struct BPlusTree<V> {
    root: Node<V>,
    fanout: usize,
    len: usize,
    height: usize,
}

impl<V: Copy> BPlusTree<V> {
    pub fn new(fanout: usize) -> Self {
        assert!(fanout >= 4, "B+ tree fanout must be at least 4");
        Self {
            root: Node::Leaf {
                keys: Vec::with_capacity(fanout),
                values: Vec::with_capacity(fanout),
            },
            fanout,
            len: 0,
            height: 1,
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn insert_into(node: &mut Node<V>, key: u64, value: V, fanout: usize) -> Inserted<V> {
        match node {
            Node::Leaf { keys, values } => {
                let at = match keys.binary_search(&key) {
                    Ok(existing) => {
                        values[existing] = value;
                        return Inserted {
                            new_key: false,
                            split: None,
                        };
                    }
                    Err(at) => at,
                };
                keys.insert(at, key);
                values.insert(at, value);
                let split = if keys.len() >= fanout {
                    let mid = if at == keys.len() - 1 {
                        keys.len() - 1
                    } else {
                        keys.len() / 2
                    };
                    let right_keys = keys.split_off(mid);
                    let right_values = values.split_off(mid);
                    Some((
                        right_keys[0],
                        Node::Leaf {
                            keys: right_keys,
                            values: right_values,
                        },
                    ))
                } else {
                    None
                };
                Inserted {
                    new_key: true,
                    split,
                }
            }
            Node::Internal { keys, children } => {
                let at = keys.partition_point(|separator| *separator <= key);
                let mut inserted = Self::insert_into(&mut children[at], key, value, fanout);
                if let Some((separator, right)) = inserted.split.take() {
                    keys.insert(at, separator);
                    children.insert(at + 1, Box::new(right));
                    if children.len() > fanout {
                        let mid = if at + 1 == children.len() - 1 {
                            keys.len() - 1
                        } else {
                            keys.len() / 2
                        };
                        let mut right_keys = keys.split_off(mid);
                        let promoted = right_keys.remove(0);
                        let right_children = children.split_off(mid + 1);
                        inserted.split = Some((
                            promoted,
                            Node::Internal {
                                keys: right_keys,
                                children: right_children,
                            },
                        ));
                    }
                }
                inserted
            }
        }
    }
}

impl<V: Copy + Send + Sync> PositionIndex<V> for BPlusTree<V> {
    fn insert(&mut self, position: u64, value: V) {
        let inserted = Self::insert_into(&mut self.root, position, value, self.fanout);
        if inserted.new_key {
            self.len += 1;
        }
        if let Some((separator, right)) = inserted.split {
            let left = std::mem::replace(
                &mut self.root,
                Node::Internal {
                    keys: Vec::with_capacity(self.fanout),
                    children: Vec::with_capacity(self.fanout + 1),
                },
            );
            if let Node::Internal { keys, children } = &mut self.root {
                keys.push(separator);
                children.push(Box::new(left));
                children.push(Box::new(right));
            }
            self.height += 1;
        }
    }

    fn find(&self, position: u64) -> Option<(V, u64)> {
        let mut node = &self.root;
        loop {
            match node {
                Node::Internal { keys, children } => {
                    node = &children[keys.partition_point(|separator| *separator <= position)];
                }
                Node::Leaf { keys, values } => {
                    // separators are the first key of their right subtree, so only the
                    // leftmost leaf can come up empty here
                    let at = keys.partition_point(|key| *key <= position);
                    return at
                        .checked_sub(1)
                        .map(|at| (values[at], position - keys[at]));
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn clear(&mut self) {
        self.root = Node::Leaf {
            keys: Vec::with_capacity(self.fanout),
            values: Vec::with_capacity(self.fanout),
        };
        self.len = 0;
        self.height = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    #[test]
    fn test_empty_tree() {
        let tree: BPlusTree<u32> = BPlusTree::new(4);
        assert_eq!(tree.find(0), None);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_find_residual() {
        let mut tree = BPlusTree::new(4);
        tree.insert(10, 'a');
        tree.insert(20, 'b');
        tree.insert(35, 'c');
        assert_eq!(tree.find(9), None);
        assert_eq!(tree.find(10), Some(('a', 0)));
        assert_eq!(tree.find(19), Some(('a', 9)));
        assert_eq!(tree.find(20), Some(('b', 0)));
        assert_eq!(tree.find(1000), Some(('c', 965)));
    }

    #[test]
    fn test_ascending_inserts() {
        let mut tree = BPlusTree::new(4);
        for chunk in 0..10_000u64 {
            tree.insert(chunk * 8, chunk);
        }
        assert_eq!(tree.len(), 10_000);
        assert!(tree.height() > 1);
        for position in (0..80_000u64).step_by(3) {
            assert_eq!(tree.find(position), Some((position / 8, position % 8)));
        }
    }

    #[test]
    fn test_shuffled_inserts() {
        let mut keys: Vec<u64> = (0..5_000).map(|key| key * 3).collect();
        keys.shuffle(&mut SmallRng::seed_from_u64(11));
        let mut tree = BPlusTree::new(5);
        for key in &keys {
            tree.insert(*key, *key);
        }
        assert_eq!(tree.len(), keys.len());
        for position in 0..15_000u64 {
            let expected = position - position % 3;
            assert_eq!(tree.find(position), Some((expected, position % 3)));
        }
    }

    #[test]
    fn test_replace_existing_key() {
        let mut tree = BPlusTree::new(4);
        for key in 0..100u64 {
            tree.insert(key, 0u8);
        }
        tree.insert(50, 7);
        assert_eq!(tree.len(), 100);
        assert_eq!(tree.find(50), Some((7, 0)));
    }

    #[test]
    fn test_clear() {
        let mut tree = BPlusTree::new(4);
        for key in 0..100u64 {
            tree.insert(key, key);
        }
        tree.clear();
        assert_eq!(tree.len(), 0);
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.find(50), None);
    }
}
