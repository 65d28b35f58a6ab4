/// Fixed-capacity ring buffer. Pushing into a full block overwrites the oldest
/// entry.
#[derive(Clone, Debug)]
pub struct Block<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> Block<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append an entry, returning the one it displaced, if any.
    pub fn push(&mut self, value: T) -> Option<T> {
        let capacity = self.capacity();
        let slot = (self.head + self.len) % capacity;
        if self.len < capacity {
            self.len += 1;
            self.slots[slot] = Some(value);
            None
        } else {
            self.head = (self.head + 1) % capacity;
            self.slots[slot].replace(value)
        }
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        let capacity = self.capacity();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % capacity].as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_then_overwrites_oldest() {
        let mut block = Block::new(3);
        assert!(block.is_empty());
        assert_eq!(block.push(1), None);
        assert_eq!(block.push(2), None);
        assert_eq!(block.push(3), None);
        assert_eq!(block.len(), 3);
        assert_eq!(block.push(4), Some(1));
        assert_eq!(block.push(5), Some(2));
        assert_eq!(block.len(), 3);
        assert_eq!(block.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(block.iter().rev().copied().collect::<Vec<_>>(), vec![5, 4, 3]);
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut block = Block::new(150);
        for i in 0..1000 {
            block.push(i);
            assert!(block.len() <= 150);
        }
        assert_eq!(block.iter().next(), Some(&850));
        assert_eq!(block.iter().last(), Some(&999));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut block = Block::new(0);
        block.push("a");
        block.push("b");
        assert_eq!(block.capacity(), 1);
        assert_eq!(block.iter().collect::<Vec<_>>(), vec![&"b"]);
    }
}
