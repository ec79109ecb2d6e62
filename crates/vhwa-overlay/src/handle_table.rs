//! Fixed-capacity map from guest surface handles to host objects.
//!
//! Handle 0 is reserved as "invalid", so a table of capacity `n` holds at most `n - 1` entries.
//! [`HandleTable::put`] hands out slots from a rotating cursor so that a freshly released handle
//! is not immediately reused.

pub struct HandleTable<T> {
    slots: Vec<Option<T>>,
    usage: usize,
    cursor: usize,
}

impl<T: Copy> HandleTable<T> {
    pub fn new(capacity: u32) -> Self {
        Self {
            slots: vec![None; capacity as usize],
            usage: 0,
            cursor: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn usage(&self) -> usize {
        self.usage
    }

    /// Stores `value` in the next free slot and returns its handle, or `None` when full.
    pub fn put(&mut self, value: T) -> Option<u32> {
        if self.usage >= self.slots.len() {
            return None;
        }
        for _ in 0..2 {
            let free = (self.cursor..self.slots.len()).find(|&i| self.slots[i].is_none());
            if let Some(i) = free {
                self.slots[i] = Some(value);
                self.usage += 1;
                self.cursor = i + 1;
                return u32::try_from(i).ok();
            }
            self.cursor = 1;
        }
        None
    }

    /// Stores `value` under a caller-chosen handle. Fails for handle 0, out-of-range handles
    /// and occupied slots.
    pub fn map_put(&mut self, handle: u32, value: T) -> bool {
        let Some(slot) = self.slot_mut(handle) else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        self.usage += 1;
        true
    }

    pub fn get(&self, handle: u32) -> Option<T> {
        let idx = handle as usize;
        if handle == 0 || idx >= self.slots.len() {
            return None;
        }
        self.slots[idx]
    }

    pub fn remove(&mut self, handle: u32) -> Option<T> {
        let value = self.slot_mut(handle)?.take();
        if value.is_some() {
            self.usage -= 1;
        }
        value
    }

    fn slot_mut(&mut self, handle: u32) -> Option<&mut Option<T>> {
        if handle == 0 {
            return None;
        }
        self.slots.get_mut(handle as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_zero_is_never_valid() {
        let mut table = HandleTable::new(4);
        assert!(!table.map_put(0, 1u8));
        assert_eq!(table.get(0), None);
        assert_eq!(table.remove(0), None);
        assert_eq!(table.put(7), Some(1));
    }

    #[test]
    fn put_rotates_before_reusing_slots() {
        let mut table = HandleTable::new(4);
        assert_eq!(table.put('a'), Some(1));
        assert_eq!(table.put('b'), Some(2));
        assert_eq!(table.remove(1), Some('a'));
        assert_eq!(table.put('c'), Some(3));
        assert_eq!(table.put('d'), Some(1));
        assert_eq!(table.put('e'), None);
        assert_eq!(table.usage(), 3);
    }

    #[test]
    fn map_put_rejects_occupied_and_out_of_range_handles() {
        let mut table = HandleTable::new(4);
        assert!(table.map_put(3, 1u32));
        assert!(!table.map_put(3, 2));
        assert!(!table.map_put(4, 2));
        assert_eq!(table.get(3), Some(1));
        assert_eq!(table.get(99), None);
    }
}
