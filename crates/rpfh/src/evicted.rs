use crate::pte::{match_key, PAGE_SIZE};

/// A page image held on the guest's behalf, plus the PTE value captured when it was evicted.
#[derive(Clone)]
pub struct EvictedFrame {
    pub pte: u64,
    pub data: Box<[u8; PAGE_SIZE]>,
}

impl std::fmt::Debug for EvictedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictedFrame")
            .field("pte", &format_args!("{:#x}", self.pte))
            .finish_non_exhaustive()
    }
}

/// Evicted page images, matched back to faulting PTEs by [`match_key`].
///
/// Lookups are a linear scan in insertion order; the first entry with an equal key wins.
#[derive(Debug, Default)]
pub struct EvictedPageStore {
    frames: Vec<EvictedFrame>,
}

impl EvictedPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pte: u64, data: Box<[u8; PAGE_SIZE]>) {
        self.frames.push(EvictedFrame { pte, data });
    }

    fn position(&self, key: u64) -> Option<usize> {
        self.frames.iter().position(|f| match_key(f.pte) == key)
    }

    /// The entry [`take_matching`](Self::take_matching) would remove, left in place.
    pub fn find(&self, key: u64) -> Option<&EvictedFrame> {
        self.frames.iter().find(|f| match_key(f.pte) == key)
    }

    /// Removes and returns the oldest entry whose PTE has key `key`.
    pub fn take_matching(&mut self, key: u64) -> Option<EvictedFrame> {
        let idx = self.position(key)?;
        Some(self.frames.remove(idx))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pte::{compose, with_remote};

    fn page(byte: u8) -> Box<[u8; PAGE_SIZE]> {
        Box::new([byte; PAGE_SIZE])
    }

    #[test]
    fn take_matching_ignores_flag_bits() {
        let mut store = EvictedPageStore::new();
        let pte = with_remote(compose(0x8000_4000, 0x05));
        store.insert(pte, page(0x42));

        let probe = with_remote(compose(0x8000_4000, 0xC3));
        let frame = store.take_matching(match_key(probe)).unwrap();
        assert_eq!(frame.pte, pte);
        assert!(frame.data.iter().all(|&b| b == 0x42));
        assert!(store.is_empty());
    }

    #[test]
    fn take_matching_picks_the_right_entry() {
        let mut store = EvictedPageStore::new();
        let a = with_remote(compose(0x8000_1000, 0x01));
        let b = with_remote(compose(0x8000_2000, 0x01));
        store.insert(a, page(0xAA));
        store.insert(b, page(0xBB));

        let frame = store.take_matching(match_key(b)).unwrap();
        assert_eq!(frame.data[0], 0xBB);
        assert_eq!(store.len(), 1);
        assert_eq!(store.find(match_key(a)).map(|f| f.data[0]), Some(0xAA));
        assert!(store.find(match_key(b)).is_none());
    }

    #[test]
    fn missing_key_leaves_store_untouched() {
        let mut store = EvictedPageStore::new();
        store.insert(with_remote(compose(0x8000_1000, 0x01)), page(0));

        // Same frame but without the remote marker is a different key.
        assert!(store.take_matching(match_key(compose(0x8000_1000, 0x01))).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn duplicate_keys_are_taken_oldest_first() {
        let mut store = EvictedPageStore::new();
        let pte = with_remote(compose(0x8000_1000, 0x01));
        store.insert(pte, page(1));
        store.insert(pte, page(2));

        assert_eq!(store.find(match_key(pte)).unwrap().data[0], 1);
        assert_eq!(store.take_matching(match_key(pte)).unwrap().data[0], 1);
        assert_eq!(store.take_matching(match_key(pte)).unwrap().data[0], 2);
    }
}
