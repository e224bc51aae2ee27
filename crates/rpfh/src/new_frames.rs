use std::collections::VecDeque;

/// PTE values produced by completed fetches that the guest has not read back yet.
///
/// Zero doubles as the "nothing pending" value on the NEWFRAME register, so a resident PTE is never
/// zero (it always carries a PPN and at least the valid bit).
#[derive(Debug, Default, Clone)]
pub struct NewFrameQueue {
    ptes: VecDeque<u64>,
}

impl NewFrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pte: u64) {
        self.ptes.push_back(pte);
    }

    pub fn pop_or_zero(&mut self) -> u64 {
        self.ptes.pop_front().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.ptes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ptes.is_empty()
    }
}
