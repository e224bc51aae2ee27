use std::collections::VecDeque;

/// FIFO of guest-physical frames donated by the guest as fetch destinations.
#[derive(Debug, Default, Clone)]
pub struct FreeFramePool {
    frames: VecDeque<u64>,
}

impl FreeFramePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: u64) {
        self.frames.push_back(frame);
    }

    /// Removes the oldest donated frame. `None` means the guest broke the "free before fault"
    /// contract; the controller turns that into a fatal error.
    pub fn pop(&mut self) -> Option<u64> {
        self.frames.pop_front()
    }

    /// The frame the next [`pop`](Self::pop) returns.
    pub fn front(&self) -> Option<u64> {
        self.frames.front().copied()
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

    #[test]
    fn pops_in_donation_order() {
        let mut pool = FreeFramePool::new();
        pool.push(0x8000_1000);
        pool.push(0x8000_2000);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.front(), Some(0x8000_1000));

        assert_eq!(pool.pop(), Some(0x8000_1000));
        assert_eq!(pool.pop(), Some(0x8000_2000));
        assert_eq!(pool.pop(), None);
        assert!(pool.is_empty());
    }
}
