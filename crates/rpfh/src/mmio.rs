//! Guest-visible register window.
//!
//! | Offset | Register  | Write                                  | Read                     |
//! |--------|-----------|----------------------------------------|--------------------------|
//! | 0x00   | FREEPAGE  | PTE address: donate the frame it names | free-frame pool size     |
//! | 0x08   | EVICTPAGE | PTE address: evict the page it maps    | 0                        |
//! | 0x10   | NEWFRAME  | ignored                                | oldest new PTE, or 0     |
//!
//! Zero-valued writes and accesses to any other offset are logged and ignored; such reads return 0.

use memory::GuestMemory;
use tracing::{debug, warn};

use crate::controller::RpfhController;

pub const REG_FREEPAGE: u64 = 0x00;
pub const REG_EVICTPAGE: u64 = 0x08;
pub const REG_NEWFRAME: u64 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpfhRegister {
    FreePage,
    EvictPage,
    NewFrame,
}

impl RpfhRegister {
    pub fn decode(offset: u64) -> Option<Self> {
        match offset {
            REG_FREEPAGE => Some(Self::FreePage),
            REG_EVICTPAGE => Some(Self::EvictPage),
            REG_NEWFRAME => Some(Self::NewFrame),
            _ => None,
        }
    }

    pub fn offset(self) -> u64 {
        match self {
            Self::FreePage => REG_FREEPAGE,
            Self::EvictPage => REG_EVICTPAGE,
            Self::NewFrame => REG_NEWFRAME,
        }
    }
}

fn access_mask(size: usize) -> u64 {
    if size >= 8 {
        u64::MAX
    } else {
        (1u64 << (size * 8)) - 1
    }
}

impl RpfhController {
    pub fn mmio_read(&mut self, offset: u64, size: usize) -> u64 {
        if self.fatal().is_some() {
            debug!(offset, "rpfh: read from halted controller");
            return 0;
        }
        let value = match RpfhRegister::decode(offset) {
            Some(RpfhRegister::FreePage) => self.free_frames() as u64,
            Some(RpfhRegister::EvictPage) => 0,
            Some(RpfhRegister::NewFrame) => self.drain_new_frame(),
            None => {
                self.note_ignored();
                warn!(offset, size, "rpfh: read from unknown register");
                0
            }
        };
        value & access_mask(size)
    }

    /// Register write. Failures of the triggered operation are latched by the controller (see
    /// [`RpfhController::fatal`]) since there is no channel to report them to the guest.
    pub fn mmio_write<M>(&mut self, mem: &mut M, offset: u64, size: usize, value: u64)
    where
        M: GuestMemory + ?Sized,
    {
        let value = value & access_mask(size);
        let Some(reg) = RpfhRegister::decode(offset) else {
            self.note_ignored();
            warn!(offset, size, value, "rpfh: write to unknown register");
            return;
        };

        if reg == RpfhRegister::NewFrame {
            self.note_ignored();
            warn!(value, "rpfh: NEWFRAME is read-only");
            return;
        }
        if value == 0 {
            self.note_ignored();
            debug!(?reg, "rpfh: zero command write");
            return;
        }

        let result = match reg {
            RpfhRegister::FreePage => self.free_page(mem, value),
            RpfhRegister::EvictPage => self.evict_page(mem, value),
            RpfhRegister::NewFrame => Ok(()),
        };
        if let Err(err) = result {
            debug!(?reg, %err, "rpfh: register command failed");
        }
    }
}
