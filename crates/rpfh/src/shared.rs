use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use memory::{Bus, GuestMemory, MmioHandler, MmioMapError};

use crate::config::{RpfhConfig, RPFH_MMIO_SIZE};
use crate::controller::{RpfhController, RpfhStats};
use crate::error::{Result, RpfhError};

/// Cloneable handle to one controller instance.
///
/// Every entry point (register access through [`RpfhMmio`] and fault-path fetches) takes the same
/// lock, so several virtual CPUs can drive the controller without racing on the pool or the store.
#[derive(Debug, Clone)]
pub struct SharedRpfh {
    inner: Arc<Mutex<RpfhController>>,
}

impl SharedRpfh {
    pub fn new(config: RpfhConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RpfhController::new(config))),
        }
    }

    /// Controller state only changes after an operation's fallible checks pass, so a panic while
    /// holding the lock cannot leave it half-updated.
    fn lock(&self) -> MutexGuard<'_, RpfhController> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with exclusive access to the controller.
    pub fn with<R>(&self, f: impl FnOnce(&mut RpfhController) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn fetch_page<M>(&self, mem: &mut M, vaddr: u64, pte: &mut u64) -> Result<u64>
    where
        M: GuestMemory + ?Sized,
    {
        self.lock().fetch_page(mem, vaddr, pte)
    }

    pub fn handle_remote_fault<M>(
        &self,
        mem: &mut M,
        vaddr: u64,
        pte_addr: u64,
    ) -> Result<Option<u64>>
    where
        M: GuestMemory + ?Sized,
    {
        self.lock().handle_remote_fault(mem, vaddr, pte_addr)
    }

    pub fn fatal(&self) -> Option<RpfhError> {
        self.lock().fatal().cloned()
    }

    pub fn stats(&self) -> RpfhStats {
        self.lock().stats()
    }

    pub fn free_frames(&self) -> usize {
        self.lock().free_frames()
    }

    pub fn evicted_pages(&self) -> usize {
        self.lock().evicted_pages()
    }

    pub fn pending_new_frames(&self) -> usize {
        self.lock().pending_new_frames()
    }

    pub fn mmio_handler(&self) -> RpfhMmio {
        RpfhMmio { rpfh: self.clone() }
    }

    /// Maps the register window on `bus` at the configured base.
    pub fn register<M: GuestMemory>(
        &self,
        bus: &mut Bus<M>,
    ) -> std::result::Result<(), MmioMapError> {
        let base = self.lock().config().mmio_base;
        bus.map_mmio(base, RPFH_MMIO_SIZE, Box::new(self.mmio_handler()))
    }
}

/// [`MmioHandler`] adapter for a [`SharedRpfh`].
#[derive(Debug, Clone)]
pub struct RpfhMmio {
    rpfh: SharedRpfh,
}

impl MmioHandler for RpfhMmio {
    fn read(&mut self, _ram: &mut dyn GuestMemory, offset: u64, size: usize) -> u64 {
        self.rpfh.lock().mmio_read(offset, size)
    }

    fn write(&mut self, ram: &mut dyn GuestMemory, offset: u64, size: usize, value: u64) {
        self.rpfh.lock().mmio_write(ram, offset, size, value);
    }
}
