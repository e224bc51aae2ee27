use crate::phys::{GuestMemory, OffsetMemory};

/// A device exposing a memory-mapped register window.
///
/// `offset` is relative to the start of the window. Values are little-endian and zero-extended to
/// `u64`; `size` is the access width in bytes (1, 2, 4 or 8).
///
/// Handlers receive the guest RAM view so register writes that carry guest-physical pointers (for
/// example the address of a page-table entry) can be serviced synchronously.
pub trait MmioHandler {
    fn read(&mut self, ram: &mut dyn GuestMemory, offset: u64, size: usize) -> u64;
    fn write(&mut self, ram: &mut dyn GuestMemory, offset: u64, size: usize, value: u64);
}

struct MmioWindow {
    base: u64,
    len: u64,
    handler: Box<dyn MmioHandler + Send>,
}

impl MmioWindow {
    fn contains(&self, paddr: u64) -> bool {
        paddr >= self.base && paddr - self.base < self.len
    }

    fn contains_range(&self, paddr: u64, size: usize) -> bool {
        self.contains(paddr)
            && paddr
                .checked_add(size as u64)
                .is_some_and(|end| end <= self.base + self.len)
    }
}

/// Errors registering an MMIO window.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MmioMapError {
    #[error("mmio window is empty: base=0x{base:x}")]
    Empty { base: u64 },
    #[error("mmio window 0x{base:x}+0x{len:x} overlaps an existing mapping")]
    Overlap { base: u64, len: u64 },
}

/// Physical address router: MMIO windows take priority over RAM.
///
/// Unmapped reads float high (all ones) and unmapped writes are dropped, mirroring an open bus.
pub struct Bus<M> {
    ram: OffsetMemory<M>,
    mmio: Vec<MmioWindow>,
}

impl<M: GuestMemory> Bus<M> {
    pub fn new(ram_base: u64, ram: M) -> Self {
        Self {
            ram: OffsetMemory::new(ram_base, ram),
            mmio: Vec::new(),
        }
    }

    pub fn ram(&self) -> &OffsetMemory<M> {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut OffsetMemory<M> {
        &mut self.ram
    }

    /// Map `handler` at `[base, base + len)`.
    pub fn map_mmio(
        &mut self,
        base: u64,
        len: u64,
        handler: Box<dyn MmioHandler + Send>,
    ) -> Result<(), MmioMapError> {
        if len == 0 {
            return Err(MmioMapError::Empty { base });
        }
        let end = base.checked_add(len).ok_or(MmioMapError::Overlap { base, len })?;
        if self
            .mmio
            .iter()
            .any(|w| base < w.base + w.len && w.base < end)
        {
            return Err(MmioMapError::Overlap { base, len });
        }
        self.mmio.push(MmioWindow { base, len, handler });
        Ok(())
    }

    /// Reads a `size`-byte little-endian value.
    pub fn read(&mut self, paddr: u64, size: usize) -> u64 {
        debug_assert!(matches!(size, 1 | 2 | 4 | 8));
        if let Some(window) = self.mmio.iter_mut().find(|w| w.contains_range(paddr, size)) {
            return window.handler.read(&mut self.ram, paddr - window.base, size);
        }

        let mut bytes = [0u8; 8];
        for (i, byte) in bytes.iter_mut().enumerate().take(size) {
            *byte = self.read_byte(paddr.wrapping_add(i as u64));
        }
        u64::from_le_bytes(bytes)
    }

    /// Writes the low `size` bytes of `value`, little-endian.
    pub fn write(&mut self, paddr: u64, size: usize, value: u64) {
        debug_assert!(matches!(size, 1 | 2 | 4 | 8));
        if let Some(window) = self.mmio.iter_mut().find(|w| w.contains_range(paddr, size)) {
            window.handler.write(&mut self.ram, paddr - window.base, size, value);
            return;
        }

        let bytes = value.to_le_bytes();
        for (i, byte) in bytes.iter().enumerate().take(size) {
            self.write_byte(paddr.wrapping_add(i as u64), *byte);
        }
    }

    fn read_byte(&mut self, paddr: u64) -> u8 {
        if let Some(window) = self.mmio.iter_mut().find(|w| w.contains(paddr)) {
            return window.handler.read(&mut self.ram, paddr - window.base, 1) as u8;
        }
        self.ram.read_u8_le(paddr).unwrap_or(0xFF)
    }

    fn write_byte(&mut self, paddr: u64, value: u8) {
        if let Some(window) = self.mmio.iter_mut().find(|w| w.contains(paddr)) {
            window.handler.write(&mut self.ram, paddr - window.base, 1, u64::from(value));
            return;
        }
        if self.ram.write_u8_le(paddr, value).is_err() {
            tracing::trace!(paddr = format_args!("{paddr:#x}"), "dropped unmapped write");
        }
    }

    pub fn read_u8(&mut self, paddr: u64) -> u8 {
        self.read(paddr, 1) as u8
    }

    pub fn read_u32(&mut self, paddr: u64) -> u32 {
        self.read(paddr, 4) as u32
    }

    pub fn read_u64(&mut self, paddr: u64) -> u64 {
        self.read(paddr, 8)
    }

    pub fn write_u8(&mut self, paddr: u64, value: u8) {
        self.write(paddr, 1, u64::from(value));
    }

    pub fn write_u32(&mut self, paddr: u64, value: u32) {
        self.write(paddr, 4, u64::from(value));
    }

    pub fn write_u64(&mut self, paddr: u64, value: u64) {
        self.write(paddr, 8, value);
    }
}
