//! Guest physical memory and a physical-address router for MMIO.
//!
//! [`GuestMemory`] is the byte-addressable view device models use for DMA-style accesses (page
//! table entries, whole page images). [`Bus`] places RAM at a guest-physical base and lets devices
//! register MMIO windows, which take priority over RAM.

#![forbid(unsafe_code)]

mod bus;
mod phys;

pub use bus::{Bus, MmioHandler, MmioMapError};
pub use phys::{
    DenseMemory, GuestMemory, GuestMemoryError, GuestMemoryResult, OffsetMemory, SparseMemory,
};
