//! Remote page fault handler (RPFH).
//!
//! Emulates a memory-tiering controller for a RISC-V guest. The guest donates free frames and
//! evicts pages through a three-register MMIO window; evicted page images are held by the
//! controller and the guest's PTE is tagged with [`pte::PTE_REMOTE`]. When the emulated page
//! walker meets a remote PTE it calls [`SharedRpfh::fetch_page`] (or
//! [`SharedRpfh::handle_remote_fault`]), which restores the image into a donated frame, rewrites
//! the PTE and queues it for the guest to read back from the NEWFRAME register.

#![forbid(unsafe_code)]

pub mod config;
pub mod controller;
pub mod error;
pub mod evicted;
pub mod free_frames;
pub mod mmio;
pub mod new_frames;
pub mod pte;
mod shared;

pub use config::{RpfhConfig, RPFH_MMIO_BASE, RPFH_MMIO_SIZE};
pub use controller::{RpfhController, RpfhStats};
pub use error::{Result, RpfhError};
pub use mmio::{RpfhRegister, REG_EVICTPAGE, REG_FREEPAGE, REG_NEWFRAME};
pub use shared::{RpfhMmio, SharedRpfh};
