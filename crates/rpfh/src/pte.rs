//! RISC-V Sv39 leaf PTE layout, extended with a "remote" marker.
//!
//! ```text
//!  63    61 60     54 53                  10 9   8 7 6 5 4 3 2 1 0
//! | N/PBMT | R | rsvd |         PPN          | RSW |D|A|G|U|X|W|R|V|
//! ```
//!
//! `R` (bit 60) is [`PTE_REMOTE`]. It sits in a range Sv39 reserves, so a hardware walker would
//! raise a page fault on it; the emulated walker instead routes the access to the controller.

use bitflags::bitflags;

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

pub const PTE_PPN_SHIFT: u32 = 10;
pub const PTE_PPN_BITS: u32 = 44;
pub const PTE_PPN_MASK: u64 = ((1u64 << PTE_PPN_BITS) - 1) << PTE_PPN_SHIFT;

/// Status/permission bits plus the two software (RSW) bits.
pub const PTE_FLAGS_MASK: u64 = (1u64 << PTE_PPN_SHIFT) - 1;

/// Bits 0..=7, the hardware-defined status/permission bits.
pub const PTE_CARRIED_FLAGS_MASK: u64 = 0xFF;

/// The page's data is held by the controller, not resident in the frame the PPN names.
pub const PTE_REMOTE: u64 = 1 << 60;

bitflags! {
    /// Named view of the low PTE bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PteFlags: u64 {
        const VALID = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const EXECUTE = 1 << 3;
        const USER = 1 << 4;
        const GLOBAL = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY = 1 << 7;
        const RSW0 = 1 << 8;
        const RSW1 = 1 << 9;
    }
}

/// Guest-physical address of the frame `pte` points at.
///
/// Only the PPN field contributes; the remote marker and the other high bits are dropped.
#[inline]
pub const fn frame_of(pte: u64) -> u64 {
    ((pte & !PTE_REMOTE & PTE_PPN_MASK) >> PTE_PPN_SHIFT) << PAGE_SHIFT
}

/// Key used to pair a faulting PTE with its evicted page image.
///
/// Clearing the flag bits makes the key insensitive to permission/accessed/dirty churn while it
/// still distinguishes frames and the remote marker.
#[inline]
pub const fn match_key(pte: u64) -> u64 {
    pte & !PTE_FLAGS_MASK
}

#[inline]
pub const fn is_remote(pte: u64) -> bool {
    pte & PTE_REMOTE != 0
}

#[inline]
pub const fn with_remote(pte: u64) -> u64 {
    pte | PTE_REMOTE
}

#[inline]
pub const fn flags_of(pte: u64) -> u64 {
    pte & PTE_FLAGS_MASK
}

/// Flag bits a fetched PTE inherits from its evicted one: `V R W X U G A D`. The RSW bits are
/// cleared.
#[inline]
pub const fn carried_flags(pte: u64) -> u64 {
    pte & PTE_CARRIED_FLAGS_MASK
}

/// Builds a resident PTE mapping `frame` with the given low flag bits.
#[inline]
pub const fn compose(frame: u64, flags: u64) -> u64 {
    (((frame >> PAGE_SHIFT) << PTE_PPN_SHIFT) & PTE_PPN_MASK) | (flags & PTE_FLAGS_MASK)
}

/// Formats a PTE for log lines.
pub fn describe(pte: u64) -> String {
    format!(
        "{pte:#x} (frame={:#x} flags={:?}{})",
        frame_of(pte),
        PteFlags::from_bits_truncate(pte),
        if is_remote(pte) { " remote" } else { "" }
    )
}
