/// Default guest-physical base of the register window.
pub const RPFH_MMIO_BASE: u64 = 0x0200_0000;

/// Three 8-byte registers.
pub const RPFH_MMIO_SIZE: u64 = 24;

#[derive(Debug, Clone)]
pub struct RpfhConfig {
    /// Where the host maps the register window.
    pub mmio_base: u64,
    /// Zero a frame's bytes after copying them out on eviction, so a stale read of an evicted page
    /// shows up as zeros instead of plausible old data.
    pub scrub_on_evict: bool,
}

impl Default for RpfhConfig {
    fn default() -> Self {
        Self {
            mmio_base: RPFH_MMIO_BASE,
            scrub_on_evict: true,
        }
    }
}
