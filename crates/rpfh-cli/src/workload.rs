//! Synthetic guest that exercises the controller the way a tiering-aware kernel would.
//!
//! RAM layout, in pages from the DRAM base:
//!
//! | Page              | Contents                                         |
//! |-------------------|--------------------------------------------------|
//! | 0                 | leaf PTEs, one per synthetic page                |
//! | 1                 | scratch PTE used to donate frames via FREEPAGE   |
//! | 2 .. 2+pages      | initial data frames                              |
//! | 2+pages ..        | spare frames donated before the first round      |

use anyhow::{bail, ensure, Context, Result};
use memory::{Bus, GuestMemory, SparseMemory};
use rpfh::pte::{compose, describe, flags_of, frame_of, is_remote, PteFlags, PAGE_SIZE};
use rpfh::{
    RpfhConfig, RpfhStats, SharedRpfh, REG_EVICTPAGE, REG_FREEPAGE, REG_NEWFRAME, RPFH_MMIO_SIZE,
};
use tracing::{debug, info};

/// Guest-virtual address of synthetic page 0; only used to label faults.
const VADDR_BASE: u64 = 0x4000_0000;

/// Leaf PTEs must fit in the page-table page.
pub const MAX_PAGES: usize = PAGE_SIZE / 8;

#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    pub ram_bytes: u64,
    pub dram_base: u64,
    pub pages: usize,
    pub extra_frames: usize,
    pub rounds: usize,
    pub rpfh: RpfhConfig,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub rounds: usize,
    pub pages_verified: usize,
    pub notifications: usize,
    pub free_frames: usize,
    pub evicted_pages: usize,
    pub allocated_chunks: usize,
    pub stats: RpfhStats,
}

struct Layout {
    dram_base: u64,
    pages: usize,
    extra_frames: usize,
}

impl Layout {
    fn leaf_pte(&self, page: usize) -> u64 {
        self.dram_base + 8 * page as u64
    }

    fn donation_pte(&self) -> u64 {
        self.dram_base + PAGE_SIZE as u64
    }

    /// Only valid for `n < pages + extra_frames` once `bytes_needed` has been checked.
    fn frame(&self, n: usize) -> u64 {
        self.dram_base + (2 + n as u64) * PAGE_SIZE as u64
    }

    /// `None` when the layout does not fit in a `u64`.
    fn bytes_needed(&self) -> Option<u64> {
        (self.pages as u64)
            .checked_add(self.extra_frames as u64)?
            .checked_add(2)?
            .checked_mul(PAGE_SIZE as u64)
    }
}

fn vaddr(page: usize) -> u64 {
    VADDR_BASE + (page * PAGE_SIZE) as u64
}

/// Alternates writable data pages with read-only executable ones so permission bits vary.
fn page_flags(page: usize) -> u64 {
    let flags = if page % 2 == 0 {
        PteFlags::VALID | PteFlags::READ | PteFlags::WRITE | PteFlags::ACCESSED | PteFlags::DIRTY
    } else {
        PteFlags::VALID | PteFlags::READ | PteFlags::EXECUTE | PteFlags::ACCESSED | PteFlags::USER
    };
    flags.bits()
}

fn page_image(page: usize, round: usize) -> Vec<u8> {
    let seed = ((page as u64) << 8) | round as u64;
    (0..PAGE_SIZE as u64)
        .map(|i| (seed.wrapping_mul(0x9E37_79B9) ^ i.wrapping_mul(131)) as u8)
        .collect()
}

pub struct Workload {
    config: WorkloadConfig,
    layout: Layout,
    bus: Bus<SparseMemory>,
    rpfh: SharedRpfh,
}

impl Workload {
    pub fn new(config: WorkloadConfig) -> Result<Self> {
        ensure!(
            (1..=MAX_PAGES).contains(&config.pages),
            "page count must be between 1 and {MAX_PAGES}"
        );
        ensure!(config.rounds > 0, "at least one round is required");
        ensure!(
            config.dram_base % PAGE_SIZE as u64 == 0,
            "DRAM base {:#x} is not page aligned",
            config.dram_base
        );

        let layout = Layout {
            dram_base: config.dram_base,
            pages: config.pages,
            extra_frames: config.extra_frames,
        };
        let needed = layout
            .bytes_needed()
            .with_context(|| format!("{} extra frames do not fit in memory", config.extra_frames))?;
        ensure!(
            needed <= config.ram_bytes,
            "workload needs {needed} bytes of RAM but only {} are configured",
            config.ram_bytes
        );

        let mmio_base = config.rpfh.mmio_base;
        let ram_end = config
            .dram_base
            .checked_add(config.ram_bytes)
            .context("RAM range overflows the physical address space")?;
        if mmio_base < ram_end && config.dram_base < mmio_base.saturating_add(RPFH_MMIO_SIZE) {
            bail!(
                "RPFH window {mmio_base:#x} overlaps RAM {:#x}..{ram_end:#x}",
                config.dram_base
            );
        }

        let ram = SparseMemory::new(config.ram_bytes).context("failed to allocate guest RAM")?;
        let mut bus = Bus::new(config.dram_base, ram);
        let rpfh = SharedRpfh::new(config.rpfh.clone());
        rpfh.register(&mut bus)
            .context("failed to map the RPFH register window")?;

        Ok(Self {
            config,
            layout,
            bus,
            rpfh,
        })
    }

    pub fn run(mut self) -> Result<Report> {
        self.map_initial_pages()?;

        let spares: Vec<u64> = (0..self.layout.extra_frames)
            .map(|n| self.layout.frame(self.layout.pages + n))
            .collect();
        self.donate(&spares)?;

        let mut pages_verified = 0;
        let mut notifications = 0;
        for round in 0..self.config.rounds {
            let released = self.evict_all()?;
            pages_verified += self.fault_all(round)?;
            notifications += self.drain_notifications()?;
            self.donate(&released)?;
            info!(
                round,
                free_frames = self.rpfh.free_frames(),
                "round complete"
            );
        }

        Ok(Report {
            rounds: self.config.rounds,
            pages_verified,
            notifications,
            free_frames: self.rpfh.free_frames(),
            evicted_pages: self.rpfh.evicted_pages(),
            allocated_chunks: self.bus.ram().inner().allocated_chunks(),
            stats: self.rpfh.stats(),
        })
    }

    fn map_initial_pages(&mut self) -> Result<()> {
        for page in 0..self.layout.pages {
            let frame = self.layout.frame(page);
            self.bus
                .ram_mut()
                .write_from(frame, &page_image(page, 0))
                .with_context(|| format!("failed to fill page {page}"))?;
            self.bus
                .write_u64(self.layout.leaf_pte(page), compose(frame, page_flags(page)));
        }
        debug!(pages = self.layout.pages, "mapped initial pages");
        Ok(())
    }

    /// Hands `frames` to the controller one at a time through the scratch PTE.
    fn donate(&mut self, frames: &[u64]) -> Result<()> {
        let scratch = self.layout.donation_pte();
        let reg = self.config.rpfh.mmio_base + REG_FREEPAGE;
        for &frame in frames {
            self.bus
                .write_u64(scratch, compose(frame, PteFlags::VALID.bits()));
            self.bus.write_u64(reg, scratch);
        }
        self.check_running()?;

        let pool = self.bus.read_u64(reg);
        debug!(donated = frames.len(), pool, "donated frames");
        Ok(())
    }

    /// Evicts every page and returns the frames they occupied.
    fn evict_all(&mut self) -> Result<Vec<u64>> {
        let reg = self.config.rpfh.mmio_base + REG_EVICTPAGE;
        let mut released = Vec::with_capacity(self.layout.pages);
        for page in 0..self.layout.pages {
            let pte_addr = self.layout.leaf_pte(page);
            released.push(frame_of(self.bus.read_u64(pte_addr)));
            self.bus.write_u64(reg, pte_addr);
            self.check_running()?;

            let pte = self.bus.read_u64(pte_addr);
            ensure!(
                is_remote(pte),
                "page {page} still resident after eviction: {}",
                describe(pte)
            );
        }
        Ok(released)
    }

    /// Touches every page as the page walker would, checks the restored contents, then dirties
    /// the page with the next round's pattern.
    fn fault_all(&mut self, round: usize) -> Result<usize> {
        for page in 0..self.layout.pages {
            let pte_addr = self.layout.leaf_pte(page);
            let frame = self
                .rpfh
                .handle_remote_fault(self.bus.ram_mut(), vaddr(page), pte_addr)
                .with_context(|| format!("fault on page {page} failed"))?
                .with_context(|| format!("page {page} was not remote when touched"))?;

            let pte = self.bus.read_u64(pte_addr);
            ensure!(
                flags_of(pte) == page_flags(page),
                "page {page} lost its permissions: {}",
                describe(pte)
            );

            let mut restored = vec![0u8; PAGE_SIZE];
            self.bus.ram().read_into(frame, &mut restored)?;
            if restored != page_image(page, round) {
                bail!("page {page} contents differ after round {round} fetch into {frame:#x}");
            }

            self.bus
                .ram_mut()
                .write_from(frame, &page_image(page, round + 1))?;
        }
        Ok(self.layout.pages)
    }

    /// Reads NEWFRAME until empty; the reported PTEs must match the leaf PTEs in fault order.
    fn drain_notifications(&mut self) -> Result<usize> {
        let reg = self.config.rpfh.mmio_base + REG_NEWFRAME;
        let mut drained = 0;
        loop {
            let pte = self.bus.read_u64(reg);
            if pte == 0 {
                break;
            }
            ensure!(
                drained < self.layout.pages,
                "NEWFRAME reported more PTEs than pages were fetched"
            );
            let expected = self.bus.read_u64(self.layout.leaf_pte(drained));
            ensure!(
                pte == expected,
                "NEWFRAME reported {} but page {drained} maps {}",
                describe(pte),
                describe(expected)
            );
            drained += 1;
        }
        ensure!(
            drained == self.layout.pages,
            "expected {} new-frame notifications, got {drained}",
            self.layout.pages
        );
        Ok(drained)
    }

    /// Register writes cannot report failure to the guest, so poll the controller's latch.
    fn check_running(&self) -> Result<()> {
        match self.rpfh.fatal() {
            Some(err) => Err(err).context("controller halted"),
            None => Ok(()),
        }
    }
}
