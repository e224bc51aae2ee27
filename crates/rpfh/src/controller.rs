use memory::GuestMemory;
use tracing::{debug, error, warn};

use crate::config::RpfhConfig;
use crate::error::{Result, RpfhError};
use crate::evicted::EvictedPageStore;
use crate::free_frames::FreeFramePool;
use crate::new_frames::NewFrameQueue;
use crate::pte::{self, PAGE_SIZE};

/// Operation counters, mostly useful for tests and the runner's summary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RpfhStats {
    pub frees: u64,
    pub evictions: u64,
    pub redundant_evictions: u64,
    pub fetches: u64,
    /// Zero-valued command writes, writes to read-only registers and unknown offsets.
    pub ignored_accesses: u64,
}

/// The remote page fault handler.
///
/// Owns the free-frame pool, the evicted-page store and the new-frame queue. Guest memory is not
/// owned: every operation that touches PTEs or page contents borrows it from the caller.
#[derive(Debug)]
pub struct RpfhController {
    config: RpfhConfig,
    free: FreeFramePool,
    evicted: EvictedPageStore,
    new_frames: NewFrameQueue,
    stats: RpfhStats,
    fatal: Option<RpfhError>,
}

impl RpfhController {
    pub fn new(config: RpfhConfig) -> Self {
        Self {
            config,
            free: FreeFramePool::new(),
            evicted: EvictedPageStore::new(),
            new_frames: NewFrameQueue::new(),
            stats: RpfhStats::default(),
            fatal: None,
        }
    }

    pub fn config(&self) -> &RpfhConfig {
        &self.config
    }

    pub fn free_frames(&self) -> usize {
        self.free.len()
    }

    pub fn evicted_pages(&self) -> usize {
        self.evicted.len()
    }

    pub fn pending_new_frames(&self) -> usize {
        self.new_frames.len()
    }

    pub fn stats(&self) -> RpfhStats {
        self.stats
    }

    /// The fatal error that stopped this controller, if any.
    pub fn fatal(&self) -> Option<&RpfhError> {
        self.fatal.as_ref()
    }

    pub(crate) fn note_ignored(&mut self) {
        self.stats.ignored_accesses += 1;
    }

    pub(crate) fn drain_new_frame(&mut self) -> u64 {
        self.new_frames.pop_or_zero()
    }

    fn ensure_running(&self) -> Result<()> {
        match &self.fatal {
            Some(err) => Err(RpfhError::Halted(Box::new(err.clone()))),
            None => Ok(()),
        }
    }

    /// Latches the first fatal error so later operations are refused.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if self.fatal.is_none() {
                error!(%err, "rpfh: fatal protocol violation");
                self.fatal = Some(err.clone());
            }
        }
        result
    }

    /// Accepts the frame named by the PTE at `pte_addr` as a future fetch destination.
    pub fn free_page<M>(&mut self, mem: &mut M, pte_addr: u64) -> Result<()>
    where
        M: GuestMemory + ?Sized,
    {
        self.ensure_running()?;
        let result = self.free_page_inner(mem, pte_addr);
        self.settle(result)
    }

    fn free_page_inner<M>(&mut self, mem: &mut M, pte_addr: u64) -> Result<()>
    where
        M: GuestMemory + ?Sized,
    {
        let pte = mem.read_u64_le(pte_addr)?;
        let frame = pte::frame_of(pte);
        self.free.push(frame);
        self.stats.frees += 1;
        debug!(
            pte_addr = format_args!("{pte_addr:#x}"),
            frame = format_args!("{frame:#x}"),
            pool = self.free.len(),
            "rpfh: free page"
        );
        Ok(())
    }

    /// Moves the page mapped by the PTE at `pte_addr` into the controller and marks the PTE
    /// remote. Evicting an already-remote PTE is a logged no-op.
    pub fn evict_page<M>(&mut self, mem: &mut M, pte_addr: u64) -> Result<()>
    where
        M: GuestMemory + ?Sized,
    {
        self.ensure_running()?;
        let result = self.evict_page_inner(mem, pte_addr);
        self.settle(result)
    }

    fn evict_page_inner<M>(&mut self, mem: &mut M, pte_addr: u64) -> Result<()>
    where
        M: GuestMemory + ?Sized,
    {
        let pte = mem.read_u64_le(pte_addr)?;
        if pte::is_remote(pte) {
            self.stats.redundant_evictions += 1;
            warn!(
                pte_addr = format_args!("{pte_addr:#x}"),
                pte = %pte::describe(pte),
                "rpfh: page already evicted"
            );
            return Ok(());
        }

        let frame = pte::frame_of(pte);
        let mut data = Box::new([0u8; PAGE_SIZE]);
        mem.read_into(frame, &mut data[..])?;

        let remote_pte = pte::with_remote(pte);
        mem.write_u64_le(pte_addr, remote_pte)?;
        self.evicted.insert(remote_pte, data);

        if self.config.scrub_on_evict {
            mem.fill(frame, PAGE_SIZE, 0)?;
        }

        self.stats.evictions += 1;
        debug!(
            pte_addr = format_args!("{pte_addr:#x}"),
            pte = %pte::describe(remote_pte),
            evicted = self.evicted.len(),
            "rpfh: evict page"
        );
        Ok(())
    }

    /// Resolves a fault on a remote PTE.
    ///
    /// Restores the matching evicted image into the oldest donated frame, rewrites `*pte` to map
    /// that frame (keeping the flag bits captured at eviction) and queues the new PTE for the
    /// guest. Returns the frame's guest-physical address.
    ///
    /// Nothing is consumed until the image has been written, so a failed fetch (either fatal
    /// condition, or a donated frame outside guest RAM) leaves the pool and the store as they were.
    pub fn fetch_page<M>(&mut self, mem: &mut M, vaddr: u64, pte: &mut u64) -> Result<u64>
    where
        M: GuestMemory + ?Sized,
    {
        self.ensure_running()?;
        let result = self.fetch_page_inner(mem, vaddr, pte);
        self.settle(result)
    }

    fn fetch_page_inner<M>(&mut self, mem: &mut M, vaddr: u64, pte: &mut u64) -> Result<u64>
    where
        M: GuestMemory + ?Sized,
    {
        let frame = self
            .free
            .front()
            .ok_or(RpfhError::FreePoolEmpty { vaddr })?;
        let key = pte::match_key(*pte);
        let evicted = self
            .evicted
            .find(key)
            .ok_or(RpfhError::NoEvictedMatch { vaddr, key })?;

        // Pool and store are only consumed once the image has landed.
        mem.write_from(frame, &evicted.data[..])?;
        let old_pte = evicted.pte;
        self.free.pop();
        self.evicted.take_matching(key);

        let new_pte = pte::compose(frame, pte::carried_flags(old_pte));
        *pte = new_pte;
        self.new_frames.push(new_pte);
        self.stats.fetches += 1;

        debug!(
            vaddr = format_args!("{vaddr:#x}"),
            old = %pte::describe(old_pte),
            new = %pte::describe(new_pte),
            pool = self.free.len(),
            "rpfh: fetch page"
        );
        Ok(frame)
    }

    /// Fault-path entry used by an emulated page walker.
    ///
    /// Reads the leaf PTE at `pte_addr`; if it is remote, fetches the page and stores the rewritten
    /// PTE back to guest memory. Returns the new frame, or `None` when the PTE was not remote.
    pub fn handle_remote_fault<M>(
        &mut self,
        mem: &mut M,
        vaddr: u64,
        pte_addr: u64,
    ) -> Result<Option<u64>>
    where
        M: GuestMemory + ?Sized,
    {
        self.ensure_running()?;
        let mut pte = match mem.read_u64_le(pte_addr) {
            Ok(pte) => pte,
            Err(err) => return self.settle(Err(err.into())),
        };
        if !pte::is_remote(pte) {
            return Ok(None);
        }
        let frame = self.fetch_page(mem, vaddr, &mut pte)?;
        let stored = mem.write_u64_le(pte_addr, pte).map_err(RpfhError::from);
        self.settle(stored)?;
        Ok(Some(frame))
    }
}
