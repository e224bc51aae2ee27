use thiserror::Error;

/// Errors returned by [`GuestMemory`] backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuestMemoryError {
    /// The requested address range is outside the guest physical memory size.
    #[error("guest memory access out of range: paddr=0x{paddr:x} len={len} size=0x{size:x}")]
    OutOfRange { paddr: u64, len: usize, size: u64 },
    /// The requested size cannot be represented by the current platform's `usize`.
    #[error("guest memory size {size} does not fit in usize")]
    SizeTooLarge { size: u64 },
    /// The chosen chunk size is invalid (e.g. zero).
    #[error("invalid guest memory chunk size {chunk_size}")]
    InvalidChunkSize { chunk_size: usize },
}

pub type GuestMemoryResult<T> = Result<T, GuestMemoryError>;

/// Guest *physical* memory storage.
///
/// All addresses are `u64`. Backends report out-of-range accesses as errors rather than panicking
/// so device models can surface a bad guest-supplied pointer to their caller.
pub trait GuestMemory {
    fn size(&self) -> u64;

    /// Reads bytes from guest physical memory into `dst`.
    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()>;

    /// Writes bytes from `src` into guest physical memory.
    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()>;

    /// Sets `len` bytes starting at `paddr` to `value`. Nothing is written if any part of the
    /// range is out of bounds.
    fn fill(&mut self, paddr: u64, len: usize, value: u8) -> GuestMemoryResult<()> {
        const STRIDE: usize = 256;
        check_range(self.size(), paddr, len)?;
        let block = [value; STRIDE];
        let mut done = 0usize;
        while done < len {
            let take = (len - done).min(STRIDE);
            self.write_from(paddr + done as u64, &block[..take])?;
            done += take;
        }
        Ok(())
    }

    fn read_u8_le(&self, paddr: u64) -> GuestMemoryResult<u8> {
        let mut buf = [0u8; 1];
        self.read_into(paddr, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u64_le(&self, paddr: u64) -> GuestMemoryResult<u64> {
        let mut buf = [0u8; 8];
        self.read_into(paddr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u8_le(&mut self, paddr: u64, value: u8) -> GuestMemoryResult<()> {
        self.write_from(paddr, &[value])
    }

    fn write_u64_le(&mut self, paddr: u64, value: u64) -> GuestMemoryResult<()> {
        self.write_from(paddr, &value.to_le_bytes())
    }
}

pub(crate) fn check_range(size: u64, paddr: u64, len: usize) -> GuestMemoryResult<()> {
    let len_u64 = len as u64;
    let end = paddr
        .checked_add(len_u64)
        .ok_or(GuestMemoryError::OutOfRange { paddr, len, size })?;
    if end > size {
        return Err(GuestMemoryError::OutOfRange { paddr, len, size });
    }
    Ok(())
}

/// Dense (contiguous) guest memory.
#[derive(Debug, Clone)]
pub struct DenseMemory {
    data: Box<[u8]>,
}

impl DenseMemory {
    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        let size_usize =
            usize::try_from(size).map_err(|_| GuestMemoryError::SizeTooLarge { size })?;
        Ok(Self {
            data: vec![0u8; size_usize].into_boxed_slice(),
        })
    }

    #[inline]
    fn range_to_usize(&self, paddr: u64, len: usize) -> GuestMemoryResult<(usize, usize)> {
        check_range(self.size(), paddr, len)?;
        let start = usize::try_from(paddr).map_err(|_| GuestMemoryError::OutOfRange {
            paddr,
            len,
            size: self.size(),
        })?;
        let end = start.checked_add(len).ok_or(GuestMemoryError::OutOfRange {
            paddr,
            len,
            size: self.size(),
        })?;
        Ok((start, end))
    }
}

impl GuestMemory for DenseMemory {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        let (start, end) = self.range_to_usize(paddr, dst.len())?;
        dst.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        let (start, end) = self.range_to_usize(paddr, src.len())?;
        self.data[start..end].copy_from_slice(src);
        Ok(())
    }

    fn fill(&mut self, paddr: u64, len: usize, value: u8) -> GuestMemoryResult<()> {
        let (start, end) = self.range_to_usize(paddr, len)?;
        self.data[start..end].fill(value);
        Ok(())
    }
}

/// Sparse guest memory backed by lazily-allocated fixed-size chunks.
///
/// Unallocated chunks read as zero, so a large guest RAM only costs host memory for the pages the
/// workload actually touches.
#[derive(Debug, Clone)]
pub struct SparseMemory {
    size: u64,
    chunk_size: usize,
    chunks: Vec<Option<Box<[u8]>>>,
}

impl SparseMemory {
    pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        Self::with_chunk_size(size, Self::DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(size: u64, chunk_size: usize) -> GuestMemoryResult<Self> {
        if chunk_size == 0 {
            return Err(GuestMemoryError::InvalidChunkSize { chunk_size });
        }
        let chunk_size_u64 = chunk_size as u64;
        let chunk_count_u64 = size
            .checked_add(chunk_size_u64 - 1)
            .ok_or(GuestMemoryError::SizeTooLarge { size })?
            / chunk_size_u64;
        let chunk_count = usize::try_from(chunk_count_u64)
            .map_err(|_| GuestMemoryError::SizeTooLarge { size })?;
        Ok(Self {
            size,
            chunk_size,
            chunks: vec![None; chunk_count],
        })
    }

    /// Number of chunks that have been backed by host memory so far.
    pub fn allocated_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    /// Splits `[paddr, paddr + len)` into per-chunk pieces.
    ///
    /// Yields `(chunk, chunk_offset, buf_offset, take)`; the caller has already range-checked.
    fn spans(
        chunk_size: usize,
        paddr: u64,
        len: usize,
    ) -> impl Iterator<Item = (usize, usize, usize, usize)> {
        let mut done = 0usize;
        std::iter::from_fn(move || {
            if done == len {
                return None;
            }
            let cur = paddr + done as u64;
            // Both fit: the range is inside `size` and the chunk table length is a `usize`.
            let chunk = (cur / chunk_size as u64) as usize;
            let chunk_off = (cur % chunk_size as u64) as usize;
            let take = (chunk_size - chunk_off).min(len - done);
            let span = (chunk, chunk_off, done, take);
            done += take;
            Some(span)
        })
    }
}

impl GuestMemory for SparseMemory {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        check_range(self.size, paddr, dst.len())?;
        for (chunk, off, at, take) in Self::spans(self.chunk_size, paddr, dst.len()) {
            let out = &mut dst[at..at + take];
            match self.chunks.get(chunk).and_then(Option::as_deref) {
                Some(bytes) => out.copy_from_slice(&bytes[off..off + take]),
                None => out.fill(0),
            }
        }
        Ok(())
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        check_range(self.size, paddr, src.len())?;
        let (size, chunk_size) = (self.size, self.chunk_size);
        for (chunk, off, at, take) in Self::spans(chunk_size, paddr, src.len()) {
            let slot = self
                .chunks
                .get_mut(chunk)
                .ok_or(GuestMemoryError::OutOfRange {
                    paddr,
                    len: src.len(),
                    size,
                })?;
            let bytes = slot.get_or_insert_with(|| vec![0u8; chunk_size].into_boxed_slice());
            bytes[off..off + take].copy_from_slice(&src[at..at + take]);
        }
        Ok(())
    }
}

/// A [`GuestMemory`] view that places `inner` at guest-physical address `base`.
///
/// Guest physical `base + x` maps to `inner` offset `x`. Addresses below `base` or past the end of
/// `inner` are out of range. RISC-V `virt`-style machines put DRAM at `0x8000_0000`, so PTE words
/// and frame addresses handed to devices are absolute guest-physical addresses, not RAM offsets.
#[derive(Debug, Clone)]
pub struct OffsetMemory<M> {
    base: u64,
    inner: M,
}

impl<M: GuestMemory> OffsetMemory<M> {
    pub fn new(base: u64, inner: M) -> Self {
        Self { base, inner }
    }

    /// One past the last valid guest-physical address.
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.inner.size())
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    fn translate(&self, paddr: u64, len: usize) -> GuestMemoryResult<u64> {
        let err = GuestMemoryError::OutOfRange {
            paddr,
            len,
            size: self.end(),
        };
        let offset = paddr.checked_sub(self.base).ok_or(err.clone())?;
        check_range(self.inner.size(), offset, len).map_err(|_| err)?;
        Ok(offset)
    }
}

impl<M: GuestMemory> GuestMemory for OffsetMemory<M> {
    /// Reports the end address, so `check_range`-style callers see the whole physical span.
    fn size(&self) -> u64 {
        self.end()
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        let offset = self.translate(paddr, dst.len())?;
        self.inner.read_into(offset, dst)
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        let offset = self.translate(paddr, src.len())?;
        self.inner.write_from(offset, src)
    }

    fn fill(&mut self, paddr: u64, len: usize, value: u8) -> GuestMemoryResult<()> {
        let offset = self.translate(paddr, len)?;
        self.inner.fill(offset, len, value)
    }
}
