use memory::GuestMemoryError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RpfhError>;

/// Failures the controller cannot repair locally.
///
/// Every variant is fatal for the controller instance that produced it: once one is returned, the
/// controller latches it and later operations fail with [`RpfhError::Halted`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpfhError {
    /// A remote fault arrived while the guest had no free frame donated.
    #[error("remote fault at vaddr 0x{vaddr:x} with an empty free-frame pool")]
    FreePoolEmpty { vaddr: u64 },

    /// A remote fault named a PTE for which no evicted page image exists.
    #[error("remote fault at vaddr 0x{vaddr:x}: no evicted page matches key 0x{key:x}")]
    NoEvictedMatch { vaddr: u64, key: u64 },

    /// The guest handed the controller an address outside guest RAM.
    #[error("guest memory access failed: {0}")]
    Memory(#[from] GuestMemoryError),

    /// The controller already hit a fatal error and refuses further work.
    #[error("controller halted after fatal error: {0}")]
    Halted(Box<RpfhError>),
}

impl RpfhError {
    /// The error that originally stopped the controller.
    pub fn root(&self) -> &RpfhError {
        match self {
            RpfhError::Halted(inner) => inner.root(),
            other => other,
        }
    }
}
