//! Error types for venom_seqlock
//!
//! The lock protocol itself never fails: `read` retries and `write_lock_spin`
//! spins until they complete. Errors only come from the bounded helpers and
//! from placing a lock in shared memory.

use std::io;
use thiserror::Error;

/// Result type for venom_seqlock operations
pub type Result<T> = std::result::Result<T, SeqLockError>;

/// Errors that can occur in venom_seqlock operations
#[derive(Debug, Error)]
pub enum SeqLockError {
    /// A single read attempt overlapped a writer
    #[error("Read overlapped a writer")]
    Contended,

    /// A bounded read did not observe a clean snapshot in time
    #[error("No clean read after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// Failed to create shared memory
    #[error("Failed to create shared memory '{name}': {source}")]
    ShmCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to open shared memory
    #[error("Failed to open shared memory '{name}': {source}")]
    ShmOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to map memory
    #[error("Failed to map memory: {0}")]
    Mmap(#[source] io::Error),

    /// Failed to truncate shared memory
    #[error("Failed to set shared memory size: {0}")]
    Truncate(#[source] io::Error),

    /// Shared memory object was not created by this crate
    #[error("Invalid seqlock magic number: expected 0x{expected:08X}, got 0x{got:08X}")]
    InvalidMagic { expected: u32, got: u32 },

    /// Shared memory object holds a payload of a different size
    #[error("Shared payload layout mismatch: expected {expected} bytes, got {got} bytes")]
    LayoutMismatch { expected: usize, got: usize },

    /// Namespace too long
    #[error("Namespace too long: max {max} chars, got {got}")]
    NamespaceTooLong { max: usize, got: usize },
}
