//! venom_seqlock - Sequence lock for read-mostly shared data
//!
//! Readers never block writers and writers never wait for readers. A reader
//! copies the data and retries if a writer overlapped the copy.
//!
//! # Architecture
//!
//! - **RawSeqLock**: one-word counter guarding data kept anywhere by the caller
//! - **SeqLock<T>**: counter + plain-data payload (`bytemuck::NoUninit`), guard-based writes
//! - **SharedSeqLock<T>**: a `SeqLock<T>` in POSIX shared memory
//!
//! # Writer paths
//!
//! - **Exclusive**: single writer (or writers serialized elsewhere), no CAS
//! - **Contended**: any number of writers, CAS + backoff
//!
//! # example
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//! use venom_seqlock::SeqLock;
//!
//! let lock = Arc::new(SeqLock::new([0u64; 2]));
//!
//! let writer = {
//!     let lock = Arc::clone(&lock);
//!     thread::spawn(move || {
//!         for i in 1..=100 {
//!             lock.write([i, i]);
//!         }
//!     })
//! };
//!
//! let [a, b] = lock.read();
//! assert_eq!(a, b);
//! writer.join().unwrap();
//! ```
//!
//! # Features
//!
//! `aliases` (default) adds the short macro names and the [`RawSeqLock`]
//! alias `SeqLockT`; `default-features = false` leaves only the
//! `venom_seqlock_*` names.
//!
#![cfg_attr(feature = "aliases", doc = "```")]
#![cfg_attr(not(feature = "aliases"), doc = "```compile_fail")]
//! use venom_seqlock::{seqlock_read, SeqLockT};
//!
//! let lock = SeqLockT::new();
//! assert_eq!(seqlock_read!(lock => 1), 1);
//! ```

#[macro_use]
mod macros;

pub mod backoff;
pub mod bindings;
pub mod error;
pub mod payload;
pub mod raw;
pub mod seqlock;
pub mod shm;

pub use backoff::{Backoff, BackoffConfig, ExponentialBackoff, SpinHint};
pub use error::{Result, SeqLockError};
pub use raw::{RawSeqLock, RawWriteGuard, ReadSection};
pub use seqlock::{SeqLock, SeqLockWriteGuard};
pub use shm::SharedSeqLock;

/// Short name for [`RawSeqLock`]
#[cfg(feature = "aliases")]
pub type SeqLockT = RawSeqLock;
