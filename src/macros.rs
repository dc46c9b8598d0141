//! Block-form macros over [`RawSeqLock`](crate::RawSeqLock)
//!
//! Each macro opens and closes one write or read section around a block, for
//! data kept next to a raw counter. The value of the block is returned.
//!
//! The `venom_seqlock_*` names are always exported. The `aliases` feature
//! (on by default) adds the shorter `seqlock_*` names.
//!
//! ```
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use venom_seqlock::{venom_seqlock_read, venom_seqlock_write_spin, RawSeqLock};
//!
//! let lock = RawSeqLock::new();
//! let x = AtomicU32::new(0);
//!
//! venom_seqlock_write_spin!(lock => x.store(9, Ordering::Relaxed));
//! let seen = venom_seqlock_read!(lock => x.load(Ordering::Relaxed));
//! assert_eq!(seen, 9);
//! ```

/// Read section; the block is re-run until it reads cleanly.
///
/// The block is wrapped in a closure: it must not `return` from the caller.
#[macro_export]
macro_rules! venom_seqlock_read {
    ($lock:expr => $body:expr) => {
        $crate::RawSeqLock::read(&$lock, || $body)
    };
}

/// Write section on the exclusive fast path.
///
/// Only valid while no other writer uses the same lock.
#[macro_export]
macro_rules! venom_seqlock_write {
    ($lock:expr => $body:expr) => {{
        let __venom_guard = $crate::RawSeqLock::write_lock_exclusive(&$lock);
        let __venom_result = $body;
        $crate::RawWriteGuard::write_unlock(__venom_guard);
        __venom_result
    }};
}

/// Write section on the contended path, spinning while other writers hold
/// the lock.
#[macro_export]
macro_rules! venom_seqlock_write_spin {
    ($lock:expr => $body:expr) => {{
        let __venom_guard = $crate::RawSeqLock::write_lock_spin(&$lock);
        let __venom_result = $body;
        $crate::RawWriteGuard::write_unlock(__venom_guard);
        __venom_result
    }};
}

/// Alias of [`venom_seqlock_read!`]
#[cfg(feature = "aliases")]
#[macro_export]
macro_rules! seqlock_read {
    ($($tt:tt)*) => {
        $crate::venom_seqlock_read!($($tt)*)
    };
}

/// Alias of [`venom_seqlock_write!`]
#[cfg(feature = "aliases")]
#[macro_export]
macro_rules! seqlock_write {
    ($($tt:tt)*) => {
        $crate::venom_seqlock_write!($($tt)*)
    };
}

/// Alias of [`venom_seqlock_write_spin!`]
#[cfg(feature = "aliases")]
#[macro_export]
macro_rules! seqlock_write_spin {
    ($($tt:tt)*) => {
        $crate::venom_seqlock_write_spin!($($tt)*)
    };
}
