//! C Bindings for venom_seqlock
//!
//! Exposes the token-level protocol over a caller-owned `venom_seqlock_t`
//! (a `size_t` initialized to zero).
//!
//! ```c
//! venom_seqlock_t lock = 0;
//!
//! size_t token = venom_seqlock_write_lock_spin(&lock);
//! data.a = 5; data.b = 5;
//! venom_seqlock_write_unlock(&lock, token);
//!
//! size_t seen = venom_seqlock_read_begin(&lock);
//! do {
//!     a = data.a; b = data.b;
//! } while (venom_seqlock_read_retry(&lock, &seen));
//! ```

use crate::backoff::SpinHint;
use crate::raw::RawSeqLock;
use std::os::raw::c_int;

/// Counter type seen from C
#[allow(non_camel_case_types)]
pub type venom_seqlock_t = usize;

/// Reset a lock to version 0 (unlocked)
///
/// # Safety
/// `lock` must be null or point to a `venom_seqlock_t` that no other thread
/// is using.
#[no_mangle]
pub unsafe extern "C" fn venom_seqlock_init(lock: *mut venom_seqlock_t) {
    if !lock.is_null() {
        lock.write(0);
    }
}

/// Begin a write on the exclusive fast path. Returns the unlock token.
///
/// # Safety
/// `lock` must be null or valid; no other writer may be active.
#[no_mangle]
pub unsafe extern "C" fn venom_seqlock_write_lock(lock: *mut venom_seqlock_t) -> usize {
    if lock.is_null() {
        return 0;
    }
    RawSeqLock::from_ptr(lock).write_begin_exclusive()
}

/// Begin a write, spinning while other writers hold the lock.
/// Returns the unlock token.
///
/// # Safety
/// `lock` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn venom_seqlock_write_lock_spin(lock: *mut venom_seqlock_t) -> usize {
    if lock.is_null() {
        return 0;
    }
    RawSeqLock::from_ptr(lock).write_begin_contended(SpinHint)
}

/// End a write started by either lock function
///
/// # Safety
/// `lock` must be null or valid; `token` must come from the matching lock call.
#[no_mangle]
pub unsafe extern "C" fn venom_seqlock_write_unlock(lock: *mut venom_seqlock_t, token: usize) {
    if lock.is_null() || token & 1 == 0 {
        return;
    }
    RawSeqLock::from_ptr(lock).write_end(token);
}

/// Begin a read. Returns the read token for `venom_seqlock_read_retry`.
///
/// # Safety
/// `lock` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn venom_seqlock_read_begin(lock: *mut venom_seqlock_t) -> usize {
    if lock.is_null() {
        return 0;
    }
    RawSeqLock::from_ptr(lock).read_begin()
}

/// Finish a read. Returns 1 if the read must be repeated (and refreshes
/// `*token`), 0 if it was clean.
///
/// # Safety
/// `lock` and `token` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn venom_seqlock_read_retry(
    lock: *mut venom_seqlock_t,
    token: *mut usize,
) -> c_int {
    if lock.is_null() || token.is_null() {
        return 0;
    }
    c_int::from(!RawSeqLock::from_ptr(lock).read_end(&mut *token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_protocol() {
        let mut lock: venom_seqlock_t = 7;
        unsafe {
            venom_seqlock_init(&mut lock);
            assert_eq!(lock, 0);

            let token = venom_seqlock_write_lock(&mut lock);
            assert_eq!(token, 1);
            venom_seqlock_write_unlock(&mut lock, token);

            let token = venom_seqlock_write_lock_spin(&mut lock);
            assert_eq!(token, 3);
            venom_seqlock_write_unlock(&mut lock, token);
        }
        assert_eq!(lock, 4);
    }

    #[test]
    fn test_read_protocol() {
        let mut lock: venom_seqlock_t = 0;
        unsafe {
            let mut token = venom_seqlock_read_begin(&mut lock);
            assert_eq!(venom_seqlock_read_retry(&mut lock, &mut token), 0);

            let write = venom_seqlock_write_lock(&mut lock);
            assert_eq!(venom_seqlock_read_retry(&mut lock, &mut token), 1);
            venom_seqlock_write_unlock(&mut lock, write);

            assert_eq!(venom_seqlock_read_retry(&mut lock, &mut token), 1);
            assert_eq!(token, 2);
            assert_eq!(venom_seqlock_read_retry(&mut lock, &mut token), 0);
        }
    }

    #[test]
    fn test_null_handles() {
        unsafe {
            venom_seqlock_init(std::ptr::null_mut());
            assert_eq!(venom_seqlock_write_lock(std::ptr::null_mut()), 0);
            assert_eq!(venom_seqlock_write_lock_spin(std::ptr::null_mut()), 0);
            venom_seqlock_write_unlock(std::ptr::null_mut(), 1);
            assert_eq!(venom_seqlock_read_begin(std::ptr::null_mut()), 0);
            assert_eq!(
                venom_seqlock_read_retry(std::ptr::null_mut(), std::ptr::null_mut()),
                0
            );
        }
    }
}
