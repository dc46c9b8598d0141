//! RawSeqLock - the bare sequence counter
//!
//! A `RawSeqLock` is one machine word. It guards data that lives wherever the
//! caller keeps it; the lock only tells readers whether a writer overlapped
//! their read.
//!
//! # Protocol
//!
//! **Writer:** bump the counter to odd, mutate, bump it to the next even value.
//!
//! **Reader:** sample the counter, read, sample again. The read is clean when
//! both samples are equal and even; otherwise the whole read is repeated.
//!
//! # Writer paths
//! - `write_lock_exclusive`: plain load/store, the caller guarantees a single
//!   active writer.
//! - `write_lock_spin`: CAS loop, any number of writer threads.
//!
//! Both return a [`RawWriteGuard`] whose drop is `write_unlock`.
//!
//! # Memory ordering
//! - acquire: odd value stored, then a release fence so the payload stores that
//!   follow cannot become visible before the odd value.
//! - release: next even value stored with `Release`, publishing the payload.
//! - read: first sample `Acquire`, payload loads, acquire fence, second sample.
//!
//! `compiler_fence(AcqRel)` brackets the payload accesses on both sides so the
//! compiler cannot move them across the counter updates either.
//!
//! The counter wraps around after `usize::MAX` writes. A reader whose two
//! samples straddle a full wrap would accept a torn read; this is not guarded
//! against.

use crate::backoff::{pause, Backoff, SpinHint};
use crate::error::{Result, SeqLockError};
use std::fmt;
use std::sync::atomic::{compiler_fence, fence, AtomicUsize, Ordering};

/// Failed CAS attempts in a single acquisition before a warning is logged
const LONG_SPIN_WARN: u32 = 1 << 16;

/// Next even value: `v` itself when unlocked, the release value of the
/// current holder when locked.
#[inline(always)]
const fn next_even(v: usize) -> usize {
    v.wrapping_add(1) & !1
}

/// A sequence lock counter.
///
/// Zero is a valid unlocked state, so a zeroed storage location (static,
/// shared memory, C struct field) is ready to use.
#[repr(transparent)]
#[derive(Default)]
pub struct RawSeqLock {
    /// Sequence counter: odd = write in progress, even = stable
    seq: AtomicUsize,
}

const _: () = assert!(std::mem::size_of::<RawSeqLock>() == std::mem::size_of::<usize>());

impl RawSeqLock {
    /// Create an unlocked counter at version 0
    #[inline]
    pub const fn new() -> Self {
        Self {
            seq: AtomicUsize::new(0),
        }
    }

    /// View a caller-owned word as a lock
    ///
    /// # Safety
    /// - `ptr` must be non-null, aligned and valid for the lifetime `'a`
    /// - the word must only be accessed through `RawSeqLock` while borrowed
    #[inline]
    pub unsafe fn from_ptr<'a>(ptr: *mut usize) -> &'a Self {
        &*ptr.cast::<Self>()
    }

    /// Current counter value.
    ///
    /// Even values count completed writes times two; an odd value means a
    /// writer holds the lock.
    #[inline]
    pub fn version(&self) -> usize {
        self.seq.load(Ordering::Acquire)
    }

    /// Check whether a writer currently holds the lock
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.version() & 1 == 1
    }

    // ------------------------------------------------------------------
    // Token-level protocol
    // ------------------------------------------------------------------

    /// Begin a write on the exclusive fast path.
    ///
    /// Returns the odd value now stored in the counter; pass it to
    /// [`write_end`](Self::write_end).
    ///
    /// Caller contract: no other writer is active. Two concurrent exclusive
    /// writers both publish the same odd value and race on the payload.
    #[inline]
    pub fn write_begin_exclusive(&self) -> usize {
        // Only the single writer changes the counter, relaxed is enough
        let locked = self.seq.load(Ordering::Relaxed).wrapping_add(1);
        self.seq.store(locked, Ordering::Relaxed);
        Self::enter_write();
        locked
    }

    /// Begin a write on the contended path, spinning with `backoff` between
    /// failed attempts.
    ///
    /// Every attempt targets the next even value: if the counter is odd the
    /// CAS waits for the value the current holder will release to.
    #[inline]
    pub fn write_begin_contended<B: Backoff>(&self, mut backoff: B) -> usize {
        let mut expected = next_even(self.seq.load(Ordering::Relaxed));
        let mut failures = 0u32;

        while self
            .seq
            .compare_exchange_weak(
                expected,
                expected.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_err()
        {
            backoff.snooze();
            failures = failures.wrapping_add(1);
            if failures == LONG_SPIN_WARN {
                self.warn_long_spin(failures);
            }
            expected = next_even(self.seq.load(Ordering::Relaxed));
        }

        backoff.reset();
        Self::enter_write();
        expected.wrapping_add(1)
    }

    /// Single CAS attempt on the contended path.
    ///
    /// Returns `None` if another writer holds the lock or won the race.
    #[inline]
    pub fn try_write_begin(&self) -> Option<usize> {
        let current = self.seq.load(Ordering::Relaxed);
        if current & 1 == 1 {
            return None;
        }

        self.seq
            .compare_exchange(
                current,
                current.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .ok()?;

        Self::enter_write();
        Some(current.wrapping_add(1))
    }

    /// End a write started by any `write_begin_*`.
    ///
    /// `locked` is the odd value returned by the begin call; the counter is
    /// set to `locked + 1` without re-reading it.
    #[inline]
    pub fn write_end(&self, locked: usize) {
        debug_assert!(locked & 1 == 1, "write_end with an unlocked token");
        compiler_fence(Ordering::AcqRel);
        self.seq.store(locked.wrapping_add(1), Ordering::Release);
    }

    /// Begin a read. Returns the raw counter sample used as read token.
    #[inline]
    pub fn read_begin(&self) -> usize {
        self.seq.load(Ordering::Acquire)
    }

    /// Finish a read started with `snapshot`.
    ///
    /// Returns `true` for a clean read. Otherwise `snapshot` is replaced with
    /// a fresh sample and the caller must repeat the whole read.
    #[inline]
    pub fn read_end(&self, snapshot: &mut usize) -> bool {
        compiler_fence(Ordering::AcqRel);
        // Keep the payload loads above the authoritative sample
        fence(Ordering::Acquire);
        let current = self.seq.load(Ordering::Acquire);

        // An odd snapshot masks to a value `current` can no longer equal
        if current == *snapshot & !1 {
            return true;
        }

        *snapshot = current;
        false
    }

    #[inline(always)]
    fn enter_write() {
        fence(Ordering::Release);
        compiler_fence(Ordering::AcqRel);
    }

    #[cold]
    #[inline(never)]
    fn warn_long_spin(&self, failures: u32) {
        tracing::warn!(
            failures,
            version = self.seq.load(Ordering::Relaxed),
            "seqlock writer still spinning, write sections may be too long"
        );
    }

    // ------------------------------------------------------------------
    // Scoped protocol
    // ------------------------------------------------------------------

    /// Lock for writing on the exclusive fast path.
    ///
    /// The returned guard releases the lock when dropped.
    ///
    /// Caller contract: no other writer is active (single writer thread, or
    /// writers serialized by an outer mutex).
    #[inline]
    pub fn write_lock_exclusive(&self) -> RawWriteGuard<'_> {
        RawWriteGuard {
            lock: self,
            locked: self.write_begin_exclusive(),
        }
    }

    /// Lock for writing, spinning until no other writer holds the lock.
    #[inline]
    pub fn write_lock_spin(&self) -> RawWriteGuard<'_> {
        self.write_lock_spin_with(SpinHint)
    }

    /// Like [`write_lock_spin`](Self::write_lock_spin) with a custom backoff.
    #[inline]
    pub fn write_lock_spin_with<B: Backoff>(&self, backoff: B) -> RawWriteGuard<'_> {
        RawWriteGuard {
            lock: self,
            locked: self.write_begin_contended(backoff),
        }
    }

    /// Try to lock for writing without spinning
    #[inline]
    pub fn try_write_lock(&self) -> Option<RawWriteGuard<'_>> {
        let locked = self.try_write_begin()?;
        Some(RawWriteGuard { lock: self, locked })
    }

    /// Open a read section.
    #[inline]
    pub fn read_lock(&self) -> ReadSection<'_> {
        ReadSection {
            lock: self,
            snapshot: self.read_begin(),
        }
    }

    /// Run `body` until it completes without overlapping a writer and return
    /// its result.
    ///
    /// `body` may run several times and must not have side effects that
    /// survive a failed attempt. It is never started while a writer holds the
    /// lock.
    ///
    /// # example
    ///
    /// ```
    /// use std::sync::atomic::{AtomicU64, Ordering};
    /// use venom_seqlock::RawSeqLock;
    ///
    /// let lock = RawSeqLock::new();
    /// let (a, b) = (AtomicU64::new(0), AtomicU64::new(0));
    ///
    /// {
    ///     let _guard = lock.write_lock_spin();
    ///     a.store(5, Ordering::Relaxed);
    ///     b.store(5, Ordering::Relaxed);
    /// }
    ///
    /// let pair = lock.read(|| (a.load(Ordering::Relaxed), b.load(Ordering::Relaxed)));
    /// assert_eq!(pair, (5, 5));
    /// ```
    #[inline]
    pub fn read<F, R>(&self, body: F) -> R
    where
        F: FnMut() -> R,
    {
        self.read_counted(body).0
    }

    /// Like [`read`](Self::read), also returning how many counter samples
    /// were needed (1 for an undisturbed read).
    #[inline]
    pub fn read_counted<F, R>(&self, mut body: F) -> (R, u32)
    where
        F: FnMut() -> R,
    {
        let mut section = self.read_lock();
        let mut attempts = 1u32;

        loop {
            if section.writer_active() {
                // Don't read data that is known to be mid-update
                pause();
                section.restart();
                attempts = attempts.wrapping_add(1);
                continue;
            }

            let result = body();
            if section.read_unlock() {
                return (result, attempts);
            }

            pause();
            attempts = attempts.wrapping_add(1);
        }
    }

    /// Run `body` once.
    ///
    /// Returns [`SeqLockError::Contended`] if a writer was active before or
    /// during the read; `body` is not run when a writer holds the lock.
    #[inline]
    pub fn try_read<F, R>(&self, body: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        let mut section = self.read_lock();
        if section.writer_active() {
            return Err(SeqLockError::Contended);
        }

        let result = body();
        if section.read_unlock() {
            Ok(result)
        } else {
            Err(SeqLockError::Contended)
        }
    }

    /// Like [`read`](Self::read) but gives up after `max_attempts` samples.
    ///
    /// This is the building block for deadline-bound readers; the lock itself
    /// has no notion of time.
    pub fn read_bounded<F, R>(&self, max_attempts: u32, mut body: F) -> Result<R>
    where
        F: FnMut() -> R,
    {
        let mut section = self.read_lock();

        for attempt in 1..=max_attempts {
            if !section.writer_active() {
                let result = body();
                if section.read_unlock() {
                    return Ok(result);
                }
            } else {
                section.restart();
            }

            if attempt < max_attempts {
                pause();
            }
        }

        Err(SeqLockError::RetriesExhausted {
            attempts: max_attempts,
        })
    }
}

impl fmt::Debug for RawSeqLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let version = self.version();
        f.debug_struct("RawSeqLock")
            .field("version", &version)
            .field("locked", &(version & 1 == 1))
            .finish()
    }
}

/// Write access to a [`RawSeqLock`]; dropping it is `write_unlock`.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct RawWriteGuard<'a> {
    lock: &'a RawSeqLock,
    locked: usize,
}

impl RawWriteGuard<'_> {
    /// The odd counter value held by this writer
    #[inline]
    pub fn version(&self) -> usize {
        self.locked
    }

    /// Release the lock. Same as dropping the guard.
    #[inline]
    pub fn write_unlock(self) {
        drop(self);
    }
}

impl Drop for RawWriteGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.write_end(self.locked);
    }
}

impl fmt::Debug for RawWriteGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawWriteGuard")
            .field("version", &self.locked)
            .finish()
    }
}

/// An open read of a [`RawSeqLock`].
///
/// ```
/// use venom_seqlock::RawSeqLock;
///
/// let lock = RawSeqLock::new();
/// let mut section = lock.read_lock();
/// let value = loop {
///     let value = 42; // read the protected data here
///     if section.read_unlock() {
///         break value;
///     }
/// };
/// assert_eq!(value, 42);
/// ```
pub struct ReadSection<'a> {
    lock: &'a RawSeqLock,
    snapshot: usize,
}

impl ReadSection<'_> {
    /// The sample taken at the start of the current attempt
    #[inline]
    pub fn snapshot(&self) -> usize {
        self.snapshot
    }

    /// `true` if a writer held the lock when the current attempt started.
    ///
    /// Such an attempt can never validate.
    #[inline]
    pub fn writer_active(&self) -> bool {
        self.snapshot & 1 == 1
    }

    /// Take a fresh sample without validating the current attempt
    #[inline]
    pub fn restart(&mut self) {
        self.snapshot = self.lock.read_begin();
    }

    /// Validate the reads made since the last sample.
    ///
    /// `true` means they were clean. `false` means a writer interfered; the
    /// section is re-armed for the next attempt.
    #[inline]
    pub fn read_unlock(&mut self) -> bool {
        self.lock.read_end(&mut self.snapshot)
    }
}
