//! SeqLock - Sequence Lock around a `Copy` payload
//!
//! A `SeqLock<T>` pairs a [`RawSeqLock`] with the data it protects. Readers
//! never block: they copy the payload out and retry if a writer overlapped
//! the copy. Writers never wait for readers.
//!
//! # Writers
//! - [`SeqLock::write`] / [`SeqLock::lock`]: contended path, safe for any
//!   number of writer threads.
//! - [`SeqLock::write_exclusive`] / [`SeqLock::lock_exclusive`]: fast path,
//!   `unsafe` because the caller must guarantee a single writer.
//!
//! # Performance
//! - Read: two counter loads + copy of `T`
//! - Write (exclusive): two counter stores + copy of `T`
//! - Write (contended): one CAS + one store + copy of `T`

use crate::backoff::{Backoff, SpinHint};
use crate::error::Result;
use crate::payload;
use crate::raw::{RawSeqLock, RawWriteGuard};
use bytemuck::NoUninit;
use std::cell::UnsafeCell;
use std::fmt;

/// A value protected by a sequence lock.
///
/// `T` must be [`NoUninit`] (plain data without padding bytes): readers take
/// bitwise copies that may be torn and are discarded when the read does not
/// validate, and on targets without plain payload access those copies are
/// made word by word through atomics, which must never see uninitialized
/// bytes. Tuples and padded structs are rejected at compile time:
///
/// ```compile_fail
/// #[derive(Clone, Copy)]
/// struct Padded(u64, u32);
///
/// let lock = venom_seqlock::SeqLock::new(Padded(1, 2));
/// ```
///
/// # example
///
/// ```
/// use venom_seqlock::SeqLock;
///
/// let lock = SeqLock::new([0u64; 2]);
/// lock.write([5, 5]);
/// assert_eq!(lock.read(), [5, 5]);
/// ```
#[repr(C)]
pub struct SeqLock<T> {
    lock: RawSeqLock,
    data: UnsafeCell<T>,
}

// SAFETY: readers only hand out validated copies, writers are serialized by
// the counter (or by the caller on the exclusive path)
unsafe impl<T: Send> Send for SeqLock<T> {}
unsafe impl<T: Send> Sync for SeqLock<T> {}

impl<T> SeqLock<T> {
    /// Current counter value, see [`RawSeqLock::version`]
    #[inline]
    pub fn version(&self) -> usize {
        self.lock.version()
    }

    /// Consume the lock, returning the payload
    #[inline]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Mutable access without locking; the borrow proves there are no readers
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: NoUninit> SeqLock<T> {
    /// Create a new SeqLock holding `value` at version 0
    #[inline]
    pub const fn new(value: T) -> Self {
        Self {
            lock: RawSeqLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    #[inline(always)]
    fn copy_out(&self) -> std::mem::MaybeUninit<T> {
        // SAFETY: the copy is only trusted after the counter check
        unsafe { payload::load(self.data.get()) }
    }

    /// Read a consistent copy, retrying while writers interfere
    #[inline]
    pub fn read(&self) -> T {
        let value = self.lock.read(|| self.copy_out());
        // SAFETY: validated read, no writer touched the payload during the copy
        unsafe { value.assume_init() }
    }

    /// Read a consistent copy and project it through `f`
    ///
    /// ```
    /// use venom_seqlock::SeqLock;
    ///
    /// let lock = SeqLock::new([1u64, 2, 3, 4, 5]);
    /// assert_eq!(lock.read_with(|arr| arr.iter().sum::<u64>()), 15);
    /// ```
    #[inline]
    pub fn read_with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        let value = self.read();
        f(&value)
    }

    /// Try to read without retrying.
    ///
    /// Returns `Err(Contended)` if a write was in progress or happened during
    /// the copy.
    #[inline]
    pub fn try_read(&self) -> Result<T> {
        let value = self.lock.try_read(|| self.copy_out())?;
        // SAFETY: validated read
        Ok(unsafe { value.assume_init() })
    }

    /// Read with at most `max_attempts` counter samples
    #[inline]
    pub fn read_bounded(&self, max_attempts: u32) -> Result<T> {
        let value = self.lock.read_bounded(max_attempts, || self.copy_out())?;
        // SAFETY: validated read
        Ok(unsafe { value.assume_init() })
    }

    /// Lock for writing on the contended path
    #[inline]
    pub fn lock(&self) -> SeqLockWriteGuard<'_, T> {
        self.lock_with(SpinHint)
    }

    /// Lock for writing on the contended path with a custom backoff
    #[inline]
    pub fn lock_with<B: Backoff>(&self, backoff: B) -> SeqLockWriteGuard<'_, T> {
        SeqLockWriteGuard {
            guard: self.lock.write_lock_spin_with(backoff),
            data: &self.data,
        }
    }

    /// Try to lock for writing without spinning
    #[inline]
    pub fn try_lock(&self) -> Option<SeqLockWriteGuard<'_, T>> {
        Some(SeqLockWriteGuard {
            guard: self.lock.try_write_lock()?,
            data: &self.data,
        })
    }

    /// Lock for writing on the exclusive fast path
    ///
    /// # Safety
    /// No other thread may hold or acquire a write lock on this `SeqLock`
    /// (exclusive or contended) until the guard is dropped.
    #[inline]
    pub unsafe fn lock_exclusive(&self) -> SeqLockWriteGuard<'_, T> {
        SeqLockWriteGuard {
            guard: self.lock.write_lock_exclusive(),
            data: &self.data,
        }
    }

    /// Store a new value (contended path)
    ///
    /// # example
    ///
    /// ```
    /// use venom_seqlock::SeqLock;
    ///
    /// let lock = SeqLock::new(0u64);
    /// lock.write(42);
    /// assert_eq!(lock.read(), 42);
    /// assert_eq!(lock.version(), 2);
    /// ```
    #[inline]
    pub fn write(&self, value: T) {
        self.lock().set(value);
    }

    /// Mutate the value in place (contended path)
    #[inline]
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        self.lock().update(f);
    }

    /// Store a new value on the exclusive fast path
    ///
    /// # Safety
    /// Same contract as [`lock_exclusive`](Self::lock_exclusive).
    #[inline]
    pub unsafe fn write_exclusive(&self, value: T) {
        self.lock_exclusive().set(value);
    }
}

impl<T: NoUninit + Default> Default for SeqLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: NoUninit + fmt::Debug> fmt::Debug for SeqLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_read() {
            Ok(value) => f.debug_struct("SeqLock").field("value", &value).finish(),
            Err(_) => f
                .debug_struct("SeqLock")
                .field("value", &"<write in progress>")
                .finish(),
        }
    }
}

/// Write access to a [`SeqLock`]; the lock is released when dropped.
///
/// All payload stores go through the platform adapter, so readers may copy
/// concurrently.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SeqLockWriteGuard<'a, T> {
    guard: RawWriteGuard<'a>,
    data: &'a UnsafeCell<T>,
}

impl<T: NoUninit> SeqLockWriteGuard<'_, T> {
    /// Current payload
    #[inline]
    pub fn get(&self) -> T {
        // SAFETY: we are the only writer, readers never store
        unsafe { *self.data.get() }
    }

    /// Replace the payload
    #[inline]
    pub fn set(&mut self, value: T) {
        // SAFETY: write lock held
        unsafe { payload::store(self.data.get(), value) }
    }

    /// Mutate a copy of the payload and store it back
    #[inline]
    pub fn update<F>(&mut self, f: F)
    where
        F: FnOnce(&mut T),
    {
        let mut value = self.get();
        f(&mut value);
        self.set(value);
    }

    /// The odd counter value held by this writer
    #[inline]
    pub fn version(&self) -> usize {
        self.guard.version()
    }
}

impl<T: NoUninit + fmt::Debug> fmt::Debug for SeqLockWriteGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeqLockWriteGuard")
            .field("version", &self.version())
            .field("value", &self.get())
            .finish()
    }
}
