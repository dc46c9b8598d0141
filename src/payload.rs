//! Payload access under the seqlock protocol
//!
//! Readers copy the payload while a writer may be storing to it. On x86 the
//! lock's own fences are enough and the copy is a plain (volatile) load or
//! store. On every other target the copy goes through relaxed atomics, one
//! machine word at a time when `T` is word aligned and word sized, one byte at
//! a time otherwise.
//!
//! Loads return `MaybeUninit<T>`: a torn copy may not be a valid `T` and must
//! only be assumed initialized after the read has been validated.
//!
//! Payloads are [`NoUninit`]: the wrapped copies read every byte of `T` as an
//! integer, so `T` may not contain padding.

use bytemuck::NoUninit;
use std::mem::{align_of, size_of, MaybeUninit};
use std::ptr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// `true` on targets where plain payload loads/stores are sufficient.
pub const PLAIN_ACCESS: bool = cfg!(any(target_arch = "x86", target_arch = "x86_64"));

/// Copy `*src` out for a reader.
///
/// # Safety
/// `src` must be valid for reads and aligned. Concurrent writers must use
/// [`store`].
#[inline(always)]
pub unsafe fn load<T: NoUninit>(src: *const T) -> MaybeUninit<T> {
    if PLAIN_ACCESS {
        ptr::read_volatile(src.cast::<MaybeUninit<T>>())
    } else {
        wrapped_load(src)
    }
}

/// Store `value` into `*dst` inside a write section.
///
/// # Safety
/// `dst` must be valid for writes and aligned, and the caller must hold the
/// write lock guarding it.
#[inline(always)]
pub unsafe fn store<T: NoUninit>(dst: *mut T, value: T) {
    if PLAIN_ACCESS {
        ptr::write_volatile(dst, value);
    } else {
        wrapped_store(dst, value);
    }
}

#[inline(always)]
fn word_sized<T>() -> bool {
    align_of::<T>() >= align_of::<AtomicUsize>() && size_of::<T>() % size_of::<usize>() == 0
}

/// Relaxed-atomic copy out of `*src`.
///
/// # Safety
/// Same as [`load`].
#[inline]
pub unsafe fn wrapped_load<T: NoUninit>(src: *const T) -> MaybeUninit<T> {
    let mut out = MaybeUninit::<T>::uninit();

    if word_sized::<T>() {
        let words = size_of::<T>() / size_of::<usize>();
        let src = src.cast::<AtomicUsize>();
        let dst = out.as_mut_ptr().cast::<usize>();
        for i in 0..words {
            dst.add(i).write((*src.add(i)).load(Ordering::Relaxed));
        }
    } else {
        let src = src.cast::<AtomicU8>();
        let dst = out.as_mut_ptr().cast::<u8>();
        for i in 0..size_of::<T>() {
            dst.add(i).write((*src.add(i)).load(Ordering::Relaxed));
        }
    }

    out
}

/// Relaxed-atomic copy of `value` into `*dst`.
///
/// # Safety
/// Same as [`store`].
#[inline]
pub unsafe fn wrapped_store<T: NoUninit>(dst: *mut T, value: T) {
    let value = MaybeUninit::new(value);

    if word_sized::<T>() {
        let words = size_of::<T>() / size_of::<usize>();
        let src = value.as_ptr().cast::<usize>();
        let dst = dst.cast::<AtomicUsize>();
        for i in 0..words {
            (*dst.add(i)).store(src.add(i).read(), Ordering::Relaxed);
        }
    } else {
        let src = value.as_ptr().cast::<u8>();
        let dst = dst.cast::<AtomicU8>();
        for i in 0..size_of::<T>() {
            (*dst.add(i)).store(src.add(i).read(), Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::UnsafeCell;

    #[test]
    fn test_plain_access_flag() {
        #[cfg(target_arch = "x86_64")]
        assert!(PLAIN_ACCESS);
        #[cfg(target_arch = "aarch64")]
        assert!(!PLAIN_ACCESS);
    }

    #[test]
    fn test_word_path() {
        assert!(word_sized::<[u64; 4]>());

        let cell = UnsafeCell::new([0u64; 4]);
        unsafe {
            wrapped_store(cell.get(), [1, 2, 3, u64::MAX]);
            let value = wrapped_load(cell.get()).assume_init();
            assert_eq!(value, [1, 2, 3, u64::MAX]);
        }
    }

    #[test]
    fn test_byte_path() {
        assert!(!word_sized::<[u8; 3]>());

        let cell = UnsafeCell::new([0u8; 3]);
        unsafe {
            wrapped_store(cell.get(), [7, 8, 9]);
            assert_eq!(wrapped_load(cell.get()).assume_init(), [7, 8, 9]);
        }
    }

    #[test]
    fn test_dispatch() {
        #[derive(Clone, Copy, Debug, PartialEq, NoUninit)]
        #[repr(C)]
        struct Quote {
            bid: u32,
            ask: u32,
        }

        let cell = UnsafeCell::new(Quote { bid: 0, ask: 0 });
        unsafe {
            store(cell.get(), Quote { bid: 99, ask: 101 });
            assert_eq!(load(cell.get()).assume_init(), Quote { bid: 99, ask: 101 });
        }
    }

    #[test]
    fn test_explicit_padding() {
        // 12 bytes of data in a 16 byte, 8 aligned struct: word path, with
        // the tail spelled out as a field so every byte is initialized
        #[derive(Clone, Copy, Debug, PartialEq, NoUninit)]
        #[repr(C)]
        struct Tick {
            price: u64,
            size: u32,
            _pad: u32,
        }

        assert_eq!(size_of::<Tick>(), 16);
        assert_eq!(word_sized::<Tick>(), align_of::<Tick>() >= align_of::<usize>());

        let tick = Tick {
            price: u64::MAX - 1,
            size: 7,
            _pad: 0,
        };
        let cell = UnsafeCell::new(Tick {
            price: 0,
            size: 0,
            _pad: 0,
        });
        unsafe {
            wrapped_store(cell.get(), tick);
            assert_eq!(wrapped_load(cell.get()).assume_init(), tick);
            store(cell.get(), tick);
            assert_eq!(load(cell.get()).assume_init(), tick);
        }
    }
}
