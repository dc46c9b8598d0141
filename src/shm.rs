//! SeqLock placed in POSIX shared memory
//!
//! A `SharedSeqLock<T>` lets processes on the same machine share one
//! `SeqLock<T>`. The creating process owns the object and unlinks it on drop;
//! other processes `open` it by name.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────────────────────┬──────────────────────────────┐
//! │ SharedHeader (64 bytes)      │ SeqLock<T>                   │
//! │ magic, version, payload size │ counter + payload            │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! `T` must be plain data: no pointers, references or handles that only make
//! sense inside one address space, and no padding ([`NoUninit`]).

use crate::error::{Result, SeqLockError};
use crate::seqlock::SeqLock;
use bytemuck::NoUninit;
use rustix::fd::OwnedFd;
use rustix::fs::ftruncate;
use rustix::io::Errno;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::ffi::CString;
use std::io;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

const VENOM_SHM_PREFIX: &str = "/venom_";
const MAX_NAME_LEN: usize = 255 - VENOM_SHM_PREFIX.len();

/// Magic number for layout validation
const SEQLOCK_MAGIC: u32 = 0x5351_4C4B; // "SQLK"
const LAYOUT_VERSION: u32 = 1;

/// Header stored at the beginning of the shared object
#[repr(C, align(64))]
struct SharedHeader {
    magic: u32,
    layout_version: u32,
    payload_size: usize,
}

#[repr(C)]
struct SharedLayout<T> {
    header: SharedHeader,
    lock: SeqLock<T>,
}

fn shm_path(name: &str) -> Result<CString> {
    if name.len() > MAX_NAME_LEN {
        return Err(SeqLockError::NamespaceTooLong {
            max: MAX_NAME_LEN,
            got: name.len(),
        });
    }

    CString::new(format!("{}{}", VENOM_SHM_PREFIX, name)).map_err(|e| SeqLockError::ShmOpen {
        name: name.to_string(),
        source: io::Error::new(io::ErrorKind::InvalidInput, e),
    })
}

/// Handle to a mapped shared memory region
struct SharedRegion {
    #[allow(dead_code)]
    fd: OwnedFd,
    addr: NonNull<u8>,
    size: usize,
    name: String,
    is_owner: bool,
}

impl SharedRegion {
    /// Create and map a new region of `size` bytes, zero filled.
    ///
    /// Returns `Ok(None)` if an object with this name already exists; it is
    /// left untouched.
    fn create(name: &str, size: usize) -> Result<Option<Self>> {
        let path = shm_path(name)?;

        let fd = match shm_open(
            path.as_c_str(),
            ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR,
            Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP,
        ) {
            Ok(fd) => fd,
            Err(e) if e == Errno::EXIST => return Ok(None),
            Err(e) => {
                return Err(SeqLockError::ShmCreate {
                    name: name.to_string(),
                    source: e.into(),
                })
            }
        };

        // the object is ours from here on, unlink it if setup fails
        let addr = match ftruncate(&fd, size as u64)
            .map_err(|e| SeqLockError::Truncate(e.into()))
            .and_then(|()| Self::map(&fd, size))
        {
            Ok(addr) => addr,
            Err(e) => {
                let _ = shm_unlink(path.as_c_str());
                return Err(e);
            }
        };

        // SAFETY: freshly mapped, `size` bytes writable
        unsafe {
            std::ptr::write_bytes(addr.as_ptr(), 0, size);
        }

        Ok(Some(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: true,
        }))
    }

    /// Map an existing region
    fn open(name: &str) -> Result<Self> {
        let path = shm_path(name)?;

        let fd = shm_open(path.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
            SeqLockError::ShmOpen {
                name: name.to_string(),
                source: e.into(),
            }
        })?;

        let stat = rustix::fs::fstat(&fd).map_err(|e| SeqLockError::ShmOpen {
            name: name.to_string(),
            source: e.into(),
        })?;
        let size = stat.st_size as usize;
        if size == 0 {
            return Err(SeqLockError::LayoutMismatch {
                expected: std::mem::size_of::<SharedHeader>(),
                got: 0,
            });
        }

        let addr = Self::map(&fd, size)?;

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: false,
        })
    }

    fn map(fd: &OwnedFd, size: usize) -> Result<NonNull<u8>> {
        // SAFETY: new shared mapping, not aliased with any Rust object
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                fd,
                0,
            )
            .map_err(|e| SeqLockError::Mmap(e.into()))?
        };

        NonNull::new(addr.cast::<u8>()).ok_or_else(|| {
            SeqLockError::Mmap(io::Error::new(io::ErrorKind::Other, "mmap returned null"))
        })
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // SAFETY: mapping created in `map` with this size
        unsafe {
            let _ = munmap(self.addr.as_ptr().cast(), self.size);
        }

        if self.is_owner {
            if let Ok(path) = shm_path(&self.name) {
                let _ = shm_unlink(path.as_c_str());
                tracing::debug!(name = %self.name, "unlinked shared seqlock");
            }
        }
    }
}

/// A [`SeqLock<T>`] living in a named POSIX shared memory object.
///
/// Derefs to `SeqLock<T>`; every reader/writer operation works across
/// processes.
///
/// # example
///
/// ```no_run
/// use venom_seqlock::SharedSeqLock;
///
/// let owner = SharedSeqLock::create("quotes", [0u64; 2])?;
/// owner.write([101, 99]);
///
/// // in another process
/// let peer = SharedSeqLock::<[u64; 2]>::open("quotes")?;
/// assert_eq!(peer.read(), [101, 99]);
/// # Ok::<(), venom_seqlock::SeqLockError>(())
/// ```
pub struct SharedSeqLock<T> {
    region: SharedRegion,
    _marker: PhantomData<SeqLock<T>>,
}

// SAFETY: the mapped SeqLock<T> is Send/Sync under the same bounds
unsafe impl<T: Send> Send for SharedSeqLock<T> {}
unsafe impl<T: Send> Sync for SharedSeqLock<T> {}

impl<T: NoUninit> SharedSeqLock<T> {
    const SIZE: usize = std::mem::size_of::<SharedLayout<T>>();

    /// Create the shared object and store `initial` at version 0.
    ///
    /// If an object with the same name already exists it is attached to as
    /// by [`open`](Self::open): the header is validated, the counter and
    /// payload are kept, `initial` is ignored and the handle is not the
    /// owner. Any other OS failure is returned.
    pub fn create(name: &str, initial: T) -> Result<Self> {
        let region = match SharedRegion::create(name, Self::SIZE)? {
            Some(region) => region,
            None => {
                tracing::debug!(name, "shared seqlock exists, attaching");
                return Self::open(name);
            }
        };
        let layout = region.addr.as_ptr().cast::<SharedLayout<T>>();

        // SAFETY: region is at least SIZE bytes and page aligned
        unsafe {
            std::ptr::write(
                layout,
                SharedLayout {
                    header: SharedHeader {
                        magic: SEQLOCK_MAGIC,
                        layout_version: LAYOUT_VERSION,
                        payload_size: std::mem::size_of::<T>(),
                    },
                    lock: SeqLock::new(initial),
                },
            );
        }

        tracing::debug!(name, size = Self::SIZE, "created shared seqlock");

        Ok(Self {
            region,
            _marker: PhantomData,
        })
    }

    /// Open a shared object created by [`create`](Self::create) with the
    /// same `T`.
    pub fn open(name: &str) -> Result<Self> {
        let region = SharedRegion::open(name)?;

        if region.size < Self::SIZE {
            tracing::warn!(name, size = region.size, "shared seqlock too small");
            return Err(SeqLockError::LayoutMismatch {
                expected: Self::SIZE,
                got: region.size,
            });
        }

        // SAFETY: at least SIZE bytes mapped
        let header = unsafe { &*region.addr.as_ptr().cast::<SharedHeader>() };

        if header.magic != SEQLOCK_MAGIC || header.layout_version != LAYOUT_VERSION {
            tracing::warn!(name, magic = header.magic, "not a shared seqlock");
            return Err(SeqLockError::InvalidMagic {
                expected: SEQLOCK_MAGIC,
                got: header.magic,
            });
        }

        if header.payload_size != std::mem::size_of::<T>() {
            tracing::warn!(name, payload_size = header.payload_size, "payload size mismatch");
            return Err(SeqLockError::LayoutMismatch {
                expected: std::mem::size_of::<T>(),
                got: header.payload_size,
            });
        }

        tracing::debug!(name, "opened shared seqlock");

        Ok(Self {
            region,
            _marker: PhantomData,
        })
    }

    /// Name of the shared object (without prefix)
    #[inline]
    pub fn name(&self) -> &str {
        &self.region.name
    }

    /// Check if this handle unlinks the object on drop
    #[inline]
    pub fn is_owner(&self) -> bool {
        self.region.is_owner
    }
}

impl<T> Deref for SharedSeqLock<T> {
    type Target = SeqLock<T>;

    #[inline]
    fn deref(&self) -> &SeqLock<T> {
        // SAFETY: layout written by `create`, validated by `open`
        unsafe { &(*self.region.addr.as_ptr().cast::<SharedLayout<T>>()).lock }
    }
}
