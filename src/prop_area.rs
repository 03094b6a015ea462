// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Memory-mapped property area.
//!
//! An area is one `MAP_SHARED` file of [`PROP_AREA_SIZE`] bytes, statically
//! partitioned into four sub-regions:
//!
//! ```text
//! +--------+------------+-----------+------------------------------+
//! | Header | Name index | Directory |        Record arena          |
//! +--------+------------+-----------+------------------------------+
//! ```
//!
//! - **Header**: magic, version, the area serial, record count, arena usage,
//!   the writer spinlock, and the dirty backup slot.
//! - **Name index**: open-addressing hash table with linear probing. Slots
//!   hold area-relative record offsets (0 = empty), so the table is valid in
//!   every process regardless of where the file is mapped. The hash is a
//!   deterministic FNV-1a; Rust's default hasher is randomized per process.
//! - **Directory**: record offsets in insertion order, backing enumeration.
//! - **Record arena**: append-only records (see [`crate::prop_info`]).
//!
//! # Thread / process safety
//!
//! - `find` and `foreach` are lock-free: slots and the record count are
//!   published with `Release` stores after the record bytes are in place and
//!   read with `Acquire` loads.
//! - `add` is serialized by an atomic spinlock in the header.
//! - Value updates never touch this module's lock; the per-record seqlock in
//!   the facade is the whole protocol.

use crate::error::PropertyError;
use crate::prop_info::{PropInfo, LONG_FLAG, LONG_LEGACY_NOTICE, REC_LONG_OFFSET, REC_NAME, REC_SERIAL, REC_VALUE};
use crate::serial::PROP_VALUE_MAX;
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use std::ffi::CStr;
use std::fs::{File, OpenOptions};
use std::io;
use std::num::NonZeroUsize;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};

/// Size of every property area file.
pub const PROP_AREA_SIZE: usize = 128 * 1024;

const AREA_MAGIC: u32 = u32::from_le_bytes(*b"PROP");
const AREA_VERSION: u32 = 1;

/// Offsets within the header. Accessed as `AtomicU32` via pointer
/// arithmetic.
mod header {
    pub const MAGIC: usize = 0;
    pub const VERSION: usize = 4;
    /// The area-wide serial; the global serial when this is the serial area.
    pub const SERIAL: usize = 8;
    pub const RECORD_COUNT: usize = 12;
    pub const ARENA_USED: usize = 16;
    /// Spinlock serializing structural mutation: 0 = unlocked, 1 = locked.
    pub const WRITER_LOCK: usize = 20;
    /// Pre-update value snapshot, `PROP_VALUE_MAX` bytes.
    pub const DIRTY_BACKUP: usize = 24;
}

const HEADER_SIZE: usize = 128;

const INDEX_SLOTS: usize = 2048;
const INDEX_OFFSET: usize = HEADER_SIZE;
const INDEX_SIZE: usize = INDEX_SLOTS * 4;

/// Capacity cap keeping index occupancy at 7/8, so a probe always hits an
/// empty slot.
pub(crate) const MAX_RECORDS: usize = INDEX_SLOTS * 7 / 8;

const DIR_OFFSET: usize = INDEX_OFFSET + INDEX_SIZE;
const DIR_SIZE: usize = MAX_RECORDS * 4;

const ARENA_OFFSET: usize = DIR_OFFSET + DIR_SIZE;
const ARENA_SIZE: usize = PROP_AREA_SIZE - ARENA_OFFSET;

// Compile-time checks.
const _: () = assert!(header::DIRTY_BACKUP + PROP_VALUE_MAX <= HEADER_SIZE);
const _: () = assert!(INDEX_SLOTS.is_power_of_two());
const _: () = assert!(ARENA_OFFSET % 4 == 0);
const _: () = assert!(ARENA_OFFSET < PROP_AREA_SIZE);

/// Extended attribute labeling an area file with its security context.
const XATTR_CONTEXT: &CStr = c"user.sysprops.context";

const fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Deterministic FNV-1a. The index is shared across processes, so the hash
/// must not depend on per-process state.
#[inline]
fn hash_name(name: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for &b in name {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

/// Handle to one mapped property area.
///
/// Readers hold `PROT_READ` mappings; only the single machine-wide mutator
/// maps writable. The mapping is unmapped when the handle drops.
pub struct PropArea {
    base: NonNull<u8>,
    size: usize,
    writable: bool,
}

// SAFETY: the mapping is shared memory. All mutable state is reached through
// atomics, the header spinlock, or the single-writer seqlock protocol; the
// handle itself is immutable.
unsafe impl Send for PropArea {}
unsafe impl Sync for PropArea {}

impl Drop for PropArea {
    fn drop(&mut self) {
        unsafe {
            _ = munmap(self.base.as_ptr() as *mut libc::c_void, self.size);
        }
    }
}

fn map_file(file: &File, size: usize, writable: bool) -> io::Result<NonNull<u8>> {
    let length = NonZeroUsize::new(size)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "zero-sized property area"))?;
    let prot = if writable {
        ProtFlags::PROT_READ | ProtFlags::PROT_WRITE
    } else {
        ProtFlags::PROT_READ
    };
    let ptr = unsafe { mmap(None, length, prot, MapFlags::MAP_SHARED, Some(file), 0) }
        .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
    NonNull::new(ptr as *mut u8)
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned a null mapping"))
}

fn set_context_xattr(file: &File, context: &str) -> bool {
    let rc = unsafe {
        libc::fsetxattr(
            file.as_raw_fd(),
            XATTR_CONTEXT.as_ptr(),
            context.as_ptr() as *const libc::c_void,
            context.len(),
            0,
        )
    };
    rc == 0
}

impl PropArea {
    /// Creates and maps a fresh area file, writable.
    ///
    /// The file must not exist yet (areas live on a RAM-backed filesystem
    /// and are provisioned once per boot). When `context` is given the file
    /// is labeled with it via an xattr; label failure is reported through
    /// the second return value, not as an error.
    pub fn create(path: impl AsRef<std::path::Path>, context: Option<&str>) -> io::Result<(PropArea, bool)> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o644)
            .custom_flags(libc::O_NOFOLLOW | libc::O_CLOEXEC)
            .open(path)?;
        file.set_len(PROP_AREA_SIZE as u64)?;

        let xattr_failed = match context {
            Some(ctx) => !set_context_xattr(&file, ctx),
            None => false,
        };

        let base = map_file(&file, PROP_AREA_SIZE, true)?;
        let pa = PropArea {
            base,
            size: PROP_AREA_SIZE,
            writable: true,
        };
        // Version first; the magic is the publication point for concurrent
        // openers, which fail (and retry later) until it lands.
        pa.header_u32(header::VERSION).store(AREA_VERSION, Ordering::Relaxed);
        pa.header_u32(header::MAGIC).store(AREA_MAGIC, Ordering::Release);
        Ok((pa, xattr_failed))
    }

    /// Maps an existing area file and validates its header.
    pub fn open(path: impl AsRef<std::path::Path>, writable: bool) -> io::Result<PropArea> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .custom_flags(libc::O_NOFOLLOW | libc::O_CLOEXEC)
            .open(path)?;
        let size = file.metadata()?.len() as usize;
        if size < PROP_AREA_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "property area file is truncated",
            ));
        }

        let base = map_file(&file, size, writable)?;
        let pa = PropArea { base, size, writable };
        if pa.header_u32(header::MAGIC).load(Ordering::Acquire) != AREA_MAGIC
            || pa.header_u32(header::VERSION).load(Ordering::Relaxed) != AREA_VERSION
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unrecognized property area magic or version",
            ));
        }
        Ok(pa)
    }

    #[inline]
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    #[inline]
    pub(crate) fn is_writable(&self) -> bool {
        self.writable
    }

    #[inline]
    fn header_u32(&self, off: usize) -> &AtomicU32 {
        // SAFETY: all header word offsets are 4-aligned and in bounds.
        unsafe { &*(self.base.as_ptr().add(off) as *const AtomicU32) }
    }

    /// The area-wide serial word. On the serial area this is the global
    /// serial every writer bumps and `WaitAny` blocks on.
    pub fn serial(&self) -> &AtomicU32 {
        self.header_u32(header::SERIAL)
    }

    /// Single-writer increment, published with `Release` so an observer of
    /// the new serial also observes the update that preceded it.
    pub(crate) fn bump_serial(&self) {
        let serial = self.serial();
        serial.store(serial.load(Ordering::Relaxed).wrapping_add(1), Ordering::Release);
    }

    /// The dirty backup slot. Written only by the single mutator; read by
    /// any reader that observes a dirty serial.
    pub(crate) fn dirty_backup(&self) -> *mut u8 {
        // SAFETY: in bounds by the header layout.
        unsafe { self.base.as_ptr().add(header::DIRTY_BACKUP) }
    }

    #[inline]
    fn record_count(&self) -> &AtomicU32 {
        self.header_u32(header::RECORD_COUNT)
    }

    #[inline]
    fn arena_used(&self) -> &AtomicU32 {
        self.header_u32(header::ARENA_USED)
    }

    #[inline]
    fn index_slot(&self, i: usize) -> &AtomicU32 {
        self.header_u32(INDEX_OFFSET + i * 4)
    }

    #[inline]
    fn dir_slot(&self, i: usize) -> &AtomicU32 {
        self.header_u32(DIR_OFFSET + i * 4)
    }

    /// Number of records in the area.
    pub fn len(&self) -> usize {
        self.record_count().load(Ordering::Acquire) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn spin_lock(&self) {
        let lock = self.header_u32(header::WRITER_LOCK);
        loop {
            match lock.compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed) {
                Ok(_) => return,
                Err(_) => std::hint::spin_loop(),
            }
        }
    }

    #[inline]
    fn spin_unlock(&self) {
        self.header_u32(header::WRITER_LOCK).store(0, Ordering::Release);
    }

    /// Lock-free exact-name lookup.
    pub fn find(&self, name: &str) -> Option<PropInfo<'_>> {
        let bytes = name.as_bytes();
        let mut idx = (hash_name(bytes) as usize) & (INDEX_SLOTS - 1);
        loop {
            let rec = self.index_slot(idx).load(Ordering::Acquire);
            if rec == 0 {
                return None;
            }
            let pi = PropInfo::new(self, rec);
            if pi.name().as_bytes() == bytes {
                return Some(pi);
            }
            idx = (idx + 1) & (INDEX_SLOTS - 1);
        }
    }

    /// Inserts a new record. Serialized by the area spinlock; rejects
    /// duplicates and structural overflow. Values of `PROP_VALUE_MAX` bytes
    /// or more become out-of-line records (the facade restricts those to
    /// read-only names).
    pub fn add(&self, name: &str, value: &str) -> Result<(), PropertyError> {
        if !self.writable {
            return Err(PropertyError::AreaNotWritable);
        }
        if name.is_empty() {
            return Err(PropertyError::EmptyName);
        }
        if name.as_bytes().contains(&0) || value.as_bytes().contains(&0) {
            return Err(PropertyError::EmbeddedNul);
        }

        self.spin_lock();
        // SAFETY: the spinlock grants exclusive structural access.
        let result = unsafe { self.add_locked(name, value) };
        self.spin_unlock();
        result
    }

    /// # Safety
    /// Must only be called while the spinlock is held.
    unsafe fn add_locked(&self, name: &str, value: &str) -> Result<(), PropertyError> {
        if self.find(name).is_some() {
            return Err(PropertyError::AlreadyExists(name.to_owned()));
        }

        let count = self.record_count().load(Ordering::Relaxed) as usize;
        if count >= MAX_RECORDS {
            return Err(PropertyError::AreaFull(name.to_owned()));
        }

        let is_long = value.len() >= PROP_VALUE_MAX;
        let inline = if is_long { LONG_LEGACY_NOTICE } else { value };
        let rec_size = align4(REC_NAME + name.len() + 1);
        let long_size = if is_long { align4(value.len() + 1) } else { 0 };

        let used = self.arena_used().load(Ordering::Relaxed) as usize;
        if used + rec_size + long_size > ARENA_SIZE {
            return Err(PropertyError::AreaFull(name.to_owned()));
        }

        let rec = (ARENA_OFFSET + used) as u32;
        let rec_ptr = self.base_ptr().add(rec as usize);

        // The record is fully written before it becomes reachable.
        ptr::copy_nonoverlapping(inline.as_ptr(), rec_ptr.add(REC_VALUE), inline.len());
        *rec_ptr.add(REC_VALUE + inline.len()) = 0;
        ptr::copy_nonoverlapping(name.as_ptr(), rec_ptr.add(REC_NAME), name.len());
        *rec_ptr.add(REC_NAME + name.len()) = 0;
        let long_off: u32 = if is_long {
            ptr::copy_nonoverlapping(value.as_ptr(), rec_ptr.add(rec_size), value.len());
            *rec_ptr.add(rec_size + value.len()) = 0;
            rec_size as u32
        } else {
            0
        };
        (rec_ptr.add(REC_LONG_OFFSET) as *mut u32).write(long_off);
        let serial0 = ((inline.len() as u32) << 24) | if is_long { LONG_FLAG } else { 0 };
        (*(rec_ptr.add(REC_SERIAL) as *const AtomicU32)).store(serial0, Ordering::Relaxed);

        self.arena_used()
            .store((used + rec_size + long_size) as u32, Ordering::Relaxed);
        self.dir_slot(count).store(rec, Ordering::Relaxed);

        // Publish: the index slot makes the record findable, the count makes
        // it enumerable.
        let mut idx = (hash_name(name.as_bytes()) as usize) & (INDEX_SLOTS - 1);
        while self.index_slot(idx).load(Ordering::Relaxed) != 0 {
            idx = (idx + 1) & (INDEX_SLOTS - 1);
        }
        self.index_slot(idx).store(rec, Ordering::Release);
        self.record_count().store((count + 1) as u32, Ordering::Release);
        Ok(())
    }

    /// Visits every record in insertion order.
    pub fn for_each<'a>(&'a self, f: &mut dyn FnMut(PropInfo<'a>)) {
        let count = self.record_count().load(Ordering::Acquire) as usize;
        for i in 0..count {
            let rec = self.dir_slot(i).load(Ordering::Relaxed);
            if rec != 0 {
                f(PropInfo::new(self, rec));
            }
        }
    }
}
