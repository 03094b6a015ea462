// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The per-process property store facade.
//!
//! Owns the routing contexts and implements the cross-process protocols:
//! the seqlock read of mutable values, the dirty-backup publish sequence on
//! the writer side, and futex-based waiting on either a record's serial or
//! the global serial.

use crate::contexts::serialized::PROPERTY_INFO_FILE;
use crate::contexts::{Contexts, ContextsPreSplit, ContextsSerialized, ContextsSplit};
use crate::error::PropertyError;
use crate::futex::{self, WaitStatus};
use crate::policy::{ReadPolicy, RestrictedUidPolicy};
use crate::prop_info::PropInfo;
use crate::serial::{
    serial_dirty, serial_value_len, PROP_FILENAME_MAX, PROP_NAME_MAX, PROP_VALUE_MAX,
    SERIAL_COUNTER_MASK,
};
use nix::unistd::{access, AccessFlags};
use std::path::Path;
use std::ptr;
use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::time::Duration;

/// Fixed-size value buffer. Every copy into it is bounded by
/// [`PROP_VALUE_MAX`] and NUL-terminated.
#[derive(Clone)]
pub struct PropertyValue {
    len: usize,
    buf: [u8; PROP_VALUE_MAX],
}

impl PropertyValue {
    pub const fn new() -> Self {
        Self {
            len: 0,
            buf: [0; PROP_VALUE_MAX],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: values enter the store from `&str` and reads stabilize via
        // the seqlock, so the copied bytes are valid UTF-8.
        unsafe { std::str::from_utf8_unchecked(self.as_bytes()) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn clear(&mut self) {
        self.len = 0;
        self.buf[0] = 0;
    }
}

impl Default for PropertyValue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PropertyValue").field(&self.as_str()).finish()
    }
}

/// Fixed-size name buffer for the bounded read API. Names longer than
/// [`PROP_NAME_MAX`]` - 1` bytes are truncated (and the truncation logged);
/// the callback API delivers them in full.
#[derive(Clone)]
pub struct PropertyName {
    len: usize,
    buf: [u8; PROP_NAME_MAX],
}

impl PropertyName {
    pub const fn new() -> Self {
        Self {
            len: 0,
            buf: [0; PROP_NAME_MAX],
        }
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: names enter the store from `&str`; truncation below is on
        // a byte boundary of the stored bytes.
        unsafe { std::str::from_utf8_unchecked(&self.buf[..self.len]) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bounded copy; returns whether the name was truncated.
    fn set(&mut self, name: &str) -> bool {
        let bytes = name.as_bytes();
        let n = bytes.len().min(PROP_NAME_MAX - 1);
        self.buf[..n].copy_from_slice(&bytes[..n]);
        self.buf[n] = 0;
        self.len = n;
        n < bytes.len()
    }
}

impl Default for PropertyName {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PropertyName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PropertyName").field(&self.as_str()).finish()
    }
}

pub(crate) fn is_read_only(name: &str) -> bool {
    name.starts_with("ro.")
}

fn is_dir(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

/// The property store facade.
///
/// Construction is initialization: [`new`](Self::new) for readers,
/// [`new_area`](Self::new_area) for the single mutating process. All other
/// methods take `&self` and are safe to call from any number of threads.
pub struct SystemProperties {
    contexts: Contexts,
    policy: Box<dyn ReadPolicy>,
}

impl SystemProperties {
    /// Reader-side init.
    ///
    /// `filename` is either a properties directory or (legacy) a single
    /// area file. A directory with a readable `property_info` table uses the
    /// serialized layout; a directory without one uses the split layout.
    pub fn new(filename: impl AsRef<Path>) -> anyhow::Result<Self> {
        let filename = filename.as_ref();
        Self::check_filename(filename)?;

        let contexts = if is_dir(filename) {
            if access(&filename.join(PROPERTY_INFO_FILE), AccessFlags::R_OK).is_ok() {
                Contexts::Serialized(ContextsSerialized::new(filename, false, None)?)
            } else {
                Contexts::Split(ContextsSplit::new(filename)?)
            }
        } else {
            Contexts::PreSplit(ContextsPreSplit::new(filename)?)
        };
        Ok(Self::with_contexts(contexts))
    }

    /// Writer-side init. Always the serialized layout, mapped writable, with
    /// every area created eagerly. Failure to label an area file with its
    /// context is reported through `fsetxattr_failed`, not as an error.
    pub fn new_area(
        filename: impl AsRef<Path>,
        fsetxattr_failed: &mut bool,
    ) -> anyhow::Result<Self> {
        let filename = filename.as_ref();
        Self::check_filename(filename)?;
        let contexts =
            Contexts::Serialized(ContextsSerialized::new(filename, true, Some(fsetxattr_failed))?);
        Ok(Self::with_contexts(contexts))
    }

    fn with_contexts(contexts: Contexts) -> Self {
        Self {
            contexts,
            policy: Box::new(RestrictedUidPolicy::for_current_uid()),
        }
    }

    fn check_filename(filename: &Path) -> anyhow::Result<()> {
        anyhow::ensure!(
            filename.as_os_str().len() < PROP_FILENAME_MAX,
            "properties path {filename:?} exceeds {PROP_FILENAME_MAX} bytes"
        );
        Ok(())
    }

    /// Replaces the read-callback interposition policy.
    pub fn set_read_policy(&mut self, policy: Box<dyn ReadPolicy>) {
        self.policy = policy;
    }

    /// Revalidates per-area access. Called instead of re-initializing when
    /// the store is already up.
    pub fn reset_access(&self) {
        self.contexts.reset_access();
    }

    /// The current global serial, or `None` when no serial area is
    /// reachable.
    pub fn area_serial(&self) -> Option<u32> {
        let pa = self.contexts.serial_area()?;
        // Pairs with the writer's Release increment.
        Some(pa.serial().load(Ordering::Acquire))
    }

    /// Routes `name` to its owning area and looks the record up.
    pub fn find(&self, name: &str) -> Option<PropInfo<'_>> {
        match self.contexts.area_for_name(name) {
            Some(pa) => pa.find(name),
            None => {
                log::warn!("access denied finding property \"{name}\"");
                None
            }
        }
    }

    /// Seqlock read of a mutable value into `out`. Returns the serial that
    /// stabilized the read.
    fn read_mutable_value(&self, pi: PropInfo<'_>, out: &mut PropertyValue) -> u32 {
        let mut new_serial = pi.serial().load(Ordering::Acquire);
        loop {
            let serial = new_serial;
            let len = serial_value_len(serial).min(PROP_VALUE_MAX - 1);
            let src = if serial_dirty(serial) {
                // Mid-update: the pre-update value is in the backup slot.
                pi.area().dirty_backup() as *const u8
            } else {
                pi.value_ptr()
            };
            // SAFETY: both sources are at least `len + 1` bytes. The copy may
            // race with the writer; the serial re-check below rejects torn
            // reads.
            unsafe { ptr::copy_nonoverlapping(src, out.buf.as_mut_ptr(), len + 1) };
            fence(Ordering::Acquire);
            new_serial = pi.serial().load(Ordering::Relaxed);
            if serial == new_serial {
                out.len = len;
                out.buf[len] = 0;
                return serial;
            }
            // The next copy must not be reordered before the load above; the
            // fence buys that without paying for an Acquire load in the
            // common, race-free pass.
            fence(Ordering::Acquire);
        }
    }

    /// Reads the record's value (and optionally its name, bounded) into the
    /// given buffers. Returns the value length.
    pub fn read(
        &self,
        pi: PropInfo<'_>,
        name: Option<&mut PropertyName>,
        value: &mut PropertyValue,
    ) -> usize {
        self.read_mutable_value(pi, value);
        if let Some(out) = name {
            if out.set(pi.name()) {
                log::error!(
                    "property name \"{}\" is longer than {} bytes; use the callback API \
                     to read it (truncated to \"{}\")",
                    pi.name(),
                    PROP_NAME_MAX - 1,
                    out.as_str()
                );
            }
        }
        if is_read_only(pi.name()) && pi.is_long() {
            log::error!(
                "property \"{}\" has a value too long for the bounded read API; \
                 use the callback API instead",
                pi.name()
            );
        }
        value.len()
    }

    /// Delivers the record to `callback` as `(name, value, serial)`.
    ///
    /// Read-only records are delivered zero-copy (their value never
    /// changes); mutable records go through a stack buffer. The configured
    /// [`ReadPolicy`] may substitute the delivered value; the serial always
    /// passes through unchanged.
    pub fn read_callback<F>(&self, pi: PropInfo<'_>, callback: F)
    where
        F: FnOnce(&str, &str, u32),
    {
        let name = pi.name();
        if is_read_only(name) {
            let serial = pi.serial().load(Ordering::Relaxed);
            if let Some(long) = pi.long_value() {
                return self.deliver(name, long, serial, callback);
            }
            let len = serial_value_len(serial).min(PROP_VALUE_MAX - 1);
            // SAFETY: read-only records are immutable after creation and
            // their value bytes were copied from a `&str`.
            let value = unsafe {
                std::str::from_utf8_unchecked(std::slice::from_raw_parts(pi.value_ptr(), len))
            };
            return self.deliver(name, value, serial, callback);
        }

        let mut buf = PropertyValue::new();
        let serial = self.read_mutable_value(pi, &mut buf);
        self.deliver(name, buf.as_str(), serial, callback);
    }

    fn deliver<F>(&self, name: &str, value: &str, serial: u32, callback: F)
    where
        F: FnOnce(&str, &str, u32),
    {
        match self.policy.substitute(name) {
            Some(substituted) => callback(name, substituted, serial),
            None => callback(name, value, serial),
        }
    }

    /// Find + read. A miss yields an empty value and length 0.
    pub fn get(&self, name: &str, value: &mut PropertyValue) -> usize {
        match self.find(name) {
            Some(pi) => self.read(pi, None, value),
            None => {
                value.clear();
                0
            }
        }
    }

    /// Publishes a new value for an existing record.
    ///
    /// Single-mutator protocol: snapshot the old value into the area's
    /// backup slot, mark the record dirty, overwrite in place, publish the
    /// new serial, then wake record and global waiters.
    pub fn update(&self, pi: PropInfo<'_>, value: &str) -> Result<(), PropertyError> {
        if value.len() >= PROP_VALUE_MAX {
            return Err(PropertyError::ValueTooLong(value.len()));
        }
        if value.as_bytes().contains(&0) {
            return Err(PropertyError::EmbeddedNul);
        }
        if pi.is_long() {
            return Err(PropertyError::ImmutableValue);
        }
        let pa = pi.area();
        if !pa.is_writable() {
            return Err(PropertyError::AreaNotWritable);
        }
        let serial_pa = self.contexts.serial_area().ok_or(PropertyError::NoSerialArea)?;

        let word = pi.serial();
        let mut serial = word.load(Ordering::Relaxed);
        let old_len = serial_value_len(serial).min(PROP_VALUE_MAX - 1);

        // Whenever a reader observes the dirty bit, an undamaged copy of the
        // pre-update value must already be in the backup slot.
        unsafe { ptr::copy_nonoverlapping(pi.value_ptr(), pa.dirty_backup(), old_len + 1) };
        fence(Ordering::Release);
        serial |= 1;
        word.store(serial, Ordering::Relaxed);

        // SAFETY: bounded by the length check above; this is the single
        // mutator, racing only with readers that copy through the seqlock.
        unsafe {
            let dst = pi.value_ptr() as *mut u8;
            ptr::copy_nonoverlapping(value.as_ptr(), dst, value.len());
            *dst.add(value.len()) = 0;
        }

        // The value is in place again; clear the dirty bit, advance the
        // counter, and publish the new length.
        fence(Ordering::Release);
        word.store(
            ((value.len() as u32) << 24) | ((serial + 1) & SERIAL_COUNTER_MASK),
            Ordering::Relaxed,
        );
        futex::wake_all(word);

        serial_pa.bump_serial();
        futex::wake_all(serial_pa.serial());
        Ok(())
    }

    /// Creates a new record. Values of `PROP_VALUE_MAX` bytes or more are
    /// accepted only for read-only names (they become immutable out-of-line
    /// records). Bumps and wakes the global serial on success.
    pub fn add(&self, name: &str, value: &str) -> Result<(), PropertyError> {
        if value.len() >= PROP_VALUE_MAX && !is_read_only(name) {
            return Err(PropertyError::ValueTooLong(value.len()));
        }
        if name.is_empty() {
            return Err(PropertyError::EmptyName);
        }
        let serial_pa = self.contexts.serial_area().ok_or(PropertyError::NoSerialArea)?;
        let pa = self.contexts.area_for_name(name).ok_or_else(|| {
            log::error!("access denied adding property \"{name}\"");
            PropertyError::NoOwningArea(name.to_owned())
        })?;

        pa.add(name, value)?;

        serial_pa.bump_serial();
        futex::wake_all(serial_pa.serial());
        Ok(())
    }

    /// Blocks until the chosen serial word moves past `old_serial` or the
    /// relative `timeout` elapses. `pi = None` waits on the global serial.
    /// Returns the new serial, or `None` on timeout (or when no serial area
    /// is reachable).
    pub fn wait(
        &self,
        pi: Option<PropInfo<'_>>,
        old_serial: u32,
        timeout: Option<Duration>,
    ) -> Option<u32> {
        let word: &AtomicU32 = match pi {
            Some(pi) => pi.serial(),
            None => self.contexts.serial_area()?.serial(),
        };
        loop {
            if futex::wait(word, old_serial, timeout) == WaitStatus::TimedOut {
                return None;
            }
            let new_serial = word.load(Ordering::Acquire);
            if new_serial != old_serial {
                return Some(new_serial);
            }
        }
    }

    /// Blocks until any property changes (the global serial moves past
    /// `old_serial`).
    pub fn wait_any(&self, old_serial: u32) -> Option<u32> {
        self.wait(None, old_serial, None)
    }

    /// Visits every record in every accessible area. The order is
    /// implementation-defined but stable for a given process lifetime.
    pub fn for_each<'s, F>(&'s self, mut f: F)
    where
        F: FnMut(PropInfo<'s>),
    {
        self.contexts.for_each(&mut f);
    }

    /// The n-th record visited by [`for_each`](Self::for_each). O(n).
    pub fn find_nth(&self, n: usize) -> Option<PropInfo<'_>> {
        let mut current = 0usize;
        let mut result = None;
        self.for_each(|pi| {
            if current == n && result.is_none() {
                result = Some(pi);
            }
            current += 1;
        });
        result
    }
}
