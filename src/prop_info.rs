// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Property record handle and record layout.
//!
//! Records live in a [`PropArea`]'s arena and are referenced by area-relative
//! byte offsets, never by raw pointers, so every process can address the same
//! record through its own mapping:
//!
//! ```text
//! +--------------+--------------+---------------------+----------------+
//! | serial (u32) | long_offset  | value [VALUE_MAX]   | name bytes NUL |
//! +--------------+--------------+---------------------+----------------+
//! 0              4              8                     100
//! ```
//!
//! `long_offset` is relative to the record base and is non-zero only on
//! read-only records whose value outgrew the inline buffer; those records are
//! immutable, carry [`LONG_FLAG`] in their serial word, and keep a fixed
//! notice string in the inline buffer for bounded readers.

use crate::prop_area::PropArea;
use crate::serial::PROP_VALUE_MAX;
use std::ffi::CStr;
use std::sync::atomic::{AtomicU32, Ordering};

pub(crate) const REC_SERIAL: usize = 0;
pub(crate) const REC_LONG_OFFSET: usize = 4;
pub(crate) const REC_VALUE: usize = 8;
pub(crate) const REC_NAME: usize = REC_VALUE + PROP_VALUE_MAX;

/// Serial-word flag marking a record whose value lives out of line.
pub(crate) const LONG_FLAG: u32 = 1 << 16;

/// Inline value stored on long records for readers of the bounded API.
pub(crate) const LONG_LEGACY_NOTICE: &str = "Use read_callback() to read this long property";

const _: () = assert!(REC_NAME % 4 == 0);
const _: () = assert!(LONG_LEGACY_NOTICE.len() < PROP_VALUE_MAX);

/// Handle to one property record.
///
/// Carries the owning area, so accessors derive their pointers from the
/// area's mapping and the handle stays valid for as long as the store it
/// came from is borrowed. Copying the handle is free.
#[derive(Clone, Copy)]
pub struct PropInfo<'a> {
    area: &'a PropArea,
    rec: u32,
}

impl<'a> PropInfo<'a> {
    pub(crate) fn new(area: &'a PropArea, rec: u32) -> Self {
        Self { area, rec }
    }

    #[inline]
    fn field_ptr(&self, off: usize) -> *const u8 {
        // SAFETY: `rec` was produced by the owning area's allocator and the
        // record spans `off` by construction.
        unsafe { self.area.base_ptr().add(self.rec as usize + off) }
    }

    /// The record's name. Immutable after creation.
    pub fn name(&self) -> &'a str {
        // SAFETY: the arena stores the name as NUL-terminated bytes copied
        // from a `&str`, directly after the fixed record header.
        unsafe {
            let cstr = CStr::from_ptr(self.field_ptr(REC_NAME) as *const libc::c_char);
            std::str::from_utf8_unchecked(cstr.to_bytes())
        }
    }

    /// The record's serial word: seqlock generation counter and futex
    /// address in one.
    pub fn serial(&self) -> &'a AtomicU32 {
        // SAFETY: the serial field is 4-aligned (records are 4-aligned) and
        // only ever accessed atomically.
        unsafe { &*(self.field_ptr(REC_SERIAL) as *const AtomicU32) }
    }

    /// True when the value lives out of line. Long records are created only
    /// for read-only names and never change after creation.
    pub fn is_long(&self) -> bool {
        self.serial().load(Ordering::Relaxed) & LONG_FLAG != 0
    }

    /// The out-of-line value, for long records.
    pub fn long_value(&self) -> Option<&'a str> {
        if !self.is_long() {
            return None;
        }
        // SAFETY: long_offset is written once before the record is published
        // and points at NUL-terminated bytes copied from a `&str`.
        unsafe {
            let off = (self.field_ptr(REC_LONG_OFFSET) as *const u32).read();
            let cstr = CStr::from_ptr(self.field_ptr(off as usize) as *const libc::c_char);
            Some(std::str::from_utf8_unchecked(cstr.to_bytes()))
        }
    }

    /// Raw pointer to the inline value buffer. Reads race with the single
    /// writer; the seqlock protocol in the facade makes the copy coherent.
    pub(crate) fn value_ptr(&self) -> *const u8 {
        self.field_ptr(REC_VALUE)
    }

    pub(crate) fn area(&self) -> &'a PropArea {
        self.area
    }
}

impl PartialEq for PropInfo<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.area, other.area) && self.rec == other.rec
    }
}

impl Eq for PropInfo<'_> {}

impl std::fmt::Debug for PropInfo<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropInfo")
            .field("name", &self.name())
            .field("serial", &self.serial().load(Ordering::Relaxed))
            .finish()
    }
}
