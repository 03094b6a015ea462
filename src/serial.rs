// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Serial-word encoding and store-wide size limits.
//!
//! The serial word is cross-process ABI and must stay bit-exact:
//!
//! ```text
//! 31          24 23                    1  0
//! +------------+------------------------+--+
//! | value len  |     update counter     |D |
//! +------------+------------------------+--+
//! ```
//!
//! Bit 0 is the dirty bit. While it is set, the record's value bytes are
//! being overwritten and the pre-update value is readable from the owning
//! area's dirty backup slot. Bits 1..=23 carry an update counter that
//! advances by one on every published update, so a full update always
//! changes the word at least twice. Bits 24..=31 carry the current value
//! length.

/// Maximum name length honored by the bounded name-copy API, including the
/// trailing NUL. Longer names exist and are delivered in full by the
/// callback API.
pub const PROP_NAME_MAX: usize = 32;

/// Size of a record's inline value buffer, including the trailing NUL.
/// Values are at most `PROP_VALUE_MAX - 1` bytes.
pub const PROP_VALUE_MAX: usize = 92;

/// Maximum accepted length of the path handed to init.
pub const PROP_FILENAME_MAX: usize = 1024;

/// Mask of the update-counter and dirty-bit portion of the serial word.
pub(crate) const SERIAL_COUNTER_MASK: u32 = 0x00ff_ffff;

/// Returns true while a writer is mid-update on the record.
#[inline]
pub(crate) fn serial_dirty(serial: u32) -> bool {
    serial & 1 != 0
}

/// Current value length carried in the top byte of the serial word.
#[inline]
pub(crate) fn serial_value_len(serial: u32) -> usize {
    (serial >> 24) as usize
}
