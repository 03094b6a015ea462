// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::serial::PROP_VALUE_MAX;
use thiserror::Error;

/// Failures of the mutating and routing store operations.
///
/// Initialization paths report `anyhow::Error` instead; this enum covers the
/// steady-state operations whose callers dispatch on the failure kind.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PropertyError {
    /// No property area owns the name, or access to it was denied.
    #[error("no property area owns \"{0}\"")]
    NoOwningArea(String),

    /// The distinguished serial area is unavailable.
    #[error("serial property area is unavailable")]
    NoSerialArea,

    /// Value does not fit the inline record buffer.
    #[error("value length {0} exceeds {max} bytes", max = PROP_VALUE_MAX - 1)]
    ValueTooLong(usize),

    /// Property names must be at least one byte.
    #[error("property name is empty")]
    EmptyName,

    /// Names and values are NUL-terminated in the record arena and cannot
    /// contain interior NUL bytes.
    #[error("name or value contains an interior NUL byte")]
    EmbeddedNul,

    /// Read-only records holding an out-of-line value are immutable.
    #[error("record holds an immutable out-of-line value")]
    ImmutableValue,

    /// Updates require a writable mapping of the owning area.
    #[error("property area is mapped read-only")]
    AreaNotWritable,

    /// The name is already present in the owning area.
    #[error("property \"{0}\" already exists")]
    AlreadyExists(String),

    /// The owning area has no room left for the record.
    #[error("property area is full, cannot add \"{0}\"")]
    AreaFull(String),
}
