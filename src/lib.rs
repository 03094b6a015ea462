// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-shared system property store.
//!
//! Properties are short `(name, value)` pairs kept in memory-mapped files
//! ("property areas") so that every process on the host observes updates
//! without any IPC round-trip. One privileged process mutates; everyone else
//! reads lock-free.
//!
//! # Architecture
//!
//! ```text
//! +-----------------------------------------------------------------+
//! |                      Property area file                         |
//! +-----------------------------------------------------------------+
//! |  Header (128 bytes)                                             |
//! |  +- magic, version                                              |
//! |  +- serial: AtomicU32        (global serial on the serial area) |
//! |  +- record count, arena used, writer lock                       |
//! |  +- dirty backup slot        (pre-update value snapshot)        |
//! +-----------------------------------------------------------------+
//! |  Name index (open-addressing, offset-valued slots)              |
//! +-----------------------------------------------------------------+
//! |  Directory (record offsets in insertion order)                  |
//! +-----------------------------------------------------------------+
//! |  Record arena (serial word | value | name, append-only)         |
//! +-----------------------------------------------------------------+
//! ```
//!
//! # Synchronization
//!
//! Each record's 32-bit serial word doubles as a seqlock generation counter
//! and a futex address:
//!
//! - **Writer**: snapshot the old value into the area's dirty backup slot,
//!   release fence, set the dirty bit, overwrite the value in place, release
//!   fence, store the new serial (length, bumped counter, dirty bit clear),
//!   futex-wake the record's waiters, then bump and wake the global serial.
//! - **Reader**: acquire-load the serial; copy from the value (or from the
//!   backup slot while the dirty bit is set); acquire fence; re-load the
//!   serial and retry until it is unchanged.
//!
//! The store assumes a single machine-wide mutator. Readers never write.
//!
//! A contexts routing table decides which area owns a given name; three
//! on-disk layouts are supported (a single pre-split area,
//! a directory keyed by a `property_contexts` text file, and a directory
//! keyed by a serialized `property_info` table).
//!
//! [`SystemProperties`] is the per-process facade. Libraries should take it
//! as a constructor argument; binaries that want the classic process-wide
//! store can use the [`global`] accessors.

mod contexts;
mod error;
mod futex;
pub mod global;
mod policy;
mod prop_area;
mod prop_info;
mod properties;
mod serial;

pub use contexts::serialized::{RoutingEntry, RoutingTable, PROPERTY_INFO_FILE};
pub use error::PropertyError;
pub use policy::{PassthroughPolicy, ReadPolicy, RestrictedUidPolicy};
pub use prop_area::{PropArea, PROP_AREA_SIZE};
pub use prop_info::PropInfo;
pub use properties::{PropertyName, PropertyValue, SystemProperties};
pub use serial::{PROP_FILENAME_MAX, PROP_NAME_MAX, PROP_VALUE_MAX};
