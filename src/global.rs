// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Thin process-global accessor.
//!
//! Most code should construct a [`SystemProperties`] and pass it around;
//! this module exists for the outermost layer of a process that wants the
//! classic process-wide store with sentinel-style returns.

use crate::properties::SystemProperties;
use std::path::Path;
use std::sync::OnceLock;

static PROPERTIES: OnceLock<SystemProperties> = OnceLock::new();

/// Initializes the process-global store for reading.
///
/// Idempotent: when the store is already up this only revalidates area
/// access and reports success.
pub fn init(filename: impl AsRef<Path>) -> bool {
    if let Some(sp) = PROPERTIES.get() {
        sp.reset_access();
        return true;
    }
    match SystemProperties::new(filename) {
        Ok(sp) => {
            if PROPERTIES.set(sp).is_err() {
                // Lost the init race; the winner's store is up.
                if let Some(sp) = PROPERTIES.get() {
                    sp.reset_access();
                }
            }
            true
        }
        Err(e) => {
            log::error!("failed to initialize property store: {e:#}");
            false
        }
    }
}

/// Initializes the process-global store for the single mutating process.
/// `fsetxattr_failed` reports area-labeling failures.
pub fn area_init(filename: impl AsRef<Path>, fsetxattr_failed: Option<&mut bool>) -> bool {
    if PROPERTIES.get().is_some() {
        log::error!("property store is already initialized");
        return false;
    }
    let mut failed = false;
    match SystemProperties::new_area(filename, &mut failed) {
        Ok(sp) => {
            if let Some(flag) = fsetxattr_failed {
                *flag = failed;
            }
            PROPERTIES.set(sp).is_ok()
        }
        Err(e) => {
            log::error!("failed to initialize writable property store: {e:#}");
            false
        }
    }
}

/// The process-global store, if one of the init functions succeeded.
pub fn properties() -> Option<&'static SystemProperties> {
    PROPERTIES.get()
}

/// The global serial, or `u32::MAX` when the store is uninitialized or has
/// no serial area.
pub fn area_serial() -> u32 {
    properties()
        .and_then(SystemProperties::area_serial)
        .unwrap_or(u32::MAX)
}
