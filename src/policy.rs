// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Read-callback interposition.
//!
//! A policy may rewrite the value delivered through the callback read path
//! based on caller identity. It sees only the name; the rest of the record,
//! the serial included, always passes through untouched, and the policy can
//! never reach the store.

use nix::unistd::getuid;

/// Value-substitution hook consulted on every callback read.
pub trait ReadPolicy: Send + Sync {
    /// Replacement value to deliver for `name`, or `None` to deliver the
    /// stored value.
    fn substitute(&self, name: &str) -> Option<&str>;
}

/// Delivers every value exactly as stored.
pub struct PassthroughPolicy;

impl ReadPolicy for PassthroughPolicy {
    fn substitute(&self, _name: &str) -> Option<&str> {
        None
    }
}

/// Hides USB/debug bridge state from application UIDs.
///
/// Callers in the application UID ranges ([10000, 19999] and
/// [90000, 99999]) observe a fixed, inert answer for a small allowlist of
/// names; every other caller and every other name is untouched.
pub struct RestrictedUidPolicy {
    uid: u32,
}

impl RestrictedUidPolicy {
    pub fn new(uid: u32) -> Self {
        Self { uid }
    }

    /// Policy keyed on the UID of the calling process.
    pub fn for_current_uid() -> Self {
        Self::new(getuid().as_raw())
    }

    fn is_restricted(&self) -> bool {
        matches!(self.uid, 10000..=19999 | 90000..=99999)
    }
}

impl ReadPolicy for RestrictedUidPolicy {
    fn substitute(&self, name: &str) -> Option<&str> {
        if !self.is_restricted() {
            return None;
        }
        match name {
            "init.svc.adbd" => Some("stopped"),
            "sys.usb.configfs" => Some("0"),
            "persist.sys.usb.config" | "sys.usb.config" | "sys.usb.state" => Some("none"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_never_substitutes() {
        assert_eq!(PassthroughPolicy.substitute("init.svc.adbd"), None);
        assert_eq!(PassthroughPolicy.substitute("anything"), None);
    }

    #[test]
    fn app_uids_get_the_allowlist() {
        for uid in [10000, 15000, 19999, 90000, 99999] {
            let policy = RestrictedUidPolicy::new(uid);
            assert_eq!(policy.substitute("init.svc.adbd"), Some("stopped"));
            assert_eq!(policy.substitute("sys.usb.configfs"), Some("0"));
            assert_eq!(policy.substitute("persist.sys.usb.config"), Some("none"));
            assert_eq!(policy.substitute("sys.usb.config"), Some("none"));
            assert_eq!(policy.substitute("sys.usb.state"), Some("none"));
            assert_eq!(policy.substitute("sys.usb.other"), None);
            assert_eq!(policy.substitute("debug.foo"), None);
        }
    }

    #[test]
    fn other_uids_are_untouched() {
        for uid in [0, 1000, 9999, 20000, 89999, 100000] {
            let policy = RestrictedUidPolicy::new(uid);
            assert_eq!(policy.substitute("init.svc.adbd"), None);
            assert_eq!(policy.substitute("sys.usb.state"), None);
        }
    }
}
