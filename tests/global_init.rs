// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-global accessor lifecycle. Kept in its own test binary because
//! the global store can only be initialized once per process.

use sysprops::{global, PropertyValue, RoutingTable, PROPERTY_INFO_FILE};

#[test]
fn global_init_lifecycle() {
    let dir = tempfile::tempdir().unwrap();

    // Uninitialized: sentinel returns, no store.
    assert!(global::properties().is_none());
    assert_eq!(global::area_serial(), u32::MAX);

    // An unprovisioned directory cannot initialize a reader.
    assert!(!global::init(dir.path()));
    assert!(global::properties().is_none());

    // Provision and bring up the writer side.
    RoutingTable::new([("*", "default_prop")])
        .store(dir.path().join(PROPERTY_INFO_FILE))
        .unwrap();
    let mut xattr_failed = false;
    assert!(global::area_init(dir.path(), Some(&mut xattr_failed)));

    let sp = global::properties().unwrap();
    assert_ne!(global::area_serial(), u32::MAX);

    let before = global::area_serial();
    sp.add("debug.global", "1").unwrap();
    assert_eq!(global::area_serial(), before + 1);

    // A second init succeeds, revalidates access, and does not replace the
    // store.
    assert!(global::init(dir.path()));
    assert!(std::ptr::eq(global::properties().unwrap(), sp));
    let mut value = PropertyValue::new();
    assert_eq!(sp.get("debug.global", &mut value), 1);
    assert_eq!(value.as_str(), "1");

    // Writer init on a live store is refused.
    assert!(!global::area_init(dir.path(), None));
}
