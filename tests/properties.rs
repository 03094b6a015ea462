// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests over a serialized properties directory, with the writer
//! and readers holding independent mappings of the same area files as the
//! in-process stand-in for separate processes.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use sysprops::{
    PropertyValue, RoutingTable, SystemProperties, PROPERTY_INFO_FILE, PROP_VALUE_MAX,
};

const COUNTER_MASK: u32 = 0x00ff_ffff;

fn provision(dir: &Path) -> (SystemProperties, SystemProperties) {
    RoutingTable::new([("*", "default_prop"), ("ro.", "ro_prop")])
        .store(dir.join(PROPERTY_INFO_FILE))
        .unwrap();
    let mut xattr_failed = false;
    let writer = SystemProperties::new_area(dir, &mut xattr_failed).unwrap();
    let reader = SystemProperties::new(dir).unwrap();
    (writer, reader)
}

fn get_string(sp: &SystemProperties, name: &str) -> String {
    let mut value = PropertyValue::new();
    sp.get(name, &mut value);
    value.as_str().to_owned()
}

#[test]
fn provisioned_directory_initializes_with_a_live_serial() {
    let dir = tempfile::tempdir().unwrap();
    let (writer, reader) = provision(dir.path());

    assert!(writer.area_serial().is_some());
    assert!(reader.area_serial().is_some());
    assert_eq!(writer.area_serial(), reader.area_serial());
}

#[test]
fn add_update_get_across_mappings() {
    let dir = tempfile::tempdir().unwrap();
    let (writer, reader) = provision(dir.path());

    let serial0 = writer.area_serial().unwrap();
    writer.add("debug.foo", "bar").unwrap();
    assert_eq!(get_string(&reader, "debug.foo"), "bar");
    assert_eq!(writer.area_serial().unwrap(), serial0 + 1);

    let pi = writer.find("debug.foo").unwrap();
    writer.update(pi, "baz").unwrap();
    assert_eq!(get_string(&reader, "debug.foo"), "baz");
    assert_eq!(writer.area_serial().unwrap(), serial0 + 2);
}

#[test]
fn record_counter_is_strictly_monotonic() {
    let dir = tempfile::tempdir().unwrap();
    let (writer, _) = provision(dir.path());

    writer.add("debug.counted", "v").unwrap();
    let pi = writer.find("debug.counted").unwrap();
    let mut prev = pi.serial().load(Ordering::Relaxed) & COUNTER_MASK;
    for i in 0..200 {
        writer.update(pi, &format!("v{i}")).unwrap();
        let cur = pi.serial().load(Ordering::Relaxed) & COUNTER_MASK;
        assert!(cur > prev, "counter went {prev:#x} -> {cur:#x}");
        prev = cur;
    }
}

#[test]
fn seqlock_readers_never_observe_torn_values() {
    let dir = tempfile::tempdir().unwrap();
    let (writer, reader) = provision(dir.path());

    const SHORT: &str = "aaaa";
    const LONG: &str = "bbbbbbbbbbbbbbbbbbbbbbbb";
    writer.add("debug.flip", SHORT).unwrap();

    let stop = AtomicBool::new(false);
    let writer_ref = &writer;
    let reader_ref = &reader;
    let stop_ref = &stop;

    std::thread::scope(|s| {
        s.spawn(move || {
            let pi = writer_ref.find("debug.flip").unwrap();
            for i in 0..4000u32 {
                let next = if i % 2 == 0 { LONG } else { SHORT };
                writer_ref.update(pi, next).unwrap();
            }
            stop_ref.store(true, Ordering::Release);
        });

        for _ in 0..3 {
            s.spawn(move || {
                let mut value = PropertyValue::new();
                while !stop_ref.load(Ordering::Acquire) {
                    let len = reader_ref.get("debug.flip", &mut value);
                    let seen = value.as_str();
                    assert!(
                        seen == SHORT || seen == LONG,
                        "torn read: {seen:?} (len {len})"
                    );
                    assert_eq!(len, seen.len());
                }
            });
        }
    });
}

#[test]
fn waiter_on_a_record_observes_its_update() {
    let dir = tempfile::tempdir().unwrap();
    let (writer, reader) = provision(dir.path());

    writer.add("debug.waited", "0").unwrap();
    let old = writer
        .find("debug.waited")
        .unwrap()
        .serial()
        .load(Ordering::Acquire);
    let reader_ref = &reader;

    std::thread::scope(|s| {
        let waiter = s.spawn(move || {
            let pi = reader_ref.find("debug.waited").unwrap();
            reader_ref.wait(Some(pi), old, Some(Duration::from_secs(10)))
        });

        std::thread::sleep(Duration::from_millis(50));
        let pi = writer.find("debug.waited").unwrap();
        writer.update(pi, "1").unwrap();

        let new = waiter.join().unwrap().expect("waiter timed out");
        assert_ne!(new, old);
        assert_eq!(get_string(&reader, "debug.waited"), "1");
    });
}

#[test]
fn wait_any_unblocks_on_any_write() {
    let dir = tempfile::tempdir().unwrap();
    let (writer, reader) = provision(dir.path());

    writer.add("debug.something", "x").unwrap();
    let global = reader.area_serial().unwrap();
    let reader_ref = &reader;

    std::thread::scope(|s| {
        let waiter =
            s.spawn(move || reader_ref.wait(None, global, Some(Duration::from_secs(10))));

        std::thread::sleep(Duration::from_millis(50));
        writer.add("debug.other", "y").unwrap();

        let new = waiter.join().unwrap().expect("waiter timed out");
        assert!(new > global);
    });
}

#[test]
fn failed_operations_leave_the_global_serial_alone() {
    let dir = tempfile::tempdir().unwrap();
    let (writer, _) = provision(dir.path());

    writer.add("debug.foo", "bar").unwrap();
    let serial = writer.area_serial().unwrap();

    let huge = "x".repeat(PROP_VALUE_MAX);
    assert!(writer.add("debug.too.big", &huge).is_err());
    assert!(writer.add("debug.foo", "dup").is_err());
    let pi = writer.find("debug.foo").unwrap();
    assert!(writer.update(pi, &huge).is_err());

    assert_eq!(writer.area_serial().unwrap(), serial);
    assert_eq!(get_string(&writer, "debug.foo"), "bar");
}

#[test]
fn routing_respects_prefixes_across_areas() {
    let dir = tempfile::tempdir().unwrap();
    let (writer, reader) = provision(dir.path());

    writer.add("ro.product.name", "gadget").unwrap();
    writer.add("debug.tool", "on").unwrap();

    assert_eq!(get_string(&reader, "ro.product.name"), "gadget");
    assert_eq!(get_string(&reader, "debug.tool"), "on");

    let mut count = 0usize;
    reader.for_each(|_| count += 1);
    assert_eq!(count, 2);
}
