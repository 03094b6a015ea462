// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Name-to-area routing.
//!
//! A contexts object decides which [`PropArea`] owns a given property name
//! and exposes the distinguished serial area holding the global serial.
//! Three on-disk layouts exist, selected once at init:
//!
//! - [`pre_split`]: one area file holds every property.
//! - [`split`]: a directory of per-context areas keyed by a
//!   `property_contexts` text file.
//! - [`serialized`]: the same directory layout keyed by a serialized
//!   `property_info` routing table.
//!
//! After init the reader methods are called concurrently from many threads;
//! nodes open their mapping lazily (first routed lookup wins) and never tear
//! it down. `reset_access` only flips a per-node deny flag, so a handle
//! obtained before revocation stays valid.

pub(crate) mod pre_split;
pub(crate) mod serialized;
pub(crate) mod split;

use crate::prop_area::PropArea;
use crate::prop_info::PropInfo;
use anyhow::Context as _;
use nix::unistd::{access, AccessFlags};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

pub(crate) use pre_split::ContextsPreSplit;
pub(crate) use serialized::ContextsSerialized;
pub(crate) use split::ContextsSplit;

/// File name of the serial area inside a properties directory.
pub(crate) const SERIAL_AREA_NAME: &str = "properties_serial";

/// One security context and its lazily-mapped area file.
pub(crate) struct ContextNode {
    context: String,
    filename: PathBuf,
    writable: bool,
    area: OnceLock<PropArea>,
    access_denied: AtomicBool,
}

impl ContextNode {
    fn new(context: String, dir: &Path, writable: bool) -> Self {
        let filename = dir.join(&context);
        Self {
            context,
            filename,
            writable,
            area: OnceLock::new(),
            access_denied: AtomicBool::new(false),
        }
    }

    fn context(&self) -> &str {
        &self.context
    }

    /// The node's area, mapping it on first use. `None` when access is
    /// denied or the file cannot be mapped (the next call retries).
    fn area(&self) -> Option<&PropArea> {
        if self.access_denied.load(Ordering::Acquire) {
            return None;
        }
        if let Some(pa) = self.area.get() {
            return Some(pa);
        }
        match PropArea::open(&self.filename, self.writable) {
            Ok(pa) => Some(self.area.get_or_init(|| pa)),
            Err(e) => {
                log::warn!("failed to map property area {:?}: {e}", self.filename);
                None
            }
        }
    }

    /// Writer-side eager creation of the area file. Returns whether labeling
    /// the file with its context failed.
    fn create(&self) -> anyhow::Result<bool> {
        let (pa, xattr_failed) = PropArea::create(&self.filename, Some(&self.context))
            .with_context(|| format!("creating property area {:?}", self.filename))?;
        _ = self.area.set(pa);
        Ok(xattr_failed)
    }

    fn check_access(&self) {
        let denied = access(&self.filename, AccessFlags::R_OK).is_err();
        self.access_denied.store(denied, Ordering::Release);
    }
}

struct RouteEntry {
    prefix: String,
    node: usize,
}

/// Prefix-to-node routing shared by the split and serialized variants.
/// Longest matching prefix wins; an empty prefix (spelled `*` in the
/// configuration sources) is the catch-all.
pub(crate) struct PrefixRouter {
    entries: Vec<RouteEntry>,
    nodes: Vec<ContextNode>,
    serial_node: ContextNode,
}

impl PrefixRouter {
    pub(crate) fn new(dir: &Path, routes: Vec<(String, String)>, writable: bool) -> Self {
        let mut nodes: Vec<ContextNode> = Vec::new();
        let mut entries = Vec::with_capacity(routes.len());
        for (prefix, context) in routes {
            let prefix = if prefix == "*" { String::new() } else { prefix };
            let node = match nodes.iter().position(|n| n.context() == context) {
                Some(i) => i,
                None => {
                    nodes.push(ContextNode::new(context, dir, writable));
                    nodes.len() - 1
                }
            };
            entries.push(RouteEntry { prefix, node });
        }
        let serial_node = ContextNode::new(SERIAL_AREA_NAME.to_owned(), dir, writable);
        Self {
            entries,
            nodes,
            serial_node,
        }
    }

    fn node_for_name(&self, name: &str) -> Option<&ContextNode> {
        let mut best: Option<&RouteEntry> = None;
        for entry in &self.entries {
            if name.starts_with(entry.prefix.as_str())
                && best.map_or(true, |b| entry.prefix.len() > b.prefix.len())
            {
                best = Some(entry);
            }
        }
        Some(&self.nodes[best?.node])
    }

    pub(crate) fn area_for_name(&self, name: &str) -> Option<&PropArea> {
        self.node_for_name(name)?.area()
    }

    pub(crate) fn serial_area(&self) -> Option<&PropArea> {
        self.serial_node.area()
    }

    /// Writer-side init: create the serial area and every context's area.
    /// Returns whether any context label failed to apply.
    pub(crate) fn create_all(&self) -> anyhow::Result<bool> {
        let mut xattr_failed = self.serial_node.create()?;
        for node in &self.nodes {
            xattr_failed |= node.create()?;
        }
        Ok(xattr_failed)
    }

    pub(crate) fn for_each<'s>(&'s self, f: &mut dyn FnMut(PropInfo<'s>)) {
        for node in &self.nodes {
            if let Some(pa) = node.area() {
                pa.for_each(f);
            }
        }
    }

    pub(crate) fn reset_access(&self) {
        for node in &self.nodes {
            node.check_access();
        }
        self.serial_node.check_access();
    }
}

/// The routing variant chosen at init.
pub(crate) enum Contexts {
    PreSplit(ContextsPreSplit),
    Split(ContextsSplit),
    Serialized(ContextsSerialized),
}

impl Contexts {
    pub(crate) fn area_for_name(&self, name: &str) -> Option<&PropArea> {
        match self {
            Contexts::PreSplit(c) => c.area_for_name(name),
            Contexts::Split(c) => c.area_for_name(name),
            Contexts::Serialized(c) => c.area_for_name(name),
        }
    }

    pub(crate) fn serial_area(&self) -> Option<&PropArea> {
        match self {
            Contexts::PreSplit(c) => c.serial_area(),
            Contexts::Split(c) => c.serial_area(),
            Contexts::Serialized(c) => c.serial_area(),
        }
    }

    pub(crate) fn for_each<'s>(&'s self, f: &mut dyn FnMut(PropInfo<'s>)) {
        match self {
            Contexts::PreSplit(c) => c.for_each(f),
            Contexts::Split(c) => c.for_each(f),
            Contexts::Serialized(c) => c.for_each(f),
        }
    }

    pub(crate) fn reset_access(&self) {
        match self {
            Contexts::PreSplit(c) => c.reset_access(),
            Contexts::Split(c) => c.reset_access(),
            Contexts::Serialized(c) => c.reset_access(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let dir = tempfile::tempdir().unwrap();
        let routes = vec![
            ("*".to_owned(), "default".to_owned()),
            ("ro.".to_owned(), "ro_props".to_owned()),
            ("ro.build.".to_owned(), "build_props".to_owned()),
        ];
        let router = PrefixRouter::new(dir.path(), routes, false);

        let node_for = |name: &str| router.node_for_name(name).unwrap().context().to_owned();
        assert_eq!(node_for("ro.build.id"), "build_props");
        assert_eq!(node_for("ro.serialno"), "ro_props");
        assert_eq!(node_for("debug.foo"), "default");
    }

    #[test]
    fn contexts_deduplicate_into_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let routes = vec![
            ("sys.".to_owned(), "system_props".to_owned()),
            ("vendor.".to_owned(), "system_props".to_owned()),
            ("debug.".to_owned(), "debug_props".to_owned()),
        ];
        let router = PrefixRouter::new(dir.path(), routes, false);
        assert_eq!(router.nodes.len(), 2);
        assert_eq!(router.entries.len(), 3);
    }

    #[test]
    fn missing_area_file_denies_routing() {
        let dir = tempfile::tempdir().unwrap();
        let routes = vec![("*".to_owned(), "default".to_owned())];
        let router = PrefixRouter::new(dir.path(), routes, false);

        // No area files exist, so routing resolves but mapping fails.
        assert!(router.area_for_name("any.name").is_none());
        assert!(router.serial_area().is_none());
    }

    #[test]
    fn unmatched_name_is_denied_without_catch_all() {
        let dir = tempfile::tempdir().unwrap();
        let routes = vec![("sys.".to_owned(), "system_props".to_owned())];
        let router = PrefixRouter::new(dir.path(), routes, false);
        assert!(router.area_for_name("debug.foo").is_none());
    }

    #[test]
    fn reset_access_denies_unreadable_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let routes = vec![("*".to_owned(), "default".to_owned())];
        let router = PrefixRouter::new(dir.path(), routes, true);
        router.create_all().unwrap();
        assert!(router.area_for_name("x").is_some());

        // The file is still there: access stays granted after recheck.
        router.reset_access();
        assert!(router.area_for_name("x").is_some());

        // A vanished file is denied on the next recheck even though the
        // mapping itself survives.
        std::fs::remove_file(dir.path().join("default")).unwrap();
        router.reset_access();
        assert!(router.area_for_name("x").is_none());
    }
}
