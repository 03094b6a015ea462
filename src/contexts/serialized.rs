// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Serialized layout: per-context area files keyed by a binary
//! `property_info` routing table.
//!
//! Unlike the split layout, the table is written once by the provisioning
//! side and read verbatim by every process, so there is no configuration
//! parsing on the hot init path. The format is a fixed little-endian
//! framing:
//!
//! ```text
//! magic: u32 | version: u32 | count: u32
//! count * ( prefix_len: u16 | prefix | context_len: u16 | context )
//! ```

use super::PrefixRouter;
use crate::prop_area::PropArea;
use crate::prop_info::PropInfo;
use anyhow::Context as _;
use std::io;
use std::path::Path;

/// File name of the serialized routing table inside a properties directory.
pub const PROPERTY_INFO_FILE: &str = "property_info";

const TABLE_MAGIC: u32 = u32::from_le_bytes(*b"PRTI");
const TABLE_VERSION: u32 = 1;

/// One `(prefix, context)` routing rule. A literal `*` prefix is the
/// catch-all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingEntry {
    pub prefix: String,
    pub context: String,
}

/// The serialized routing table: load/store plus the entry list.
///
/// Provisioning writes it once per boot; readers and the writer daemon load
/// it at init.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    pub entries: Vec<RoutingEntry>,
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_owned())
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    if buf.len() < n {
        return Err(invalid_data("truncated routing table"));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn take_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn take_string(buf: &mut &[u8]) -> io::Result<String> {
    let b = take(buf, 2)?;
    let len = u16::from_le_bytes([b[0], b[1]]) as usize;
    let bytes = take(buf, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| invalid_data("non-UTF-8 routing entry"))
}

impl RoutingTable {
    pub fn new<P, C, I>(entries: I) -> Self
    where
        P: Into<String>,
        C: Into<String>,
        I: IntoIterator<Item = (P, C)>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(prefix, context)| RoutingEntry {
                    prefix: prefix.into(),
                    context: context.into(),
                })
                .collect(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let data = std::fs::read(path)?;
        let mut buf = data.as_slice();

        if take_u32(&mut buf)? != TABLE_MAGIC {
            return Err(invalid_data("unrecognized routing table magic"));
        }
        if take_u32(&mut buf)? != TABLE_VERSION {
            return Err(invalid_data("unsupported routing table version"));
        }
        let count = take_u32(&mut buf)? as usize;

        let mut entries = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let prefix = take_string(&mut buf)?;
            let context = take_string(&mut buf)?;
            if context.contains('/') {
                return Err(invalid_data("routing context escapes the directory"));
            }
            entries.push(RoutingEntry { prefix, context });
        }
        if !buf.is_empty() {
            return Err(invalid_data("trailing bytes after routing table"));
        }
        Ok(Self { entries })
    }

    pub fn store(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let mut out = Vec::new();
        out.extend_from_slice(&TABLE_MAGIC.to_le_bytes());
        out.extend_from_slice(&TABLE_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            for field in [&entry.prefix, &entry.context] {
                let len = u16::try_from(field.len())
                    .map_err(|_| invalid_data("routing entry field too long"))?;
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(field.as_bytes());
            }
        }
        std::fs::write(path, out)
    }
}

pub(crate) struct ContextsSerialized {
    router: PrefixRouter,
}

impl ContextsSerialized {
    /// Loads the routing table and builds the router. Writer-side init
    /// creates the directory and every area file eagerly, reporting xattr
    /// labeling failures through `fsetxattr_failed`.
    pub(crate) fn new(
        dir: &Path,
        writable: bool,
        fsetxattr_failed: Option<&mut bool>,
    ) -> anyhow::Result<Self> {
        if writable {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating properties directory {dir:?}"))?;
        }

        let path = dir.join(PROPERTY_INFO_FILE);
        let table =
            RoutingTable::load(&path).with_context(|| format!("loading routing table {path:?}"))?;
        anyhow::ensure!(!table.entries.is_empty(), "empty routing table {path:?}");

        let routes = table
            .entries
            .into_iter()
            .map(|e| (e.prefix, e.context))
            .collect();
        let router = PrefixRouter::new(dir, routes, writable);

        if writable {
            let failed = router.create_all().context("creating property areas")?;
            if let Some(flag) = fsetxattr_failed {
                *flag = failed;
            }
        }
        Ok(Self { router })
    }

    pub(crate) fn area_for_name(&self, name: &str) -> Option<&PropArea> {
        self.router.area_for_name(name)
    }

    pub(crate) fn serial_area(&self) -> Option<&PropArea> {
        self.router.serial_area()
    }

    pub(crate) fn for_each<'s>(&'s self, f: &mut dyn FnMut(PropInfo<'s>)) {
        self.router.for_each(f);
    }

    pub(crate) fn reset_access(&self) {
        self.router.reset_access();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_store_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROPERTY_INFO_FILE);

        let table = RoutingTable::new([
            ("*", "default_prop"),
            ("ro.", "ro_prop"),
            ("ro.build.", "build_prop"),
        ]);
        table.store(&path).unwrap();

        let loaded = RoutingTable::load(&path).unwrap();
        assert_eq!(loaded, table);
    }

    #[test]
    fn load_rejects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROPERTY_INFO_FILE);

        std::fs::write(&path, b"garbage").unwrap();
        assert!(RoutingTable::load(&path).is_err());

        let table = RoutingTable::new([("*", "default_prop")]);
        table.store(&path).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 3);
        std::fs::write(&path, bytes).unwrap();
        assert!(RoutingTable::load(&path).is_err());
    }

    #[test]
    fn load_rejects_escaping_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROPERTY_INFO_FILE);
        RoutingTable::new([("*", "../outside")]).store(&path).unwrap();
        assert!(RoutingTable::load(&path).is_err());
    }

    #[test]
    fn writable_init_provisions_all_areas() {
        let dir = tempfile::tempdir().unwrap();
        RoutingTable::new([("*", "default_prop"), ("sys.", "system_prop")])
            .store(dir.path().join(PROPERTY_INFO_FILE))
            .unwrap();

        let mut xattr_failed = false;
        let contexts =
            ContextsSerialized::new(dir.path(), true, Some(&mut xattr_failed)).unwrap();

        for file in ["default_prop", "system_prop", super::super::SERIAL_AREA_NAME] {
            assert!(dir.path().join(file).exists(), "{file} was not provisioned");
        }
        assert!(contexts.serial_area().is_some());
        contexts
            .area_for_name("sys.boot_completed")
            .unwrap()
            .add("sys.boot_completed", "1")
            .unwrap();
    }

    #[test]
    fn reader_init_requires_the_table() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ContextsSerialized::new(dir.path(), false, None).is_err());
    }
}
