// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pre-split layout: a single area file owns every property and doubles as
//! the serial area.

use crate::prop_area::PropArea;
use crate::prop_info::PropInfo;
use anyhow::Context as _;
use std::path::Path;

pub(crate) struct ContextsPreSplit {
    area: PropArea,
}

impl ContextsPreSplit {
    pub(crate) fn new(filename: &Path) -> anyhow::Result<Self> {
        let area = PropArea::open(filename, false)
            .with_context(|| format!("mapping pre-split property area {filename:?}"))?;
        Ok(Self { area })
    }

    pub(crate) fn area_for_name(&self, _name: &str) -> Option<&PropArea> {
        Some(&self.area)
    }

    pub(crate) fn serial_area(&self) -> Option<&PropArea> {
        Some(&self.area)
    }

    pub(crate) fn for_each<'s>(&'s self, f: &mut dyn FnMut(PropInfo<'s>)) {
        self.area.for_each(f);
    }

    // The single area was validated at init; nothing to revalidate.
    pub(crate) fn reset_access(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_everything_to_the_single_area() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("__properties__");
        let (pa, _) = PropArea::create(&path, None).unwrap();
        pa.add("a.b", "1").unwrap();
        drop(pa);

        let contexts = ContextsPreSplit::new(&path).unwrap();
        assert!(contexts.area_for_name("a.b").is_some());
        assert!(contexts.area_for_name("completely.other").is_some());
        assert!(std::ptr::eq(
            contexts.area_for_name("a.b").unwrap(),
            contexts.serial_area().unwrap()
        ));

        let mut names = Vec::new();
        contexts.for_each(&mut |pi| names.push(pi.name().to_owned()));
        assert_eq!(names, vec!["a.b".to_owned()]);
    }

    #[test]
    fn missing_file_fails_init() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ContextsPreSplit::new(&dir.path().join("nope")).is_err());
    }
}
