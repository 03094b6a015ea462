// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Split layout: per-context area files keyed by a `property_contexts` text
//! file in the properties directory.
//!
//! The configuration is line-oriented: `<prefix> <context>` pairs separated
//! by whitespace, `#` starts a comment, and a literal `*` prefix is the
//! catch-all. Malformed lines are skipped with a warning rather than failing
//! init, matching how the rest of the stack treats optional configuration.

use super::PrefixRouter;
use crate::prop_area::PropArea;
use crate::prop_info::PropInfo;
use anyhow::Context as _;
use std::path::Path;

/// File name of the text routing configuration inside a properties
/// directory.
pub(crate) const PROPERTY_CONTEXTS_FILE: &str = "property_contexts";

pub(crate) struct ContextsSplit {
    router: PrefixRouter,
}

fn parse_property_contexts(text: &str) -> Vec<(String, String)> {
    let mut routes = Vec::new();
    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(prefix), Some(context)) if !context.contains('/') => {
                routes.push((prefix.to_owned(), context.to_owned()));
            }
            _ => log::warn!("skipping malformed property_contexts line: {line:?}"),
        }
    }
    routes
}

impl ContextsSplit {
    pub(crate) fn new(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(PROPERTY_CONTEXTS_FILE);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading property contexts {path:?}"))?;
        let routes = parse_property_contexts(&text);
        anyhow::ensure!(!routes.is_empty(), "no routing entries in {path:?}");
        Ok(Self {
            router: PrefixRouter::new(dir, routes, false),
        })
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
    use crate::contexts::SERIAL_AREA_NAME;

    #[test]
    fn parses_prefixes_comments_and_blanks() {
        let text = "\
# comment line
*          default_prop
ro.        ro_prop   # trailing comment

debug.     debug_prop
malformed-line-without-context
";
        let routes = parse_property_contexts(text);
        assert_eq!(
            routes,
            vec![
                ("*".to_owned(), "default_prop".to_owned()),
                ("ro.".to_owned(), "ro_prop".to_owned()),
                ("debug.".to_owned(), "debug_prop".to_owned()),
            ]
        );
    }

    #[test]
    fn rejects_contexts_escaping_the_directory() {
        let routes = parse_property_contexts("evil. ../outside\nok. fine_prop\n");
        assert_eq!(routes, vec![("ok.".to_owned(), "fine_prop".to_owned())]);
    }

    #[test]
    fn routes_reads_over_provisioned_areas() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROPERTY_CONTEXTS_FILE),
            "* default_prop\ndebug. debug_prop\n",
        )
        .unwrap();
        for name in ["default_prop", "debug_prop", SERIAL_AREA_NAME] {
            PropArea::create(dir.path().join(name), Some(name)).unwrap();
        }
        let seed = PropArea::open(dir.path().join("debug_prop"), true).unwrap();
        seed.add("debug.x", "1").unwrap();

        let contexts = ContextsSplit::new(dir.path()).unwrap();
        let pa = contexts.area_for_name("debug.x").unwrap();
        assert_eq!(pa.find("debug.x").unwrap().name(), "debug.x");
        assert!(contexts.serial_area().is_some());
        assert!(contexts.area_for_name("anything.else").is_some());
    }

    #[test]
    fn empty_configuration_fails_init() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PROPERTY_CONTEXTS_FILE), "# only comments\n").unwrap();
        assert!(ContextsSplit::new(dir.path()).is_err());
    }

    #[test]
    fn missing_configuration_fails_init() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ContextsSplit::new(dir.path()).is_err());
    }
}
