//! Resolver (spec §4.2, component C4): maps a document's declared
//! dependencies to a minimal required bundle set, and detects the engine
//! when the caller passes `"auto"`.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::bundle::manifest::{BundleDependencyGraph, BundleRegistry, PackageDependencyGraph, PackageMap};

/// Matches `\usepackage[opts]{a,b,c}`, `\documentclass[opts]{a}` and
/// `\RequirePackage[opts]{a,b}`, capturing only the brace-list argument.
/// Options (the bracketed group) are matched but discarded.
static DECLARATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\(?:usepackage|documentclass|RequirePackage)(?:\[[^\]]*\])?\{([^}]*)\}").unwrap()
});

/// Scans `source` for `\usepackage{fontspec}` / `\usepackage{unicode-math}` /
/// `\setmainfont` / `\setsansfont` / `\setmonofont` and returns `"xelatex"` if
/// any is present, else `"pdflatex"` (spec §4.2 "Engine detection").
pub fn detect_engine(source: &str) -> &'static str {
    let uses_fontspec = source.contains(r"\usepackage{fontspec}")
        || source.contains(r"\usepackage{unicode-math}")
        || source.contains(r"\setmainfont")
        || source.contains(r"\setsansfont")
        || source.contains(r"\setmonofont");
    if uses_fontspec {
        "xelatex"
    } else {
        "pdflatex"
    }
}

/// Extracts the comma-separated, trimmed package names declared via
/// `\usepackage`, `\documentclass`, or `\RequirePackage` anywhere in `source`.
/// The class name counts as a package (spec §4.2 step 1).
pub fn extract_declared_packages(source: &str) -> Vec<String> {
    let mut out = Vec::new();
    for capture in DECLARATION_RE.captures_iter(source) {
        let list = &capture[1];
        for name in list.split(',') {
            let trimmed = name.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        }
    }
    out
}

/// Resolves a document's required bundle set against the package map and
/// bundle/package dependency graphs.
pub struct Resolver<'a> {
    package_map: &'a PackageMap,
    bundle_deps: &'a BundleDependencyGraph,
    package_deps: Option<&'a PackageDependencyGraph>,
    registry: &'a BundleRegistry,
}

impl<'a> Resolver<'a> {
    pub fn new(
        package_map: &'a PackageMap,
        bundle_deps: &'a BundleDependencyGraph,
        package_deps: Option<&'a PackageDependencyGraph>,
        registry: &'a BundleRegistry,
    ) -> Self {
        Self {
            package_map,
            bundle_deps,
            package_deps,
            registry,
        }
    }

    /// Returns the ordered, deduplicated set of bundle IDs required to
    /// compile `source` with `engine`, filtered to bundles present in the
    /// registry (spec §4.2 steps 2-5).
    pub fn resolve(&self, source: &str, engine: &str) -> Vec<String> {
        let mut bundle_order = Vec::new();
        let mut visited_bundles = HashSet::new();
        let mut visited_packages = HashSet::new();

        for bundle_id in self.bundle_deps.required_for_engine(engine) {
            self.add_bundle(bundle_id, &mut bundle_order, &mut visited_bundles);
        }

        for package in extract_declared_packages(source) {
            self.resolve_package(&package, &mut bundle_order, &mut visited_bundles, &mut visited_packages);
        }

        bundle_order
            .into_iter()
            .filter(|id| self.registry.contains(id))
            .collect()
    }

    fn resolve_package(
        &self,
        package: &str,
        bundle_order: &mut Vec<String>,
        visited_bundles: &mut HashSet<String>,
        visited_packages: &mut HashSet<String>,
    ) {
        if !visited_packages.insert(package.to_string()) {
            return;
        }

        if let Some(bundle_id) = self.package_map.bundle_for(package) {
            self.add_bundle(bundle_id, bundle_order, visited_bundles);
        }

        if let Some(graph) = self.package_deps {
            for dep in graph.deps_of(package) {
                self.resolve_package(dep, bundle_order, visited_bundles, visited_packages);
            }
        }
    }

    fn add_bundle(&self, bundle_id: &str, bundle_order: &mut Vec<String>, visited: &mut HashSet<String>) {
        if !visited.insert(bundle_id.to_string()) {
            return;
        }
        bundle_order.push(bundle_id.to_string());
        for dep in self.bundle_deps.requires(bundle_id) {
            self.add_bundle(dep, bundle_order, visited);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_usepackage_documentclass_and_requirepackage() {
        let source = r"\documentclass[12pt]{article}
\usepackage{amsmath, amssymb}
\RequirePackage[final]{graphicx}";
        let pkgs = extract_declared_packages(source);
        assert_eq!(pkgs, vec!["article", "amsmath", "amssymb", "graphicx"]);
    }

    #[test]
    fn detects_xelatex_via_fontspec() {
        assert_eq!(detect_engine(r"\usepackage{fontspec}"), "xelatex");
        assert_eq!(detect_engine(r"\setmainfont{Times}"), "xelatex");
        assert_eq!(detect_engine(r"\documentclass{article}"), "pdflatex");
    }

    #[test]
    fn resolve_walks_bundle_and_package_dependencies() {
        let package_map = PackageMap::from_json(br#"{"amsmath": "math-bundle"}"#).unwrap();
        let bundle_deps = BundleDependencyGraph::from_json(
            br#"{
                "engines": {"pdflatex": {"required": ["core"]}},
                "bundles": {"math-bundle": {"requires": ["core"]}}
            }"#,
        )
        .unwrap();
        let registry = BundleRegistry::from_json(br#"[{"id": "core"}, {"id": "math-bundle"}]"#).unwrap();

        let resolver = Resolver::new(&package_map, &bundle_deps, None, &registry);
        let result = resolver.resolve(r"\documentclass{article}\usepackage{amsmath}", "pdflatex");

        assert!(result.contains(&"core".to_string()));
        assert!(result.contains(&"math-bundle".to_string()));
    }

    #[test]
    fn resolve_filters_to_registry() {
        let package_map = PackageMap::from_json(br#"{"foo": "ghost-bundle"}"#).unwrap();
        let bundle_deps = BundleDependencyGraph::from_json(br#"{"engines": {}, "bundles": {}}"#).unwrap();
        let registry = BundleRegistry::from_json(br#"[]"#).unwrap();

        let resolver = Resolver::new(&package_map, &bundle_deps, None, &registry);
        let result = resolver.resolve(r"\usepackage{foo}", "pdflatex");
        assert!(result.is_empty());
    }
}
