//! The bundle data model: packed archives, their manifests, and the global
//! indices that let the VFS resolve a path without touching the network.
//!
//! Mirrors spec §3 and the wire formats of spec §6 (`<id>.meta.json`,
//! `file-manifest.json`, `registry.json`, `package-map.json`,
//! `bundle-deps.json`, `package-deps.json`).

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{FabricError, FabricResult};

/// One file's byte range inside a bundle body.
#[derive(Debug, Clone, Deserialize)]
pub struct BundleEntry {
    pub path: String,
    pub name: String,
    pub start: u64,
    pub end: u64,
}

impl BundleEntry {
    /// The full path, `path + "/" + name`, unique within a bundle.
    pub fn full_path(&self) -> String {
        if self.path.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.path, self.name)
        }
    }
}

/// `<id>.meta.json` — a bundle's manifest, independent of its body.
#[derive(Debug, Clone, Deserialize)]
pub struct BundleManifest {
    pub name: String,
    pub files: Vec<BundleEntry>,
    #[serde(rename = "totalSize")]
    pub total_size: u64,
}

impl BundleManifest {
    pub fn from_json(data: &[u8]) -> FabricResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| FabricError::MalformedManifest("<id>.meta.json".into(), e.to_string()))
    }

    /// Validates the manifest's invariants against a bundle body of `body_len`
    /// bytes: entries are non-overlapping, contiguous in manifest order, and
    /// their union exactly covers the body with no padding.
    pub fn validate(&self, body_len: u64) -> FabricResult<()> {
        let mut cursor = 0u64;
        let mut seen_paths = std::collections::HashSet::new();
        for entry in &self.files {
            if entry.start != cursor {
                return Err(FabricError::MalformedManifest(
                    self.name.clone(),
                    format!(
                        "entry {} starts at {} but previous entry ended at {}",
                        entry.full_path(),
                        entry.start,
                        cursor
                    ),
                ));
            }
            if entry.end < entry.start {
                return Err(FabricError::MalformedManifest(
                    self.name.clone(),
                    format!("entry {} has end < start", entry.full_path()),
                ));
            }
            if !seen_paths.insert(entry.full_path()) {
                return Err(FabricError::MalformedManifest(
                    self.name.clone(),
                    format!("duplicate path {}", entry.full_path()),
                ));
            }
            cursor = entry.end;
        }
        if cursor != body_len {
            return Err(FabricError::MalformedManifest(
                self.name.clone(),
                format!("manifest covers {cursor} bytes, body is {body_len}"),
            ));
        }
        Ok(())
    }

    pub fn find(&self, full_path: &str) -> Option<&BundleEntry> {
        self.files.iter().find(|e| e.full_path() == full_path)
    }
}

/// A fully loaded bundle: identifier, resident body, and manifest.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub id: String,
    pub body: Arc<Vec<u8>>,
    pub manifest: BundleManifest,
}

impl Bundle {
    pub fn new(id: impl Into<String>, body: Vec<u8>, manifest: BundleManifest) -> FabricResult<Self> {
        manifest.validate(body.len() as u64)?;
        Ok(Self {
            id: id.into(),
            body: Arc::new(body),
            manifest,
        })
    }

    /// Returns the exact byte slice for `[start, end)`, as read by the VFS
    /// when resolving a Lazy node.
    pub fn slice(&self, start: u64, end: u64) -> &[u8] {
        &self.body[start as usize..end as usize]
    }
}

/// `file-manifest.json` — `{ "<full-path>": {bundle, start, end}, ... }`.
///
/// This is the authoritative index the VFS consults first; a bundle's own
/// manifest (fetched dynamically) is the fallback when a path isn't indexed
/// here yet.
#[derive(Debug, Clone, Default)]
pub struct GlobalFileManifest {
    entries: HashMap<String, GlobalFileEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalFileEntry {
    pub bundle: String,
    pub start: u64,
    pub end: u64,
}

impl GlobalFileManifest {
    pub fn from_json(data: &[u8]) -> FabricResult<Self> {
        let entries: HashMap<String, GlobalFileEntry> = serde_json::from_slice(data)
            .map_err(|e| FabricError::MalformedManifest("file-manifest.json".into(), e.to_string()))?;
        Ok(Self { entries })
    }

    pub fn get(&self, full_path: &str) -> Option<&GlobalFileEntry> {
        self.entries.get(full_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All paths whose entry lives in `bundle_id`, used when mounting a whole
    /// bundle (`mount_bundle`/`mount_deferred_bundle`).
    pub fn paths_in_bundle<'a>(&'a self, bundle_id: &'a str) -> impl Iterator<Item = (&'a str, &'a GlobalFileEntry)> {
        self.entries
            .iter()
            .filter(move |(_, e)| e.bundle == bundle_id)
            .map(|(path, e)| (path.as_str(), e))
    }
}

/// `registry.json` — the set of known bundle IDs.
#[derive(Debug, Clone, Default)]
pub struct BundleRegistry {
    ids: std::collections::HashSet<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct BundleDescriptor {
    id: String,
}

impl BundleRegistry {
    pub fn from_json(data: &[u8]) -> FabricResult<Self> {
        let descriptors: Vec<BundleDescriptor> = serde_json::from_slice(data)
            .map_err(|e| FabricError::MalformedManifest("registry.json".into(), e.to_string()))?;
        Ok(Self {
            ids: descriptors.into_iter().map(|d| d.id).collect(),
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

/// `package-map.json` — `{ "<pkg>": "<bundle-id>", ... }`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageMap(HashMap<String, String>);

impl PackageMap {
    pub fn from_json(data: &[u8]) -> FabricResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| FabricError::MalformedManifest("package-map.json".into(), e.to_string()))
    }

    pub fn bundle_for(&self, package: &str) -> Option<&str> {
        self.0.get(package).map(String::as_str)
    }
}

/// `bundle-deps.json` — engine-mandated bundle sets, per-bundle dependencies,
/// and the globally-deferred set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BundleDependencyGraph {
    #[serde(default)]
    pub engines: HashMap<String, EngineRequirements>,
    #[serde(default)]
    pub bundles: HashMap<String, BundleRequirements>,
    #[serde(default)]
    pub deferred: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineRequirements {
    #[serde(default)]
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BundleRequirements {
    #[serde(default)]
    pub requires: Vec<String>,
}

impl BundleDependencyGraph {
    pub fn from_json(data: &[u8]) -> FabricResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| FabricError::MalformedManifest("bundle-deps.json".into(), e.to_string()))
    }

    pub fn required_for_engine(&self, engine: &str) -> &[String] {
        self.engines
            .get(engine)
            .map(|r| r.required.as_slice())
            .unwrap_or(&[])
    }

    pub fn requires(&self, bundle_id: &str) -> &[String] {
        self.bundles
            .get(bundle_id)
            .map(|r| r.requires.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_deferred(&self, bundle_id: &str) -> bool {
        self.deferred.iter().any(|id| id == bundle_id)
    }

    /// Warns (per spec §9's open question) if a bundle is both engine-required
    /// and globally deferred, since the spec treats `deferred` as engine-wide.
    pub fn check_deferred_conflicts(&self) {
        for (engine, reqs) in &self.engines {
            for bundle_id in &reqs.required {
                if self.is_deferred(bundle_id) {
                    tracing::warn!(
                        engine,
                        bundle_id,
                        "bundle is both required for this engine and globally deferred"
                    );
                }
            }
        }
    }
}

/// `package-deps.json` (optional) — `{ "<pkg>": [deps...], ... }`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageDependencyGraph(HashMap<String, Vec<String>>);

impl PackageDependencyGraph {
    pub fn from_json(data: &[u8]) -> FabricResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| FabricError::MalformedManifest("package-deps.json".into(), e.to_string()))
    }

    pub fn deps_of(&self, package: &str) -> &[String] {
        self.0.get(package).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest() -> BundleManifest {
        BundleManifest {
            name: "core".into(),
            files: vec![
                BundleEntry { path: "tex/latex/base".into(), name: "article.cls".into(), start: 0, end: 10 },
                BundleEntry { path: "tex/latex/base".into(), name: "book.cls".into(), start: 10, end: 25 },
            ],
            total_size: 25,
        }
    }

    #[test]
    fn validate_accepts_contiguous_entries() {
        let m = sample_manifest();
        assert!(m.validate(25).is_ok());
    }

    #[test]
    fn validate_rejects_gap_or_overlap() {
        let mut m = sample_manifest();
        m.files[1].start = 11; // gap
        assert!(m.validate(25).is_err());
    }

    #[test]
    fn validate_rejects_wrong_total_len() {
        let m = sample_manifest();
        assert!(m.validate(24).is_err());
    }

    #[test]
    fn full_path_joins_with_slash() {
        let e = BundleEntry { path: "a/b".into(), name: "c.sty".into(), start: 0, end: 1 };
        assert_eq!(e.full_path(), "a/b/c.sty");
    }

    #[test]
    fn bundle_slice_is_exact() {
        let body = b"0123456789ABCDE".to_vec();
        let bundle = Bundle::new("core", body, sample_manifest()).unwrap();
        assert_eq!(bundle.slice(0, 10), b"0123456789");
        assert_eq!(bundle.slice(10, 25), b"ABCDE");
    }

    #[test]
    fn bundle_deps_required_for_engine() {
        let json = br#"{
            "engines": {"pdflatex": {"required": ["core", "latex-base"]}},
            "bundles": {"latex-base": {"requires": ["core"]}},
            "deferred": ["cm-super"]
        }"#;
        let g = BundleDependencyGraph::from_json(json).unwrap();
        assert_eq!(g.required_for_engine("pdflatex"), &["core", "latex-base"]);
        assert_eq!(g.requires("latex-base"), &["core"]);
        assert!(g.is_deferred("cm-super"));
        assert!(!g.is_deferred("core"));
    }
}
