//! Virtual File System (spec §4.3, component C5): mounts eager, lazy, and
//! deferred file content into the engine's filesystem namespace, patches the
//! read path to resolve markers on demand, and emits the `ls-R` index
//! kpathsea needs.
//!
//! Built fresh per compile attempt (spec §3 "VFS: built fresh at the start of
//! each compile attempt, discarded afterwards"); the bundle-body map it reads
//! from is supplied by the caller and outlives any one attempt.

mod fontmap;
mod lsr;
mod node;

pub use node::VfsContent;

use std::collections::HashMap;
use std::sync::Arc;

use crate::bundle::manifest::{BundleManifest, GlobalFileManifest};

/// Suffixes that must be mounted Eager regardless of the lazy-fs setting:
/// kpathsea needs directory-listing traces and string comparisons against
/// their contents, and font-map rewriting needs the bytes in hand.
fn is_eager_suffix(path: &str) -> bool {
    path.ends_with(".fmt")
        || path.ends_with("texmf.cnf")
        || path.ends_with(".map")
        || path.ends_with(".pfb")
        || path.ends_with(".enc")
}

fn is_font_file(path: &str) -> bool {
    path.ends_with(".pfb") || path.ends_with(".enc")
}

/// One pending byte-range request raised by a Deferred read.
pub type ByteRangeRequest = (String, u64, u64);

pub struct Vfs {
    texroot: String,
    unified_map_path: String,
    lazy_enabled: bool,

    nodes: HashMap<String, VfsContent>,
    bundle_bodies: HashMap<String, Arc<Vec<u8>>>,
    external_byte_ranges: HashMap<ByteRangeRequest, Vec<u8>>,

    pending_byte_ranges: Vec<ByteRangeRequest>,
    pending_deferred_bundles: Vec<String>,

    /// Filename -> absolute VFS path, built while mounting font files, used
    /// by font-map rewriting's primary search step.
    font_files: HashMap<String, String>,
    /// Map file paths queued for font-map post-processing (every mounted
    /// `.map` file except the unified `pdftex.map` itself).
    queued_maps: Vec<String>,

    finalized: bool,
}

impl Vfs {
    pub fn new(lazy_enabled: bool) -> Self {
        let texroot = "/texlive".to_string();
        Self {
            unified_map_path: format!("{texroot}/texmf-dist/fonts/map/pdftex/updmap/pdftex.map"),
            texroot,
            lazy_enabled,
            nodes: HashMap::new(),
            bundle_bodies: HashMap::new(),
            external_byte_ranges: HashMap::new(),
            pending_byte_ranges: Vec::new(),
            pending_deferred_bundles: Vec::new(),
            font_files: HashMap::new(),
            queued_maps: Vec::new(),
            finalized: false,
        }
    }

    pub fn texroot(&self) -> &str {
        &self.texroot
    }

    /// Carries byte ranges fetched in a previous attempt into this (fresh)
    /// VFS instance, so a retry doesn't re-request what it already has.
    pub fn seed_external_byte_ranges(&mut self, ranges: HashMap<ByteRangeRequest, Vec<u8>>) {
        self.external_byte_ranges = ranges;
    }

    pub fn into_external_byte_ranges(self) -> HashMap<ByteRangeRequest, Vec<u8>> {
        self.external_byte_ranges
    }

    pub fn pending_byte_ranges(&self) -> &[ByteRangeRequest] {
        &self.pending_byte_ranges
    }

    pub fn pending_deferred_bundles(&self) -> &[String] {
        &self.pending_deferred_bundles
    }

    // -- mounting ---------------------------------------------------------

    /// Writes a file eagerly. Queues `.map` files (other than the root
    /// unified map) for font-map post-processing.
    pub fn mount(&mut self, path: impl Into<String>, bytes: Vec<u8>) {
        let path = path.into();
        if path.ends_with(".map") && path != self.unified_map_path {
            self.queued_maps.push(path.clone());
        }
        self.nodes.insert(path, VfsContent::Eager(Arc::new(bytes)));
    }

    pub fn mount_lazy(&mut self, path: impl Into<String>, bundle_id: impl Into<String>, start: u64, end: u64) {
        self.nodes.insert(
            path.into(),
            VfsContent::Lazy { bundle_id: bundle_id.into(), start, end },
        );
    }

    pub fn mount_deferred(&mut self, path: impl Into<String>, bundle_id: impl Into<String>, start: u64, end: u64) {
        self.nodes.insert(
            path.into(),
            VfsContent::Deferred { bundle_id: bundle_id.into(), start, end },
        );
    }

    /// Mounts a whole resident bundle body. Prefers the global manifest's
    /// file set for this bundle; falls back to the bundle's own manifest
    /// when the bundle was fetched dynamically and isn't globally indexed
    /// yet. Files matching [`is_eager_suffix`] are copied immediately
    /// (or all files are, when `enable_lazy_fs` is off); the rest mount Lazy.
    pub fn mount_bundle(
        &mut self,
        bundle_id: &str,
        body: Arc<Vec<u8>>,
        global_manifest: &GlobalFileManifest,
        per_bundle_manifest: Option<&BundleManifest>,
    ) {
        let entries = self.resolve_bundle_entries(bundle_id, global_manifest, per_bundle_manifest);
        self.bundle_bodies.insert(bundle_id.to_string(), Arc::clone(&body));

        for (path, start, end) in entries {
            if is_font_file(&path) {
                if let Some(filename) = path.rsplit('/').next() {
                    self.font_files.insert(filename.to_string(), path.clone());
                }
            }
            if !self.lazy_enabled || is_eager_suffix(&path) {
                let slice = body[start as usize..end as usize].to_vec();
                self.mount(path, slice);
            } else {
                self.mount_lazy(path, bundle_id, start, end);
            }
        }
    }

    /// Same shape as [`mount_bundle`](Self::mount_bundle) but every file
    /// mounts Deferred and the bundle body is never stored resident.
    pub fn mount_deferred_bundle(
        &mut self,
        bundle_id: &str,
        global_manifest: &GlobalFileManifest,
        per_bundle_manifest: Option<&BundleManifest>,
    ) {
        let entries = self.resolve_bundle_entries(bundle_id, global_manifest, per_bundle_manifest);
        for (path, start, end) in entries {
            self.mount_deferred(path, bundle_id, start, end);
        }
    }

    fn resolve_bundle_entries(
        &self,
        bundle_id: &str,
        global_manifest: &GlobalFileManifest,
        per_bundle_manifest: Option<&BundleManifest>,
    ) -> Vec<(String, u64, u64)> {
        let from_global: Vec<(String, u64, u64)> = global_manifest
            .paths_in_bundle(bundle_id)
            .map(|(path, entry)| (path.to_string(), entry.start, entry.end))
            .collect();

        if !from_global.is_empty() {
            return from_global;
        }

        per_bundle_manifest
            .map(|manifest| {
                manifest
                    .files
                    .iter()
                    .map(|entry| {
                        let abs_path = format!("{}/texmf-dist/{}", self.texroot, entry.full_path());
                        (abs_path, entry.start, entry.end)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Mounts user-provided or fetched-package files. Font maps among them
    /// are queued the same way as [`mount`](Self::mount).
    pub fn mount_external_files(&mut self, files: HashMap<String, Vec<u8>>) {
        for (path, bytes) in files {
            self.mount(path, bytes);
        }
    }

    // -- read path ----------------------------------------------------------

    /// The patched `read`: resolves Lazy markers in place from the resident
    /// bundle body, and records a pending byte-range request for Deferred
    /// markers (substituting zero-length bytes so the engine reports the
    /// file as missing/unreadable, per spec §4.3).
    pub fn read(&mut self, path: &str) -> Option<Vec<u8>> {
        let content = self.nodes.get(path)?.clone();
        match content {
            VfsContent::Eager(bytes) => Some(bytes.as_ref().clone()),
            VfsContent::Empty => Some(Vec::new()),
            VfsContent::Lazy { bundle_id, start, end } => {
                let resolved = self
                    .bundle_bodies
                    .get(&bundle_id)
                    .map(|body| body[start as usize..end as usize].to_vec());
                match resolved {
                    Some(bytes) => {
                        self.nodes.insert(path.to_string(), VfsContent::Eager(Arc::new(bytes.clone())));
                        Some(bytes)
                    }
                    None => {
                        tracing::warn!(path, bundle_id, "lazy node resolved but bundle body is absent");
                        if !self.pending_deferred_bundles.contains(&bundle_id) {
                            self.pending_deferred_bundles.push(bundle_id);
                        }
                        Some(Vec::new())
                    }
                }
            }
            VfsContent::Deferred { bundle_id, start, end } => {
                let key = (bundle_id.clone(), start, end);
                if let Some(bytes) = self.external_byte_ranges.get(&key) {
                    let bytes = bytes.clone();
                    self.nodes.insert(path.to_string(), VfsContent::Eager(Arc::new(bytes.clone())));
                    return Some(bytes);
                }
                if !self.pending_byte_ranges.contains(&key) {
                    self.pending_byte_ranges.push(key);
                }
                Some(Vec::new())
            }
        }
    }

    /// Memory-mapped reads are patched symmetrically (spec §4.3).
    pub fn mmap(&mut self, path: &str) -> Option<Vec<u8>> {
        self.read(path)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    // -- finalisation -------------------------------------------------------

    /// Processes font maps, rewrites the unified map, and emits `ls-R`.
    /// Idempotent within one VFS instance (spec invariant: "a second call is
    /// a no-op").
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.process_font_maps();
        self.generate_ls_r();
        self.finalized = true;
    }

    fn process_font_maps(&mut self) {
        let unified_path = self.unified_map_path.clone();
        let Some(VfsContent::Eager(unified_bytes)) = self.nodes.get(&unified_path).cloned() else {
            return;
        };
        let unified_text = String::from_utf8_lossy(&unified_bytes).into_owned();
        let unified_dir = fontmap::dirname(&unified_path).to_string();

        let mut rewritten =
            fontmap::rewrite_map_text(&unified_text, &unified_dir, &self.font_files, &self.nodes);

        for map_path in self.queued_maps.clone() {
            let Some(VfsContent::Eager(bytes)) = self.nodes.get(&map_path).cloned() else {
                continue;
            };
            let text = String::from_utf8_lossy(&bytes).into_owned();
            let dir = fontmap::dirname(&map_path).to_string();
            let appended = fontmap::rewrite_map_text(&text, &dir, &self.font_files, &self.nodes);
            rewritten.push('\n');
            rewritten.push_str(&appended);
        }

        self.nodes
            .insert(unified_path, VfsContent::Eager(Arc::new(rewritten.into_bytes())));
    }

    fn generate_ls_r(&mut self) {
        let ls_r = lsr::build(&self.texroot, self.nodes.keys().cloned());
        let path = format!("{}/ls-R", self.texroot);
        self.nodes.insert(path, VfsContent::Eager(Arc::new(ls_r.into_bytes())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::manifest::{BundleEntry, GlobalFileEntry};

    fn sample_global_manifest() -> GlobalFileManifest {
        let json = br#"{
            "/texlive/texmf-dist/tex/latex/base/article.cls": {"bundle": "core", "start": 0, "end": 5},
            "/texlive/texmf-dist/tex/latex/base/book.cls": {"bundle": "core", "start": 5, "end": 10}
        }"#;
        GlobalFileManifest::from_json(json).unwrap()
    }

    #[test]
    fn lazy_read_returns_exact_bundle_slice() {
        let body = Arc::new(b"aaaaabbbbb".to_vec());
        let mut vfs = Vfs::new(true);
        vfs.mount_bundle("core", body, &sample_global_manifest(), None);

        let bytes = vfs.read("/texlive/texmf-dist/tex/latex/base/article.cls").unwrap();
        assert_eq!(bytes, b"aaaaa");
        let bytes = vfs.read("/texlive/texmf-dist/tex/latex/base/book.cls").unwrap();
        assert_eq!(bytes, b"bbbbb");
    }

    #[test]
    fn lazy_transitions_to_eager_after_read() {
        let body = Arc::new(b"aaaaabbbbb".to_vec());
        let mut vfs = Vfs::new(true);
        vfs.mount_bundle("core", body, &sample_global_manifest(), None);
        vfs.read("/texlive/texmf-dist/tex/latex/base/article.cls");
        assert!(matches!(
            vfs.nodes.get("/texlive/texmf-dist/tex/latex/base/article.cls"),
            Some(VfsContent::Eager(_))
        ));
    }

    #[test]
    fn deferred_read_records_pending_range_and_returns_empty() {
        let mut vfs = Vfs::new(true);
        vfs.mount_deferred("/texlive/texmf-dist/fonts/type1/public/cm-super/sfrm1000.pfb", "cm-super", 0, 100);
        let bytes = vfs.read("/texlive/texmf-dist/fonts/type1/public/cm-super/sfrm1000.pfb").unwrap();
        assert!(bytes.is_empty());
        assert_eq!(vfs.pending_byte_ranges(), &[("cm-super".to_string(), 0, 100)]);
    }

    #[test]
    fn deferred_read_resolves_from_seeded_external_cache() {
        let mut vfs = Vfs::new(true);
        vfs.mount_deferred("/font.pfb", "cm-super", 0, 3);
        let mut seed = HashMap::new();
        seed.insert(("cm-super".to_string(), 0, 3), b"xyz".to_vec());
        vfs.seed_external_byte_ranges(seed);

        let bytes = vfs.read("/font.pfb").unwrap();
        assert_eq!(bytes, b"xyz");
        assert!(vfs.pending_byte_ranges().is_empty());
    }

    #[test]
    fn disabling_lazy_fs_mounts_everything_eager() {
        let body = Arc::new(b"aaaaabbbbb".to_vec());
        let mut vfs = Vfs::new(false);
        vfs.mount_bundle("core", body, &sample_global_manifest(), None);
        assert!(vfs.nodes.get("/texlive/texmf-dist/tex/latex/base/article.cls").unwrap().is_eager());
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut vfs = Vfs::new(true);
        vfs.mount(vfs.unified_map_path.clone(), b"% empty map\n".to_vec());
        vfs.finalize();
        let first = vfs.nodes.get(&format!("{}/ls-R", vfs.texroot)).cloned();
        vfs.finalize();
        let second = vfs.nodes.get(&format!("{}/ls-R", vfs.texroot)).cloned();
        match (first, second) {
            (Some(VfsContent::Eager(a)), Some(VfsContent::Eager(b))) => assert_eq!(a, b),
            _ => panic!("expected ls-R to be present after both finalize calls"),
        }
    }

    #[test]
    fn ls_r_lists_every_mounted_file_once() {
        let body = Arc::new(b"aaaaabbbbb".to_vec());
        let mut vfs = Vfs::new(true);
        vfs.mount_bundle("core", body, &sample_global_manifest(), None);
        vfs.finalize();
        let ls_r = vfs.nodes.get(&format!("{}/ls-R", vfs.texroot)).unwrap();
        let VfsContent::Eager(bytes) = ls_r else { panic!("ls-R missing") };
        let text = String::from_utf8_lossy(bytes);
        assert_eq!(text.matches("article.cls").count(), 1);
        assert_eq!(text.matches("book.cls").count(), 1);
    }

    #[test]
    fn bundle_entry_for_dynamic_manifest_fallback_is_prefixed_under_texmf_dist() {
        let manifest = BundleManifest {
            name: "dyn-bundle".into(),
            files: vec![BundleEntry {
                path: "tex/latex/foo".into(),
                name: "foo.sty".into(),
                start: 0,
                end: 3,
            }],
            total_size: 3,
        };
        let body = Arc::new(b"xyz".to_vec());
        let mut vfs = Vfs::new(true);
        let empty_global = GlobalFileManifest::default();
        vfs.mount_bundle("dyn-bundle", body, &empty_global, Some(&manifest));
        assert!(vfs.exists("/texlive/texmf-dist/tex/latex/foo/foo.sty"));
    }
}
