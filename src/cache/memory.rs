//! Per-tier memory overlay in front of the durable stores.
//!
//! PDFs use a bounded [`moka`] cache (the spec's "LRU-style bound for PDFs at
//! >= 10 entries"); packages/formats/bundle bodies use unbounded [`dashmap`]
//! maps, both crates already pack-attested as the caching choice of the
//! `codesearch` example (`moka`/`dashmap` in its `Cargo.toml`).

use std::sync::Arc;

use dashmap::DashMap;
use moka::sync::Cache as MokaCache;

use crate::cache::metadata::{AuxRecord, PackageRecord};

const MIN_PDF_CACHE_ENTRIES: u64 = 10;

#[derive(Clone)]
pub struct MemoryOverlay {
    /// Keyed by `"{document_hash}_{engine}"`.
    pdfs: MokaCache<String, Arc<Vec<u8>>>,
    /// Keyed by bundle id. Retained for the process lifetime per spec's
    /// bundle lifecycle (loaded on first use, retained until process exit or
    /// explicit cache clear) — `dashmap` rather than `moka` precisely because
    /// nothing should be evicted here short of an explicit clear.
    bundles: DashMap<String, Arc<Vec<u8>>>,
    /// Keyed by package name.
    packages: DashMap<String, Arc<PackageRecord>>,
    /// Keyed by `"{preamble_hash}_{engine}"`.
    formats: DashMap<String, Arc<Vec<u8>>>,
    /// Keyed by the aux-cache key (`"{preamble_hash}"` or `"{preamble_hash}_fmt"`).
    aux: DashMap<String, Arc<AuxRecord>>,
}

impl Default for MemoryOverlay {
    fn default() -> Self {
        Self {
            pdfs: MokaCache::builder()
                .max_capacity(MIN_PDF_CACHE_ENTRIES.max(128))
                .build(),
            bundles: DashMap::new(),
            packages: DashMap::new(),
            formats: DashMap::new(),
            aux: DashMap::new(),
        }
    }
}

impl MemoryOverlay {
    pub fn pdf(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        self.pdfs.get(key)
    }

    pub fn put_pdf(&self, key: String, bytes: Arc<Vec<u8>>) {
        self.pdfs.insert(key, bytes);
    }

    pub fn bundle(&self, id: &str) -> Option<Arc<Vec<u8>>> {
        self.bundles.get(id).map(|r| Arc::clone(r.value()))
    }

    pub fn put_bundle(&self, id: String, bytes: Arc<Vec<u8>>) {
        self.bundles.insert(id, bytes);
    }

    pub fn package(&self, name: &str) -> Option<Arc<PackageRecord>> {
        self.packages.get(name).map(|r| Arc::clone(r.value()))
    }

    pub fn put_package(&self, name: String, record: Arc<PackageRecord>) {
        self.packages.insert(name, record);
    }

    pub fn format(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        self.formats.get(key).map(|r| Arc::clone(r.value()))
    }

    pub fn put_format(&self, key: String, bytes: Arc<Vec<u8>>) {
        self.formats.insert(key, bytes);
    }

    pub fn aux(&self, key: &str) -> Option<Arc<AuxRecord>> {
        self.aux.get(key).map(|r| Arc::clone(r.value()))
    }

    pub fn put_aux(&self, key: String, record: Arc<AuxRecord>) {
        self.aux.insert(key, record);
    }

    pub fn clear(&self) {
        self.pdfs.invalidate_all();
        self.bundles.clear();
        self.packages.clear();
        self.formats.clear();
        self.aux.clear();
    }
}
