//! The multi-tier persistent cache (spec §4.1, component C1): a memory
//! overlay in front of an LMDB-backed durable store, versioned per tier so a
//! code upgrade that changes a wire format evicts only what it must.

pub mod blob_store;
pub mod memory;
pub mod metadata;
pub mod version;

use std::path::Path;
use std::sync::Arc;

use heed::EnvOpenOptions;

use crate::cache::blob_store::BlobStore;
use crate::cache::memory::MemoryOverlay;
use crate::cache::metadata::{AuxRecord, EngineImageRecord, FormatRecord, MetadataStore, PackageRecord, PdfRecord};
use crate::cache::version::CacheTier;
use crate::error::FabricResult;

/// 1 GiB. Bundles and package archives routinely run tens of megabytes;
/// LMDB's map size is a virtual-address reservation, not allocated up front.
const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;

/// Ties the memory overlay and the durable LMDB store together behind one
/// API, applying tier versioning on open and exposing a get-or-fetch shaped
/// interface to the bundle fetcher (C2), package fetcher (C3), format cache
/// (C7) and orchestrator (C6).
pub struct PersistentCache {
    memory: MemoryOverlay,
    env: heed::Env,
    blobs: BlobStore,
    metadata: MetadataStore,
}

impl PersistentCache {
    pub fn open(cache_dir: &Path) -> FabricResult<Self> {
        std::fs::create_dir_all(cache_dir)?;

        // Safety: `EnvOpenOptions::open` is unsafe because growing the map
        // after other processes have mapped it at a smaller size is UB on
        // some platforms; we always open with the same fixed size.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(DEFAULT_MAP_SIZE)
                .max_dbs(8)
                .open(cache_dir)?
        };

        let mut wtxn = env.write_txn()?;
        let blobs = BlobStore::create(&env, &mut wtxn)?;
        let metadata = MetadataStore::create(&env, &mut wtxn)?;
        wtxn.commit()?;

        let cache = Self {
            memory: MemoryOverlay::default(),
            env,
            blobs,
            metadata,
        };
        cache.apply_tier_versions()?;
        Ok(cache)
    }

    /// Evicts any tier whose stored version integer is older than the code's,
    /// then re-stamps it. A mismatch means the wire format or key scheme
    /// changed incompatibly; there is no migration path, only eviction.
    fn apply_tier_versions(&self) -> FabricResult<()> {
        let mut wtxn = self.env.write_txn()?;
        for tier in CacheTier::ALL {
            let stored = self.metadata.tier_version(&wtxn, tier)?;
            let current = tier.code_version();
            if stored != Some(current) {
                self.evict_tier(&mut wtxn, tier)?;
                self.metadata.set_tier_version(&mut wtxn, tier, current)?;
            }
        }
        wtxn.commit()?;
        Ok(())
    }

    /// Evicts only the databases/keys owned by `tier` (spec §4.1/§7 — "the
    /// tier is cleared and re-stamped"), leaving the other tiers' durable
    /// data in place.
    fn evict_tier(&self, wtxn: &mut heed::RwTxn, tier: CacheTier) -> FabricResult<()> {
        match tier {
            CacheTier::Bundle => {
                self.blobs.clear_prefix(wtxn, "bundle:")?;
            }
            CacheTier::Ctan => {
                self.blobs.clear_prefix(wtxn, "pkgfile:")?;
                self.metadata.clear_packages(wtxn)?;
            }
            CacheTier::Wasm => {
                self.blobs.delete(wtxn, blob_store::engine_image_key())?;
                self.metadata.clear_engine_image(wtxn)?;
            }
            CacheTier::Aux => {
                self.metadata.clear_aux(wtxn)?;
            }
            CacheTier::Doc => {
                self.blobs.clear_prefix(wtxn, "pdf:")?;
                self.metadata.clear_pdfs(wtxn)?;
            }
            CacheTier::Fmt => {
                self.blobs.clear_prefix(wtxn, "fmt:")?;
                self.metadata.clear_formats(wtxn)?;
            }
        }
        Ok(())
    }

    // -- bundles --------------------------------------------------------

    pub fn bundle_body(&self, bundle_id: &str) -> FabricResult<Option<Arc<Vec<u8>>>> {
        if let Some(hit) = self.memory.bundle(bundle_id) {
            return Ok(Some(hit));
        }
        let rtxn = self.env.read_txn()?;
        let key = blob_store::bundle_key(bundle_id);
        if let Some(bytes) = self.blobs.get(&rtxn, &key)? {
            let bytes = Arc::new(bytes);
            self.memory.put_bundle(bundle_id.to_string(), Arc::clone(&bytes));
            return Ok(Some(bytes));
        }
        Ok(None)
    }

    pub fn store_bundle_body(&self, bundle_id: &str, bytes: Vec<u8>) -> FabricResult<Arc<Vec<u8>>> {
        let key = blob_store::bundle_key(bundle_id);
        let mut wtxn = self.env.write_txn()?;
        self.blobs.put(&mut wtxn, &key, &bytes)?;
        wtxn.commit()?;
        let bytes = Arc::new(bytes);
        self.memory.put_bundle(bundle_id.to_string(), Arc::clone(&bytes));
        Ok(bytes)
    }

    // -- packages ---------------------------------------------------------

    pub fn package_record(&self, name: &str) -> FabricResult<Option<Arc<PackageRecord>>> {
        if let Some(hit) = self.memory.package(name) {
            return Ok(Some(hit));
        }
        let rtxn = self.env.read_txn()?;
        if let Some(record) = self.metadata.package(&rtxn, name)? {
            let record = Arc::new(record);
            self.memory.put_package(name.to_string(), Arc::clone(&record));
            return Ok(Some(record));
        }
        Ok(None)
    }

    pub fn store_package_record(&self, name: &str, record: PackageRecord) -> FabricResult<()> {
        let mut wtxn = self.env.write_txn()?;
        self.metadata.put_package(&mut wtxn, name, &record)?;
        wtxn.commit()?;
        self.memory.put_package(name.to_string(), Arc::new(record));
        Ok(())
    }

    pub fn mark_package_not_found(&self, name: &str) -> FabricResult<()> {
        self.store_package_record(name, PackageRecord::NotFound)
    }

    pub fn package_file(&self, package: &str, engine_relative_path: &str) -> FabricResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn()?;
        let key = blob_store::package_file_key(package, engine_relative_path);
        self.blobs.get(&rtxn, &key)
    }

    pub fn store_package_file(&self, package: &str, engine_relative_path: &str, bytes: &[u8]) -> FabricResult<()> {
        let key = blob_store::package_file_key(package, engine_relative_path);
        let mut wtxn = self.env.write_txn()?;
        self.blobs.put(&mut wtxn, &key, bytes)?;
        wtxn.commit()?;
        Ok(())
    }

    // -- pdfs ---------------------------------------------------------------

    pub fn pdf(&self, document_hash: &str, engine: &str) -> FabricResult<Option<Arc<Vec<u8>>>> {
        let key = format!("{document_hash}_{engine}");
        if let Some(hit) = self.memory.pdf(&key) {
            return Ok(Some(hit));
        }
        let rtxn = self.env.read_txn()?;
        let blob_key = blob_store::pdf_key(document_hash, engine);
        if self.metadata.pdf(&rtxn, &key)?.is_some() {
            if let Some(bytes) = self.blobs.get(&rtxn, &blob_key)? {
                let bytes = Arc::new(bytes);
                self.memory.put_pdf(key, Arc::clone(&bytes));
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }

    pub fn store_pdf(&self, document_hash: &str, engine: &str, bytes: Vec<u8>) -> FabricResult<Arc<Vec<u8>>> {
        let key = format!("{document_hash}_{engine}");
        let blob_key = blob_store::pdf_key(document_hash, engine);
        let record = PdfRecord {
            byte_len: bytes.len() as u64,
            produced_at_epoch_secs: 0,
        };
        let mut wtxn = self.env.write_txn()?;
        self.blobs.put(&mut wtxn, &blob_key, &bytes)?;
        self.metadata.put_pdf(&mut wtxn, &key, &record)?;
        wtxn.commit()?;
        let bytes = Arc::new(bytes);
        self.memory.put_pdf(key, Arc::clone(&bytes));
        Ok(bytes)
    }

    // -- aux ------------------------------------------------------------

    pub fn aux(&self, aux_key: &str) -> FabricResult<Option<Arc<AuxRecord>>> {
        if let Some(hit) = self.memory.aux(aux_key) {
            return Ok(Some(hit));
        }
        let rtxn = self.env.read_txn()?;
        if let Some(record) = self.metadata.aux(&rtxn, aux_key)? {
            let record = Arc::new(record);
            self.memory.put_aux(aux_key.to_string(), Arc::clone(&record));
            return Ok(Some(record));
        }
        Ok(None)
    }

    pub fn store_aux(&self, aux_key: &str, record: AuxRecord) -> FabricResult<()> {
        let mut wtxn = self.env.write_txn()?;
        self.metadata.put_aux(&mut wtxn, aux_key, &record)?;
        wtxn.commit()?;
        self.memory.put_aux(aux_key.to_string(), Arc::new(record));
        Ok(())
    }

    // -- format files -----------------------------------------------------

    pub fn format(&self, preamble_hash: &str, engine: &str) -> FabricResult<Option<Arc<Vec<u8>>>> {
        let key = format!("{preamble_hash}_{engine}");
        if let Some(hit) = self.memory.format(&key) {
            return Ok(Some(hit));
        }
        let rtxn = self.env.read_txn()?;
        let blob_key = blob_store::format_key(preamble_hash, engine);
        if self.metadata.format(&rtxn, &key)?.is_some() {
            if let Some(bytes) = self.blobs.get(&rtxn, &blob_key)? {
                let bytes = Arc::new(bytes);
                self.memory.put_format(key, Arc::clone(&bytes));
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }

    pub fn store_format(&self, preamble_hash: &str, engine: &str, bytes: Vec<u8>) -> FabricResult<Arc<Vec<u8>>> {
        let key = format!("{preamble_hash}_{engine}");
        let blob_key = blob_store::format_key(preamble_hash, engine);
        let record = FormatRecord {
            byte_len: bytes.len() as u64,
            engine: engine.to_string(),
        };
        let mut wtxn = self.env.write_txn()?;
        self.blobs.put(&mut wtxn, &blob_key, &bytes)?;
        self.metadata.put_format(&mut wtxn, &key, &record)?;
        wtxn.commit()?;
        let bytes = Arc::new(bytes);
        self.memory.put_format(key, Arc::clone(&bytes));
        Ok(bytes)
    }

    // -- engine image -----------------------------------------------------

    pub fn engine_image(&self) -> FabricResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn()?;
        if self.metadata.engine_image(&rtxn)?.is_some() {
            return self.blobs.get(&rtxn, blob_store::engine_image_key());
        }
        Ok(None)
    }

    pub fn store_engine_image(&self, bytes: &[u8], source_url: &str) -> FabricResult<()> {
        let record = EngineImageRecord {
            byte_len: bytes.len() as u64,
            source_url: source_url.to_string(),
        };
        let mut wtxn = self.env.write_txn()?;
        self.blobs.put(&mut wtxn, blob_store::engine_image_key(), bytes)?;
        self.metadata.put_engine_image(&mut wtxn, &record)?;
        wtxn.commit()?;
        Ok(())
    }

    /// Wipes every durable and in-memory tier. Used by `TexFabric::clear_cache`.
    pub fn clear(&self) -> FabricResult<()> {
        let mut wtxn = self.env.write_txn()?;
        self.blobs.clear(&mut wtxn)?;
        self.metadata.clear(&mut wtxn)?;
        for tier in CacheTier::ALL {
            self.metadata.set_tier_version(&mut wtxn, tier, tier.code_version())?;
        }
        wtxn.commit()?;
        self.memory.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_round_trips_through_durable_store() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::open(dir.path()).unwrap();
        assert!(cache.bundle_body("core").unwrap().is_none());

        let stored = cache.store_bundle_body("core", b"hello".to_vec()).unwrap();
        assert_eq!(stored.as_slice(), b"hello");
        assert_eq!(cache.bundle_body("core").unwrap().unwrap().as_slice(), b"hello");
    }

    #[test]
    fn reopening_reads_back_durable_data_after_memory_is_cold() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = PersistentCache::open(dir.path()).unwrap();
            cache.store_bundle_body("core", b"persisted".to_vec()).unwrap();
        }
        let reopened = PersistentCache::open(dir.path()).unwrap();
        assert_eq!(
            reopened.bundle_body("core").unwrap().unwrap().as_slice(),
            b"persisted"
        );
    }

    #[test]
    fn package_not_found_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::open(dir.path()).unwrap();
        cache.mark_package_not_found("nonexistent-pkg").unwrap();
        match cache.package_record("nonexistent-pkg").unwrap().unwrap().as_ref() {
            PackageRecord::NotFound => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn pdf_and_format_caches_are_keyed_by_engine() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::open(dir.path()).unwrap();
        cache.store_pdf("dochash", "pdflatex", b"%PDF-pdflatex".to_vec()).unwrap();
        cache.store_pdf("dochash", "xelatex", b"%PDF-xelatex".to_vec()).unwrap();
        assert_eq!(
            cache.pdf("dochash", "pdflatex").unwrap().unwrap().as_slice(),
            b"%PDF-pdflatex"
        );
        assert_eq!(
            cache.pdf("dochash", "xelatex").unwrap().unwrap().as_slice(),
            b"%PDF-xelatex"
        );
    }

    #[test]
    fn evicting_a_stale_tier_leaves_other_tiers_intact() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = PersistentCache::open(dir.path()).unwrap();
            cache.store_bundle_body("core", b"bundle-bytes".to_vec()).unwrap();
            cache.store_pdf("dochash", "pdflatex", b"pdf-bytes".to_vec()).unwrap();
        }
        {
            // Force just the bundle tier's stored version stale; reopening
            // should evict only bundle data.
            let cache = PersistentCache::open(dir.path()).unwrap();
            let mut wtxn = cache.env.write_txn().unwrap();
            cache.metadata.set_tier_version(&mut wtxn, CacheTier::Bundle, 0).unwrap();
            wtxn.commit().unwrap();
        }

        let reopened = PersistentCache::open(dir.path()).unwrap();
        assert!(reopened.bundle_body("core").unwrap().is_none());
        assert_eq!(
            reopened.pdf("dochash", "pdflatex").unwrap().unwrap().as_slice(),
            b"pdf-bytes"
        );
    }

    #[test]
    fn clear_wipes_every_tier() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::open(dir.path()).unwrap();
        cache.store_bundle_body("core", b"x".to_vec()).unwrap();
        cache.store_pdf("a", "pdflatex", b"y".to_vec()).unwrap();
        cache.clear().unwrap();
        assert!(cache.bundle_body("core").unwrap().is_none());
        assert!(cache.pdf("a", "pdflatex").unwrap().is_none());
    }
}
