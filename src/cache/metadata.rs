//! Durable structured records, stored as JSON blobs inside named LMDB
//! databases (spec §4.1 "Persistent cache... durable store for structured
//! records"). Grounded on `heed`'s `SerdeJson<T>` codec, the same store used
//! by the `codesearch` example for its on-disk indices.

use heed::types::{SerdeJson, Str};
use heed::{Database, Env};
use serde::{Deserialize, Serialize};

use crate::error::FabricResult;

/// A resolved (or known-missing) package: where its files live, or that it
/// was looked up and found not to exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PackageRecord {
    /// Resolved into a bundle; no remote fetch needed.
    InBundle { bundle_id: String },
    /// Fetched from the remote proxy; `files` maps engine-relative paths to
    /// content stored in the blob store under the same key.
    Fetched { files: Vec<String> },
    /// The proxy was asked and returned not-found. Cached so a doomed lookup
    /// isn't retried every compile.
    NotFound,
}

/// A compiled PDF, keyed by `"{document_hash}_{engine}"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfRecord {
    pub byte_len: u64,
    pub produced_at_epoch_secs: u64,
}

/// The auxiliary-file set produced by a compile, keyed by the aux-cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuxRecord {
    /// Engine-relative path -> content, stored inline since aux files are
    /// small (`.aux`, `.toc`, `.bbl`, ...).
    pub files: std::collections::HashMap<String, Vec<u8>>,
}

/// A generated format file, keyed by `"{preamble_hash}_{engine}"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatRecord {
    pub byte_len: u64,
    pub engine: String,
}

/// The engine image itself, keyed by a constant (there is only one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineImageRecord {
    pub byte_len: u64,
    pub source_url: String,
}

pub(crate) const ENGINE_IMAGE_KEY: &str = "engine";

pub struct MetadataStore {
    packages: Database<Str, SerdeJson<PackageRecord>>,
    pdfs: Database<Str, SerdeJson<PdfRecord>>,
    aux: Database<Str, SerdeJson<AuxRecord>>,
    formats: Database<Str, SerdeJson<FormatRecord>>,
    engine_image: Database<Str, SerdeJson<EngineImageRecord>>,
    versions: Database<Str, heed::types::U32<heed::byteorder::NativeEndian>>,
}

impl MetadataStore {
    pub(crate) fn create(env: &Env, wtxn: &mut heed::RwTxn) -> FabricResult<Self> {
        Ok(Self {
            packages: env.create_database(wtxn, Some("packages"))?,
            pdfs: env.create_database(wtxn, Some("pdfs"))?,
            aux: env.create_database(wtxn, Some("aux"))?,
            formats: env.create_database(wtxn, Some("formats"))?,
            engine_image: env.create_database(wtxn, Some("engine_image"))?,
            versions: env.create_database(wtxn, Some("tier_versions"))?,
        })
    }

    pub fn tier_version(&self, rtxn: &heed::RoTxn, tier: crate::cache::version::CacheTier) -> FabricResult<Option<u32>> {
        Ok(self.versions.get(rtxn, tier.key())?)
    }

    pub fn set_tier_version(&self, wtxn: &mut heed::RwTxn, tier: crate::cache::version::CacheTier, version: u32) -> FabricResult<()> {
        self.versions.put(wtxn, tier.key(), &version)?;
        Ok(())
    }

    pub fn package(&self, rtxn: &heed::RoTxn, name: &str) -> FabricResult<Option<PackageRecord>> {
        Ok(self.packages.get(rtxn, name)?)
    }

    pub fn put_package(&self, wtxn: &mut heed::RwTxn, name: &str, record: &PackageRecord) -> FabricResult<()> {
        self.packages.put(wtxn, name, record)?;
        Ok(())
    }

    pub fn pdf(&self, rtxn: &heed::RoTxn, key: &str) -> FabricResult<Option<PdfRecord>> {
        Ok(self.pdfs.get(rtxn, key)?)
    }

    pub fn put_pdf(&self, wtxn: &mut heed::RwTxn, key: &str, record: &PdfRecord) -> FabricResult<()> {
        self.pdfs.put(wtxn, key, record)?;
        Ok(())
    }

    pub fn aux(&self, rtxn: &heed::RoTxn, key: &str) -> FabricResult<Option<AuxRecord>> {
        Ok(self.aux.get(rtxn, key)?)
    }

    pub fn put_aux(&self, wtxn: &mut heed::RwTxn, key: &str, record: &AuxRecord) -> FabricResult<()> {
        self.aux.put(wtxn, key, record)?;
        Ok(())
    }

    pub fn format(&self, rtxn: &heed::RoTxn, key: &str) -> FabricResult<Option<FormatRecord>> {
        Ok(self.formats.get(rtxn, key)?)
    }

    pub fn put_format(&self, wtxn: &mut heed::RwTxn, key: &str, record: &FormatRecord) -> FabricResult<()> {
        self.formats.put(wtxn, key, record)?;
        Ok(())
    }

    pub fn engine_image(&self, rtxn: &heed::RoTxn) -> FabricResult<Option<EngineImageRecord>> {
        Ok(self.engine_image.get(rtxn, ENGINE_IMAGE_KEY)?)
    }

    pub fn put_engine_image(&self, wtxn: &mut heed::RwTxn, record: &EngineImageRecord) -> FabricResult<()> {
        self.engine_image.put(wtxn, ENGINE_IMAGE_KEY, record)?;
        Ok(())
    }

    pub fn clear(&self, wtxn: &mut heed::RwTxn) -> FabricResult<()> {
        self.packages.clear(wtxn)?;
        self.pdfs.clear(wtxn)?;
        self.aux.clear(wtxn)?;
        self.formats.clear(wtxn)?;
        self.engine_image.clear(wtxn)?;
        Ok(())
    }

    // -- per-tier clears, used for scoped eviction (spec §4.1/§7: a version
    // mismatch on one tier evicts only that tier) --------------------------

    pub fn clear_packages(&self, wtxn: &mut heed::RwTxn) -> FabricResult<()> {
        self.packages.clear(wtxn)?;
        Ok(())
    }

    pub fn clear_pdfs(&self, wtxn: &mut heed::RwTxn) -> FabricResult<()> {
        self.pdfs.clear(wtxn)?;
        Ok(())
    }

    pub fn clear_aux(&self, wtxn: &mut heed::RwTxn) -> FabricResult<()> {
        self.aux.clear(wtxn)?;
        Ok(())
    }

    pub fn clear_formats(&self, wtxn: &mut heed::RwTxn) -> FabricResult<()> {
        self.formats.clear(wtxn)?;
        Ok(())
    }

    pub fn clear_engine_image(&self, wtxn: &mut heed::RwTxn) -> FabricResult<()> {
        self.engine_image.clear(wtxn)?;
        Ok(())
    }
}
