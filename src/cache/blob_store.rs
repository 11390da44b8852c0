//! Durable raw-byte storage: bundle bodies, format files, compiled PDFs and
//! fetched package file contents, all keyed by plain string keys in one LMDB
//! database separate from the structured-record databases in
//! [`metadata`](crate::cache::metadata).

use heed::types::{Bytes, Str};
use heed::{Database, Env};

use crate::error::FabricResult;

pub struct BlobStore {
    blobs: Database<Str, Bytes>,
}

impl BlobStore {
    pub(crate) fn create(env: &Env, wtxn: &mut heed::RwTxn) -> FabricResult<Self> {
        Ok(Self {
            blobs: env.create_database(wtxn, Some("blobs"))?,
        })
    }

    pub fn get(&self, rtxn: &heed::RoTxn, key: &str) -> FabricResult<Option<Vec<u8>>> {
        Ok(self.blobs.get(rtxn, key)?.map(|b| b.to_vec()))
    }

    pub fn put(&self, wtxn: &mut heed::RwTxn, key: &str, bytes: &[u8]) -> FabricResult<()> {
        self.blobs.put(wtxn, key, bytes)?;
        Ok(())
    }

    pub fn delete(&self, wtxn: &mut heed::RwTxn, key: &str) -> FabricResult<bool> {
        Ok(self.blobs.delete(wtxn, key)?)
    }

    pub fn clear(&self, wtxn: &mut heed::RwTxn) -> FabricResult<()> {
        self.blobs.clear(wtxn)?;
        Ok(())
    }

    /// Deletes every key starting with `prefix`, leaving the rest of the
    /// store untouched. Used for per-tier eviction (spec §4.1/§7 — a version
    /// mismatch on one tier must not disturb the others).
    pub fn clear_prefix(&self, wtxn: &mut heed::RwTxn, prefix: &str) -> FabricResult<()> {
        let matching: Vec<String> = self
            .blobs
            .iter(wtxn)?
            .filter_map(Result::ok)
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.to_string())
            .collect();
        for key in matching {
            self.blobs.delete(wtxn, &key)?;
        }
        Ok(())
    }
}

/// Blob-store key for a bundle body.
pub fn bundle_key(bundle_id: &str) -> String {
    format!("bundle:{bundle_id}")
}

/// Blob-store key for a fetched package file's content.
pub fn package_file_key(package: &str, engine_relative_path: &str) -> String {
    format!("pkgfile:{package}:{engine_relative_path}")
}

/// Blob-store key for a generated format file.
pub fn format_key(preamble_hash: &str, engine: &str) -> String {
    format!("fmt:{preamble_hash}_{engine}")
}

/// Blob-store key for a compiled PDF.
pub fn pdf_key(document_hash: &str, engine: &str) -> String {
    format!("pdf:{document_hash}_{engine}")
}

/// Blob-store key for the engine image.
pub fn engine_image_key() -> &'static str {
    "wasm:engine"
}
