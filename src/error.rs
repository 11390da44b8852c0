//! List of possible errors.

use std::path::PathBuf;

use thiserror::Error;

pub type FabricResult<T> = Result<T, FabricError>;

/// Error kinds, matching the treatment table of the compile-retry orchestrator.
#[derive(Debug, Error)]
pub enum FabricError {
    /// A declared package has no entry in the package map and no fallback bundle.
    /// Not fatal by itself — the engine will surface a real missing-file error
    /// that the orchestrator can act on.
    #[error("package `{0}` could not be resolved to a bundle")]
    ResolveBlocked(String),

    /// Network or decode failure fetching a bundle body.
    #[error("fetching bundle `{0}` failed: {1}")]
    BundleFetchFailed(String, String),

    /// Package absent at both the archive and JSON proxy endpoints.
    #[error("package `{0}` not found at the proxy")]
    PackageFetchFailed(String),

    /// Corrupt gzip/xz payload.
    #[error("decompressing `{0}` failed: {1}")]
    DecompressFailed(String, String),

    /// Non-zero exit from the engine that diagnosis could not act on.
    #[error("engine exited with code {0:?}")]
    EngineFailed(Option<i32>),

    /// An iteration diagnosed nothing actionable.
    #[error("no progress possible, last exit code {0:?}")]
    NoProgress(Option<i32>),

    /// Retry count or wall-clock cap exceeded.
    #[error("{0}")]
    CapExceeded(&'static str),

    /// A cache tier's stored version is older than the code's version.
    #[error("cache `{0}` version mismatch: stored {1}, expected {2}")]
    CacheVersionMismatch(&'static str, u32, u32),

    /// A manifest or config file could not be parsed.
    #[error("malformed manifest `{0}`: {1}")]
    MalformedManifest(String, String),

    /// An input path escapes the project root, or otherwise cannot be resolved.
    #[error("path `{0}` could not be resolved")]
    InvalidPath(PathBuf),

    /// Wrapper around [std::io::Error].
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Boxed `ureq::Error` because it's too large to store inline.
    #[error("http: {0}")]
    Http(Box<ureq::Error>),

    /// Wrapper around [serde_json::Error].
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapper around a `heed` (LMDB) failure from the durable cache tiers.
    #[error("durable store: {0}")]
    Lmdb(#[from] heed::Error),
}

impl From<ureq::Error> for FabricError {
    fn from(value: ureq::Error) -> Self {
        Self::Http(Box::new(value))
    }
}
