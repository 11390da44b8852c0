//! Bundle Fetcher (spec §4.6, component C2): retrieves bundle bodies and
//! manifests over HTTP, decompresses them, and serves byte ranges.
//!
//! Mirrors the teacher's `package::download_package` shape (HTTP via `ureq`,
//! decompress via `flate2`, cache the result on disk) but for whole-bundle
//! and byte-range gets rather than a typst package tarball.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;

use crate::bundle::manifest::{
    BundleDependencyGraph, BundleManifest, BundleRegistry, GlobalFileManifest, PackageDependencyGraph,
    PackageMap,
};
use crate::cache::PersistentCache;
use crate::error::{FabricError, FabricResult};

const BYTE_RANGE_TIMEOUT: Duration = Duration::from_secs(30);
const BUNDLE_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

fn agent_with_timeout(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

/// Retrieves bundle data and manifests from `bundles_url`, decompressing and
/// caching through the shared [`PersistentCache`].
pub struct BundleFetcher {
    bundles_url: String,
    cache: Arc<PersistentCache>,
}

impl BundleFetcher {
    pub fn new(bundles_url: impl Into<String>, cache: Arc<PersistentCache>) -> Self {
        Self {
            bundles_url: bundles_url.into(),
            cache,
        }
    }

    /// Fetches `<id>.meta.json` and parses it. Manifests are small and not
    /// themselves cached in the durable tiers — only bodies and files are.
    pub fn fetch_manifest(&self, bundle_id: &str) -> FabricResult<BundleManifest> {
        let url = format!("{}/{bundle_id}.meta.json", self.bundles_url);
        let agent = agent_with_timeout(BUNDLE_FETCH_TIMEOUT);
        let response = agent
            .get(&url)
            .call()
            .map_err(|e| FabricError::BundleFetchFailed(bundle_id.to_string(), e.to_string()))?;
        let mut buf = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut buf)
            .map_err(|e| FabricError::BundleFetchFailed(bundle_id.to_string(), e.to_string()))?;
        BundleManifest::from_json(&buf)
    }

    /// Fetches and decompresses `<id>.data.gz`, or returns the cached body.
    /// Memory and blob-store writes only happen after a successful
    /// decompression, so a truncated transfer can never poison the cache
    /// (spec §5 "Failure isolation").
    pub fn fetch_body(&self, bundle_id: &str) -> FabricResult<Arc<Vec<u8>>> {
        if let Some(cached) = self.cache.bundle_body(bundle_id)? {
            return Ok(cached);
        }

        let url = format!("{}/{bundle_id}.data.gz", self.bundles_url);
        let agent = agent_with_timeout(BUNDLE_FETCH_TIMEOUT);
        let response = agent
            .get(&url)
            .call()
            .map_err(|e| FabricError::BundleFetchFailed(bundle_id.to_string(), e.to_string()))?;

        // Brotli-aware transports decompress in flight and report it via this
        // header; anything else arrives gzip-compressed and needs decoding here.
        let already_decoded = response
            .header("Content-Encoding")
            .map(|enc| enc.eq_ignore_ascii_case("br"))
            .unwrap_or(false);

        let mut raw = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut raw)
            .map_err(|e| FabricError::BundleFetchFailed(bundle_id.to_string(), e.to_string()))?;

        let body = if already_decoded {
            raw
        } else {
            let mut decoder = GzDecoder::new(raw.as_slice());
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| FabricError::DecompressFailed(bundle_id.to_string(), e.to_string()))?;
            out
        };

        self.cache.store_bundle_body(bundle_id, body)
    }

    /// Issues an HTTP Range request against the uncompressed `<id>.raw`
    /// endpoint. The caller is responsible for storing the result in the
    /// external byte-range cache keyed by `(bundle_id, start, end)`.
    pub fn fetch_byte_range(&self, bundle_id: &str, start: u64, end: u64) -> FabricResult<Vec<u8>> {
        let url = format!("{}/{bundle_id}.raw", self.bundles_url);
        let agent = agent_with_timeout(BYTE_RANGE_TIMEOUT);
        let range = format!("bytes={start}-{}", end.saturating_sub(1));
        let response = agent
            .get(&url)
            .set("Range", &range)
            .call()
            .map_err(|e| FabricError::BundleFetchFailed(bundle_id.to_string(), e.to_string()))?;
        let mut buf = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut buf)
            .map_err(|e| FabricError::BundleFetchFailed(bundle_id.to_string(), e.to_string()))?;
        Ok(buf)
    }
}

/// The five global manifests loaded once at `init()` (spec §6): registry,
/// package map, file manifest, bundle dependency graph, and the optional
/// package dependency graph.
pub struct GlobalManifests {
    pub registry: BundleRegistry,
    pub package_map: PackageMap,
    pub file_manifest: GlobalFileManifest,
    pub bundle_deps: BundleDependencyGraph,
    pub package_deps: Option<PackageDependencyGraph>,
}

impl GlobalManifests {
    /// Fetches all five manifest files from `bundles_url`. `package-deps.json`
    /// is optional; a 404 there is not an error.
    pub fn fetch(bundles_url: &str) -> FabricResult<Self> {
        let agent = agent_with_timeout(BUNDLE_FETCH_TIMEOUT);

        let registry = BundleRegistry::from_json(&get_bytes(&agent, bundles_url, "registry.json")?)?;
        let package_map = PackageMap::from_json(&get_bytes(&agent, bundles_url, "package-map.json")?)?;
        let file_manifest =
            GlobalFileManifest::from_json(&get_bytes(&agent, bundles_url, "file-manifest.json")?)?;
        let bundle_deps =
            BundleDependencyGraph::from_json(&get_bytes(&agent, bundles_url, "bundle-deps.json")?)?;
        bundle_deps.check_deferred_conflicts();

        let package_deps = match get_bytes(&agent, bundles_url, "package-deps.json") {
            Ok(bytes) => Some(PackageDependencyGraph::from_json(&bytes)?),
            Err(_) => None,
        };

        Ok(Self {
            registry,
            package_map,
            file_manifest,
            bundle_deps,
            package_deps,
        })
    }
}

fn get_bytes(agent: &ureq::Agent, base: &str, name: &str) -> FabricResult<Vec<u8>> {
    let url = format!("{base}/{name}");
    let response = agent
        .get(&url)
        .call()
        .map_err(|e| FabricError::BundleFetchFailed(name.to_string(), e.to_string()))?;
    let mut buf = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut buf)
        .map_err(|e| FabricError::BundleFetchFailed(name.to_string(), e.to_string()))?;
    Ok(buf)
}
