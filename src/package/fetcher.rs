//! Package Fetcher (spec §4.6, component C3): resolves a LaTeX package name
//! not covered by a bundle against the remote proxy.
//!
//! Grounded on the teacher's `package::download_package`/`create_http_agent`
//! (HTTP via `ureq`, disk cache keyed by spec/version) but reshaped for the
//! proxy's three endpoints and the not-found negative cache from spec §4.1.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use serde::Deserialize;

use crate::cache::metadata::PackageRecord;
use crate::cache::PersistentCache;
use crate::error::{FabricError, FabricResult};
use crate::package::ustar;

const PACKAGE_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(PACKAGE_FETCH_TIMEOUT).build()
}

/// Files resolved for a package: engine-namespace VFS path -> content.
#[derive(Debug, Clone, Default)]
pub struct PackageFiles {
    pub files: HashMap<String, Vec<u8>>,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FetchJsonFile {
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FetchJsonResponse {
    #[serde(default)]
    files: HashMap<String, FetchJsonFile>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ContainerResponse {
    contained_in: Option<String>,
}

pub struct PackageFetcher {
    ctan_proxy_url: String,
    cache: Arc<PersistentCache>,
}

impl PackageFetcher {
    pub fn new(ctan_proxy_url: impl Into<String>, cache: Arc<PersistentCache>) -> Self {
        Self {
            ctan_proxy_url: ctan_proxy_url.into(),
            cache,
        }
    }

    /// Resolves `package` to a file set, consulting (and updating) the
    /// not-found negative cache first. Returns `Ok(None)` if the package
    /// cannot be found anywhere, after persisting a `not_found` marker.
    pub fn fetch(&self, package: &str) -> FabricResult<Option<PackageFiles>> {
        if let Some(record) = self.cache.package_record(package)? {
            if matches!(record.as_ref(), PackageRecord::NotFound) {
                return Ok(None);
            }
        }

        match self.fetch_uncached(package)? {
            Some(result) => {
                self.persist(package, &result)?;
                Ok(Some(result))
            }
            None => {
                // A single failed container-resolution retry is allowed
                // before giving up, so try it before marking not-found.
                if let Some(contained_in) = self.lookup_container(package)? {
                    if contained_in != package {
                        if let Some(result) = self.fetch_uncached(&contained_in)? {
                            self.persist(package, &result)?;
                            return Ok(Some(result));
                        }
                    }
                }
                self.cache.mark_package_not_found(package)?;
                Ok(None)
            }
        }
    }

    fn persist(&self, package: &str, result: &PackageFiles) -> FabricResult<()> {
        for (path, bytes) in &result.files {
            self.cache.store_package_file(package, path, bytes)?;
        }
        self.cache.store_package_record(
            package,
            PackageRecord::Fetched {
                files: result.files.keys().cloned().collect(),
            },
        )
    }

    fn fetch_uncached(&self, package: &str) -> FabricResult<Option<PackageFiles>> {
        if let Some(result) = self.fetch_archive(package)? {
            return Ok(Some(result));
        }
        self.fetch_json(package)
    }

    /// `GET /api/texlive/<pkg>` — XZ-compressed TAR.
    fn fetch_archive(&self, package: &str) -> FabricResult<Option<PackageFiles>> {
        let url = format!("{}/api/texlive/{package}", self.ctan_proxy_url);
        let response = match agent().get(&url).call() {
            Ok(r) => r,
            Err(ureq::Error::Status(404, _)) => return Ok(None),
            Err(e) => return Err(FabricError::PackageFetchFailed(format!("{package}: {e}"))),
        };

        let mut compressed = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut compressed)
            .map_err(|e| FabricError::PackageFetchFailed(e.to_string()))?;

        let mut tar_bytes = Vec::new();
        lzma_rs::xz_decompress(&mut compressed.as_slice(), &mut tar_bytes)
            .map_err(|e| FabricError::DecompressFailed(package.to_string(), e.to_string()))?;

        let entries = ustar::extract_filtered(&tar_bytes);
        let mut files = HashMap::with_capacity(entries.len());
        for entry in entries {
            let vfs_path = ustar::map_into_namespace(&entry.tar_path, package);
            files.insert(vfs_path, entry.bytes);
        }

        if files.is_empty() {
            return Ok(None);
        }
        Ok(Some(PackageFiles { files, dependencies: Vec::new() }))
    }

    /// `GET /api/fetch/<pkg>` — JSON `{files, dependencies}`.
    fn fetch_json(&self, package: &str) -> FabricResult<Option<PackageFiles>> {
        let url = format!("{}/api/fetch/{package}", self.ctan_proxy_url);
        let response = match agent().get(&url).call() {
            Ok(r) => r,
            Err(ureq::Error::Status(404, _)) => return Ok(None),
            Err(e) => return Err(FabricError::PackageFetchFailed(format!("{package}: {e}"))),
        };

        let parsed: FetchJsonResponse = response
            .into_json()
            .map_err(|e| FabricError::PackageFetchFailed(e.to_string()))?;

        if parsed.error.is_some() {
            return Ok(None);
        }

        let mut files = HashMap::with_capacity(parsed.files.len());
        for (path, file) in parsed.files {
            let bytes = match file.encoding.as_deref() {
                Some("base64") => base64::engine::general_purpose::STANDARD
                    .decode(file.content.as_bytes())
                    .map_err(|e| FabricError::PackageFetchFailed(e.to_string()))?,
                _ => file.content.into_bytes(),
            };
            files.insert(path, bytes);
        }

        if files.is_empty() {
            return Ok(None);
        }
        Ok(Some(PackageFiles {
            files,
            dependencies: parsed.dependencies,
        }))
    }

    /// `GET /api/ctan-pkg/<pkg>` — looks up the real archive name when a
    /// direct fetch fails.
    fn lookup_container(&self, package: &str) -> FabricResult<Option<String>> {
        let url = format!("{}/api/ctan-pkg/{package}", self.ctan_proxy_url);
        let response = match agent().get(&url).call() {
            Ok(r) => r,
            Err(_) => return Ok(None),
        };
        let parsed: ContainerResponse = response.into_json().unwrap_or_default();
        Ok(parsed.contained_in)
    }
}
