//! Compile Orchestrator (spec §4.4, component C6): drives resolver → VFS →
//! engine, diagnoses missing-file failures from the engine's own log, fetches
//! whatever is missing, and retries.

mod diagnosis;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::bundle::fetcher::{BundleFetcher, GlobalManifests};
use crate::cache::metadata::AuxRecord;
use crate::cache::PersistentCache;
use crate::config::Config;
use crate::engine::{self, Engine, EngineFactory, EngineOutcome};
use crate::error::{FabricError, FabricResult};
use crate::format_cache::{self, FormatCache};
use crate::hash::djb2_hex;
use crate::package::fetcher::PackageFetcher;
use crate::resolver::{detect_engine, Resolver};
use crate::vfs::Vfs;

const MAX_RETRIES: u32 = 10;
const COMPILE_WALL_CLOCK_CAP: Duration = Duration::from_secs(120);
const FORMAT_GENERATION_CAP: Duration = Duration::from_secs(300);

/// A single package is allowed to fail once (the container-resolution retry
/// inside the package fetcher); a second failure in the same session is not
/// retried a third time (spec §4.4 "Bounds").
const MAX_PACKAGE_ATTEMPTS: u32 = 2;

/// Caller-supplied extras for one `compile` call.
#[derive(Default)]
pub struct CompileRequest<'a> {
    pub engine: Option<&'a str>,
    pub use_cache: bool,
    pub additional_files: HashMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct CompileStats {
    pub attempts: u32,
    pub bytes_read: u64,
    pub used_cached_format: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub success: bool,
    pub pdf: Option<Vec<u8>>,
    pub exit_code: Option<i32>,
    pub log: Option<String>,
    pub stats: CompileStats,
    pub cached: bool,
}

/// State accumulated across retries within one `compile`/`generate_format`
/// call — re-mounted fresh into a new [`Vfs`] every iteration, per spec §5
/// "the engine context's bundle-body map is the only shared data structure
/// across retries".
#[derive(Default)]
struct RetrySession {
    resident_bundles: HashMap<String, Arc<Vec<u8>>>,
    external_byte_ranges: HashMap<(String, u64, u64), Vec<u8>>,
    package_files: HashMap<String, Vec<u8>>,
    attempted_packages: HashSet<String>,
    package_attempts: HashMap<String, u32>,
}

pub struct Orchestrator {
    config: Config,
    cache: Arc<PersistentCache>,
    manifests: GlobalManifests,
    bundle_fetcher: BundleFetcher,
    package_fetcher: PackageFetcher,
    format_cache: FormatCache,
    engine_factory: Arc<dyn EngineFactory>,
    engine_lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(config: Config, manifests: GlobalManifests, engine_factory: Arc<dyn EngineFactory>) -> FabricResult<Self> {
        let cache = Arc::new(PersistentCache::open(&config.cache_dir)?);
        let bundle_fetcher = BundleFetcher::new(config.bundles_url.clone(), Arc::clone(&cache));
        let package_fetcher = PackageFetcher::new(config.ctan_proxy_url.clone(), Arc::clone(&cache));
        let format_cache = FormatCache::new(Arc::clone(&cache));
        Ok(Self {
            config,
            cache,
            manifests,
            bundle_fetcher,
            package_fetcher,
            format_cache,
            engine_factory,
            engine_lock: Mutex::new(()),
        })
    }

    pub fn cache(&self) -> &Arc<PersistentCache> {
        &self.cache
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manifests(&self) -> &GlobalManifests {
        &self.manifests
    }

    pub fn bundle_fetcher(&self) -> &BundleFetcher {
        &self.bundle_fetcher
    }

    /// Injects `\PassOptionsToPackage{expansion=false}{microtype}` before
    /// `\documentclass` when the source uses `microtype` (spec §4.4 "Source
    /// rewriting") — skipped entirely when a cached format will be used,
    /// since the format already incorporates it.
    fn rewrite_source(source: &str) -> String {
        if !source.contains(r"\usepackage") || !source.contains("microtype") {
            return source.to_string();
        }
        match source.find(r"\documentclass") {
            Some(idx) => {
                let mut out = String::with_capacity(source.len() + 64);
                out.push_str(&source[..idx]);
                out.push_str(r"\PassOptionsToPackage{expansion=false}{microtype}");
                out.push('\n');
                out.push_str(&source[idx..]);
                out
            }
            None => source.to_string(),
        }
    }

    pub fn compile(&self, source: &str, request: &CompileRequest) -> FabricResult<CompileOutcome> {
        let started = Instant::now();
        let engine_name = match request.engine {
            Some("auto") | None => detect_engine(source),
            Some(other) => other,
        }
        .to_string();

        let document_hash = djb2_hex(source);

        if self.config.enable_doc_cache && request.use_cache {
            if let Some(pdf) = self.cache.pdf(&document_hash, &engine_name)? {
                self.config.observer.log("Using cached PDF");
                return Ok(CompileOutcome {
                    success: true,
                    pdf: Some(pdf.as_ref().clone()),
                    exit_code: Some(0),
                    log: None,
                    stats: CompileStats::default(),
                    cached: true,
                });
            }
        }

        let preamble_hash = format_cache::preamble_hash(source);
        let cached_format = self.format_cache.lookup(&preamble_hash, &engine_name)?;
        let used_cached_format = cached_format.is_some();

        let submitted_source = if used_cached_format {
            format_cache::truncate_to_document_body(source).to_string()
        } else {
            Self::rewrite_source(source)
        };

        let mut session = RetrySession::default();
        let mut last_outcome: Option<EngineOutcome> = None;
        let mut stats = CompileStats { used_cached_format, ..Default::default() };

        for attempt in 0..MAX_RETRIES {
            if started.elapsed() > COMPILE_WALL_CLOCK_CAP {
                stats.elapsed_ms = started.elapsed().as_millis() as u64;
                self.config.observer.log("compile exceeded the 120s wall-clock cap");
                return Ok(CompileOutcome {
                    success: false,
                    pdf: None,
                    exit_code: last_outcome.as_ref().and_then(|o| o.exit_code),
                    log: last_outcome.map(|o| o.log),
                    stats,
                    cached: false,
                });
            }
            stats.attempts = attempt + 1;

            let required_bundles = Resolver::new(
                &self.manifests.package_map,
                &self.manifests.bundle_deps,
                self.manifests.package_deps.as_ref(),
                &self.manifests.registry,
            )
            .resolve(&submitted_source, &engine_name);

            self.load_bundles(&required_bundles, &mut session);

            let mut vfs = Vfs::new(self.config.enable_lazy_fs);
            self.build_vfs(&mut vfs, &required_bundles, &session, &submitted_source, &request.additional_files);

            if used_cached_format {
                if let Some(fmt_bytes) = &cached_format {
                    vfs.mount("/custom.fmt", fmt_bytes.as_ref().clone());
                }
            }
            vfs.finalize();

            let fmt_path = if used_cached_format {
                "/custom.fmt".to_string()
            } else {
                format!("/{engine_name}.fmt")
            };
            let invocation = engine::invocation_for_engine(&engine_name, &fmt_path);

            let mut outcome = self.run_engine(&invocation, &mut vfs)?;
            stats.bytes_read += outcome.bytes_read;

            let pending_ranges = vfs.pending_byte_ranges().to_vec();
            let pending_deferred = vfs.pending_deferred_bundles().to_vec();

            if outcome.succeeded() && engine_name == "xelatex" {
                outcome = self.run_xdvipdfmx(&mut vfs, outcome, &mut stats)?;
            }

            if outcome.succeeded() {
                self.collect_aux(&document_hash, &engine_name, used_cached_format, &outcome)?;
                let pdf = outcome.produced_files.get("/document.pdf").cloned();
                if self.config.enable_doc_cache {
                    if let Some(pdf_bytes) = &pdf {
                        self.cache.store_pdf(&document_hash, &engine_name, pdf_bytes.clone())?;
                    }
                }
                stats.elapsed_ms = started.elapsed().as_millis() as u64;
                return Ok(CompileOutcome {
                    success: true,
                    pdf,
                    exit_code: outcome.exit_code,
                    log: Some(outcome.log),
                    stats,
                    cached: false,
                });
            }

            let made_progress = self.diagnose_and_fetch(&pending_ranges, &pending_deferred, &outcome.log, &mut session);
            last_outcome = Some(outcome);
            if !made_progress {
                break;
            }
        }

        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        let (exit_code, log) = match last_outcome {
            Some(o) => (o.exit_code, Some(o.log)),
            None => (None, None),
        };
        self.config.observer.log("no progress possible, compile failed");
        Ok(CompileOutcome {
            success: false,
            pdf: None,
            exit_code,
            log,
            stats,
            cached: false,
        })
    }

    /// Generates and caches a `.fmt` blob for `source`'s preamble (spec
    /// §4.5 "Generation"). Applies the same diagnosis/retry loop as
    /// [`compile`](Self::compile), but in `-ini` mode and with a 300s cap.
    pub fn generate_format(&self, source: &str, engine_name: &str) -> FabricResult<Vec<u8>> {
        let started = Instant::now();
        let preamble = format_cache::extract_preamble(source);
        let preamble_hash = format_cache::preamble_hash(source);
        let ini_source = format!("{preamble}\n\\dump\n");

        let mut session = RetrySession::default();
        let mut last_outcome: Option<EngineOutcome> = None;

        for _ in 0..MAX_RETRIES {
            if started.elapsed() > FORMAT_GENERATION_CAP {
                return Err(FabricError::CapExceeded("format generation exceeded the 300s cap"));
            }

            let required_bundles = Resolver::new(
                &self.manifests.package_map,
                &self.manifests.bundle_deps,
                self.manifests.package_deps.as_ref(),
                &self.manifests.registry,
            )
            .resolve(&ini_source, engine_name);

            self.load_bundles(&required_bundles, &mut session);

            let mut vfs = Vfs::new(self.config.enable_lazy_fs);
            self.build_vfs(&mut vfs, &required_bundles, &session, &ini_source, &HashMap::new());
            vfs.mount("/myformat.ini", ini_source.clone().into_bytes());
            vfs.finalize();

            let fmt_base = format!("/{engine_name}");
            let invocation = engine::build_format_ini_invocation(&fmt_base);
            let outcome = self.run_engine(&invocation, &mut vfs)?;

            if outcome.succeeded() {
                let fmt_bytes = outcome
                    .produced_files
                    .get("/myformat.fmt")
                    .cloned()
                    .ok_or_else(|| FabricError::EngineFailed(outcome.exit_code))?;
                self.format_cache.store(&preamble_hash, engine_name, fmt_bytes.clone())?;
                return Ok(fmt_bytes);
            }

            let pending_ranges = vfs.pending_byte_ranges().to_vec();
            let pending_deferred = vfs.pending_deferred_bundles().to_vec();
            let made_progress = self.diagnose_and_fetch(&pending_ranges, &pending_deferred, &outcome.log, &mut session);
            last_outcome = Some(outcome);
            if !made_progress {
                break;
            }
        }

        Err(FabricError::NoProgress(last_outcome.and_then(|o| o.exit_code)))
    }

    // -- orchestration steps ----------------------------------------------

    /// Loads every bundle the resolver named as required. A fetch failure
    /// here (network, DNS, the fetcher's own timeout cap) is not fatal to
    /// `compile` (spec §5 "no progress for that iteration", §7
    /// `BundleFetchFailed` — "logged, retry count incremented... never
    /// abort"): it's logged and the bundle is simply left unresident, so
    /// `build_vfs` mounts it deferred and the engine's own log drives the
    /// next diagnosis pass.
    fn load_bundles(&self, required: &[String], session: &mut RetrySession) {
        for bundle_id in required {
            if session.resident_bundles.contains_key(bundle_id) {
                continue;
            }
            if self.manifests.bundle_deps.is_deferred(bundle_id) {
                continue;
            }
            match self.bundle_fetcher.fetch_body(bundle_id) {
                Ok(body) => {
                    session.resident_bundles.insert(bundle_id.clone(), body);
                }
                Err(err) => self.log_fetch_failure("bundle", bundle_id, &err),
            }
        }
    }

    fn log_fetch_failure(&self, kind: &str, id: &str, err: &FabricError) {
        tracing::warn!(kind, id, %err, "fetch failed, treating as no progress this iteration");
        self.config.observer.log(&format!("fetching {kind} `{id}` failed: {err}"));
    }

    fn build_vfs(
        &self,
        vfs: &mut Vfs,
        required_bundles: &[String],
        session: &RetrySession,
        submitted_source: &str,
        additional_files: &HashMap<String, Vec<u8>>,
    ) {
        for bundle_id in required_bundles {
            if let Some(body) = session.resident_bundles.get(bundle_id) {
                vfs.mount_bundle(bundle_id, Arc::clone(body), &self.manifests.file_manifest, None);
            } else {
                vfs.mount_deferred_bundle(bundle_id, &self.manifests.file_manifest, None);
            }
        }

        vfs.seed_external_byte_ranges(session.external_byte_ranges.clone());
        vfs.mount_external_files(session.package_files.clone());
        vfs.mount_external_files(additional_files.clone());
        vfs.mount("/document.tex", submitted_source.as_bytes().to_vec());
    }

    fn run_engine(&self, invocation: &crate::engine::EngineInvocation, vfs: &mut Vfs) -> FabricResult<EngineOutcome> {
        let _guard = self.engine_lock.lock();
        let mut instance: Box<dyn Engine> = self.engine_factory.spawn()?;
        instance.invoke(invocation, vfs)
    }

    /// XeLaTeX produces a `.xdv` rather than a `.pdf`; on success the
    /// orchestrator mounts it and runs `xdvipdfmx` to finish the chain (spec
    /// §6 "Engine invocation contract" — "same as pdflatex... followed on
    /// success by `xdvipdfmx`").
    fn run_xdvipdfmx(&self, vfs: &mut Vfs, xelatex_outcome: EngineOutcome, stats: &mut CompileStats) -> FabricResult<EngineOutcome> {
        let Some(xdv) = xelatex_outcome.produced_files.get("/document.xdv").cloned() else {
            return Ok(xelatex_outcome);
        };
        vfs.mount("/document.xdv", xdv);
        let invocation = engine::build_xdvipdfmx_invocation();
        let mut outcome = self.run_engine(&invocation, vfs)?;
        stats.bytes_read += outcome.bytes_read;
        outcome.log = format!("{}\n{}", xelatex_outcome.log, outcome.log);
        Ok(outcome)
    }

    fn collect_aux(&self, document_hash: &str, engine_name: &str, used_cached_format: bool, outcome: &EngineOutcome) -> FabricResult<()> {
        let aux_key = format_cache::aux_cache_key(&format!("{document_hash}_{engine_name}"), used_cached_format);
        let files: HashMap<String, Vec<u8>> = outcome
            .produced_files
            .iter()
            .filter(|(path, _)| {
                path.ends_with(".aux") || path.ends_with(".toc") || path.ends_with(".bbl") || path.ends_with(".out")
            })
            .map(|(path, bytes)| (path.clone(), bytes.clone()))
            .collect();
        self.cache.store_aux(&aux_key, AuxRecord { files })
    }

    /// Runs one diagnosis pass (spec §4.4 "Diagnosis"): byte ranges first,
    /// then deferred bundles, then a log scan. Returns whether any
    /// actionable item was found and fetched. A fetch failure at any step is
    /// non-fatal (spec §5/§7, same policy as [`load_bundles`](Self::load_bundles)):
    /// it's logged and treated as no progress for this pass rather than
    /// propagated, so `compile` can still return a `CompileOutcome` carrying
    /// the last engine log instead of a hard `Err`.
    fn diagnose_and_fetch(
        &self,
        pending_ranges: &[(String, u64, u64)],
        pending_deferred: &[String],
        log: &str,
        session: &mut RetrySession,
    ) -> bool {
        if let Some((bundle_id, start, end)) = pending_ranges.iter().find(|key| !session.external_byte_ranges.contains_key(*key)) {
            return match self.bundle_fetcher.fetch_byte_range(bundle_id, *start, *end) {
                Ok(bytes) => {
                    session.external_byte_ranges.insert((bundle_id.clone(), *start, *end), bytes);
                    true
                }
                Err(err) => {
                    self.log_fetch_failure("byte range", bundle_id, &err);
                    false
                }
            };
        }

        if let Some(bundle_id) = pending_deferred.iter().find(|id| !session.resident_bundles.contains_key(*id)) {
            return match self.bundle_fetcher.fetch_body(bundle_id) {
                Ok(body) => {
                    session.resident_bundles.insert(bundle_id.clone(), body);
                    true
                }
                Err(err) => {
                    self.log_fetch_failure("deferred bundle", bundle_id, &err);
                    false
                }
            };
        }

        let Some((_, package)) = diagnosis::diagnose(log, &session.attempted_packages) else {
            return false;
        };
        session.attempted_packages.insert(package.clone());

        if let Some(bundle_id) = self.manifests.package_map.bundle_for(&package) {
            let bundle_id = bundle_id.to_string();
            if !session.resident_bundles.contains_key(&bundle_id) {
                return match self.bundle_fetcher.fetch_body(&bundle_id) {
                    Ok(body) => {
                        session.resident_bundles.insert(bundle_id, body);
                        true
                    }
                    Err(err) => {
                        self.log_fetch_failure("bundle", &bundle_id, &err);
                        false
                    }
                };
            }
            return true;
        }

        if !self.config.enable_ctan {
            return false;
        }

        let attempts = session.package_attempts.entry(package.clone()).or_insert(0);
        if *attempts >= MAX_PACKAGE_ATTEMPTS {
            return false;
        }
        *attempts += 1;

        match self.package_fetcher.fetch(&package) {
            Ok(Some(files)) => {
                session.package_files.extend(files.files);
                true
            }
            Ok(None) => false,
            Err(err) => {
                self.log_fetch_failure("package", &package, &err);
                false
            }
        }
    }
}
