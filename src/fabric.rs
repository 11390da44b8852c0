//! The public compile API (spec §6 "Compile API"): a thin facade over the
//! [`Orchestrator`](crate::orchestrator::Orchestrator) that owns manifest
//! loading, engine-image warming, and the lifecycle controls.

use std::collections::HashMap;
use std::sync::Arc;

use crate::bundle::fetcher::GlobalManifests;
use crate::config::Config;
use crate::engine::EngineFactory;
use crate::error::FabricResult;
use crate::orchestrator::{CompileRequest, Orchestrator};
use crate::resolver::Resolver;

pub use crate::orchestrator::CompileStats;

/// Caller-supplied extras for one [`TexFabric::compile`] call, matching
/// spec §6's `compile(source, {engine?, use_cache?, additional_files?})`.
#[derive(Default)]
pub struct CompileOptions {
    /// `None` or `Some("auto")` defers to §4.2's engine-detection heuristic.
    pub engine: Option<String>,
    pub use_cache: bool,
    pub additional_files: HashMap<String, Vec<u8>>,
}

/// The result of one [`TexFabric::compile`] call, matching spec §6's
/// `{success, pdf?, exit_code?, log?, stats, cached?}`.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub success: bool,
    pub pdf: Option<Vec<u8>>,
    pub exit_code: Option<i32>,
    pub log: Option<String>,
    pub stats: CompileStats,
    pub cached: bool,
}

impl From<crate::orchestrator::CompileOutcome> for CompileOutput {
    fn from(outcome: crate::orchestrator::CompileOutcome) -> Self {
        Self {
            success: outcome.success,
            pdf: outcome.pdf,
            exit_code: outcome.exit_code,
            log: outcome.log,
            stats: outcome.stats,
            cached: outcome.cached,
        }
    }
}

/// The resource fabric's public entry point: loads manifests, warms the
/// engine image and required bundles, then drives compiles and format
/// generation through the orchestrator.
///
/// Construct with [`TexFabricBuilder`](crate::TexFabricBuilder), or directly
/// with [`TexFabric::init`].
pub struct TexFabric {
    orchestrator: Orchestrator,
    engine_factory: Arc<dyn EngineFactory>,
}

impl TexFabric {
    /// Spec §6 `init(config)`: preloads the five global manifests, fetches
    /// and caches the engine image from `config.wasm_url` if not already
    /// cached, and warms the bundles the default engine always requires.
    pub fn init(config: Config, engine_factory: Arc<dyn EngineFactory>) -> FabricResult<Self> {
        config.observer.progress("loading manifests");
        let manifests = GlobalManifests::fetch(&config.bundles_url)?;

        let orchestrator = Orchestrator::new(config, manifests, Arc::clone(&engine_factory))?;

        let fabric = Self {
            orchestrator,
            engine_factory,
        };
        fabric.warm_engine_image()?;
        fabric.warm_required_bundles();
        Ok(fabric)
    }

    fn warm_engine_image(&self) -> FabricResult<()> {
        let cache = self.orchestrator.cache();
        if cache.engine_image()?.is_some() {
            return Ok(());
        }
        let config = self.orchestrator.config();
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(60))
            .build();
        let response = agent.get(&config.wasm_url).call()?;
        let mut bytes = Vec::new();
        std::io::copy(&mut response.into_reader(), &mut bytes)?;
        cache.store_engine_image(&bytes, &config.wasm_url)?;
        Ok(())
    }

    /// Warms the bundles `pdflatex` always requires (spec §6 "init...warms
    /// required bundles"). Best-effort: a failed warm here does not fail
    /// `init`, since the orchestrator will fetch whatever is still missing
    /// on the first real compile.
    fn warm_required_bundles(&self) {
        let manifests = self.orchestrator.manifests();
        let resolver = Resolver::new(
            &manifests.package_map,
            &manifests.bundle_deps,
            manifests.package_deps.as_ref(),
            &manifests.registry,
        );
        let required = resolver.resolve("", "pdflatex");
        for bundle_id in required {
            if manifests.bundle_deps.is_deferred(&bundle_id) {
                continue;
            }
            if let Err(err) = self.orchestrator.bundle_fetcher().fetch_body(&bundle_id) {
                self.orchestrator
                    .config()
                    .observer
                    .log(&format!("warming bundle `{bundle_id}` failed: {err}"));
            }
        }
    }

    /// Spec §6 `compile(source, opts) -> {success, pdf?, exit_code?, log?, stats, cached?}`.
    pub fn compile(&self, source: &str, options: CompileOptions) -> FabricResult<CompileOutput> {
        let request = CompileRequest {
            engine: options.engine.as_deref(),
            use_cache: options.use_cache,
            additional_files: options.additional_files,
        };
        self.orchestrator.compile(source, &request).map(Into::into)
    }

    /// Spec §6 `generate_format(source, {engine?}) -> bytes`.
    pub fn generate_format(&self, source: &str, engine: Option<&str>) -> FabricResult<Vec<u8>> {
        let engine_name = match engine {
            Some("auto") | None => crate::resolver::detect_engine(source),
            Some(other) => other,
        };
        self.orchestrator.generate_format(source, engine_name)
    }

    /// Spec §6 `clear_cache()`: wipes every durable and in-memory cache tier.
    pub fn clear_cache(&self) -> FabricResult<()> {
        self.orchestrator.cache().clear()
    }

    /// Spec §6 `terminate()`: asks the engine factory to release whatever
    /// long-lived resources it holds (e.g. a compiled WASM module) without
    /// dropping the whole fabric. A no-op for factories that hold nothing
    /// beyond what `spawn` recreates each call.
    pub fn terminate(&self) -> FabricResult<()> {
        self.engine_factory.shutdown();
        Ok(())
    }

    /// Spec §6 `unload()`: same contract as `terminate`, kept distinct in
    /// the public surface because the two names mean different things to
    /// host embedders (pause vs. tear down); both currently delegate to the
    /// engine factory's shutdown hook.
    pub fn unload(&self) -> FabricResult<()> {
        self.engine_factory.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::manifest::{BundleDependencyGraph, BundleRegistry, GlobalFileManifest, PackageMap};
    use crate::engine::{Engine, EngineInvocation, EngineOutcome};
    use crate::vfs::Vfs;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct NoopEngine;
    impl Engine for NoopEngine {
        fn invoke(&mut self, _invocation: &EngineInvocation, _vfs: &mut Vfs) -> FabricResult<EngineOutcome> {
            let mut produced_files = HashMap::new();
            produced_files.insert("/document.pdf".to_string(), b"%PDF-fake".to_vec());
            Ok(EngineOutcome {
                exit_code: Some(0),
                log: "Output written on document.pdf".to_string(),
                produced_files,
                bytes_read: 1,
            })
        }
    }

    struct NoopFactory {
        shut_down: AtomicBool,
    }

    impl EngineFactory for NoopFactory {
        fn spawn(&self) -> FabricResult<Box<dyn Engine>> {
            Ok(Box::new(NoopEngine))
        }

        fn shutdown(&self) {
            self.shut_down.store(true, Ordering::SeqCst);
        }
    }

    fn test_config(cache_dir: &std::path::Path) -> Config {
        Config::builder("https://bundles.example", "https://wasm.example", "https://ctan.example")
            .with_cache_dir(cache_dir)
            .build()
    }

    fn empty_manifests() -> GlobalManifests {
        GlobalManifests {
            registry: BundleRegistry::default(),
            package_map: PackageMap::default(),
            file_manifest: GlobalFileManifest::default(),
            bundle_deps: BundleDependencyGraph::default(),
            package_deps: None,
        }
    }

    /// Builds a `TexFabric` directly around a pre-fetched set of (empty)
    /// manifests, bypassing `init`'s network calls — this exercises the
    /// facade's delegation to the orchestrator without requiring a live
    /// `bundles_url`/`wasm_url`.
    fn fabric_without_init(cache_dir: &std::path::Path, factory: Arc<NoopFactory>) -> TexFabric {
        let config = test_config(cache_dir);
        let orchestrator = Orchestrator::new(config, empty_manifests(), factory.clone()).unwrap();
        TexFabric {
            orchestrator,
            engine_factory: factory,
        }
    }

    #[test]
    fn compile_delegates_to_the_orchestrator() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(NoopFactory { shut_down: AtomicBool::new(false) });
        let fabric = fabric_without_init(dir.path(), factory);

        let output = fabric
            .compile(
                r"\documentclass{article}\begin{document}Hi\end{document}",
                CompileOptions { use_cache: false, ..Default::default() },
            )
            .unwrap();

        assert!(output.success);
        assert_eq!(output.pdf.as_deref(), Some(b"%PDF-fake".as_slice()));
    }

    #[test]
    fn terminate_and_unload_invoke_the_factory_shutdown_hook() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(NoopFactory { shut_down: AtomicBool::new(false) });
        let fabric = fabric_without_init(dir.path(), factory.clone());

        fabric.terminate().unwrap();
        assert!(factory.shut_down.load(Ordering::SeqCst));
    }

    #[test]
    fn clear_cache_empties_the_pdf_tier() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(NoopFactory { shut_down: AtomicBool::new(false) });
        let fabric = fabric_without_init(dir.path(), factory);

        fabric.orchestrator.cache().store_pdf("doc1", "pdflatex", b"pdf-bytes".to_vec()).unwrap();
        assert!(fabric.orchestrator.cache().pdf("doc1", "pdflatex").unwrap().is_some());

        fabric.clear_cache().unwrap();
        assert!(fabric.orchestrator.cache().pdf("doc1", "pdflatex").unwrap().is_none());
    }
}
