//! Runtime configuration for a [`TexFabric`](crate::TexFabric) instance.

use std::sync::Arc;

/// Observation hooks. Free-form string payloads, called synchronously from
/// whichever thread is driving the orchestrator.
///
/// These exist alongside `tracing` events (emitted throughout the crate) so
/// that embedders who have not wired up a `tracing` subscriber still get the
/// documented `on_log`/`on_progress` contract from spec §6.
#[derive(Clone, Default)]
pub struct Observer {
    on_log: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    on_progress: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("on_log", &self.on_log.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl Observer {
    pub(crate) fn log(&self, message: &str) {
        tracing::debug!(target: "texfab::log", "{message}");
        if let Some(f) = &self.on_log {
            f(message);
        }
    }

    pub(crate) fn progress(&self, message: &str) {
        tracing::debug!(target: "texfab::progress", "{message}");
        if let Some(f) = &self.on_progress {
            f(message);
        }
    }
}

/// Recognised configuration for a [`TexFabric`](crate::TexFabric), matching
/// spec §6's option table exactly.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL for bundle and manifest fetches.
    pub bundles_url: String,
    /// URL of the engine image (consumed by the caller's [`Engine`](crate::Engine)
    /// impl; this crate only threads the value through).
    pub wasm_url: String,
    /// Base URL of the remote package proxy.
    pub ctan_proxy_url: String,
    /// Enables the §4.4 remote package fallback. Default: `true`.
    pub enable_ctan: bool,
    /// Enables Lazy + Deferred mounting; when `false` all bundle files are
    /// mounted Eager. Default: `true`.
    pub enable_lazy_fs: bool,
    /// Enables the `(document_hash, engine) -> pdf` cache. Default: `true`.
    pub enable_doc_cache: bool,
    /// Directory for the durable blob/metadata stores. Defaults to
    /// [`dirs::cache_dir`]`/texfab`.
    pub cache_dir: std::path::PathBuf,
    /// Observation hooks.
    pub observer: Observer,
}

impl Config {
    /// Creates a [`ConfigBuilder`] seeded with the three required URLs.
    pub fn builder(
        bundles_url: impl Into<String>,
        wasm_url: impl Into<String>,
        ctan_proxy_url: impl Into<String>,
    ) -> ConfigBuilder {
        ConfigBuilder::new(bundles_url, wasm_url, ctan_proxy_url)
    }
}

/// [`Config`] factory, configured by method chaining in the same style as
/// `CompilerBuilder` — finalise with [`build`](Self::build).
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    bundles_url: String,
    wasm_url: String,
    ctan_proxy_url: String,
    enable_ctan: bool,
    enable_lazy_fs: bool,
    enable_doc_cache: bool,
    cache_dir: Option<std::path::PathBuf>,
    observer: Observer,
}

impl ConfigBuilder {
    pub fn new(
        bundles_url: impl Into<String>,
        wasm_url: impl Into<String>,
        ctan_proxy_url: impl Into<String>,
    ) -> Self {
        Self {
            bundles_url: bundles_url.into(),
            wasm_url: wasm_url.into(),
            ctan_proxy_url: ctan_proxy_url.into(),
            enable_ctan: true,
            enable_lazy_fs: true,
            enable_doc_cache: true,
            cache_dir: None,
            observer: Observer::default(),
        }
    }

    pub fn with_enable_ctan(mut self, enable: bool) -> Self {
        self.enable_ctan = enable;
        self
    }

    pub fn with_enable_lazy_fs(mut self, enable: bool) -> Self {
        self.enable_lazy_fs = enable;
        self
    }

    pub fn with_enable_doc_cache(mut self, enable: bool) -> Self {
        self.enable_doc_cache = enable;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_on_log(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.observer.on_log = Some(Arc::new(f));
        self
    }

    pub fn with_on_progress(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.observer.on_progress = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Config {
        let cache_dir = self.cache_dir.unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("texfab")
        });

        Config {
            bundles_url: self.bundles_url,
            wasm_url: self.wasm_url,
            ctan_proxy_url: self.ctan_proxy_url,
            enable_ctan: self.enable_ctan,
            enable_lazy_fs: self.enable_lazy_fs,
            enable_doc_cache: self.enable_doc_cache,
            cache_dir,
            observer: self.observer,
        }
    }
}
