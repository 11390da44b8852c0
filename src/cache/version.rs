//! Cache tier versioning (spec §4.1 "Versioning", §7 `CacheVersionMismatch`).

/// The six logical caches, each carrying its own version integer. A tier
/// whose on-disk version is older than the code's is wholesale evicted and
/// re-stamped on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    /// Package metadata and files fetched from CTAN-equivalent proxies.
    Ctan,
    /// Bundle bodies and manifests.
    Bundle,
    /// The compiled engine image.
    Wasm,
    /// Auxiliary-file sets produced by a compile.
    Aux,
    /// Compiled PDF documents.
    Doc,
    /// Format (`.fmt`) files.
    Fmt,
}

impl CacheTier {
    pub const ALL: [CacheTier; 6] = [
        CacheTier::Ctan,
        CacheTier::Bundle,
        CacheTier::Wasm,
        CacheTier::Aux,
        CacheTier::Doc,
        CacheTier::Fmt,
    ];

    /// The key under which this tier's version integer is stored.
    pub fn key(self) -> &'static str {
        match self {
            CacheTier::Ctan => "version:ctan",
            CacheTier::Bundle => "version:bundle",
            CacheTier::Wasm => "version:wasm",
            CacheTier::Aux => "version:aux",
            CacheTier::Doc => "version:doc",
            CacheTier::Fmt => "version:fmt",
        }
    }

    /// The version the running code expects. Bump whenever a tier's wire
    /// format or semantics change incompatibly.
    pub fn code_version(self) -> u32 {
        1
    }
}
