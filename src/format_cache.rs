//! Format file cache (spec §4.5, component C7): reuses a previously
//! `\dump`ed engine state keyed by the preamble's fingerprint, so repeat
//! compiles of documents sharing a preamble skip re-processing it.

use std::sync::Arc;

use crate::cache::PersistentCache;
use crate::error::FabricResult;
use crate::hash::djb2_hex;

/// Everything before the first `\begin{document}` (spec §4.5 "Preamble
/// extraction"). A source with no `\begin{document}` has no split point; the
/// whole text is treated as preamble, which will simply fail to `\dump` a
/// useful format and fall back to a plain compile.
pub fn extract_preamble(source: &str) -> &str {
    match source.find(r"\begin{document}") {
        Some(idx) => &source[..idx],
        None => source,
    }
}

pub fn preamble_hash(source: &str) -> String {
    djb2_hex(extract_preamble(source))
}

/// The text the cached-format compile path submits to the engine: the
/// preamble is already dumped, so only the body remains (spec §4.4 "Cached
/// format use").
pub fn truncate_to_document_body(source: &str) -> &str {
    match source.find(r"\begin{document}") {
        Some(idx) => &source[idx..],
        None => source,
    }
}

/// The aux-cache key for one compile attempt: suffixed with `_fmt` when a
/// cached format was used, so aux files produced against different initial
/// engine states never mix (spec §4.5 "Use").
pub fn aux_cache_key(document_hash: &str, used_cached_format: bool) -> String {
    if used_cached_format {
        format!("{document_hash}_fmt")
    } else {
        document_hash.to_string()
    }
}

/// Thin accessor over [`PersistentCache`]'s format tier, encoding the one
/// policy decision spec §9 leaves open: XeLaTeX format caching is not
/// implemented, so `lookup` always misses for any engine but `pdflatex`.
pub struct FormatCache {
    cache: Arc<PersistentCache>,
}

impl FormatCache {
    pub fn new(cache: Arc<PersistentCache>) -> Self {
        Self { cache }
    }

    /// Looks up a cached format for `(preamble_hash, engine)`. Always `None`
    /// for non-`pdflatex` engines (spec §9 "whether XeLaTeX format caching is
    /// safe... is out of scope").
    pub fn lookup(&self, preamble_hash: &str, engine: &str) -> FabricResult<Option<Arc<Vec<u8>>>> {
        if engine != "pdflatex" {
            return Ok(None);
        }
        self.cache.format(preamble_hash, engine)
    }

    pub fn store(&self, preamble_hash: &str, engine: &str, bytes: Vec<u8>) -> FabricResult<Arc<Vec<u8>>> {
        self.cache.store_format(preamble_hash, engine, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_everything_before_begin_document() {
        let source = r"\documentclass{article}\usepackage{amsmath}\begin{document}Hi\end{document}";
        assert_eq!(
            extract_preamble(source),
            r"\documentclass{article}\usepackage{amsmath}"
        );
    }

    #[test]
    fn truncation_keeps_begin_document_onward() {
        let source = r"\documentclass{article}\begin{document}Hi\end{document}";
        assert_eq!(truncate_to_document_body(source), r"\begin{document}Hi\end{document}");
    }

    #[test]
    fn aux_key_is_suffixed_only_when_format_was_used() {
        assert_eq!(aux_cache_key("abc", false), "abc");
        assert_eq!(aux_cache_key("abc", true), "abc_fmt");
    }

    #[test]
    fn preamble_hash_is_stable_for_same_preamble_different_body() {
        let a = r"\documentclass{article}\begin{document}Hello\end{document}";
        let b = r"\documentclass{article}\begin{document}World\end{document}";
        assert_eq!(preamble_hash(a), preamble_hash(b));
    }

    #[test]
    fn lookup_short_circuits_for_non_pdflatex_engines() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(PersistentCache::open(dir.path()).unwrap());
        cache.store_format("preamble123", "xelatex", b"fmtbytes".to_vec()).unwrap();

        let format_cache = FormatCache::new(cache);
        assert!(format_cache.lookup("preamble123", "xelatex").unwrap().is_none());
    }

    #[test]
    fn lookup_hits_for_pdflatex() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(PersistentCache::open(dir.path()).unwrap());
        cache.store_format("preamble123", "pdflatex", b"fmtbytes".to_vec()).unwrap();

        let format_cache = FormatCache::new(cache);
        let hit = format_cache.lookup("preamble123", "pdflatex").unwrap().unwrap();
        assert_eq!(hit.as_slice(), b"fmtbytes");
    }
}
