//! Font-map post-processing (spec §4.3 "Font map processing"): rewrites
//! `.pfb`/`.enc` references in `pdftex.map` and any package-provided map
//! files to absolute VFS paths, since kpathsea inside the sandbox cannot
//! search a filesystem it was never given.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::vfs::node::VfsContent;

const CM_SUPER_TYPE1: &str = "/texlive/texmf-dist/fonts/type1/public/cm-super";
const CM_SUPER_ENC: &str = "/texlive/texmf-dist/fonts/enc/dvips/cm-super";

static FONT_REF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(<{1,2})(\S+\.(?:pfb|enc))").unwrap());

/// Resolves `filename` to an absolute VFS path using the search order from
/// spec §4.3: the font-file index built while mounting bundles (which
/// already encodes the package-specific `fonts/type1/public/<pkg>` or
/// `fonts/enc/dvips/<pkg>` directory a file was mounted from), then the same
/// under `cm-super`, then the map's own directory.
pub fn resolve_font_path(
    filename: &str,
    map_dir: &str,
    font_files: &HashMap<String, String>,
    nodes: &HashMap<String, VfsContent>,
) -> Option<String> {
    if let Some(path) = font_files.get(filename) {
        return Some(path.clone());
    }

    let cm_super_type1 = format!("{CM_SUPER_TYPE1}/{filename}");
    if nodes.contains_key(&cm_super_type1) {
        return Some(cm_super_type1);
    }

    let cm_super_enc = format!("{CM_SUPER_ENC}/{filename}");
    if nodes.contains_key(&cm_super_enc) {
        return Some(cm_super_enc);
    }

    let own_dir = format!("{map_dir}/{filename}");
    if nodes.contains_key(&own_dir) {
        return Some(own_dir);
    }

    None
}

/// Rewrites every `<file.pfb`/`<<file.enc` reference on one map line to an
/// absolute VFS path, keeping the original `<`/`<<` prefix. Comment and blank
/// lines are returned unchanged; an unresolved reference is left as-is.
pub fn rewrite_line(
    line: &str,
    map_dir: &str,
    font_files: &HashMap<String, String>,
    nodes: &HashMap<String, VfsContent>,
) -> String {
    if line.trim().is_empty() || line.trim_start().starts_with('%') {
        return line.to_string();
    }

    FONT_REF_RE
        .replace_all(line, |caps: &regex::Captures| {
            let prefix = &caps[1];
            let filename = &caps[2];
            match resolve_font_path(filename, map_dir, font_files, nodes) {
                Some(resolved) => format!("{prefix}{resolved}"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Rewrites every line of a whole map file's text.
pub fn rewrite_map_text(
    text: &str,
    map_dir: &str,
    font_files: &HashMap<String, String>,
    nodes: &HashMap<String, VfsContent>,
) -> String {
    text.lines()
        .map(|line| rewrite_line(line, map_dir, font_files, nodes))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The directory a map file's own search fallback uses: everything before
/// the last path segment.
pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_known_font_reference() {
        let mut font_files = HashMap::new();
        font_files.insert(
            "ptmr8a.pfb".to_string(),
            "/texlive/texmf-dist/fonts/type1/public/times/ptmr8a.pfb".to_string(),
        );
        let nodes = HashMap::new();
        let line = r#"ptmr8r Times-Roman <8r.enc <ptmr8a.pfb"#;
        let rewritten = rewrite_line(line, "/texlive/texmf-dist/fonts/map/dvips/times", &font_files, &nodes);
        assert!(rewritten.contains("</texlive/texmf-dist/fonts/type1/public/times/ptmr8a.pfb"));
    }

    #[test]
    fn preserves_comments_and_blank_lines() {
        let font_files = HashMap::new();
        let nodes = HashMap::new();
        assert_eq!(rewrite_line("% a comment", "/x", &font_files, &nodes), "% a comment");
        assert_eq!(rewrite_line("", "/x", &font_files, &nodes), "");
    }

    #[test]
    fn falls_back_to_cm_super_then_own_dir() {
        let font_files = HashMap::new();
        let mut nodes = HashMap::new();
        nodes.insert(
            format!("{CM_SUPER_ENC}/8r.enc"),
            VfsContent::Empty,
        );
        let line = "<8r.enc";
        let rewritten = rewrite_line(line, "/texlive/texmf-dist/fonts/map/dvips/cm-super", &font_files, &nodes);
        assert_eq!(rewritten, format!("<{CM_SUPER_ENC}/8r.enc"));
    }

    #[test]
    fn leaves_unresolved_references_untouched() {
        let font_files = HashMap::new();
        let nodes = HashMap::new();
        let line = "<nowhere.pfb";
        assert_eq!(rewrite_line(line, "/x", &font_files, &nodes), "<nowhere.pfb");
    }
}
