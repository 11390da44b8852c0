//! `ls-R` generation (spec §4.3 "ls-R generation"): kpathsea's directory
//! index, rebuilt fresh after every mount phase.

use std::collections::{BTreeMap, BTreeSet};

const HEADER: &str = "% ls-R -- filename database.";

/// Builds the `ls-R` text for every path under `texroot`. Each directory is
/// listed once, followed by its immediate files and subdirectories in sorted
/// order, separated by a blank line, per spec invariant 5 ("every mounted
/// file under the TeX root exactly once, sorted within each directory").
pub fn build(texroot: &str, paths: impl Iterator<Item = String>) -> String {
    let mut by_dir: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for path in paths {
        if !path.starts_with(texroot) || path == format!("{texroot}/ls-R") {
            continue;
        }
        let relative = path[texroot.len()..].trim_start_matches('/');
        let mut components: Vec<&str> = relative.split('/').collect();
        let file_name = match components.pop() {
            Some(name) if !name.is_empty() => name,
            _ => continue,
        };

        // Registers the file under its immediate directory, and registers
        // every ancestor directory as a "subdirectory" entry of its parent so
        // empty intermediate directories still show up.
        let mut dir = String::new();
        for component in &components {
            let parent = dir.clone();
            if !dir.is_empty() {
                dir.push('/');
            }
            dir.push_str(component);
            by_dir.entry(parent).or_default().insert(component.to_string());
        }
        by_dir.entry(dir).or_default().insert(file_name.to_string());
    }

    let mut out = String::new();
    out.push_str(HEADER);
    out.push('\n');

    for (dir, entries) in &by_dir {
        out.push('\n');
        if dir.is_empty() {
            out.push_str(".:\n");
        } else {
            out.push_str(&format!("./{dir}:\n"));
        }
        for entry in entries {
            out.push_str(entry);
            out.push('\n');
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_files_sorted_within_each_directory() {
        let paths = vec![
            "/texlive/texmf-dist/tex/latex/base/book.cls".to_string(),
            "/texlive/texmf-dist/tex/latex/base/article.cls".to_string(),
            "/texlive/texmf-dist/tex/latex/amsmath/amsmath.sty".to_string(),
        ];
        let out = build("/texlive", paths.into_iter());
        assert!(out.starts_with("% ls-R -- filename database."));
        let base_idx = out.find("./texmf-dist/tex/latex/base:").unwrap();
        let base_section = &out[base_idx..];
        let article_idx = base_section.find("article.cls").unwrap();
        let book_idx = base_section.find("book.cls").unwrap();
        assert!(article_idx < book_idx);
    }

    #[test]
    fn excludes_paths_outside_texroot() {
        let paths = vec!["/other/file.tex".to_string()];
        let out = build("/texlive", paths.into_iter());
        assert!(!out.contains("file.tex"));
    }
}
