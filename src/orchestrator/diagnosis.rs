//! Log-pattern diagnosis (spec §4.4 "Diagnosis" step 3): scans an engine
//! log for one of the documented missing-file error patterns and normalises
//! the matched name to a package name.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static LATEX_ERROR_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"! LaTeX Error: File `([^']+)' not found").unwrap());
static CANT_FIND_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"! I can't find file `([^']+)'").unwrap());
static LATEX_WARNING_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"LaTeX Warning: File `([^']+)' not found").unwrap());
static PACKAGE_ERROR_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Package \S+ Error: .*`([^']+)' not found").unwrap());
static TFM_NOT_LOADABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Font (\S+) not loadable: Metric \(TFM\) file").unwrap());
static PDFTEX_FONT_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!pdfTeX error: \(file ([^)]+)\): Font").unwrap());
static FONT_AT_NOT_FOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Font (\S+) at .* not found").unwrap());

fn patterns() -> [&'static LazyLock<Regex>; 7] {
    [
        &LATEX_ERROR_FILE,
        &CANT_FIND_FILE,
        &LATEX_WARNING_FILE,
        &PACKAGE_ERROR_FILE,
        &TFM_NOT_LOADABLE,
        &PDFTEX_FONT_ERROR,
        &FONT_AT_NOT_FOUND,
    ]
}

/// Font names matching `^(ec|tc)[a-z]{2}\d+$` (e.g. `ecrm1000`, `tcss1095`)
/// belong to the `cm-super` family; any other name has its TeX-file suffix
/// stripped (spec §4.4 "Filename → package normalisation").
static CM_SUPER_FONT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?:ec|tc)[a-z]{2}\d+$").unwrap());

pub fn normalize_to_package(name: &str) -> String {
    if CM_SUPER_FONT.is_match(name) {
        return "cm-super".to_string();
    }
    for suffix in [".sty", ".cls", ".def", ".clo", ".fd", ".cfg", ".tex"] {
        if let Some(stripped) = name.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    name.to_string()
}

/// Scans `log` for the first missing-file match, in pattern-declaration
/// order, whose normalised package name is not already in `attempted`.
/// Returns the raw matched name (not yet normalised) alongside its
/// normalised package name.
pub fn diagnose(log: &str, attempted: &HashSet<String>) -> Option<(String, String)> {
    for pattern in patterns() {
        for capture in pattern.captures_iter(log) {
            let raw = capture[1].to_string();
            let normalized = normalize_to_package(&raw);
            if !attempted.contains(&normalized) {
                return Some((raw, normalized));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_latex_error_file_pattern() {
        let log = "! LaTeX Error: File `foo-notbundled.sty' not found.";
        let (raw, pkg) = diagnose(log, &HashSet::new()).unwrap();
        assert_eq!(raw, "foo-notbundled.sty");
        assert_eq!(pkg, "foo-notbundled");
    }

    #[test]
    fn cm_super_font_names_normalise_to_cm_super() {
        assert_eq!(normalize_to_package("ecrm1000"), "cm-super");
        assert_eq!(normalize_to_package("tcss1095"), "cm-super");
        assert_eq!(normalize_to_package("ptmr8a"), "ptmr8a");
    }

    #[test]
    fn skips_already_attempted_matches() {
        let log = "! LaTeX Error: File `foo.sty' not found.\n! LaTeX Error: File `bar.sty' not found.";
        let mut attempted = HashSet::new();
        attempted.insert("foo".to_string());
        let (raw, pkg) = diagnose(log, &attempted).unwrap();
        assert_eq!(raw, "bar.sty");
        assert_eq!(pkg, "bar");
    }

    #[test]
    fn pdftex_font_error_extracts_file_in_parens() {
        let log = "!pdfTeX error: (file ecrm1000): Font ecrm1000 not found";
        let (raw, pkg) = diagnose(log, &HashSet::new()).unwrap();
        assert_eq!(raw, "ecrm1000");
        assert_eq!(pkg, "cm-super");
    }

    #[test]
    fn returns_none_when_nothing_matches() {
        assert!(diagnose("This log has no relevant lines.", &HashSet::new()).is_none());
    }
}
