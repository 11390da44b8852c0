//! The TeX engine invocation contract (spec §6 "Engine invocation contract").
//!
//! The engine itself is out of scope — it is a sandboxed WASM binary the host
//! application supplies — so this module only builds the argv/env contract
//! the orchestrator hands to a caller-supplied [`Engine`] implementation, and
//! declares the trait that implementation must satisfy.

use std::collections::HashMap;

use crate::error::FabricResult;
use crate::vfs::Vfs;

pub const TEXROOT: &str = "/texlive";
pub const TEXMF_DIST: &str = "/texlive/texmf-dist";

/// One engine run: program name, argv, and the environment it must be
/// invoked with.
#[derive(Debug, Clone)]
pub struct EngineInvocation {
    pub program: &'static str,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// What came back from one engine run.
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub exit_code: Option<i32>,
    /// Combined stdout + stderr + the engine's own `.log` file, per spec §7
    /// ("user-visible failures always include the engine's log").
    pub log: String,
    /// Engine-relative path -> bytes, for every file the engine wrote that
    /// the orchestrator needs to inspect (`.pdf`, `.xdv`, `.fmt`, aux files).
    pub produced_files: HashMap<String, Vec<u8>>,
    /// Total bytes read from the VFS during this invocation, self-reported
    /// by the engine implementation. Used for the format-cache-reuse
    /// end-to-end scenario (spec §8 scenario 6: fewer bytes read on reuse).
    pub bytes_read: u64,
}

impl EngineOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// An opaque, swappable TeX engine. Implementations own the actual WASM
/// runtime; this crate only drives it through argv/env and the VFS read path.
///
/// Each retry in the compile-retry orchestrator obtains a fresh `Engine`
/// instance via [`EngineFactory`] rather than reusing one across invocations:
/// the engine carries internal global state that does not reset between
/// calls (spec §9 "Retry without engine reuse").
pub trait Engine: Send {
    /// Runs one engine invocation against `vfs`, which provides the patched
    /// read path described in spec §4.3.
    fn invoke(&mut self, invocation: &EngineInvocation, vfs: &mut Vfs) -> FabricResult<EngineOutcome>;
}

/// Produces fresh [`Engine`] instances, one per retry, from a loaded engine
/// image. Implementations typically hold the compiled WASM module (expensive
/// to parse) and instantiate cheaply from it.
pub trait EngineFactory: Send + Sync {
    fn spawn(&self) -> FabricResult<Box<dyn Engine>>;

    /// Releases whatever long-lived resources this factory holds (e.g. a
    /// compiled WASM module). Called by [`TexFabric::terminate`](crate::TexFabric::terminate)
    /// and [`TexFabric::unload`](crate::TexFabric::unload). Default is a
    /// no-op for factories that recreate everything in `spawn`.
    fn shutdown(&self) {}
}

/// Builds the environment variables every engine invocation requires (spec
/// §6 "Engine environment"): `TEXMFCNF`/`TEXMFROOT`/`TEXMFDIST`/`TEXMFVAR`
/// plus the recursive search paths, all rooted under `/texlive/texmf-dist`.
pub fn build_environment() -> Vec<(String, String)> {
    let recursive = format!("{TEXMF_DIST}//");
    vec![
        ("TEXMFCNF".into(), format!("{TEXMF_DIST}/web2c")),
        ("TEXMFROOT".into(), TEXROOT.into()),
        ("TEXMFDIST".into(), TEXMF_DIST.into()),
        ("TEXMFVAR".into(), format!("{TEXMF_DIST}/texmf-var")),
        ("TEXINPUTS".into(), recursive.clone()),
        ("T1FONTS".into(), recursive.clone()),
        ("ENCFONTS".into(), recursive.clone()),
        ("TFMFONTS".into(), recursive.clone()),
        ("VFFONTS".into(), recursive.clone()),
        ("TEXFONTMAPS".into(), recursive.clone()),
        ("TEXPSHEADERS".into(), recursive),
    ]
}

/// `pdflatex --no-shell-escape --interaction=nonstopmode --halt-on-error --fmt=<fmt> /document.tex`
pub fn build_pdflatex_invocation(fmt_path: &str) -> EngineInvocation {
    EngineInvocation {
        program: "pdflatex",
        args: vec![
            "--no-shell-escape".into(),
            "--interaction=nonstopmode".into(),
            "--halt-on-error".into(),
            format!("--fmt={fmt_path}"),
            "/document.tex".into(),
        ],
        env: build_environment(),
    }
}

/// `xelatex` runs the same way as pdflatex, followed on success by
/// `xdvipdfmx -o /document.pdf /document.xdv`.
pub fn build_xelatex_invocation(fmt_path: &str) -> EngineInvocation {
    EngineInvocation {
        program: "xelatex",
        args: vec![
            "--no-shell-escape".into(),
            "--interaction=nonstopmode".into(),
            "--halt-on-error".into(),
            format!("--fmt={fmt_path}"),
            "/document.tex".into(),
        ],
        env: build_environment(),
    }
}

pub fn build_xdvipdfmx_invocation() -> EngineInvocation {
    EngineInvocation {
        program: "xdvipdfmx",
        args: vec!["-o".into(), "/document.pdf".into(), "/document.xdv".into()],
        env: build_environment(),
    }
}

/// `pdflatex -ini -jobname=myformat -interaction=nonstopmode &<fmt-base> /myformat.ini`
pub fn build_format_ini_invocation(fmt_base: &str) -> EngineInvocation {
    EngineInvocation {
        program: "pdflatex",
        args: vec![
            "-ini".into(),
            "-jobname=myformat".into(),
            "-interaction=nonstopmode".into(),
            format!("&{fmt_base}"),
            "/myformat.ini".into(),
        ],
        env: build_environment(),
    }
}

pub fn invocation_for_engine(engine: &str, fmt_path: &str) -> EngineInvocation {
    match engine {
        "xelatex" => build_xelatex_invocation(fmt_path),
        _ => build_pdflatex_invocation(fmt_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdflatex_invocation_matches_the_documented_argv() {
        let inv = build_pdflatex_invocation("/custom.fmt");
        assert_eq!(inv.program, "pdflatex");
        assert_eq!(
            inv.args,
            vec![
                "--no-shell-escape",
                "--interaction=nonstopmode",
                "--halt-on-error",
                "--fmt=/custom.fmt",
                "/document.tex",
            ]
        );
    }

    #[test]
    fn environment_roots_search_paths_under_texmf_dist() {
        let env = build_environment();
        let texinputs = env.iter().find(|(k, _)| k == "TEXINPUTS").unwrap();
        assert_eq!(texinputs.1, "/texlive/texmf-dist//");
        assert!(env.iter().any(|(k, v)| k == "TEXMFROOT" && v == "/texlive"));
    }

    #[test]
    fn format_ini_invocation_uses_jobname_myformat() {
        let inv = build_format_ini_invocation("/custom.fmt");
        assert!(inv.args.contains(&"-jobname=myformat".to_string()));
        assert!(inv.args.contains(&"/myformat.ini".to_string()));
    }

    #[test]
    fn invocation_for_engine_dispatches_on_name() {
        assert_eq!(invocation_for_engine("xelatex", "/f").program, "xelatex");
        assert_eq!(invocation_for_engine("pdflatex", "/f").program, "pdflatex");
        assert_eq!(invocation_for_engine("auto", "/f").program, "pdflatex");
    }
}
