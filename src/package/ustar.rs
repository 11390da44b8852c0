//! In-memory ustar reader for compressed-archive package sources (spec
//! §4.6.1), built on the `tar` crate — the same crate the teacher reaches
//! for when unpacking its own downloads (`examples/.../package.rs`,
//! `tar::Archive::new(decompressed).unpack(...)`). Here entries are
//! filtered and re-homed into the engine namespace rather than extracted
//! wholesale, so `Archive::entries` is walked directly instead of
//! `unpack`ed to disk.

use std::io::Read;

/// TeX-source extensions worth keeping from a package tarball.
const TEX_EXTENSIONS: &[&str] = &["sty", "cls", "def", "cfg", "tex", "fd", "clo", "ltx"];
/// Font/metric extensions worth keeping.
const FONT_EXTENSIONS: &[&str] = &["pfb", "pfm", "afm", "tfm", "vf", "map", "enc"];

/// One extracted file: its raw tar path and content.
pub struct RawEntry {
    pub tar_path: String,
    pub bytes: Vec<u8>,
}

/// Walks a ustar byte stream, yielding only regular files whose extension is
/// in the TeX/font allow-list and whose path isn't under `doc/` or
/// `source/`. Malformed archives and unreadable entries are skipped rather
/// than aborting the whole package fetch.
pub fn extract_filtered(data: &[u8]) -> Vec<RawEntry> {
    let mut out = Vec::new();
    let mut archive = tar::Archive::new(data);

    let entries = match archive.entries() {
        Ok(entries) => entries,
        Err(_) => return out,
    };

    for entry in entries {
        let Ok(mut entry) = entry else { continue };
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let Ok(path) = entry.path() else { continue };
        let full_name = path.to_string_lossy().into_owned();

        if full_name.starts_with("doc/") || full_name.contains("/doc/") {
            continue;
        }
        if full_name.starts_with("source/") || full_name.contains("/source/") {
            continue;
        }
        if !is_kept_extension(&full_name) {
            continue;
        }

        let size = entry.header().size().unwrap_or(0) as usize;
        let mut bytes = Vec::with_capacity(size);
        if entry.read_to_end(&mut bytes).is_err() {
            continue;
        }

        out.push(RawEntry { tar_path: full_name, bytes });
    }

    out
}

fn is_kept_extension(path: &str) -> bool {
    let ext = path.rsplit('.').next().unwrap_or("");
    TEX_EXTENSIONS.contains(&ext) || FONT_EXTENSIONS.contains(&ext)
}

/// Maps a raw tar path into the engine's VFS namespace (spec §4.6.1):
/// preserve paths that already contain `/texmf-dist/`; otherwise graft tex or
/// font files under `/texlive/texmf-dist/{tex,fonts}/...`; otherwise fall
/// back to `/texlive/texmf-dist/tex/latex/<pkg>/<file>`.
pub fn map_into_namespace(tar_path: &str, package: &str) -> String {
    // Tar entries never carry a leading `/`, so match the bare `texmf-dist/`
    // segment rather than requiring one to precede it.
    if let Some(idx) = tar_path.find("texmf-dist/") {
        return format!("/{}", &tar_path[idx..]);
    }

    let ext = tar_path.rsplit('.').next().unwrap_or("");
    let file_name = tar_path.rsplit('/').next().unwrap_or(tar_path);

    if TEX_EXTENSIONS.contains(&ext) {
        if let Some(rest) = tar_path.find("tex/") {
            return format!("/texlive/texmf-dist/{}", &tar_path[rest..]);
        }
    } else if FONT_EXTENSIONS.contains(&ext) {
        if let Some(rest) = tar_path.find("fonts/") {
            return format!("/texlive/texmf-dist/{}", &tar_path[rest..]);
        }
    }

    format!("/texlive/texmf-dist/tex/latex/{package}/{file_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append_file(builder: &mut tar::Builder<Vec<u8>>, path: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_size(data.len() as u64);
        header.set_cksum();
        builder.append(&header, data).unwrap();
    }

    fn append_dir(builder: &mut tar::Builder<Vec<u8>>, path: &str) {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_path(path).unwrap();
        header.set_size(0);
        header.set_cksum();
        builder.append(&header, std::io::empty()).unwrap();
    }

    #[test]
    fn extracts_regular_tex_file_and_skips_doc() {
        let mut builder = tar::Builder::new(Vec::new());
        append_file(&mut builder, "amsmath.sty", b"hello-world");
        append_file(&mut builder, "doc/README", b"notes");
        let archive = builder.into_inner().unwrap();

        let entries = extract_filtered(&archive);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tar_path, "amsmath.sty");
        assert_eq!(entries[0].bytes, b"hello-world");
    }

    #[test]
    fn skips_directory_entries() {
        let mut builder = tar::Builder::new(Vec::new());
        append_dir(&mut builder, "some/dir/");
        let archive = builder.into_inner().unwrap();

        let entries = extract_filtered(&archive);
        assert!(entries.is_empty());
    }

    #[test]
    fn maps_texmf_dist_paths_unchanged() {
        let mapped = map_into_namespace("texmf-dist/tex/latex/amsmath/amsmath.sty", "amsmath");
        assert_eq!(mapped, "/texmf-dist/tex/latex/amsmath/amsmath.sty");
    }

    #[test]
    fn falls_back_to_package_dir_for_unrecognised_layout() {
        let mapped = map_into_namespace("amsmath.sty", "amsmath");
        assert_eq!(mapped, "/texlive/texmf-dist/tex/latex/amsmath/amsmath.sty");
    }
}
