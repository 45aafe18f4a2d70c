//! Job state: the temp-file registry and the conversion result object.
//!
//! A [`ConversionJob`] owns every intermediate the pipeline creates in the
//! input file's directory — generated TeX driver scripts and their
//! by-products, per-page EPS/PDF/PNG intermediates — and removes them
//! best-effort at teardown. Cleanup failures are logged and swallowed:
//! a locked log file must never mask the job's real outcome.
//!
//! Invariant: only files the job itself created are ever registered, so
//! cleanup is always safe to attempt unconditionally. The user's input
//! file is *not* in the registry; compile by-products sharing its stem are
//! registered through [`ConversionJob::register_compile_base`], which
//! excludes the `.tex` source itself from the sweep.

use crate::error::TexImgError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Extensions swept when a TeX base name is cleaned up. Matches the
/// by-product family of a TeX engine plus the driver outputs.
const TEX_BASE_EXTS: &[&str] = &["tex", "dvi", "pdf", "log", "aux", "tmp", "out", "ps"];

/// One conversion request and the temporary files it owns.
pub struct ConversionJob {
    input: PathBuf,
    output: PathBuf,
    working_dir: PathBuf,
    base: String,
    /// Registered TeX stems; the bool is "also delete the .tex itself"
    /// (true for job-written driver scripts, false for the user's source).
    tex_bases: Vec<(PathBuf, bool)>,
    image_files: Vec<PathBuf>,
    warnings: Vec<String>,
    error_ignored: bool,
    delete_temp_files: bool,
}

impl ConversionJob {
    /// Create a job for `input` → `output` (both full paths). All
    /// intermediates are written next to the input file.
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        delete_temp_files: bool,
    ) -> Result<Self, TexImgError> {
        let input = input.into();
        let output = output.into();
        let working_dir = input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let base = input
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| TexImgError::UnsupportedFormat {
                path: input.clone(),
                expected: "a file name with a stem".into(),
            })?
            .to_string();
        Ok(Self {
            input,
            output,
            working_dir,
            base,
            tex_bases: Vec::new(),
            image_files: Vec::new(),
            warnings: Vec::new(),
            error_ignored: false,
            delete_temp_files,
        })
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// The directory all intermediates live in (the input's directory).
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// The input's file stem; per-page intermediates are `{base}-{n}.{ext}`.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Resolve a file name relative to the working directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.working_dir.join(name)
    }

    /// Create a fresh, unique file in the working directory and return its
    /// bare name (tools run with the working directory as cwd, and TeX in
    /// particular dislikes absolute paths with special characters).
    ///
    /// The file is created empty so the name is reserved; the caller (or
    /// the tool it drives) overwrites it.
    pub fn temp_name(&mut self, suffix: &str) -> Result<String, TexImgError> {
        let file = tempfile::Builder::new()
            .prefix("teximg-")
            .suffix(suffix)
            .tempfile_in(&self.working_dir)
            .map_err(|e| TexImgError::io(&self.working_dir, e))?;
        let path = file.into_temp_path().keep().map_err(|e| {
            TexImgError::Internal(format!("could not persist temp file: {e}"))
        })?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TexImgError::Internal("temp name not UTF-8".into()))?
            .to_string();
        if suffix == ".tex" {
            self.register_script_base(path.with_extension(""));
        } else {
            self.register_image(path);
        }
        Ok(name)
    }

    /// Register a job-written driver script's stem; the whole TeX
    /// by-product family including the `.tex` is swept at teardown.
    pub fn register_script_base(&mut self, stem: impl Into<PathBuf>) {
        self.tex_bases.push((stem.into(), true));
    }

    /// Register the compile stem of the user's own `.tex` source; every
    /// by-product is swept except the source file itself.
    pub fn register_compile_base(&mut self, stem: impl Into<PathBuf>) {
        self.tex_bases.push((stem.into(), false));
    }

    /// Register one generated intermediate image file.
    pub fn register_image(&mut self, path: impl Into<PathBuf>) {
        self.image_files.push(path.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.warnings.push(message);
    }

    pub fn set_error_ignored(&mut self) {
        self.error_ignored = true;
    }

    pub fn error_ignored(&self) -> bool {
        self.error_ignored
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Consume the job into its result object.
    pub(crate) fn finish(mut self, output_files: Vec<PathBuf>) -> ConversionOutput {
        ConversionOutput {
            output_files,
            warnings: std::mem::take(&mut self.warnings),
            compile_error_ignored: self.error_ignored,
        }
    }

    /// Best-effort removal of every registered temp file. Never fails;
    /// individual misses are logged at debug level only (another sweep or
    /// the tool itself may already have removed a file).
    pub fn cleanup(&mut self) {
        if !self.delete_temp_files {
            self.tex_bases.clear();
            self.image_files.clear();
            return;
        }
        for (stem, with_tex) in self.tex_bases.drain(..) {
            for ext in TEX_BASE_EXTS {
                if *ext == "tex" && !with_tex {
                    continue;
                }
                let p = stem.with_extension(ext);
                match std::fs::remove_file(&p) {
                    Ok(()) => debug!("removed {}", p.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!("could not remove {}: {e}", p.display()),
                }
            }
        }
        for p in self.image_files.drain(..) {
            match std::fs::remove_file(&p) {
                Ok(()) => debug!("removed {}", p.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("could not remove {}: {e}", p.display()),
            }
        }
    }
}

impl Drop for ConversionJob {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// What a finished conversion hands back to the presentation layer.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    /// Final output file path(s): one entry per produced page, or a single
    /// entry when pages were merged.
    pub output_files: Vec<PathBuf>,
    /// Ordered non-fatal diagnostics ("page 2 was empty", relocation
    /// failures, a failed merge).
    pub warnings: Vec<String>,
    /// At least one TeX compile error was ignored under
    /// `ignore_compile_errors`; the output may be incomplete.
    pub compile_error_ignored: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_dir_is_input_parent() {
        let job = ConversionJob::new("/data/docs/fig.tex", "/out/fig.png", true).unwrap();
        assert_eq!(job.working_dir(), Path::new("/data/docs"));
        assert_eq!(job.base(), "fig");
        assert_eq!(job.path("fig-1.eps"), PathBuf::from("/data/docs/fig-1.eps"));
    }

    #[test]
    fn cleanup_sweeps_script_family_but_spares_user_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.tex");
        std::fs::write(&src, "\\bye").unwrap();
        let aux = dir.path().join("doc.aux");
        std::fs::write(&aux, "").unwrap();
        let script = dir.path().join("drv.tex");
        std::fs::write(&script, "\\bye").unwrap();

        let mut job = ConversionJob::new(&src, dir.path().join("doc.png"), true).unwrap();
        job.register_compile_base(dir.path().join("doc"));
        job.register_script_base(dir.path().join("drv"));
        job.cleanup();

        assert!(src.exists(), "user source must survive");
        assert!(!aux.exists(), "compile by-product removed");
        assert!(!script.exists(), "driver script removed");
    }

    #[test]
    fn temp_name_reserves_and_registers() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.pdf");
        std::fs::write(&src, b"%PDF-1.5").unwrap();
        let mut job = ConversionJob::new(&src, dir.path().join("a.png"), true).unwrap();

        let name = job.temp_name(".eps").unwrap();
        let full = job.path(&name);
        assert!(full.exists());
        job.cleanup();
        assert!(!full.exists());
        assert!(src.exists());
    }

    #[test]
    fn cleanup_disabled_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.pdf");
        std::fs::write(&src, b"%PDF-1.5").unwrap();
        let mut job = ConversionJob::new(&src, dir.path().join("a.png"), false).unwrap();
        let name = job.temp_name(".eps").unwrap();
        let full = job.path(&name);
        job.cleanup();
        assert!(full.exists());
    }
}
