//! Error types for the teximg library.
//!
//! One enum covers every fatal outcome. The split the pipeline actually
//! cares about is *fatal vs. warning*, and warnings are not errors here:
//! they accumulate as strings on [`crate::job::ConversionOutput`] next to a
//! successful result (a skipped empty page, a failed merge whose per-page
//! files are still good, a file that could not be moved into place).
//!
//! Several variants name the external tool involved so the caller can
//! report a path-configuration problem precisely — historically the single
//! most common failure mode for this kind of toolchain driver.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the teximg library.
#[derive(Debug, Error)]
pub enum TexImgError {
    // ── External tools ────────────────────────────────────────────────────
    /// The executable could not be located or started.
    #[error("'{tool}' could not be started ({detail})\nCheck that {hint} is installed and on PATH, or set its path in ToolPaths.")]
    ToolNotFound {
        tool: String,
        hint: String,
        detail: String,
    },

    /// The configured deadline elapsed and the cancellation policy (or the
    /// abort flag) chose to kill the process.
    #[error("'{tool}' did not finish within {secs}s and was terminated")]
    ToolTimedOut { tool: String, secs: u64 },

    /// The tool ran to completion but reported failure.
    #[error("'{tool}' exited with status {code:?}")]
    ToolFailed { tool: String, code: Option<i32> },

    /// The tool exited 0 but the file it was supposed to produce is absent.
    /// Some Ghostscript devices exit 0 on partial failure.
    #[error("'{tool}' reported success but '{}' was not produced", path.display())]
    ExpectedOutputMissing { tool: String, path: PathBuf },

    // ── Metadata ─────────────────────────────────────────────────────────
    /// Page count or bounding-box metadata could not be parsed from the
    /// measurement tool's output. Fatal: all downstream geometry depends
    /// on it.
    #[error("failed to read page metadata: {detail}")]
    ProbeFailed { detail: String },

    /// Every page of the document has an empty bounding box; a document
    /// consisting solely of blank pages is a source error, not a product.
    #[error("all {total} pages are empty; nothing to output")]
    AllPagesEmpty { total: usize },

    // ── Containers ───────────────────────────────────────────────────────
    /// A byte-level container assumption was violated (e.g. a GIF frame
    /// without an image descriptor). Fatal for the merge step only; the
    /// orchestrator keeps the unmerged per-page files and records a warning.
    #[error("malformed container input '{}': {detail}", path.display())]
    MalformedContainerInput { path: PathBuf, detail: String },

    // ── Input validation ─────────────────────────────────────────────────
    /// Input or output extension outside the supported set.
    #[error("unsupported format for '{}' (expected one of: {expected})", path.display())]
    UnsupportedFormat { path: PathBuf, expected: String },

    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Plumbing ─────────────────────────────────────────────────────────
    /// Filesystem failure on a path the job cannot work without.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The caller set the abort flag between pipeline stages.
    #[error("conversion aborted")]
    Aborted,

    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TexImgError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TexImgError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_not_found_names_the_tool() {
        let e = TexImgError::ToolNotFound {
            tool: "gs".into(),
            hint: "Ghostscript".into(),
            detail: "No such file or directory".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("'gs'"), "got: {msg}");
        assert!(msg.contains("Ghostscript"));
    }

    #[test]
    fn timed_out_display() {
        let e = TexImgError::ToolTimedOut {
            tool: "platex".into(),
            secs: 10,
        };
        assert!(e.to_string().contains("10s"));
    }

    #[test]
    fn all_pages_empty_display() {
        let e = TexImgError::AllPagesEmpty { total: 4 };
        assert!(e.to_string().contains("4 pages"));
    }
}
