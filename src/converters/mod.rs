//! Single-step converters wrapping one external tool (or one in-process
//! image operation) each. The pipeline composes these; no converter knows
//! about routes or merging.
//!
//! File name convention: converters take and return bare file names
//! relative to the job's working directory, because TeX engines and
//! Ghostscript handle relative names much better than paths with spaces
//! or non-ASCII segments. The job resolves to full paths where needed.

pub(crate) mod eps;
pub(crate) mod gs;
pub(crate) mod mudraw;
pub(crate) mod pdfium;
pub(crate) mod pdftex;
pub(crate) mod raster;
pub(crate) mod tex;

use crate::error::TexImgError;
use crate::job::ConversionJob;

/// Substitute a 1-based page number into a `%d` output template
/// ("fig-%d.svg", 3 → "fig-3.svg").
pub(crate) fn expand_page_template(template: &str, page: usize) -> String {
    match template.find("%d") {
        Some(i) => format!("{}{}{}", &template[..i], page, &template[i + 2..]),
        None => template.to_string(),
    }
}

/// Register each expected per-page output and verify the tool actually
/// produced it. Missing files fail with the producing tool's name.
pub(crate) fn verify_page_outputs(
    job: &mut ConversionJob,
    tool: &str,
    template: &str,
    pages: &[usize],
) -> Result<(), TexImgError> {
    let mut missing = None;
    for &p in pages {
        let name = expand_page_template(template, p);
        let path = job.path(&name);
        job.register_image(path.clone());
        if missing.is_none() && !path.exists() {
            missing = Some(path);
        }
    }
    match missing {
        Some(path) => Err(TexImgError::ExpectedOutputMissing {
            tool: tool.to_string(),
            path,
        }),
        None => Ok(()),
    }
}

/// Register a single output and verify it exists.
pub(crate) fn verify_output(
    job: &mut ConversionJob,
    tool: &str,
    name: &str,
) -> Result<(), TexImgError> {
    let path = job.path(name);
    job.register_image(path.clone());
    if path.exists() {
        Ok(())
    } else {
        Err(TexImgError::ExpectedOutputMissing {
            tool: tool.to_string(),
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_expansion() {
        assert_eq!(expand_page_template("fig-%d.svg", 3), "fig-3.svg");
        assert_eq!(expand_page_template("plain.svg", 3), "plain.svg");
        assert_eq!(expand_page_template("%d-%d.png", 2), "2-%d.png");
    }
}
