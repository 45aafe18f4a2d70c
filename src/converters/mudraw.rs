//! SVG output through MuPDF's `mudraw`.

use crate::config::ConversionConfig;
use crate::converters::verify_page_outputs;
use crate::error::TexImgError;
use crate::job::ConversionJob;
use crate::runner::{ProcessRunner, ToolInvocation};
use once_cell::sync::Lazy;
use regex::Regex;

/// Render the given 1-based pages of a PDF to SVG. `output` is a `%d`
/// template ("fig-%d.svg"); mudraw substitutes the page number itself.
pub(crate) async fn pdf_to_svg(
    config: &ConversionConfig,
    job: &mut ConversionJob,
    input: &str,
    output: &str,
    pages: &[usize],
) -> Result<(), TexImgError> {
    let runner = ProcessRunner::new(config);
    let mut inv = ToolInvocation::new(&config.tools.mudraw, job.working_dir())
        .arg("-l")
        .arg("-o")
        .arg(output)
        .arg(input)
        .hint("mudraw (MuPDF)")
        .stage("converting PDF to SVG");
    if !pages.is_empty() {
        let list = pages
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        inv = inv.arg(list);
    }
    runner.run_logged(&inv).await?;
    verify_page_outputs(job, &config.tools.mudraw, output, pages)
}

static RE_SVG_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<svg\b[^>]*>").unwrap());
static RE_SIZE_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\s+(?:width|height)="[^"]*""#).unwrap());

/// Drop the `width`/`height` attributes from the root `<svg>` element so
/// the image scales to its container; the `viewBox` keeps the aspect
/// ratio.
pub(crate) fn strip_display_size(job: &ConversionJob, name: &str) -> Result<(), TexImgError> {
    let path = job.path(name);
    let text = std::fs::read_to_string(&path).map_err(|e| TexImgError::io(&path, e))?;
    let stripped = strip_svg_size(&text);
    std::fs::write(&path, stripped).map_err(|e| TexImgError::io(&path, e))
}

fn strip_svg_size(text: &str) -> String {
    match RE_SVG_OPEN.find(text) {
        Some(m) => {
            let tag = RE_SIZE_ATTR.replace_all(m.as_str(), "");
            format!("{}{}{}", &text[..m.start()], tag, &text[m.end()..])
        }
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_width_and_height_from_root_element() {
        let svg = r#"<?xml version="1.0"?>
<svg xmlns="http://www.w3.org/2000/svg" width="100pt" height="50pt" viewBox="0 0 100 50">
<rect width="10" height="10"/>
</svg>"#;
        let out = strip_svg_size(svg);
        assert!(out.contains(r#"viewBox="0 0 100 50""#));
        assert!(!out.contains(r#"width="100pt""#));
        assert!(!out.contains(r#"height="50pt""#));
        // Nested elements keep their own size attributes.
        assert!(out.contains(r#"<rect width="10" height="10"/>"#));
    }

    #[test]
    fn no_svg_element_is_a_noop() {
        assert_eq!(strip_svg_size("plain text"), "plain text");
    }
}
