//! Raster and EMF output through the `pdfiumdraw` helper.

use crate::config::ConversionConfig;
use crate::converters::{verify_output, verify_page_outputs};
use crate::error::TexImgError;
use crate::job::ConversionJob;
use crate::runner::{ProcessRunner, ToolInvocation};
use std::path::Path;

fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Render PDF pages with pdfium. `output` may be a `%d` template when
/// `pages` names more than one page. EMF output is vector, so the
/// resolution scale does not apply to it.
pub(crate) async fn pdf_to_image(
    config: &ConversionConfig,
    job: &mut ConversionJob,
    input: &str,
    output: &str,
    pages: &[usize],
) -> Result<(), TexImgError> {
    let kind = extension_of(output);
    let runner = ProcessRunner::new(config);
    let mut inv = ToolInvocation::new(&config.tools.pdfiumdraw, job.working_dir())
        .hint("pdfiumdraw")
        .stage("rendering PDF pages");
    if kind != "emf" {
        inv = inv.arg(format!("--scale={}", config.resolution_scale));
    }
    inv = inv.arg(format!("--{kind}"));
    if config.transparent {
        inv = inv.arg("--transparent");
    }
    if !pages.is_empty() {
        let list = pages
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        inv = inv.arg(format!("--pages={list}"));
    }
    let inv = inv.arg(format!("--output={output}")).arg(input);
    runner.run_logged(&inv).await?;

    if output.contains("%d") {
        verify_page_outputs(job, &config.tools.pdfiumdraw, output, pages)
    } else {
        verify_output(job, &config.tools.pdfiumdraw, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension_of("a-1.PNG"), "png");
        assert_eq!(extension_of("noext"), "");
    }
}
