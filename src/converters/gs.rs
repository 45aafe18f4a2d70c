//! Ghostscript-backed conversion steps: PS→PDF, PDF→EPS, EPS→PDF, and
//! EPS→bitmap rendering.
//!
//! The EPS produced by Ghostscript gets its `%%BoundingBox` replaced with
//! the pre-measured ink box right after extraction: `eps2write` declares
//! the page box, not the ink extent, and every downstream crop trusts the
//! header.

use crate::bbox::BoundingBoxPair;
use crate::config::{ConversionConfig, MarginUnit, OutputFormat};
use crate::converters::{eps, verify_output};
use crate::error::TexImgError;
use crate::job::ConversionJob;
use crate::runner::{ProcessRunner, ToolInvocation};

/// PostScript (or EPS) to PDF via the pdfwrite device. Page rotation is
/// disabled so landscape-looking formulas keep their orientation.
pub(crate) async fn ps_to_pdf(
    config: &ConversionConfig,
    job: &ConversionJob,
    input: &str,
    output: &str,
) -> Result<(), TexImgError> {
    let runner = ProcessRunner::new(config);
    let inv = ToolInvocation::new(&config.tools.ghostscript, job.working_dir())
        .args(["-dSAFER", "-dNOPAUSE", "-dBATCH", "-sDEVICE=pdfwrite"])
        .arg("-dAutoRotatePages=/None")
        .arg(format!("-sOutputFile={output}"))
        .arg(input)
        .hint("Ghostscript")
        .stage("converting PostScript to PDF");
    let status = runner.run_logged(&inv).await?;
    if !status.success() {
        return Err(TexImgError::ToolFailed {
            tool: config.tools.ghostscript.clone(),
            code: status.code(),
        });
    }
    if !job.path(output).exists() {
        return Err(TexImgError::ExpectedOutputMissing {
            tool: config.tools.ghostscript.clone(),
            path: job.path(output),
        });
    }
    Ok(())
}

/// Extract one PDF page as EPS at the given nominal resolution, then
/// substitute the pre-measured bounding box pair into the header.
pub(crate) async fn pdf_to_eps(
    config: &ConversionConfig,
    job: &mut ConversionJob,
    input: &str,
    output: &str,
    resolution: u32,
    page: usize,
    bb: BoundingBoxPair,
) -> Result<(), TexImgError> {
    let runner = ProcessRunner::new(config);
    let mut inv = ToolInvocation::new(&config.tools.ghostscript, job.working_dir())
        .arg("-q")
        .arg(format!("-sDEVICE={}", config.gs_eps_device))
        .arg(format!("-dFirstPage={page}"))
        .arg(format!("-dLastPage={page}"));
    if config.gs_eps_device == "eps2write" {
        // eps2write else turns glyphs into font resources that downstream
        // tools rasterize poorly.
        inv = inv.arg("-dNoOutputFonts");
    }
    let inv = inv
        .args(["-dNOCACHE", "-dEPSCrop"])
        .arg(format!("-sOutputFile={output}"))
        .args(["-dNOPAUSE", "-dBATCH"])
        .arg(format!("-r{resolution}"))
        .arg(input)
        .hint("Ghostscript")
        .stage("converting PDF to EPS");
    let status = runner.run_logged(&inv).await?;
    if !status.success() {
        return Err(TexImgError::ToolFailed {
            tool: config.tools.ghostscript.clone(),
            code: status.code(),
        });
    }
    verify_output(job, &config.tools.ghostscript, output)?;
    eps::substitute_bounding_box(&job.path(output), bb)?;
    Ok(())
}

/// EPS back to a single-page PDF cropped to the EPS bounding box.
pub(crate) async fn eps_to_pdf(
    config: &ConversionConfig,
    job: &mut ConversionJob,
    input: &str,
    output: &str,
) -> Result<(), TexImgError> {
    let runner = ProcessRunner::new(config);
    let inv = ToolInvocation::new(&config.tools.ghostscript, job.working_dir())
        .args(["-q", "-sDEVICE=pdfwrite", "-dNOPAUSE", "-dBATCH", "-dEPSCrop"])
        .arg(format!("-sOutputFile={output}"))
        .arg(input)
        .hint("Ghostscript")
        .stage("converting EPS to PDF");
    let status = runner.run_logged(&inv).await?;
    if !status.success() {
        return Err(TexImgError::ToolFailed {
            tool: config.tools.ghostscript.clone(),
            code: status.code(),
        });
    }
    verify_output(job, &config.tools.ghostscript, output)
}

/// Rasterize an EPS to PNG/JPEG/BMP with margins applied.
///
/// The EPS is not rendered directly: a small wrapper EPS translates the
/// drawing so the ink (minus left/bottom margins) lands at the origin,
/// and the raster size is fixed with `-g` so right/top margins come out
/// exact. `showpage` inside the target is stubbed out to keep the
/// wrapper in control of page emission.
pub(crate) async fn eps_to_image(
    config: &ConversionConfig,
    job: &mut ConversionJob,
    input: &str,
    output: &str,
    bb: BoundingBoxPair,
) -> Result<(), TexImgError> {
    let device = match OutputFormat::from_path(std::path::Path::new(output)) {
        Some(OutputFormat::Png) if config.transparent => "pngalpha",
        Some(OutputFormat::Png) => "png16m",
        Some(OutputFormat::Bmp) => "bmp16m",
        _ => "jpeg",
    };

    let scale = config.resolution_scale;
    let divide = match config.margin_unit {
        MarginUnit::BigPoints => 1.0,
        MarginUnit::Pixels => scale,
    };
    let mult = match config.margin_unit {
        MarginUnit::BigPoints => scale,
        MarginUnit::Pixels => 1.0,
    };
    let m = &config.margins;
    let translate_left = -bb.hires.left + m.left / divide;
    let translate_bottom = -bb.hires.bottom + m.bottom / divide;
    // Fractional pixel sizes round up so no ink is cut at the edge.
    let width = (bb.hires.width() * scale + (m.left + m.right) * mult).ceil().max(1.0) as u32;
    let height = (bb.hires.height() * scale + (m.top + m.bottom) * mult).ceil().max(1.0) as u32;

    let wrapper = job.temp_name(".eps")?;
    let mut src = String::new();
    src.push_str("/NumbDict countdictstack def\n");
    src.push_str("1 dict begin\n");
    src.push_str("/showpage {} def\n");
    src.push_str("userdict begin\n");
    if !bb.standard.is_empty() {
        src.push_str(&format!("{translate_left} {translate_bottom} translate\n"));
    }
    src.push_str("1.000000 1.000000 scale\n");
    src.push_str("0.000000 0.000000 translate\n");
    if !bb.standard.is_empty() {
        src.push_str(&format!("({input}) run\n"));
    }
    src.push_str("countdictstack NumbDict sub {end} repeat\n");
    src.push_str("showpage\n");
    let wrapper_path = job.path(&wrapper);
    std::fs::write(&wrapper_path, src).map_err(|e| TexImgError::io(&wrapper_path, e))?;

    let alpha_bits = if config.antialias { 4 } else { 1 };
    let resolution = (72.0 * scale).round().max(1.0) as u32;
    let runner = ProcessRunner::new(config);
    let inv = ToolInvocation::new(&config.tools.ghostscript, job.working_dir())
        .arg("-q")
        .arg(format!("-sDEVICE={device}"))
        .arg(format!("-sOutputFile={output}"))
        .args(["-dNOPAUSE", "-dBATCH", "-dPDFFitPage"])
        .arg(format!("-dTextAlphaBits={alpha_bits}"))
        .arg(format!("-dGraphicsAlphaBits={alpha_bits}"))
        .arg(format!("-r{resolution}"))
        .arg(format!("-g{width}x{height}"))
        .arg(&wrapper)
        .hint("Ghostscript")
        .stage("rendering EPS to a bitmap");
    let status = runner.run_logged(&inv).await?;
    if !status.success() {
        return Err(TexImgError::ToolFailed {
            tool: config.tools.ghostscript.clone(),
            code: status.code(),
        });
    }
    verify_output(job, &config.tools.ghostscript, output)
}
