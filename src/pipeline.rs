//! The conversion pipeline: input → PDF → measured pages → route →
//! per-page outputs → optional merge → relocation.
//!
//! ## Routes
//!
//! After the input has been normalized to `{base}.pdf` and every page
//! measured, one of three routes produces the per-page files:
//!
//! 1. **PDF with live text** (`pdf` output, outlining off) — pdfTeX
//!    re-ships each page cropped to its box; fonts and text survive.
//! 2. **Direct from PDF** (`svg`, or `gif` with transparency) — the
//!    cropped PDF is rendered by mudraw / pdfiumdraw, which keep the
//!    alpha channel PostScript would lose.
//! 3. **Via EPS** (everything else) — each page becomes an EPS with a
//!    corrected bounding box, then Ghostscript re-renders it to the
//!    target format.
//!
//! Empty pages are detected up front: with margins missing on an axis
//! the page would come out zero-sized, so it is skipped with a warning;
//! if every page is empty the whole conversion fails.

use crate::bbox::BoundingBoxPair;
use crate::compose;
use crate::config::{ConversionConfig, InputFormat, MarginUnit, OutputFormat, PageBox};
use crate::converters::{eps, gs, mudraw, pdfium, pdftex, raster, tex};
use crate::error::TexImgError;
use crate::job::{ConversionJob, ConversionOutput};
use crate::probe;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Convert `input` (TeX, PDF, PS, or EPS) into `output`, whose extension
/// selects the target format. Returns the final file path(s) and any
/// non-fatal warnings.
#[instrument(skip_all, fields(input = %input.as_ref().display()))]
pub async fn convert(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, TexImgError> {
    let input = input.as_ref();
    let output = output.as_ref();
    let input_format = InputFormat::from_path(input).ok_or_else(|| {
        TexImgError::UnsupportedFormat {
            path: input.to_path_buf(),
            expected: "tex, pdf, ps, or eps".into(),
        }
    })?;
    let format = OutputFormat::from_path(output).ok_or_else(|| {
        TexImgError::UnsupportedFormat {
            path: output.to_path_buf(),
            expected: OutputFormat::all_extensions().into(),
        }
    })?;
    config.abort.reset();

    let mut job = ConversionJob::new(input, output, config.delete_temp_files)?;
    let result = run(config, &mut job, input_format, format).await;
    job.cleanup();
    match result {
        Ok(outputs) => Ok(job.finish(outputs)),
        Err(e) => Err(e),
    }
}

/// Blocking wrapper for callers without their own runtime.
pub fn convert_sync(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, TexImgError> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| TexImgError::Internal(format!("could not start the runtime: {e}")))?;
    rt.block_on(convert(input, output, config))
}

async fn run(
    config: &ConversionConfig,
    job: &mut ConversionJob,
    input_format: InputFormat,
    format: OutputFormat,
) -> Result<Vec<PathBuf>, TexImgError> {
    let base = job.base().to_string();
    let ext = format.extension();

    tex::to_pdf(config, job, input_format).await?;
    ensure_not_aborted(config)?;
    let pdf = format!("{base}.pdf");

    let total = probe::page_count(config, job, &pdf).await?;
    if total == 0 {
        return Err(TexImgError::ProbeFailed {
            detail: format!("{pdf} has no pages"),
        });
    }

    let all_pages: Vec<usize> = (1..=total).collect();
    let boxes = if config.page_box == PageBox::Ink {
        probe::page_bounding_boxes(config, job, &pdf, 1, total).await?
    } else {
        probe::page_box_bounding_boxes(config, job, &pdf, &all_pages, config.page_box).await?
    };

    ensure_not_aborted(config)?;
    let live_pages = live_pages(config, job, &boxes)?;

    if format == OutputFormat::Pdf && !config.outlined_text {
        route_text_pdf(config, job, &pdf, &base, total, &boxes, &live_pages).await?;
    } else if format == OutputFormat::Svg || (format == OutputFormat::Gif && config.transparent) {
        route_from_pdf(config, job, format, &pdf, &base, &all_pages, &boxes, &live_pages).await?;
    } else {
        route_via_eps(config, job, format, &pdf, &base, &boxes, &live_pages).await?;
    }

    ensure_not_aborted(config)?;
    if let Some(dir) = job.output().parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| TexImgError::io(dir, e))?;
        }
    }

    let mut pages_out = total;
    if config.merge_pages && total > 1 {
        if try_merge(config, job, format, &base, total, ext).await? {
            pages_out = 1;
        }
    }

    ensure_not_aborted(config)?;
    Ok(relocate_outputs(job, &base, ext, pages_out))
}

/// Cancellation point between stages: a set abort flag fails the job
/// even when no external tool is currently running.
fn ensure_not_aborted(config: &ConversionConfig) -> Result<(), TexImgError> {
    if config.abort.is_set() {
        return Err(TexImgError::Aborted);
    }
    Ok(())
}

/// Flag empty pages. Whether an empty page is skipped depends on the
/// margins: with no width or no height to add, the output would be a
/// zero-size image no tool can write.
fn detect_empty_pages(
    config: &ConversionConfig,
    job: &mut ConversionJob,
    boxes: &[BoundingBoxPair],
) -> Vec<usize> {
    let mut empty = Vec::new();
    for (i, bb) in boxes.iter().enumerate() {
        let page = i + 1;
        if bb.standard.is_empty() {
            if config.margins.lacks_an_axis() {
                job.warn(format!("page {page} was empty; skipped generating its image"));
                empty.push(page);
            } else {
                job.warn(format!("page {page} was empty"));
            }
        }
    }
    empty
}

/// The 1-based pages that will actually be converted. A document where
/// every page is skipped as empty is a source error, not a product.
fn live_pages(
    config: &ConversionConfig,
    job: &mut ConversionJob,
    boxes: &[BoundingBoxPair],
) -> Result<Vec<usize>, TexImgError> {
    let empty = detect_empty_pages(config, job, boxes);
    let total = boxes.len();
    if empty.len() == total {
        return Err(TexImgError::AllPagesEmpty { total });
    }
    Ok((1..=total).filter(|p| !empty.contains(p)).collect())
}

/// Route 1: crop with pdfTeX, keeping text selectable.
async fn route_text_pdf(
    config: &ConversionConfig,
    job: &mut ConversionJob,
    pdf: &str,
    base: &str,
    total: usize,
    boxes: &[BoundingBoxPair],
    live_pages: &[usize],
) -> Result<(), TexImgError> {
    if !config.merge_pages || live_pages.len() != total {
        for &p in live_pages {
            pdftex::crop(
                config,
                job,
                pdf,
                &format!("{base}-{p}.pdf"),
                true,
                &[p],
                &boxes[p - 1..p],
            )
            .await?;
        }
    } else {
        // One pdfTeX run ships all pages straight into `{base}-1.pdf`.
        let all: Vec<usize> = (1..=total).collect();
        pdftex::crop(config, job, pdf, &format!("{base}-1.pdf"), true, &all, boxes).await?;
    }
    Ok(())
}

/// Route 2: crop, then render the cropped PDF directly.
#[allow(clippy::too_many_arguments)]
async fn route_from_pdf(
    config: &ConversionConfig,
    job: &mut ConversionJob,
    format: OutputFormat,
    pdf: &str,
    base: &str,
    all_pages: &[usize],
    boxes: &[BoundingBoxPair],
    live_pages: &[usize],
) -> Result<(), TexImgError> {
    let cropped = job.temp_name(".pdf")?;
    let use_bp = format.is_vector() || config.margin_unit == MarginUnit::BigPoints;
    pdftex::crop(config, job, pdf, &cropped, use_bp, all_pages, boxes).await?;
    match format {
        OutputFormat::Svg => {
            mudraw::pdf_to_svg(config, job, &cropped, &format!("{base}-%d.svg"), live_pages)
                .await?;
            if config.strip_svg_size {
                for &p in live_pages {
                    mudraw::strip_display_size(job, &format!("{base}-{p}.svg"))?;
                }
            }
        }
        OutputFormat::Gif => {
            pdfium::pdf_to_image(config, job, &cropped, &format!("{base}-%d.gif"), live_pages)
                .await?;
        }
        _ => unreachable!("route_from_pdf only handles svg and transparent gif"),
    }
    Ok(())
}

/// Route 3: per page, PDF → EPS (with the measured box substituted) →
/// target format.
async fn route_via_eps(
    config: &ConversionConfig,
    job: &mut ConversionJob,
    format: OutputFormat,
    pdf: &str,
    base: &str,
    boxes: &[BoundingBoxPair],
    live_pages: &[usize],
) -> Result<(), TexImgError> {
    let add_margin = !config.margins.is_zero();
    let resolution = config.eps_resolution(format);
    for &p in live_pages {
        let bb = boxes[p - 1];
        let eps_name = format!("{base}-{p}.eps");
        gs::pdf_to_eps(config, job, pdf, &eps_name, resolution, p, bb).await?;
        // Margins on vector output are baked into the EPS header; the
        // margin unit is big points here regardless of configuration,
        // pixels having no meaning before rasterization.
        match format {
            OutputFormat::Pdf => {
                if add_margin {
                    eps::enlarge_bounding_box(
                        &job.path(&eps_name),
                        &config.margins,
                        true,
                        config.resolution_scale,
                    )?;
                }
                gs::eps_to_pdf(config, job, &eps_name, &format!("{base}-{p}.pdf")).await?;
            }
            OutputFormat::Eps => {
                if add_margin {
                    eps::enlarge_bounding_box(
                        &job.path(&eps_name),
                        &config.margins,
                        true,
                        config.resolution_scale,
                    )?;
                }
            }
            OutputFormat::Emf => {
                if add_margin {
                    eps::enlarge_bounding_box(
                        &job.path(&eps_name),
                        &config.margins,
                        true,
                        config.resolution_scale,
                    )?;
                }
                gs::eps_to_pdf(config, job, &eps_name, &format!("{base}-{p}.pdf")).await?;
                pdfium::pdf_to_image(
                    config,
                    job,
                    &format!("{base}-{p}.pdf"),
                    &format!("{base}-{p}.emf"),
                    &[],
                )
                .await?;
            }
            OutputFormat::Png | OutputFormat::Jpeg | OutputFormat::Bmp => {
                gs::eps_to_image(config, job, &eps_name, &format!("{base}-{p}.{}", format.extension()), bb)
                    .await?;
            }
            OutputFormat::Tiff | OutputFormat::Gif => {
                let png = format!("{base}-{p}.png");
                gs::eps_to_image(config, job, &eps_name, &png, bb).await?;
                raster::convert(
                    job,
                    &png,
                    &format!("{base}-{p}.{}", format.extension()),
                    config.transparent,
                )?;
            }
            OutputFormat::Svg => unreachable!("svg goes through route_from_pdf"),
        }
    }
    Ok(())
}

/// Merge per-page files into one. A failed merge is reported as a
/// warning and the per-page files stand.
async fn try_merge(
    config: &ConversionConfig,
    job: &mut ConversionJob,
    format: OutputFormat,
    base: &str,
    total: usize,
    ext: &str,
) -> Result<bool, TexImgError> {
    if !format.supports_merge() {
        return Ok(false);
    }
    let files: Vec<String> = (1..=total)
        .map(|p| format!("{base}-{p}.{ext}"))
        .filter(|f| job.path(f).exists())
        .collect();
    if files.is_empty() {
        return Ok(false);
    }
    let temp = job.temp_name(&format!(".{ext}"))?;
    match compose::merge(config, job, format, &files, &temp).await {
        Ok(true) => {
            let first = job.path(&format!("{base}-1.{ext}"));
            match std::fs::remove_file(&first) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(TexImgError::io(&first, e)),
            }
            let temp_path = job.path(&temp);
            std::fs::rename(&temp_path, &first).map_err(|e| TexImgError::io(&temp_path, e))?;
            info!("merged {} page(s) into one {ext}", files.len());
            Ok(true)
        }
        Ok(false) => Ok(false),
        Err(e) => {
            job.warn(format!("merging the output files failed: {e}"));
            Ok(false)
        }
    }
}

/// Move the generated files next to the requested output path. A single
/// page (or a merged file) takes the output name itself; multiple pages
/// get `-1`, `-2`, ... suffixes on the output stem.
fn relocate_outputs(
    job: &mut ConversionJob,
    base: &str,
    ext: &str,
    pages_out: usize,
) -> Vec<PathBuf> {
    let output = job.output().to_path_buf();
    let mut outputs = Vec::new();
    if pages_out == 1 {
        let generated = job.path(&format!("{base}-1.{ext}"));
        if generated.exists() {
            match relocate(&generated, &output) {
                Ok(()) => outputs.push(output.clone()),
                Err(e) => job.warn(format!("could not place {}: {e}", output.display())),
            }
        }
    } else {
        let stem = output.with_extension("");
        for p in 1..=pages_out {
            let generated = job.path(&format!("{base}-{p}.{ext}"));
            if !generated.exists() {
                continue;
            }
            let target = PathBuf::from(format!("{}-{p}.{ext}", stem.display()));
            match relocate(&generated, &target) {
                Ok(()) => outputs.push(target),
                Err(e) => job.warn(format!("could not place {}: {e}", target.display())),
            }
        }
    }
    outputs
}

/// Replace `dst` with `src`, falling back to copy+remove when a rename
/// crosses filesystems.
fn relocate(src: &Path, dst: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(dst) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    if std::fs::rename(src, dst).is_err() {
        std::fs::copy(src, dst)?;
        std::fs::remove_file(src)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::{BoundingBox, Margins};

    fn boxes(specs: &[(f64, f64)]) -> Vec<BoundingBoxPair> {
        specs
            .iter()
            .map(|&(w, h)| BoundingBoxPair::from_hires(BoundingBox::new(0.0, 0.0, w, h)))
            .collect()
    }

    fn job() -> ConversionJob {
        ConversionJob::new("/tmp/x.tex", "/tmp/x.png", false).unwrap()
    }

    #[test]
    fn empty_pages_skipped_when_margins_lack_an_axis() {
        let config = ConversionConfig::default();
        let mut j = job();
        let empty = detect_empty_pages(&config, &mut j, &boxes(&[(10.0, 10.0), (0.0, 0.0)]));
        assert_eq!(empty, vec![2]);
        assert_eq!(j.warnings().len(), 1);
    }

    #[test]
    fn empty_pages_kept_when_margins_add_both_axes() {
        let config = ConversionConfig::builder()
            .margins(Margins {
                left: 1.0,
                bottom: 1.0,
                right: 1.0,
                top: 1.0,
            })
            .build()
            .unwrap();
        let mut j = job();
        let empty = detect_empty_pages(&config, &mut j, &boxes(&[(0.0, 0.0), (5.0, 5.0)]));
        assert!(empty.is_empty(), "margins give the page an extent");
        assert_eq!(j.warnings().len(), 1, "still warned about");
    }

    #[test]
    fn a_set_abort_flag_stops_the_job_between_stages() {
        let config = ConversionConfig::default();
        assert!(ensure_not_aborted(&config).is_ok());
        config.abort.set();
        assert!(matches!(
            ensure_not_aborted(&config).unwrap_err(),
            TexImgError::Aborted
        ));
    }

    #[test]
    fn all_empty_pages_fail_the_job() {
        let config = ConversionConfig::default();
        let mut j = job();
        let err = live_pages(&config, &mut j, &boxes(&[(0.0, 0.0), (0.0, 0.0)])).unwrap_err();
        assert!(matches!(err, TexImgError::AllPagesEmpty { total: 2 }));
    }

    #[test]
    fn one_empty_page_leaves_the_others_live() {
        let config = ConversionConfig::default();
        let mut j = job();
        let live = live_pages(&config, &mut j, &boxes(&[(0.0, 0.0), (5.0, 5.0), (3.0, 3.0)]))
            .unwrap();
        assert_eq!(live, vec![2, 3]);
    }

    #[tokio::test]
    async fn unsupported_output_extension_is_rejected_up_front() {
        let err = convert("/tmp/x.tex", "/tmp/x.docx", &ConversionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TexImgError::UnsupportedFormat { .. }));
    }

    #[test]
    fn a_single_page_takes_the_requested_output_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fig-1.png"), "img").unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let mut job = ConversionJob::new(
            dir.path().join("fig.tex"),
            out_dir.path().join("result.png"),
            false,
        )
        .unwrap();
        let outputs = relocate_outputs(&mut job, "fig", "png", 1);
        assert_eq!(outputs, vec![out_dir.path().join("result.png")]);
        assert!(out_dir.path().join("result.png").exists());
    }

    #[test]
    fn multiple_pages_get_suffixed_output_names() {
        let dir = tempfile::tempdir().unwrap();
        for p in 1..=3 {
            std::fs::write(dir.path().join(format!("fig-{p}.png")), "img").unwrap();
        }
        let out_dir = tempfile::tempdir().unwrap();
        let mut job = ConversionJob::new(
            dir.path().join("fig.tex"),
            out_dir.path().join("result.png"),
            false,
        )
        .unwrap();
        let outputs = relocate_outputs(&mut job, "fig", "png", 3);
        let names: Vec<String> = outputs
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["result-1.png", "result-2.png", "result-3.png"]);
        assert!(out_dir.path().join("result-2.png").exists());
    }

    #[test]
    fn relocate_moves_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        let dst = dir.path().join("b");
        std::fs::write(&src, "new").unwrap();
        std::fs::write(&dst, "old").unwrap();
        relocate(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "new");
    }
}
