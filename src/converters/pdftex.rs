//! Vector cropping with plain pdfTeX.
//!
//! Instead of rasterizing and re-vectorizing, each page of the source
//! PDF is loaded as an image into a pdfTeX run whose page size and
//! origin are set to the (margin-expanded) target box, and shipped out
//! again. Text, fonts, and vector paths survive untouched. An empty box
//! gets a 10×10 bp dummy so pdfTeX still emits a page and downstream
//! page numbering stays aligned.

use crate::bbox::{BoundingBox, BoundingBoxPair};
use crate::config::ConversionConfig;
use crate::converters::verify_output;
use crate::error::TexImgError;
use crate::job::ConversionJob;
use crate::runner::{ProcessRunner, ToolInvocation};

/// Crop the given 1-based pages of `input` into `output`, one output
/// page per entry. `use_bp` selects big-point margins; pixel margins are
/// scaled down by the resolution factor.
pub(crate) async fn crop(
    config: &ConversionConfig,
    job: &mut ConversionJob,
    input: &str,
    output: &str,
    use_bp: bool,
    pages: &[usize],
    boxes: &[BoundingBoxPair],
) -> Result<(), TexImgError> {
    debug_assert_eq!(pages.len(), boxes.len());
    let script = job.temp_name(".tex")?;
    job.register_image(job.path(output));

    let rects: Vec<BoundingBox> = boxes
        .iter()
        .map(|bb| {
            let rect = bb
                .hires
                .add_margin(&config.margins, use_bp, config.resolution_scale);
            if rect.is_empty() {
                BoundingBox::new(0.0, 0.0, 10.0, 10.0)
            } else {
                rect
            }
        })
        .collect();
    let src = crop_script(input, pages, &rects);
    let script_path = job.path(&script);
    std::fs::write(&script_path, src).map_err(|e| TexImgError::io(&script_path, e))?;

    let runner = ProcessRunner::new(config);
    let inv = ToolInvocation::new(&config.tools.pdftex, job.working_dir())
        .args(["-no-shell-escape", "-interaction=nonstopmode"])
        .arg(&script)
        .hint("a TeX distribution (pdftex)")
        .stage("cropping PDF pages");
    runner.run_logged(&inv).await?;

    // pdfTeX names its output after the script; move it into place.
    let produced = script_path.with_extension("pdf");
    let target = job.path(output);
    match std::fs::remove_file(&target) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(TexImgError::io(&target, e)),
    }
    std::fs::rename(&produced, &target).map_err(|e| TexImgError::io(&produced, e))?;
    verify_output(job, &config.tools.pdftex, output)
}

/// One `\shipout` block per page, with the page body re-anchored to the
/// target box via `\pdfhorigin`/`\pdfvorigin`.
fn crop_script(input: &str, pages: &[usize], rects: &[BoundingBox]) -> String {
    let mut src = String::from("\\pdfoutput=1\\relax\n");
    for (&page, rect) in pages.iter().zip(rects) {
        src.push_str(&format!("\\pdfhorigin={}bp\\relax\n", -rect.left));
        src.push_str(&format!("\\pdfvorigin={}bp\\relax\n", rect.bottom));
        src.push_str(&format!("\\pdfpagewidth={}bp\\relax\n", rect.width()));
        src.push_str(&format!("\\pdfpageheight={}bp\\relax\n", rect.height()));
        src.push_str(&format!(
            "\\setbox0=\\hbox{{\\pdfximage page {page} mediabox{{{input}}}\\pdfrefximage\\pdflastximage}}\\relax\n"
        ));
        src.push_str("\\ht0=\\pdfpageheight\\relax\n");
        src.push_str("\\shipout\\box0\\relax\n");
    }
    src.push_str("\\bye\n");
    src
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_script_ships_one_box_per_page() {
        let rects = vec![
            BoundingBox::new(10.0, 20.0, 110.0, 70.0),
            BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        ];
        let src = crop_script("doc.pdf", &[1, 3], &rects);
        assert_eq!(src.matches("\\shipout\\box0").count(), 2);
        assert!(src.contains("\\pdfhorigin=-10bp\\relax"));
        assert!(src.contains("\\pdfvorigin=20bp\\relax"));
        assert!(src.contains("\\pdfpagewidth=100bp\\relax"));
        assert!(src.contains("\\pdfpageheight=50bp\\relax"));
        assert!(src.contains("\\pdfximage page 3 mediabox{doc.pdf}"));
        assert!(src.ends_with("\\bye\n"));
    }
}
