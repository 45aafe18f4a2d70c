//! PDF inspection probes: page count, ink bounding boxes, and declared
//! page boxes.
//!
//! All three probes work by running an external tool and parsing its text
//! output. Ghostscript's `bbox` device reports the ink extent of each page
//! on **stderr** as `%%BoundingBox` / `%%HiResBoundingBox` pairs. Declared
//! boxes (media, crop, ...) are read by driving plain pdfTeX with a
//! generated script that loads each page as an image and `\message`s the
//! box edges; pdfTeX prints dimensions in `pt`, so the script also prints
//! what `1bp` measures in `pt` and the parser divides by that ratio
//! instead of hard-coding 72.27/72.

use crate::bbox::{parse_bbox_line, BoundingBox, BoundingBoxPair};
use crate::config::{ConversionConfig, PageBox};
use crate::error::TexImgError;
use crate::job::ConversionJob;
use crate::runner::{LineSink, ProcessRunner, ToolInvocation};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::{Arc, Mutex};

static RE_BBOX_PT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^%%(HiRes)?BoundingBox: ([-\d\.]+)pt ([-\d\.]+)pt ([-\d\.]+)pt ([-\d\.]+)pt$")
        .unwrap()
});
static RE_BP_PT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^1bp=([-\d\.]+)pt").unwrap());

/// A sink that appends to a shared accumulator and also forwards to the
/// console sink, so probe output still reaches the listener.
fn tee_sink(acc: Arc<Mutex<Vec<String>>>, console: LineSink) -> LineSink {
    Arc::new(move |line: &str| {
        console(line);
        acc.lock().unwrap_or_else(|p| p.into_inner()).push(line.to_string());
    })
}

/// Number of pages in a PDF, read from pdfiumdraw's `--output-page` mode
/// (the count is printed to stdout).
pub(crate) async fn page_count(
    config: &ConversionConfig,
    job: &ConversionJob,
    pdf_name: &str,
) -> Result<usize, TexImgError> {
    let runner = ProcessRunner::new(config);
    let acc = Arc::new(Mutex::new(Vec::new()));
    let inv = ToolInvocation::new(&config.tools.pdfiumdraw, job.working_dir())
        .arg("--output-page")
        .arg(pdf_name)
        .hint("pdfiumdraw")
        .stage("counting PDF pages");
    runner
        .run(&inv, tee_sink(Arc::clone(&acc), runner.console_sink()), runner.console_sink())
        .await?;
    let text: String = acc
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .iter()
        .map(|s| s.trim())
        .collect();
    text.trim().parse().map_err(|_| TexImgError::ProbeFailed {
        detail: format!("pdfiumdraw did not report a page count for {pdf_name} (got {text:?})"),
    })
}

/// Ink bounding boxes of pages `first..=last` (1-based, inclusive), via
/// Ghostscript's `bbox` device. Exactly one pair per page is required;
/// anything else is a probe failure.
pub(crate) async fn page_bounding_boxes(
    config: &ConversionConfig,
    job: &ConversionJob,
    pdf_name: &str,
    first: usize,
    last: usize,
) -> Result<Vec<BoundingBoxPair>, TexImgError> {
    let runner = ProcessRunner::new(config);
    let acc = Arc::new(Mutex::new(Vec::new()));
    let inv = ToolInvocation::new(&config.tools.ghostscript, job.working_dir())
        .args(["-q", "-dBATCH", "-dNOPAUSE", "-sDEVICE=bbox"])
        .arg(format!("-dFirstPage={first}"))
        .arg(format!("-dLastPage={last}"))
        .arg(pdf_name)
        .hint("Ghostscript")
        .stage("measuring ink bounding boxes");
    // The bbox device writes its report to stderr; stdout is noise.
    runner
        .run(&inv, runner.console_sink(), tee_sink(Arc::clone(&acc), runner.console_sink()))
        .await?;

    let mut pairs = Vec::new();
    let mut standard: Option<BoundingBox> = None;
    let mut hires: Option<BoundingBox> = None;
    for line in acc.lock().unwrap_or_else(|p| p.into_inner()).iter() {
        if let Some((is_hires, bb)) = parse_bbox_line(line) {
            if is_hires {
                hires = Some(bb);
            } else {
                standard = Some(bb);
            }
            if let (Some(s), Some(h)) = (standard, hires) {
                pairs.push(BoundingBoxPair {
                    standard: s,
                    hires: h,
                });
                standard = None;
                hires = None;
            }
        }
    }
    let expected = last - first + 1;
    if pairs.len() != expected {
        return Err(TexImgError::ProbeFailed {
            detail: format!(
                "expected {expected} bounding box pair(s) for {pdf_name} pages {first}-{last}, \
                 Ghostscript reported {}",
                pairs.len()
            ),
        });
    }
    Ok(pairs)
}

/// Declared page boxes (media/crop/bleed/trim/art) of the given 1-based
/// pages, measured by a generated pdfTeX script. Results are in big
/// points, hires values straight from the measurement and standard values
/// rounded outward.
pub(crate) async fn page_box_bounding_boxes(
    config: &ConversionConfig,
    job: &mut ConversionJob,
    pdf_name: &str,
    pages: &[usize],
    page_box: PageBox,
) -> Result<Vec<BoundingBoxPair>, TexImgError> {
    let script = job.temp_name(".tex")?;
    let mut src = String::new();
    src.push_str(&format!("\\pdfpagebox={}\\relax\n", page_box.pdftex_number()));
    src.push_str("\\newdimen\\tempdimen\\tempdimen=1bp\\relax\\message{^^J1bp=\\the\\tempdimen^^J}\n");
    src.push_str("\\newdimen\\dimtop\\newdimen\\dimleft\\newdimen\\dimbottom\\newdimen\\dimright\n");
    src.push_str("\\catcode37=12\\relax\n");
    src.push_str("\\def\\space{ }\n");
    for p in pages {
        // Box edges are absolute; subtract the media box origin so the
        // result is relative to the page like Ghostscript's reports.
        src.push_str(&format!("\\pdfximage page {p}{{{pdf_name}}}\n"));
        src.push_str("\\dimleft=\\pdfximagebbox\\pdflastximage1\\relax\n");
        src.push_str("\\dimbottom=\\pdfximagebbox\\pdflastximage2\\relax\n");
        src.push_str("\\dimright=\\pdfximagebbox\\pdflastximage3\\relax\n");
        src.push_str("\\dimtop=\\pdfximagebbox\\pdflastximage4\\relax\n");
        src.push_str(&format!("\\pdfximage page {p} mediabox{{{pdf_name}}}\n"));
        src.push_str("\\advance\\dimleft by -\\pdfximagebbox\\pdflastximage1\\relax\n");
        src.push_str("\\advance\\dimbottom by -\\pdfximagebbox\\pdflastximage2\\relax\n");
        src.push_str("\\advance\\dimright by -\\pdfximagebbox\\pdflastximage1\\relax\n");
        src.push_str("\\advance\\dimtop by -\\pdfximagebbox\\pdflastximage2\\relax\n");
        src.push_str(
            "\\message{^^J%%BoundingBox: \\the\\dimleft \\space\\the\\dimbottom \
             \\space\\the\\dimright \\space\\the\\dimtop^^J}\n",
        );
    }
    src.push_str("\\bye\n");
    let script_path = job.path(&script);
    std::fs::write(&script_path, src).map_err(|e| TexImgError::io(&script_path, e))?;

    let runner = ProcessRunner::new(config);
    let acc = Arc::new(Mutex::new(Vec::new()));
    let inv = ToolInvocation::new(&config.tools.pdftex, job.working_dir())
        .args(["-no-shell-escape", "-interaction=nonstopmode"])
        .arg(&script)
        .hint("a TeX distribution")
        .stage("reading PDF page boxes");
    runner
        .run(&inv, tee_sink(Arc::clone(&acc), runner.console_sink()), runner.console_sink())
        .await?;

    let lines = acc.lock().unwrap_or_else(|p| p.into_inner()).clone();
    let pairs = parse_page_box_output(&lines);
    if pairs.len() != pages.len() {
        return Err(TexImgError::ProbeFailed {
            detail: format!(
                "expected {} page box(es) for {pdf_name}, pdfTeX reported {}",
                pages.len(),
                pairs.len()
            ),
        });
    }
    Ok(pairs)
}

fn parse_page_box_output(lines: &[String]) -> Vec<BoundingBoxPair> {
    // pt per bp as pdfTeX itself measures it; 72.27/72 until told otherwise.
    let mut bp = 72.27 / 72.0;
    let mut pairs = Vec::new();
    for line in lines {
        if let Some(m) = RE_BP_PT.captures(line) {
            if let Ok(v) = m[1].parse::<f64>() {
                if v.is_finite() && v > 0.0 {
                    bp = v;
                }
            }
            continue;
        }
        let Some(m) = RE_BBOX_PT.captures(line) else {
            continue;
        };
        let mut vals = [0.0f64; 4];
        let mut ok = true;
        for (i, v) in vals.iter_mut().enumerate() {
            match m[i + 2].parse::<f64>() {
                Ok(p) if p.is_finite() => *v = p / bp,
                _ => ok = false,
            }
        }
        if ok {
            pairs.push(BoundingBoxPair::from_hires(BoundingBox {
                left: vals[0],
                bottom: vals[1],
                right: vals[2],
                top: vals[3],
            }));
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_box_output_divides_by_measured_bp() {
        let lines = vec![
            "This is pdfTeX".to_string(),
            "1bp=1.00374pt".to_string(),
            "%%BoundingBox: 0.0pt 0.0pt 100.374pt 200.748pt".to_string(),
        ];
        let pairs = parse_page_box_output(&lines);
        assert_eq!(pairs.len(), 1);
        assert!((pairs[0].hires.right - 100.0).abs() < 1e-6);
        assert!((pairs[0].hires.top - 200.0).abs() < 1e-6);
        assert_eq!(pairs[0].standard.right, 100.0);
    }

    #[test]
    fn page_box_output_without_bp_line_uses_tex_ratio() {
        let lines = vec!["%%BoundingBox: 72.27pt 0.0pt 144.54pt 72.27pt".to_string()];
        let pairs = parse_page_box_output(&lines);
        assert_eq!(pairs.len(), 1);
        assert!((pairs[0].hires.left - 72.0).abs() < 1e-6);
        assert!((pairs[0].hires.right - 144.0).abs() < 1e-6);
    }

    #[test]
    fn page_box_output_ignores_chatter() {
        let lines = vec![
            "(./drv.tex".to_string(),
            "%%BoundingBox: bad line".to_string(),
            "Output written on drv.pdf".to_string(),
        ];
        assert!(parse_page_box_output(&lines).is_empty());
    }
}
