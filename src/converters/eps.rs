//! In-place `%%BoundingBox` header surgery on EPS files.
//!
//! The rewrite works on raw bytes, not decoded text: an EPS may carry
//! binary preview sections or non-UTF-8 comment bytes after the header,
//! and those must pass through untouched. Only the first
//! `%%BoundingBox` and the first `%%HiResBoundingBox` line are replaced;
//! once both have been seen the rest of the file is copied verbatim.
//! Line terminators (`\n`, `\r\n`, bare `\r`) are preserved as found.

use crate::bbox::{parse_bbox_line, BoundingBox, BoundingBoxPair, Margins};
use crate::error::TexImgError;
use std::path::Path;

/// Read the first standard/hires bounding box pair from an EPS header.
/// Absent lines come back as zero boxes, matching what a malformed
/// generator would have declared anyway.
pub(crate) fn read_bounding_boxes(path: &Path) -> Result<BoundingBoxPair, TexImgError> {
    let buf = std::fs::read(path).map_err(|e| TexImgError::io(path, e))?;
    let zero = BoundingBox {
        left: 0.0,
        bottom: 0.0,
        right: 0.0,
        top: 0.0,
    };
    let mut standard = None;
    let mut hires = None;
    for line in lines_of(&buf) {
        if let Some((is_hires, bb)) = std::str::from_utf8(line).ok().and_then(parse_bbox_line) {
            if is_hires {
                hires.get_or_insert(bb);
            } else {
                standard.get_or_insert(bb);
            }
            if standard.is_some() && hires.is_some() {
                break;
            }
        }
    }
    Ok(BoundingBoxPair {
        standard: standard.unwrap_or(zero),
        hires: hires.unwrap_or(zero),
    })
}

/// Replace the header boxes with a pre-measured pair.
pub(crate) fn substitute_bounding_box(
    path: &Path,
    bb: BoundingBoxPair,
) -> Result<(), TexImgError> {
    rewrite_bounding_boxes(path, |_| bb.standard, |_| bb.hires)
}

/// Grow the header boxes by the configured margins. `use_bp` says the
/// margins are in big points; otherwise they are pixels and get divided
/// by `scale` first.
pub(crate) fn enlarge_bounding_box(
    path: &Path,
    margins: &Margins,
    use_bp: bool,
    scale: f64,
) -> Result<(), TexImgError> {
    rewrite_bounding_boxes(
        path,
        move |b| b.add_margin(margins, use_bp, scale),
        move |b| b.add_margin(margins, use_bp, scale),
    )
}

/// The byte-level rewrite shared by [`substitute_bounding_box`] and
/// [`enlarge_bounding_box`]. `standard`/`hires` map the box found in the
/// file to its replacement; the standard result is re-rounded outward so
/// the integer header always contains the hires one.
fn rewrite_bounding_boxes(
    path: &Path,
    standard: impl Fn(BoundingBox) -> BoundingBox,
    hires: impl Fn(BoundingBox) -> BoundingBox,
) -> Result<(), TexImgError> {
    let buf = std::fs::read(path).map_err(|e| TexImgError::io(path, e))?;
    let mut out = Vec::with_capacity(buf.len() + 200);
    let mut pos = 0;
    let mut standard_done = false;
    let mut hires_done = false;

    while pos < buf.len() {
        let end = buf[pos..]
            .iter()
            .position(|&b| b == b'\r' || b == b'\n')
            .map(|i| pos + i)
            .unwrap_or(buf.len());
        let line = &buf[pos..end];
        let parsed = std::str::from_utf8(line).ok().and_then(parse_bbox_line);
        match parsed {
            Some((true, bb)) if !hires_done => {
                hires_done = true;
                let line = format!("%%HiResBoundingBox: {}", hires(bb).format_hires());
                out.extend_from_slice(line.as_bytes());
            }
            Some((false, bb)) if !standard_done => {
                standard_done = true;
                let nb = standard(bb).to_standard();
                let line = format!("%%BoundingBox: {}", nb.format_standard());
                out.extend_from_slice(line.as_bytes());
            }
            _ => out.extend_from_slice(line),
        }
        if standard_done && hires_done {
            out.extend_from_slice(&buf[end..]);
            break;
        }
        // Carry the terminator (and any blank-line run) through as-is.
        let mut term_end = end;
        while term_end < buf.len() && (buf[term_end] == b'\r' || buf[term_end] == b'\n') {
            term_end += 1;
        }
        out.extend_from_slice(&buf[end..term_end]);
        pos = term_end;
    }
    std::fs::write(path, out).map_err(|e| TexImgError::io(path, e))
}

/// Iterator over lines of a byte buffer without the terminators.
fn lines_of(buf: &[u8]) -> impl Iterator<Item = &[u8]> {
    buf.split(|&b| b == b'\n')
        .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_eps() -> Vec<u8> {
        b"%!PS-Adobe-3.0 EPSF-3.0\n\
          %%BoundingBox: 10 20 30 40\n\
          %%HiResBoundingBox: 10.5 20.25 29.75 39.125\n\
          %%EndComments\n\
          0 0 moveto (x) show\n"
            .to_vec()
    }

    fn pair(l: f64, b: f64, r: f64, t: f64) -> BoundingBoxPair {
        BoundingBoxPair::from_hires(BoundingBox {
            left: l,
            bottom: b,
            right: r,
            top: t,
        })
    }

    #[test]
    fn substitute_replaces_both_header_lines() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.eps");
        std::fs::write(&p, sample_eps()).unwrap();
        substitute_bounding_box(&p, pair(1.25, 2.0, 8.5, 9.0)).unwrap();
        let text = std::fs::read_to_string(&p).unwrap();
        assert!(text.contains("%%BoundingBox: 1 2 9 9\n"));
        assert!(text.contains("%%HiResBoundingBox: 1.25 2 8.5 9\n"));
        assert!(text.contains("0 0 moveto (x) show"));
    }

    #[test]
    fn substitute_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.eps");
        std::fs::write(&p, sample_eps()).unwrap();
        substitute_bounding_box(&p, pair(0.0, 0.0, 5.0, 5.0)).unwrap();
        let once = std::fs::read(&p).unwrap();
        substitute_bounding_box(&p, pair(0.0, 0.0, 5.0, 5.0)).unwrap();
        assert_eq!(std::fs::read(&p).unwrap(), once);
    }

    #[test]
    fn body_after_header_passes_through_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.eps");
        let mut data = sample_eps();
        // Simulated binary tail that is not valid UTF-8.
        data.extend_from_slice(&[0xFF, 0x00, 0x80, b'\n', 0xC3]);
        std::fs::write(&p, &data).unwrap();
        substitute_bounding_box(&p, pair(0.0, 0.0, 5.0, 5.0)).unwrap();
        let rewritten = std::fs::read(&p).unwrap();
        assert!(rewritten.ends_with(&[0xFF, 0x00, 0x80, b'\n', 0xC3]));
    }

    #[test]
    fn enlarge_grows_outward() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.eps");
        std::fs::write(&p, sample_eps()).unwrap();
        let margins = Margins {
            left: 2.0,
            bottom: 3.0,
            right: 4.0,
            top: 5.0,
        };
        enlarge_bounding_box(&p, &margins, true, 1.0).unwrap();
        let read = read_bounding_boxes(&p).unwrap();
        assert_eq!(read.standard.left, 8.0);
        assert_eq!(read.standard.top, 45.0);
        assert!((read.hires.left - 8.5).abs() < 1e-9);
    }

    #[test]
    fn crlf_terminators_survive() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.eps");
        std::fs::write(
            &p,
            b"%!PS\r\n%%BoundingBox: 0 0 1 1\r\n%%HiResBoundingBox: 0 0 1 1\r\nbody\r\n",
        )
        .unwrap();
        substitute_bounding_box(&p, pair(0.0, 0.0, 2.0, 2.0)).unwrap();
        let text = std::fs::read(&p).unwrap();
        assert!(text.windows(2).any(|w| w == b"\r\n"));
        assert!(text.ends_with(b"body\r\n"));
    }
}
