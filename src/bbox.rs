//! Page geometry: bounding boxes in PostScript big points and margin arithmetic.
//!
//! ## Why two boxes per page?
//!
//! PostScript DSC comments carry the page extent twice: the legacy
//! `%%BoundingBox` with integer coordinates and the `%%HiResBoundingBox`
//! at full precision. Every consumer downstream of Ghostscript's `bbox`
//! device gets both, so this module keeps them together as a
//! [`BoundingBoxPair`] and derives the integer box from the precise one by
//! rounding *outward* — the integer box must always contain the marks the
//! hires box describes, or a later crop would clip ink.

use once_cell::sync::Lazy;
use regex::Regex;

/// A page rectangle in big points (1/72 inch). Left/bottom/right/top,
/// matching the `%%BoundingBox` coordinate order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl BoundingBox {
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self {
            left,
            bottom,
            right,
            top,
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    /// A page is empty when it has no horizontal or no vertical extent.
    /// Ghostscript reports `0 0 0 0` for pages with no visible marks.
    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    /// Integer-round outward: floor the lower-left corner, ceil the
    /// upper-right, so the result always contains `self`.
    pub fn to_standard(&self) -> BoundingBox {
        BoundingBox::new(
            self.left.floor(),
            self.bottom.floor(),
            self.right.ceil(),
            self.top.ceil(),
        )
    }

    /// Expand by an independent margin on each side.
    ///
    /// Margins are given in the configured unit; when that unit is pixels
    /// (resolution-relative) they are divided by `scale` first so a margin
    /// of N pixels stays N pixels thick at any requested resolution.
    pub fn add_margin(&self, margins: &Margins, use_bp: bool, scale: f64) -> BoundingBox {
        let divide = if use_bp { 1.0 } else { scale };
        BoundingBox::new(
            self.left - margins.left / divide,
            self.bottom - margins.bottom / divide,
            self.right + margins.right / divide,
            self.top + margins.top / divide,
        )
    }

    /// Render as the body of a `%%BoundingBox` line (integer coordinates).
    pub fn format_standard(&self) -> String {
        format!(
            "{} {} {} {}",
            self.left as i64, self.bottom as i64, self.right as i64, self.top as i64
        )
    }

    /// Render as the body of a `%%HiResBoundingBox` line.
    pub fn format_hires(&self) -> String {
        format!("{} {} {} {}", self.left, self.bottom, self.right, self.top)
    }
}

/// The integer box and its full-precision twin, always produced together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBoxPair {
    pub standard: BoundingBox,
    pub hires: BoundingBox,
}

impl BoundingBoxPair {
    pub fn new(standard: BoundingBox, hires: BoundingBox) -> Self {
        Self { standard, hires }
    }

    /// Derive the pair from a hires box alone, rounding outward for the
    /// standard half.
    pub fn from_hires(hires: BoundingBox) -> Self {
        Self {
            standard: hires.to_standard(),
            hires,
        }
    }

    pub fn add_margin(&self, margins: &Margins, use_bp: bool, scale: f64) -> BoundingBoxPair {
        BoundingBoxPair::new(
            self.standard.add_margin(margins, use_bp, scale),
            self.hires.add_margin(margins, use_bp, scale),
        )
    }
}

/// Per-side margins in the unit chosen by [`crate::config::MarginUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Margins {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Margins {
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self {
            left,
            bottom,
            right,
            top,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.left == 0.0 && self.bottom == 0.0 && self.right == 0.0 && self.top == 0.0
    }

    /// The empty-page skip rule: with no margin on the horizontal *or*
    /// the vertical axis, an empty page would still have a degenerate
    /// extent after margins, so it cannot be rendered.
    pub fn lacks_an_axis(&self) -> bool {
        self.left + self.right == 0.0 || self.top + self.bottom == 0.0
    }
}

// ── DSC header-line parsing ──────────────────────────────────────────────

static RE_BBOX_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^%%(HiRes)?BoundingBox: ([-\d\.]+) ([-\d\.]+) ([-\d\.]+) ([-\d\.]+)\s*$").unwrap()
});

/// Parse a `%%BoundingBox:` / `%%HiResBoundingBox:` line.
///
/// Returns `(is_hires, box)`, or `None` when the line is not a bounding-box
/// header or any coordinate fails to parse as a finite number (a renderer
/// reporting degenerate geometry is treated as not having reported at all).
pub fn parse_bbox_line(line: &str) -> Option<(bool, BoundingBox)> {
    let caps = RE_BBOX_LINE.captures(line)?;
    let is_hires = caps.get(1).is_some();
    let mut vals = [0.0f64; 4];
    for (i, v) in vals.iter_mut().enumerate() {
        *v = caps[i + 2].parse().ok()?;
        if !v.is_finite() {
            return None;
        }
    }
    Some((
        is_hires,
        BoundingBox::new(vals[0], vals[1], vals[2], vals[3]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_always_contains_hires() {
        let cases = [
            BoundingBox::new(10.2, -3.7, 100.0, 45.00001),
            BoundingBox::new(-0.5, -0.5, 0.5, 0.5),
            BoundingBox::new(0.0, 0.0, 612.0, 792.0),
        ];
        for hires in cases {
            let std = hires.to_standard();
            assert!(std.left <= hires.left, "{std:?} vs {hires:?}");
            assert!(std.bottom <= hires.bottom);
            assert!(std.right >= hires.right);
            assert!(std.top >= hires.top);
        }
        // Exact integer inputs pass through unchanged.
        let exact = BoundingBox::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(exact.to_standard(), exact);
    }

    #[test]
    fn empty_detection() {
        assert!(BoundingBox::new(0.0, 0.0, 0.0, 0.0).is_empty());
        assert!(BoundingBox::new(10.0, 10.0, 10.0, 20.0).is_empty());
        assert!(BoundingBox::new(10.0, 20.0, 20.0, 10.0).is_empty());
        assert!(!BoundingBox::new(0.0, 0.0, 1.0, 1.0).is_empty());
    }

    #[test]
    fn zero_margins_are_a_noop() {
        let bb = BoundingBox::new(1.5, 2.5, 3.5, 4.5);
        let out = bb.add_margin(&Margins::default(), true, 3.0);
        assert_eq!(out, bb);
    }

    #[test]
    fn margins_are_linear_per_side() {
        let bb = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let m1 = Margins::new(2.0, 0.0, 0.0, 0.0);
        let m2 = Margins::new(4.0, 0.0, 0.0, 0.0);
        let once = bb.add_margin(&m1, true, 1.0);
        let twice = bb.add_margin(&m2, true, 1.0);
        assert_eq!(bb.left - once.left, 2.0);
        assert_eq!(bb.left - twice.left, 4.0);
        // Other sides untouched.
        assert_eq!(once.right, bb.right);
        assert_eq!(once.top, bb.top);
        assert_eq!(once.bottom, bb.bottom);
    }

    #[test]
    fn pixel_margins_divide_by_scale() {
        let bb = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let m = Margins::new(4.0, 4.0, 4.0, 4.0);
        let out = bb.add_margin(&m, false, 2.0);
        assert_eq!(out.left, -2.0);
        assert_eq!(out.top, 12.0);
    }

    #[test]
    fn parse_standard_and_hires_lines() {
        let (hires, bb) = parse_bbox_line("%%BoundingBox: 0 0 612 792").unwrap();
        assert!(!hires);
        assert_eq!(bb, BoundingBox::new(0.0, 0.0, 612.0, 792.0));

        let (hires, bb) = parse_bbox_line("%%HiResBoundingBox: 10.5 -3.25 100.125 40.0").unwrap();
        assert!(hires);
        assert_eq!(bb.left, 10.5);
        assert_eq!(bb.bottom, -3.25);

        assert!(parse_bbox_line("%%Pages: 3").is_none());
        assert!(parse_bbox_line("%%BoundingBox: a b c d").is_none());
    }
}
