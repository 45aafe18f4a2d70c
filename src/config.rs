//! Configuration types for a conversion job.
//!
//! All behaviour is controlled through one immutable [`ConversionConfig`],
//! built via its [`ConversionConfigBuilder`] and passed explicitly into the
//! orchestrator at job start. Nothing here is ambient or global, so two
//! jobs with different settings can coexist and each is testable in
//! isolation.

use crate::bbox::Margins;
use crate::error::TexImgError;
use crate::runner::AbortFlag;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// The closed set of output kinds, each carrying its own converter route.
///
/// Keeping this an enum (rather than branching on extension strings deep in
/// the pipeline) makes adding a format a local change: a new variant plus
/// its route arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputFormat {
    Pdf,
    Eps,
    Svg,
    Emf,
    Png,
    Jpeg,
    Bmp,
    Tiff,
    Gif,
}

impl OutputFormat {
    /// Map a file extension (without the dot, any case) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "eps" => Some(Self::Eps),
            "svg" => Some(Self::Svg),
            "emf" => Some(Self::Emf),
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "bmp" => Some(Self::Bmp),
            "tif" | "tiff" => Some(Self::Tiff),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// The canonical extension used for intermediate file names.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Eps => "eps",
            Self::Svg => "svg",
            Self::Emf => "emf",
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::Gif => "gif",
        }
    }

    /// Vector targets render the intermediate EPS at a very high nominal
    /// resolution to preserve precision; raster targets at `72 × scale`.
    pub fn is_vector(&self) -> bool {
        matches!(self, Self::Pdf | Self::Eps | Self::Svg | Self::Emf)
    }

    /// Formats with a multi-page/multi-frame container composer.
    pub fn supports_merge(&self) -> bool {
        matches!(self, Self::Pdf | Self::Tiff | Self::Gif)
    }

    pub fn all_extensions() -> &'static str {
        "pdf, eps, svg, emf, png, jpg, bmp, tiff, gif"
    }
}

/// Supported input kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputFormat {
    Tex,
    Pdf,
    Ps,
    Eps,
}

impl InputFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("tex") => Some(Self::Tex),
            Some("pdf") => Some(Self::Pdf),
            Some("ps") => Some(Self::Ps),
            Some("eps") => Some(Self::Eps),
            _ => None,
        }
    }
}

/// Which PDF page box defines a page's extent.
///
/// `Ink` (the default) measures the rectangle actually marked on by the
/// renderer (Ghostscript's `bbox` device); the others select one of the
/// document's declared boxes via the pdftex probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageBox {
    /// Tight box around visible marks, as reported by the renderer.
    #[default]
    Ink,
    Media,
    Crop,
    Bleed,
    Trim,
    Art,
}

impl PageBox {
    /// The `\pdfpagebox` selector value for the pdftex probe.
    /// 0 means "no override"; the probe never receives `Ink`.
    pub(crate) fn pdftex_number(&self) -> u8 {
        match self {
            PageBox::Ink => 0,
            PageBox::Media => 1,
            PageBox::Crop => 2,
            PageBox::Bleed => 3,
            PageBox::Trim => 4,
            PageBox::Art => 5,
        }
    }
}

/// Unit of the configured margins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MarginUnit {
    /// Big points (1/72 inch) — margin thickness is fixed on the page.
    #[default]
    BigPoints,
    /// Output pixels — margin thickness is fixed in the raster, so it is
    /// divided by the resolution scale before being applied on the page.
    Pixels,
}

/// What to do when an external tool outlives its deadline.
///
/// The `Ask*` policies consult the [`FreezePrompt`] capability when one is
/// configured; without a prompt they fall back to their verb, so a batch
/// run never blocks on a question nobody can answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeoutPolicy {
    /// Ask; keep waiting if there is nobody to ask.
    #[default]
    AskThenContinue,
    /// Ask; kill if there is nobody to ask.
    AskThenStop,
    /// Keep waiting, deadline after deadline.
    AlwaysContinue,
    /// Kill immediately on the first elapsed deadline.
    AlwaysStop,
}

/// Interactive capability: "this tool looks frozen — keep waiting?".
///
/// Implemented by the presentation layer (a dialog, a terminal prompt).
/// The runner calls it while holding the output lock so no tool output
/// interleaves with the question.
pub trait FreezePrompt: Send + Sync {
    /// Return `true` to keep waiting, `false` to kill the process.
    fn ask_continue(&self, message: &str) -> bool;
}

/// Consumer of captured tool output lines, one call per complete line.
///
/// stdout and stderr of a running tool are delivered through the same
/// serialized path, so implementations never see a torn line.
pub trait OutputListener: Send + Sync {
    fn line(&self, line: &str);
}

/// Paths (or bare `PATH`-resolved names) of the external tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPaths {
    /// TeX engine for source compilation (platex, uplatex, pdflatex, …).
    pub latex: String,
    /// DVI → PDF converter.
    pub dvipdfmx: String,
    /// Ghostscript interpreter (raster/EPS/pdfwrite/bbox devices).
    pub ghostscript: String,
    /// Plain pdftex, used for the driver scripts (crop, concat, box probe).
    pub pdftex: String,
    /// MuPDF's drawing tool, used for SVG output.
    pub mudraw: String,
    /// pdfium command-line renderer, used for GIF/EMF output and page count.
    pub pdfiumdraw: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            latex: "platex".into(),
            dvipdfmx: "dvipdfmx".into(),
            ghostscript: "gs".into(),
            pdftex: "pdftex".into(),
            mudraw: "mudraw".into(),
            pdfiumdraw: "pdfiumdraw".into(),
        }
    }
}

/// Configuration for one conversion job.
///
/// Built via [`ConversionConfig::builder()`] or [`Default`].
///
/// # Example
/// ```rust
/// use teximg::{ConversionConfig, TimeoutPolicy};
/// use std::time::Duration;
///
/// let config = ConversionConfig::builder()
///     .resolution_scale(2.0)
///     .merge_pages(true)
///     .timeout(Some(Duration::from_secs(30)))
///     .timeout_policy(TimeoutPolicy::AlwaysStop)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Per-side margins added around each page's content box. Default: zero.
    pub margins: Margins,

    /// Unit of `margins`. Default: big points.
    pub margin_unit: MarginUnit,

    /// Raster resolution scale. Output DPI is `72 × scale`. Default: 1.0.
    pub resolution_scale: f64,

    /// Render the intermediate EPS for vector targets at `72 × scale`
    /// instead of the high nominal resolution. Trades outline precision
    /// for speed. Default: false.
    pub low_resolution: bool,

    /// Make the background transparent (alpha PNG device; GIF goes through
    /// the vector rasterizer's transparency flag). Default: false.
    pub transparent: bool,

    /// Merge per-page outputs into one multi-page/multi-frame file when the
    /// format supports it (PDF, TIFF, GIF). Default: false.
    pub merge_pages: bool,

    /// Which page box defines each page's extent. Default: [`PageBox::Ink`].
    pub page_box: PageBox,

    /// For PDF output: convert text to outlines (via the EPS route) rather
    /// than cropping the text-preserving PDF. Default: false.
    pub outlined_text: bool,

    /// Strip the fixed `width`/`height` attributes from generated SVG so it
    /// scales with its container. Default: false.
    pub strip_svg_size: bool,

    /// Upper bound on TeX compile passes. Default: 3.
    pub max_compile_passes: u32,

    /// Pre-analyse the source (`\tableofcontents`, `\bibliography`, …) and
    /// stop compiling once the aux file stabilises, instead of always
    /// running `max_compile_passes`. Default: true.
    pub guess_compile_passes: bool,

    /// Keep going when the TeX engine exits nonzero; the ignored error is
    /// surfaced on the result as a flag. Default: false.
    pub ignore_compile_errors: bool,

    /// Kanji encoding flag passed to a pTeX-family engine
    /// (`-kanji=<enc>`): one of `sjis`, `jis`, `euc`, `utf8`.
    /// `None` leaves the engine's input guessing alone. Default: None.
    pub kanji_encoding: Option<String>,

    /// Ghostscript EPS export device. `eps2write` additionally outlines
    /// fonts with `-dNoOutputFonts`. Default: "eps2write".
    pub gs_eps_device: String,

    /// Antialias rasterised output (`-dTextAlphaBits=4`). Default: true.
    pub antialias: bool,

    /// Animated-GIF frame delay in centiseconds. Default: 100 (1 s).
    pub animation_delay_cs: u16,

    /// Animated-GIF loop count; 0 loops forever. Default: 0.
    pub animation_loop: u16,

    /// Per-invocation deadline for external tools; `None` waits forever.
    /// Default: 20 s.
    pub timeout: Option<Duration>,

    /// What to do when the deadline elapses. Default: ask-then-continue.
    pub timeout_policy: TimeoutPolicy,

    /// Interactive "keep waiting?" capability for the `Ask*` policies.
    pub prompt: Option<Arc<dyn FreezePrompt>>,

    /// Consumer for captured tool output lines (a console pane, a log file).
    /// Lines are also traced at debug level regardless.
    pub listener: Option<Arc<dyn OutputListener>>,

    /// Extra directories appended to the TeX engine's `TEXINPUTS`.
    pub tex_inputs: Vec<PathBuf>,

    /// Remove job-created intermediates at teardown. Default: true.
    pub delete_temp_files: bool,

    /// Cooperative cancellation flag, checked between pipeline stages and
    /// inside the process runner. Clone it before starting the job and set
    /// it from any thread.
    pub abort: AbortFlag,

    /// External tool locations.
    pub tools: ToolPaths,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            margins: Margins::default(),
            margin_unit: MarginUnit::default(),
            resolution_scale: 1.0,
            low_resolution: false,
            transparent: false,
            merge_pages: false,
            page_box: PageBox::default(),
            outlined_text: false,
            strip_svg_size: false,
            max_compile_passes: 3,
            guess_compile_passes: true,
            ignore_compile_errors: false,
            kanji_encoding: None,
            gs_eps_device: "eps2write".into(),
            antialias: true,
            animation_delay_cs: 100,
            animation_loop: 0,
            timeout: Some(Duration::from_secs(20)),
            timeout_policy: TimeoutPolicy::default(),
            prompt: None,
            listener: None,
            tex_inputs: Vec::new(),
            delete_temp_files: true,
            abort: AbortFlag::new(),
            tools: ToolPaths::default(),
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("margins", &self.margins)
            .field("margin_unit", &self.margin_unit)
            .field("resolution_scale", &self.resolution_scale)
            .field("low_resolution", &self.low_resolution)
            .field("transparent", &self.transparent)
            .field("merge_pages", &self.merge_pages)
            .field("page_box", &self.page_box)
            .field("outlined_text", &self.outlined_text)
            .field("strip_svg_size", &self.strip_svg_size)
            .field("max_compile_passes", &self.max_compile_passes)
            .field("guess_compile_passes", &self.guess_compile_passes)
            .field("ignore_compile_errors", &self.ignore_compile_errors)
            .field("kanji_encoding", &self.kanji_encoding)
            .field("timeout", &self.timeout)
            .field("timeout_policy", &self.timeout_policy)
            .field("prompt", &self.prompt.as_ref().map(|_| "<dyn FreezePrompt>"))
            .field(
                "listener",
                &self.listener.as_ref().map(|_| "<dyn OutputListener>"),
            )
            .field("tools", &self.tools)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Effective EPS rendering resolution for a target format.
    ///
    /// Vector targets use a very high nominal resolution so curve control
    /// points survive the round trip; raster targets use the output DPI.
    pub(crate) fn eps_resolution(&self, format: OutputFormat) -> u32 {
        const HIGH_NOMINAL: u32 = 20016;
        let raster = (72.0 * self.resolution_scale).round() as u32;
        if format.is_vector() && !self.low_resolution {
            HIGH_NOMINAL
        } else {
            raster.max(1)
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn margins(mut self, margins: Margins) -> Self {
        self.config.margins = margins;
        self
    }

    pub fn margin_unit(mut self, unit: MarginUnit) -> Self {
        self.config.margin_unit = unit;
        self
    }

    pub fn resolution_scale(mut self, scale: f64) -> Self {
        self.config.resolution_scale = scale;
        self
    }

    pub fn low_resolution(mut self, v: bool) -> Self {
        self.config.low_resolution = v;
        self
    }

    pub fn transparent(mut self, v: bool) -> Self {
        self.config.transparent = v;
        self
    }

    pub fn merge_pages(mut self, v: bool) -> Self {
        self.config.merge_pages = v;
        self
    }

    pub fn page_box(mut self, b: PageBox) -> Self {
        self.config.page_box = b;
        self
    }

    pub fn outlined_text(mut self, v: bool) -> Self {
        self.config.outlined_text = v;
        self
    }

    pub fn strip_svg_size(mut self, v: bool) -> Self {
        self.config.strip_svg_size = v;
        self
    }

    pub fn max_compile_passes(mut self, n: u32) -> Self {
        self.config.max_compile_passes = n.max(1);
        self
    }

    pub fn guess_compile_passes(mut self, v: bool) -> Self {
        self.config.guess_compile_passes = v;
        self
    }

    pub fn ignore_compile_errors(mut self, v: bool) -> Self {
        self.config.ignore_compile_errors = v;
        self
    }

    pub fn kanji_encoding(mut self, enc: impl Into<String>) -> Self {
        self.config.kanji_encoding = Some(enc.into());
        self
    }

    pub fn gs_eps_device(mut self, device: impl Into<String>) -> Self {
        self.config.gs_eps_device = device.into();
        self
    }

    pub fn antialias(mut self, v: bool) -> Self {
        self.config.antialias = v;
        self
    }

    pub fn animation_delay_cs(mut self, cs: u16) -> Self {
        self.config.animation_delay_cs = cs;
        self
    }

    pub fn animation_loop(mut self, n: u16) -> Self {
        self.config.animation_loop = n;
        self
    }

    pub fn timeout(mut self, t: Option<Duration>) -> Self {
        self.config.timeout = t;
        self
    }

    pub fn timeout_policy(mut self, p: TimeoutPolicy) -> Self {
        self.config.timeout_policy = p;
        self
    }

    pub fn prompt(mut self, p: Arc<dyn FreezePrompt>) -> Self {
        self.config.prompt = Some(p);
        self
    }

    pub fn listener(mut self, l: Arc<dyn OutputListener>) -> Self {
        self.config.listener = Some(l);
        self
    }

    pub fn tex_input(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.tex_inputs.push(dir.into());
        self
    }

    pub fn delete_temp_files(mut self, v: bool) -> Self {
        self.config.delete_temp_files = v;
        self
    }

    pub fn tools(mut self, tools: ToolPaths) -> Self {
        self.config.tools = tools;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, TexImgError> {
        let c = &self.config;
        if !(c.resolution_scale.is_finite() && c.resolution_scale > 0.0) {
            return Err(TexImgError::InvalidConfig(format!(
                "resolution scale must be a positive number, got {}",
                c.resolution_scale
            )));
        }
        if let Some(ref enc) = c.kanji_encoding {
            if !matches!(enc.as_str(), "sjis" | "jis" | "euc" | "utf8") {
                return Err(TexImgError::InvalidConfig(format!(
                    "kanji encoding must be one of sjis/jis/euc/utf8, got '{enc}'"
                )));
            }
        }
        if c.margins.left < 0.0
            || c.margins.bottom < 0.0
            || c.margins.right < 0.0
            || c.margins.top < 0.0
        {
            return Err(TexImgError::InvalidConfig(
                "margins must be non-negative".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension_covers_aliases() {
        assert_eq!(OutputFormat::from_extension("PNG"), Some(OutputFormat::Png));
        assert_eq!(
            OutputFormat::from_extension("jpeg"),
            Some(OutputFormat::Jpeg)
        );
        assert_eq!(
            OutputFormat::from_extension("tif"),
            Some(OutputFormat::Tiff)
        );
        assert_eq!(OutputFormat::from_extension("docx"), None);
    }

    #[test]
    fn vector_and_merge_classification() {
        assert!(OutputFormat::Pdf.is_vector());
        assert!(OutputFormat::Svg.is_vector());
        assert!(!OutputFormat::Png.is_vector());
        assert!(OutputFormat::Gif.supports_merge());
        assert!(!OutputFormat::Svg.supports_merge());
    }

    #[test]
    fn eps_resolution_selection() {
        let cfg = ConversionConfig::builder()
            .resolution_scale(2.0)
            .build()
            .unwrap();
        assert_eq!(cfg.eps_resolution(OutputFormat::Eps), 20016);
        assert_eq!(cfg.eps_resolution(OutputFormat::Png), 144);

        let low = ConversionConfig::builder()
            .resolution_scale(2.0)
            .low_resolution(true)
            .build()
            .unwrap();
        assert_eq!(low.eps_resolution(OutputFormat::Eps), 144);
    }

    #[test]
    fn build_rejects_bad_scale_and_encoding() {
        assert!(ConversionConfig::builder()
            .resolution_scale(0.0)
            .build()
            .is_err());
        assert!(ConversionConfig::builder()
            .kanji_encoding("latin1")
            .build()
            .is_err());
        assert!(ConversionConfig::builder()
            .kanji_encoding("utf8")
            .build()
            .is_ok());
    }

    #[test]
    fn negative_margins_rejected() {
        let m = crate::bbox::Margins::new(-1.0, 0.0, 0.0, 0.0);
        assert!(ConversionConfig::builder().margins(m).build().is_err());
    }
}
