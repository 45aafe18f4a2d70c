//! Command-line front end for the conversion pipeline.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use teximg::{
    ConversionConfig, Margins, MarginUnit, OutputListener, PageBox, TimeoutPolicy, ToolPaths,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "teximg",
    version,
    about = "Convert TeX/PDF/PS/EPS documents into cropped images",
    long_about = "Compiles a TeX source (or takes a PDF/PS/EPS directly), measures each \
                  page's content, and produces tightly cropped PDF, EPS, SVG, EMF, PNG, \
                  JPEG, BMP, TIFF, or GIF output. The target format is chosen by the \
                  output file's extension."
)]
struct Cli {
    /// Input file (.tex, .pdf, .ps, .eps)
    input: PathBuf,

    /// Output file; the extension selects the format
    output: PathBuf,

    /// Margin around the content: one value for all sides, or
    /// left,bottom,right,top
    #[arg(short, long, default_value = "0", value_parser = parse_margins)]
    margin: Margins,

    /// Unit of --margin
    #[arg(long, value_enum, default_value_t = UnitArg::Bp)]
    unit: UnitArg,

    /// Resolution scale for raster output (output DPI is 72 x SCALE)
    #[arg(short, long, default_value_t = 1.0)]
    scale: f64,

    /// Render vector output at screen resolution instead of high precision
    #[arg(long)]
    low_resolution: bool,

    /// Transparent background (PNG/GIF)
    #[arg(short, long)]
    transparent: bool,

    /// Merge pages into one multi-page PDF/TIFF or animated GIF
    #[arg(long)]
    merge: bool,

    /// Page box defining each page's extent
    #[arg(long, value_enum, default_value_t = PageBoxArg::Ink)]
    page_box: PageBoxArg,

    /// For PDF output: outline text instead of keeping it selectable
    #[arg(long)]
    outline: bool,

    /// Remove fixed width/height from generated SVG
    #[arg(long)]
    strip_svg_size: bool,

    /// Maximum number of TeX compile passes
    #[arg(long, default_value_t = 3)]
    max_passes: u32,

    /// Always run the full number of passes instead of stopping when cross
    /// references settle
    #[arg(long)]
    no_guess_passes: bool,

    /// Keep going when the TeX engine reports errors
    #[arg(long)]
    ignore_errors: bool,

    /// Kanji encoding for pTeX-family engines (sjis, jis, euc, utf8)
    #[arg(long)]
    kanji: Option<String>,

    /// Disable antialiasing of raster output
    #[arg(long)]
    no_antialias: bool,

    /// Animated GIF frame delay in centiseconds
    #[arg(long, default_value_t = 100)]
    delay: u16,

    /// Animated GIF loop count (0 = forever)
    #[arg(long = "loop", default_value_t = 0)]
    loop_count: u16,

    /// Per-tool timeout in seconds (0 waits forever)
    #[arg(long, default_value_t = 20)]
    timeout: u64,

    /// What to do when a tool exceeds the timeout
    #[arg(long, value_enum, default_value_t = OnTimeout::Stop)]
    on_timeout: OnTimeout,

    /// Extra directory for TEXINPUTS (repeatable)
    #[arg(long = "tex-input")]
    tex_inputs: Vec<PathBuf>,

    /// Keep intermediate files next to the input
    #[arg(long)]
    keep_temp: bool,

    /// Suppress external tool output
    #[arg(short, long)]
    quiet: bool,

    /// TeX engine used to compile the source
    #[arg(long, default_value = "platex", env = "TEXIMG_LATEX")]
    latex: String,

    /// DVI to PDF converter
    #[arg(long, default_value = "dvipdfmx", env = "TEXIMG_DVIPDFMX")]
    dvipdfmx: String,

    /// Ghostscript interpreter
    #[arg(long, default_value = "gs", env = "TEXIMG_GS")]
    gs: String,

    /// Plain pdftex (driver scripts)
    #[arg(long, default_value = "pdftex", env = "TEXIMG_PDFTEX")]
    pdftex: String,

    /// MuPDF mudraw (SVG output)
    #[arg(long, default_value = "mudraw", env = "TEXIMG_MUDRAW")]
    mudraw: String,

    /// pdfiumdraw (GIF/EMF output, page count)
    #[arg(long, default_value = "pdfiumdraw", env = "TEXIMG_PDFIUMDRAW")]
    pdfiumdraw: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum UnitArg {
    /// big points (1/72 inch)
    Bp,
    /// output pixels
    Px,
}

#[derive(Clone, Copy, ValueEnum)]
enum PageBoxArg {
    Ink,
    Media,
    Crop,
    Bleed,
    Trim,
    Art,
}

impl From<PageBoxArg> for PageBox {
    fn from(b: PageBoxArg) -> Self {
        match b {
            PageBoxArg::Ink => PageBox::Ink,
            PageBoxArg::Media => PageBox::Media,
            PageBoxArg::Crop => PageBox::Crop,
            PageBoxArg::Bleed => PageBox::Bleed,
            PageBoxArg::Trim => PageBox::Trim,
            PageBoxArg::Art => PageBox::Art,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OnTimeout {
    /// kill the tool and fail the conversion
    Stop,
    /// keep waiting, deadline after deadline
    Continue,
}

fn parse_margins(s: &str) -> Result<Margins, String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| e.to_string()))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        [all] => Ok(Margins::new(*all, *all, *all, *all)),
        [l, b, r, t] => Ok(Margins::new(*l, *b, *r, *t)),
        _ => Err("expected one value or left,bottom,right,top".to_string()),
    }
}

/// Forwards captured tool output to stderr, keeping stdout for results.
struct StderrListener;

impl OutputListener for StderrListener {
    fn line(&self, line: &str) {
        eprintln!("{line}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if cli.quiet { "warn" } else { "info" })
        }))
        .with_writer(std::io::stderr)
        .init();

    if !cli.input.exists() {
        bail!("input file {} does not exist", cli.input.display());
    }

    let mut builder = ConversionConfig::builder()
        .margins(cli.margin)
        .margin_unit(match cli.unit {
            UnitArg::Bp => MarginUnit::BigPoints,
            UnitArg::Px => MarginUnit::Pixels,
        })
        .resolution_scale(cli.scale)
        .low_resolution(cli.low_resolution)
        .transparent(cli.transparent)
        .merge_pages(cli.merge)
        .page_box(cli.page_box.into())
        .outlined_text(cli.outline)
        .strip_svg_size(cli.strip_svg_size)
        .max_compile_passes(cli.max_passes)
        .guess_compile_passes(!cli.no_guess_passes)
        .ignore_compile_errors(cli.ignore_errors)
        .antialias(!cli.no_antialias)
        .animation_delay_cs(cli.delay)
        .animation_loop(cli.loop_count)
        .timeout((cli.timeout > 0).then(|| std::time::Duration::from_secs(cli.timeout)))
        .timeout_policy(match cli.on_timeout {
            OnTimeout::Stop => TimeoutPolicy::AlwaysStop,
            OnTimeout::Continue => TimeoutPolicy::AlwaysContinue,
        })
        .delete_temp_files(!cli.keep_temp)
        .tools(ToolPaths {
            latex: cli.latex,
            dvipdfmx: cli.dvipdfmx,
            ghostscript: cli.gs,
            pdftex: cli.pdftex,
            mudraw: cli.mudraw,
            pdfiumdraw: cli.pdfiumdraw,
        });
    if let Some(enc) = cli.kanji {
        builder = builder.kanji_encoding(enc);
    }
    for dir in cli.tex_inputs {
        builder = builder.tex_input(dir);
    }
    if !cli.quiet {
        builder = builder.listener(Arc::new(StderrListener));
    }
    let config = builder.build().context("invalid configuration")?;

    let result = teximg::convert(&cli.input, &cli.output, &config)
        .await
        .with_context(|| format!("converting {}", cli.input.display()))?;

    for w in &result.warnings {
        eprintln!("warning: {w}");
    }
    if result.compile_error_ignored {
        eprintln!("warning: TeX reported errors that were ignored; the output may be incomplete");
    }
    for f in &result.output_files {
        println!("{}", f.display());
    }
    if result.output_files.is_empty() {
        bail!("no output files were produced");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margin_parsing() {
        let m = parse_margins("5").unwrap();
        assert_eq!((m.left, m.bottom, m.right, m.top), (5.0, 5.0, 5.0, 5.0));
        let m = parse_margins("1, 2,3 ,4").unwrap();
        assert_eq!((m.left, m.bottom, m.right, m.top), (1.0, 2.0, 3.0, 4.0));
        assert!(parse_margins("1,2").is_err());
        assert!(parse_margins("abc").is_err());
    }

    #[test]
    fn cli_parses_a_full_invocation() {
        let cli = Cli::try_parse_from([
            "teximg",
            "in.tex",
            "out.png",
            "--margin",
            "4",
            "--scale",
            "2",
            "--transparent",
            "--merge",
            "--timeout",
            "60",
        ])
        .unwrap();
        assert_eq!(cli.scale, 2.0);
        assert!(cli.transparent);
        assert!(cli.merge);
        assert_eq!(cli.timeout, 60);
    }
}
