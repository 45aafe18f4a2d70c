//! # teximg
//!
//! Convert TeX sources (and PDF/PS/EPS documents) into cropped,
//! publication-ready images by orchestrating the standard TeX and
//! Ghostscript toolchain.
//!
//! ```text
//! .tex ──latex──► .dvi ──dvipdfmx──►┐
//! .ps/.eps ──gs pdfwrite──────────► {base}.pdf
//! .pdf ────────────────────────────►┘
//!                                   │ probe: page count + per-page boxes
//!                                   ▼
//!            ┌─────────────────────┼─────────────────────┐
//!        pdf (text)           svg / gif(α)           everything else
//!            │                     │                      │
//!      pdfTeX crop           pdfTeX crop            gs → EPS + bbox fix
//!            │                mudraw/pdfium               │
//!            │                     │                gs / image re-render
//!            └────────► per-page files ◄──────────────────┘
//!                                   │ optional merge (pdf/tiff/gif)
//!                                   ▼
//!                             output file(s)
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use teximg::{convert, ConversionConfig};
//!
//! # async fn demo() -> Result<(), teximg::TexImgError> {
//! let config = ConversionConfig::builder()
//!     .resolution_scale(2.0)
//!     .transparent(true)
//!     .build()?;
//! let result = convert("formula.tex", "formula.png", &config).await?;
//! for f in &result.output_files {
//!     println!("wrote {}", f.display());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! All intermediates are created next to the input file and removed when
//! the job ends (configurable). External tools are looked up on `PATH`
//! by default; point [`ToolPaths`] elsewhere for pinned installations.

pub mod bbox;
pub mod config;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod runner;

mod compose;
mod converters;
mod probe;

pub use bbox::{BoundingBox, BoundingBoxPair, Margins};
pub use config::{
    ConversionConfig, ConversionConfigBuilder, FreezePrompt, InputFormat, MarginUnit,
    OutputFormat, OutputListener, PageBox, TimeoutPolicy, ToolPaths,
};
pub use error::TexImgError;
pub use job::ConversionOutput;
pub use pipeline::{convert, convert_sync};
pub use runner::AbortFlag;
