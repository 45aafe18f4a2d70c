//! The front of the pipeline: turn the input document into `{base}.pdf`
//! in the working directory.
//!
//! A `.tex` source is compiled with the configured (La)TeX engine, then
//! whichever of `{base}.pdf` / `{base}.dvi` / `{base}.ps` the engine
//! actually produced decides the rest: a fresher DVI goes through
//! dvipdfmx, a fresher PS through Ghostscript's pdfwrite. `.ps`/`.eps`
//! inputs go straight to pdfwrite; a `.pdf` input is used as-is.

use crate::config::{ConversionConfig, InputFormat};
use crate::converters::gs;
use crate::error::TexImgError;
use crate::job::ConversionJob;
use crate::runner::{ProcessRunner, ToolInvocation};
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, info};

/// Which of two candidate engine outputs is the live one.
#[derive(Debug, PartialEq)]
enum Generated {
    First,
    Second,
    Neither,
}

/// `file2` wins only if it exists and is strictly newer than `file1`.
fn generated(file1: &Path, file2: &Path) -> Generated {
    fn mtime(p: &Path) -> Option<SystemTime> {
        std::fs::metadata(p).and_then(|m| m.modified()).ok()
    }
    match (mtime(file1), mtime(file2)) {
        (None, None) => Generated::Neither,
        (None, Some(_)) => Generated::Second,
        (Some(t1), Some(t2)) if t2 > t1 => Generated::Second,
        _ => Generated::First,
    }
}

/// Produce `{base}.pdf` from the job's input. Registers every
/// engine by-product for cleanup (but never the input file itself).
pub(crate) async fn to_pdf(
    config: &ConversionConfig,
    job: &mut ConversionJob,
    input: InputFormat,
) -> Result<(), TexImgError> {
    let base = job.base().to_string();
    if input == InputFormat::Tex {
        compile(config, job).await?;
        match generated(
            &job.path(&format!("{base}.pdf")),
            &job.path(&format!("{base}.dvi")),
        ) {
            Generated::Neither => {
                return Err(TexImgError::ExpectedOutputMissing {
                    tool: config.tools.latex.clone(),
                    path: job.path(&format!("{base}.pdf")),
                })
            }
            Generated::Second => dvi_to_pdf(config, job).await?,
            Generated::First => {}
        }
    }
    match input {
        InputFormat::Ps | InputFormat::Eps => {
            // Use the input's own file name; its extension may differ in
            // case from the canonical one.
            let src = job
                .input()
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!("{base}.{}", if input == InputFormat::Ps { "ps" } else { "eps" })
                });
            let out = format!("{base}.pdf");
            job.register_image(job.path(&out));
            gs::ps_to_pdf(config, job, &src, &out).await?;
        }
        _ => {
            // A compile may emit PostScript (dvips-style workflows).
            if generated(
                &job.path(&format!("{base}.pdf")),
                &job.path(&format!("{base}.ps")),
            ) == Generated::Second
            {
                gs::ps_to_pdf(config, job, &format!("{base}.ps"), &format!("{base}.pdf")).await?;
            }
        }
    }
    Ok(())
}

/// Run the (La)TeX engine on `{base}.tex`, repeating until cross
/// references settle or the pass limit is reached. A source with no
/// cross-referencing constructs compiles in a single pass.
async fn compile(config: &ConversionConfig, job: &mut ConversionJob) -> Result<(), TexImgError> {
    let base = job.base().to_string();
    job.register_compile_base(job.working_dir().join(&base));

    let passes = if config.guess_compile_passes {
        let source = std::fs::read_to_string(job.path(&format!("{base}.tex"))).unwrap_or_default();
        if needs_multiple_passes(&source) {
            config.max_compile_passes.max(1)
        } else {
            1
        }
    } else {
        config.max_compile_passes.max(1)
    };

    let runner = ProcessRunner::new(config);
    let aux_path = job.path(&format!("{base}.aux"));
    let mut prev_aux = aux_fingerprint(&aux_path);

    for pass in 1..=passes {
        let mut inv = ToolInvocation::new(&config.tools.latex, job.working_dir())
            .hint("a TeX distribution")
            .stage("compiling the TeX source")
            .tex_inputs(&config.tex_inputs);
        if let Some(ref enc) = config.kanji_encoding {
            inv = inv
                .arg("-no-guess-input-enc")
                .arg(format!("-kanji={enc}"))
                .env("command_line_encoding", "utf8");
        }
        inv = inv.arg("-interaction=nonstopmode").arg(format!("{base}.tex"));

        let status = runner.run_logged(&inv).await?;
        if !status.success() {
            if config.ignore_compile_errors {
                job.set_error_ignored();
            } else {
                return Err(TexImgError::ToolFailed {
                    tool: config.tools.latex.clone(),
                    code: status.code(),
                });
            }
        }

        if config.guess_compile_passes {
            let aux = aux_fingerprint(&aux_path);
            if aux == prev_aux {
                debug!("aux file stable after pass {pass}");
                break;
            }
            prev_aux = aux;
        }
    }
    info!("compiled {base}.tex");
    Ok(())
}

/// Cheap change detector for the `.aux` file; `None` means "absent".
fn aux_fingerprint(path: &Path) -> Option<Vec<u8>> {
    std::fs::read(path).ok()
}

/// Constructs whose numbers only settle on a later pass.
const MULTI_PASS_MACROS: &[&str] = &[
    "\\tableofcontents",
    "\\listoffigures",
    "\\listoftables",
    "\\bibliography",
    "\\makeindex",
    "\\ref",
    "\\pageref",
    "\\cite",
];

fn needs_multiple_passes(source: &str) -> bool {
    MULTI_PASS_MACROS.iter().any(|m| source.contains(m))
}

async fn dvi_to_pdf(config: &ConversionConfig, job: &ConversionJob) -> Result<(), TexImgError> {
    let base = job.base();
    let runner = ProcessRunner::new(config);
    let inv = ToolInvocation::new(&config.tools.dvipdfmx, job.working_dir())
        .arg(format!("{base}.dvi"))
        .hint("a TeX distribution (dvipdfmx)")
        .stage("converting DVI to PDF")
        .tex_inputs(&config.tex_inputs);
    let status = runner.run_logged(&inv).await?;
    if !status.success() {
        return Err(TexImgError::ToolFailed {
            tool: config.tools.dvipdfmx.clone(),
            code: status.code(),
        });
    }
    Ok(())
}
