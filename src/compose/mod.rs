//! Merging per-page outputs into one multi-page file.
//!
//! Only PDF, TIFF, and GIF have a multi-page container; for every other
//! format the merge option is silently meaningless. Merging is the one
//! stage the pipeline treats as non-fatal: a failure degrades to a
//! warning and the per-page files are delivered instead.

pub(crate) mod gif;
pub(crate) mod pdf;
pub(crate) mod tiff;

use crate::config::{ConversionConfig, OutputFormat};
use crate::error::TexImgError;
use crate::job::ConversionJob;

/// Merge `files` (bare names, page order) into `output`. Returns
/// `Ok(false)` for formats without a multi-page container.
pub(crate) async fn merge(
    config: &ConversionConfig,
    job: &mut ConversionJob,
    format: OutputFormat,
    files: &[String],
    output: &str,
) -> Result<bool, TexImgError> {
    match format {
        OutputFormat::Pdf => {
            pdf::concat(config, job, files, output).await?;
            Ok(true)
        }
        OutputFormat::Tiff => {
            tiff::concat(job, files, output)?;
            Ok(true)
        }
        OutputFormat::Gif => {
            gif::concat(
                job,
                files,
                output,
                config.animation_delay_cs,
                config.animation_loop,
            )?;
            Ok(true)
        }
        _ => Ok(false),
    }
}
