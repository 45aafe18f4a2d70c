//! In-process raster conversions with the `image` crate.
//!
//! Ghostscript renders the intermediate bitmaps as PNG; formats it has
//! no good device for (TIFF, GIF) are produced here by decoding and
//! re-encoding. This is also where the white→transparent substitution
//! happens, since `pngalpha` only makes *unpainted* areas transparent,
//! not white ink.

use crate::config::OutputFormat;
use crate::error::TexImgError;
use crate::job::ConversionJob;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use tracing::info;

fn image_format(format: OutputFormat) -> Option<ImageFormat> {
    match format {
        OutputFormat::Png => Some(ImageFormat::Png),
        OutputFormat::Jpeg => Some(ImageFormat::Jpeg),
        OutputFormat::Bmp => Some(ImageFormat::Bmp),
        OutputFormat::Tiff => Some(ImageFormat::Tiff),
        OutputFormat::Gif => Some(ImageFormat::Gif),
        _ => None,
    }
}

/// Re-encode one raster file into the format implied by `output`'s
/// extension. With the transparent flag set, fully white pixels become
/// transparent first (except for GIF, whose palette handling makes the
/// result look worse than keeping white).
pub(crate) fn convert(
    job: &mut ConversionJob,
    input: &str,
    output: &str,
    transparent: bool,
) -> Result<(), TexImgError> {
    let in_path = job.path(input);
    let out_path = job.path(output);
    job.register_image(out_path.clone());

    let format = OutputFormat::from_path(&out_path)
        .and_then(image_format)
        .ok_or_else(|| TexImgError::UnsupportedFormat {
            path: out_path.clone(),
            expected: "png, jpg, bmp, tiff, or gif".into(),
        })?;

    info!("convert {input} to {output}");
    let img = image::open(&in_path).map_err(|e| TexImgError::Internal(format!(
        "could not decode {}: {e}",
        in_path.display()
    )))?;
    let img = if transparent && format != ImageFormat::Gif {
        DynamicImage::ImageRgba8(make_white_transparent(img.to_rgba8()))
    } else {
        img
    };
    img.save_with_format(&out_path, format)
        .map_err(|e| TexImgError::Internal(format!("could not encode {output}: {e}")))?;
    Ok(())
}

fn make_white_transparent(mut img: RgbaImage) -> RgbaImage {
    for px in img.pixels_mut() {
        if px.0 == [255, 255, 255, 255] {
            *px = Rgba([255, 255, 255, 0]);
        }
    }
    img
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_pixels_become_transparent() {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        img.put_pixel(1, 0, Rgba([254, 255, 255, 255]));
        let out = make_white_transparent(img);
        assert_eq!(out.get_pixel(0, 0).0[3], 0);
        assert_eq!(out.get_pixel(1, 0).0[3], 255, "near-white ink is kept");
    }

    #[test]
    fn converts_png_to_bmp() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("x-1.png");
        RgbaImage::from_pixel(3, 2, Rgba([0, 0, 0, 255]))
            .save_with_format(&png, ImageFormat::Png)
            .unwrap();
        let mut job =
            crate::job::ConversionJob::new(dir.path().join("x.pdf"), dir.path().join("x.bmp"), false)
                .unwrap();
        convert(&mut job, "x-1.png", "x-1.bmp", false).unwrap();
        let re = image::open(dir.path().join("x-1.bmp")).unwrap();
        assert_eq!(re.width(), 3);
        assert_eq!(re.height(), 2);
    }
}
