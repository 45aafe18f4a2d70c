//! Multi-page TIFF assembly.
//!
//! The `image` crate's TIFF support writes single-frame files only, so
//! the multi-IFD container is written with the `tiff` crate directly:
//! one LZW-compressed RGB IFD per input page.

use crate::error::TexImgError;
use crate::job::ConversionJob;
use std::fs::File;
use std::io::BufWriter;
use tiff::encoder::{colortype, compression::Lzw, TiffEncoder};
use tracing::info;

pub(crate) fn concat(
    job: &mut ConversionJob,
    files: &[String],
    output: &str,
) -> Result<(), TexImgError> {
    let out_path = job.path(output);
    job.register_image(out_path.clone());
    match files {
        [] => return Ok(()),
        [single] => {
            let src = job.path(single);
            std::fs::copy(&src, &out_path).map_err(|e| TexImgError::io(&src, e))?;
            return Ok(());
        }
        _ => {}
    }

    let writer = BufWriter::new(File::create(&out_path).map_err(|e| TexImgError::io(&out_path, e))?);
    let mut encoder = TiffEncoder::new(writer)
        .map_err(|e| TexImgError::Internal(format!("tiff encoder: {e}")))?;
    for f in files {
        let path = job.path(f);
        let img = image::open(&path)
            .map_err(|e| TexImgError::Internal(format!("could not decode {}: {e}", path.display())))?
            .to_rgb8();
        encoder
            .write_image_with_compression::<colortype::RGB8, _>(
                img.width(),
                img.height(),
                Lzw,
                img.as_raw(),
            )
            .map_err(|e| TexImgError::Internal(format!("tiff page from {f}: {e}")))?;
    }
    info!("concatenated {} TIFF page(s)", files.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use tiff::decoder::Decoder;

    #[test]
    fn writes_one_ifd_per_page() {
        let dir = tempfile::tempdir().unwrap();
        for (i, (w, h)) in [(4u32, 3u32), (2, 5), (6, 1)].iter().enumerate() {
            RgbImage::from_pixel(*w, *h, Rgb([i as u8 * 80, 0, 0]))
                .save_with_format(dir.path().join(format!("p-{}.png", i + 1)), ImageFormat::Png)
                .unwrap();
        }
        let mut job =
            ConversionJob::new(dir.path().join("p.pdf"), dir.path().join("p.tiff"), false).unwrap();
        let files: Vec<String> = (1..=3).map(|i| format!("p-{i}.png")).collect();
        concat(&mut job, &files, "out.tiff").unwrap();

        let f = File::open(dir.path().join("out.tiff")).unwrap();
        let mut dec = Decoder::new(std::io::BufReader::new(f)).unwrap();
        assert_eq!(dec.dimensions().unwrap(), (4, 3));
        assert!(dec.more_images());
        dec.next_image().unwrap();
        assert_eq!(dec.dimensions().unwrap(), (2, 5));
        assert!(dec.more_images());
        dec.next_image().unwrap();
        assert_eq!(dec.dimensions().unwrap(), (6, 1));
        assert!(!dec.more_images());
    }

    #[test]
    fn single_page_is_copied_through() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(2, 2, Rgb([1, 2, 3]))
            .save_with_format(dir.path().join("p-1.tiff"), ImageFormat::Tiff)
            .unwrap();
        let mut job =
            ConversionJob::new(dir.path().join("p.pdf"), dir.path().join("p.tiff"), false).unwrap();
        concat(&mut job, &["p-1.tiff".into()], "out.tiff").unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("out.tiff")).unwrap(),
            std::fs::read(dir.path().join("p-1.tiff")).unwrap()
        );
    }
}
