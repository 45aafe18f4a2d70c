//! Animated GIF assembly by direct byte splicing.
//!
//! General-purpose GIF encoders re-quantize every frame; splicing the
//! already-encoded frames keeps the pixel data bit-identical. Each input
//! is a single-frame GIF. The output gets one GIF89a header sized to the
//! largest frame, a Netscape looping extension, and then per frame: a
//! Graphic Control Extension (disposal forced to restore-to-background,
//! delay overwritten), the image descriptor, and the frame's color table
//! demoted to a *local* table, since frames may disagree on palettes.

use crate::error::TexImgError;
use crate::job::ConversionJob;
use std::path::Path;
use tracing::info;

/// A cursor over one input GIF that fails with the file's name.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], TexImgError> {
        if self.pos + n > self.buf.len() {
            return Err(self.malformed("file is truncated"));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn byte(&mut self) -> Result<u8, TexImgError> {
        Ok(self.take(1)?[0])
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn malformed(&self, detail: &str) -> TexImgError {
        TexImgError::MalformedContainerInput {
            path: self.path.to_path_buf(),
            detail: detail.to_string(),
        }
    }
}

/// A color table is `3 * 2^(bits+1)` bytes, `bits` being the low three
/// flag bits.
fn color_table_len(bits: u8) -> usize {
    3 * (2usize << (bits & 0x07))
}

fn screen_size(header: &[u8]) -> (u16, u16) {
    (
        u16::from_le_bytes([header[6], header[7]]),
        u16::from_le_bytes([header[8], header[9]]),
    )
}

/// Splice single-frame GIFs into one animation. `delay_cs` is the frame
/// delay in centiseconds, `loop_count` the Netscape repeat count
/// (0 = forever).
pub(crate) fn concat(
    job: &mut ConversionJob,
    files: &[String],
    output: &str,
    delay_cs: u16,
    loop_count: u16,
) -> Result<(), TexImgError> {
    let out_path = job.path(output);
    job.register_image(out_path.clone());

    // First pass: the output logical screen must fit every frame.
    let mut width = 0u16;
    let mut height = 0u16;
    let mut inputs = Vec::with_capacity(files.len());
    for f in files {
        let path = job.path(f);
        let buf = std::fs::read(&path).map_err(|e| TexImgError::io(&path, e))?;
        if buf.len() < 13 || &buf[..4] != b"GIF8" {
            return Err(TexImgError::MalformedContainerInput {
                path,
                detail: "not a GIF file".to_string(),
            });
        }
        let (w, h) = screen_size(&buf[..13]);
        width = width.max(w);
        height = height.max(h);
        inputs.push((path, buf));
    }

    let mut out: Vec<u8> = Vec::new();
    for (i, (path, buf)) in inputs.iter().enumerate() {
        let mut cur = Cursor {
            buf,
            pos: 0,
            path,
        };
        let header = cur.take(13)?;
        let mut global_table: Option<&[u8]> = None;
        let mut table_bits = 0u8;
        if header[10] & 0x80 != 0 {
            table_bits = header[10] & 0x07;
            global_table = Some(cur.take(color_table_len(table_bits))?);
        }
        if i == 0 {
            let mut h = header.to_vec();
            h[4] = b'9'; // force GIF89a, required by the extensions below
            h[6..8].copy_from_slice(&width.to_le_bytes());
            h[8..10].copy_from_slice(&height.to_le_bytes());
            h[10] &= 0x78; // no global color table in the output
            out.extend_from_slice(&h);
            out.extend_from_slice(&[
                0x21, 0xFF, 0x0B, b'N', b'E', b'T', b'S', b'C', b'A', b'P', b'E', b'2', b'.',
                b'0', 0x03, 0x01,
            ]);
            out.extend_from_slice(&loop_count.to_le_bytes());
            out.push(0x00);
        }

        // Graphic Control Extension: rewrite if present, synthesize if not.
        let mut b = cur.byte()?;
        out.push(0x21);
        let delay = delay_cs.to_le_bytes();
        let gce: [u8; 7];
        if b == 0x21 {
            let found = cur.take(7)?;
            if found[0] != 0xF9 {
                return Err(cur.malformed("expected a Graphic Control Extension"));
            }
            let mut g: [u8; 7] = found.try_into().map_err(|_| cur.malformed("short GCE"))?;
            g[2] = (g[2] & 0xE3) | 0x08; // disposal: restore to background
            g[3] = delay[0];
            g[4] = delay[1];
            gce = g;
            b = cur.byte()?;
        } else {
            gce = [0xF9, 0x04, 0x08, delay[0], delay[1], 0x00, 0x00];
        }
        out.extend_from_slice(&gce);

        // Image descriptor; the frame's palette becomes a local table.
        if b != 0x2C {
            return Err(cur.malformed("expected an image descriptor"));
        }
        out.push(b);
        let mut desc: [u8; 9] = cur
            .take(9)?
            .try_into()
            .map_err(|_| cur.malformed("short image descriptor"))?;
        let table: &[u8];
        if desc[8] & 0x80 != 0 {
            table_bits = desc[8] & 0x07;
            table = cur.take(color_table_len(table_bits))?;
        } else {
            match global_table {
                Some(t) => {
                    table = t;
                    desc[8] = (desc[8] & 0xF8) | 0x80 | table_bits;
                }
                None => return Err(cur.malformed("frame has no color table")),
            }
        }
        out.extend_from_slice(&desc);
        out.extend_from_slice(table);

        // Pixel data through to (but excluding) the trailer.
        let rest = cur.rest();
        match rest.last() {
            Some(0x3B) => out.extend_from_slice(&rest[..rest.len() - 1]),
            _ => return Err(cur.malformed("missing GIF trailer")),
        }
    }
    out.push(0x3B);

    std::fs::write(&out_path, out).map_err(|e| TexImgError::io(&out_path, e))?;
    info!("concatenated {} GIF frame(s)", files.len());
    Ok(())
}
