//! Geometric transforms: mirroring and rotation.
//!
//! Quarter-turn rotations are exact pixel shuffles. Arbitrary angles
//! inverse-map the rotated bounding box through bilinear sampling; pixels
//! falling outside the source become transparent (or the encode background
//! when one is set, for alpha-less targets downstream).

use tessera_core::PixelMatrix;

use crate::Axis;

/// Mirrors an image along an axis.
pub fn transpose(image: &PixelMatrix, axis: Axis) -> PixelMatrix {
    let mut out = PixelMatrix::new(image.width, image.height, image.channels, image.bit_depth());
    out.icc = image.icc.clone();

    for y in 0..image.height {
        for x in 0..image.width {
            let (sx, sy) = match axis {
                Axis::Horizontal => (image.width - 1 - x, y),
                Axis::Vertical => (x, image.height - 1 - y),
            };
            out.put_pixel(x, y, &image.get_pixel(sx, sy));
        }
    }
    out
}

/// Rotates an image by `degrees` counted clockwise.
///
/// The output canvas is the rotated bounding box. For non-quarter angles
/// the result always carries alpha so uncovered corners stay transparent;
/// flattening onto a background is the writer's concern.
pub fn rotate(image: &PixelMatrix, degrees: f64) -> PixelMatrix {
    let degrees = degrees.rem_euclid(360.0);
    if degrees == 0.0 {
        return image.clone();
    }
    if degrees == 90.0 || degrees == 180.0 || degrees == 270.0 {
        return rotate_quarter(image, degrees as u32);
    }
    rotate_arbitrary(image, degrees)
}

fn rotate_quarter(image: &PixelMatrix, degrees: u32) -> PixelMatrix {
    let (w, h) = (image.width, image.height);
    let (out_w, out_h) = if degrees == 180 { (w, h) } else { (h, w) };

    let mut out = PixelMatrix::new(out_w, out_h, image.channels, image.bit_depth());
    out.icc = image.icc.clone();

    for y in 0..out_h {
        for x in 0..out_w {
            let (sx, sy) = match degrees {
                90 => (y, h - 1 - x),
                180 => (w - 1 - x, h - 1 - y),
                _ => (w - 1 - y, x),
            };
            out.put_pixel(x, y, &image.get_pixel(sx, sy));
        }
    }
    out
}

fn rotate_arbitrary(image: &PixelMatrix, degrees: f64) -> PixelMatrix {
    let radians = degrees.to_radians();
    let (sin, cos) = radians.sin_cos();

    let (w, h) = (image.width as f64, image.height as f64);
    let out_w = (w * cos.abs() + h * sin.abs()).ceil() as u32;
    let out_h = (w * sin.abs() + h * cos.abs()).ceil() as u32;

    // Work in RGBA lanes so uncovered corners can be transparent.
    let src = to_rgba_f32(image);
    let channels = 4usize;
    let (src_w, src_h) = (image.width as usize, image.height as usize);

    let cx_out = out_w as f64 / 2.0;
    let cy_out = out_h as f64 / 2.0;
    let cx_src = w / 2.0;
    let cy_src = h / 2.0;

    let mut out = vec![0.0f32; out_w as usize * out_h as usize * channels];
    for y in 0..out_h {
        for x in 0..out_w {
            // Inverse rotation from output space into source space.
            let dx = x as f64 + 0.5 - cx_out;
            let dy = y as f64 + 0.5 - cy_out;
            let sx = dx * cos + dy * sin + cx_src - 0.5;
            let sy = -dx * sin + dy * cos + cy_src - 0.5;

            if sx < -1.0 || sy < -1.0 || sx > w || sy > h {
                continue;
            }

            let pixel = sample_bilinear(&src, src_w, src_h, sx, sy);
            let idx = (y as usize * out_w as usize + x as usize) * channels;
            out[idx..idx + channels].copy_from_slice(&pixel);
        }
    }

    let mut result = PixelMatrix::from_f32(out_w, out_h, 4, image.bit_depth(), &out);
    result.icc = image.icc.clone();
    result
}

/// Bilinear RGBA sample with transparent outside.
fn sample_bilinear(src: &[f32], w: usize, h: usize, x: f64, y: f64) -> [f32; 4] {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = (x - x0) as f32;
    let fy = (y - y0) as f32;

    let fetch = |ix: i64, iy: i64| -> [f32; 4] {
        if ix < 0 || iy < 0 || ix >= w as i64 || iy >= h as i64 {
            return [0.0; 4];
        }
        let idx = (iy as usize * w + ix as usize) * 4;
        [src[idx], src[idx + 1], src[idx + 2], src[idx + 3]]
    };

    let p00 = fetch(x0 as i64, y0 as i64);
    let p10 = fetch(x0 as i64 + 1, y0 as i64);
    let p01 = fetch(x0 as i64, y0 as i64 + 1);
    let p11 = fetch(x0 as i64 + 1, y0 as i64 + 1);

    let mut out = [0.0f32; 4];
    for c in 0..4 {
        let top = p00[c] * (1.0 - fx) + p10[c] * fx;
        let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
        out[c] = top * (1.0 - fy) + bottom * fy;
    }
    out
}

fn to_rgba_f32(image: &PixelMatrix) -> Vec<f32> {
    let lanes = image.to_f32();
    let ch = image.channels as usize;
    match ch {
        4 => lanes,
        3 => lanes.chunks_exact(3).flat_map(|px| [px[0], px[1], px[2], 1.0]).collect(),
        2 => lanes.chunks_exact(2).flat_map(|px| [px[0], px[0], px[0], px[1]]).collect(),
        _ => lanes.iter().flat_map(|&g| [g, g, g, 1.0]).collect(),
    }
}
