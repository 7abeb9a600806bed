//! Residual resampling.
//!
//! Separable convolution resize over f32 lanes, parallelized per output
//! row. Lanczos-3 is the pipeline default; nearest exists for previews and
//! tests only.

use rayon::prelude::*;

use tessera_core::PixelMatrix;

/// Resampling filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    /// Nearest-neighbor (no interpolation).
    Nearest,
    /// Triangle filter.
    Bilinear,
    /// Mitchell-Netravali cubic.
    Bicubic,
    /// Lanczos with a = 3. The quality bar for derivatives.
    #[default]
    Lanczos3,
}

impl Filter {
    /// Support radius of the kernel.
    #[inline]
    pub fn support(&self) -> f32 {
        match self {
            Filter::Nearest => 0.5,
            Filter::Bilinear => 1.0,
            Filter::Bicubic => 2.0,
            Filter::Lanczos3 => 3.0,
        }
    }

    /// Kernel weight at distance `x`.
    #[inline]
    pub fn weight(&self, x: f32) -> f32 {
        let ax = x.abs();
        match self {
            Filter::Nearest => {
                if ax < 0.5 { 1.0 } else { 0.0 }
            }
            Filter::Bilinear => {
                if ax < 1.0 { 1.0 - ax } else { 0.0 }
            }
            Filter::Bicubic => mitchell(ax),
            Filter::Lanczos3 => lanczos(ax, 3.0),
        }
    }
}

/// Mitchell-Netravali with B = C = 1/3.
#[inline]
fn mitchell(ax: f32) -> f32 {
    const B: f32 = 1.0 / 3.0;
    const C: f32 = 1.0 / 3.0;
    if ax < 1.0 {
        ((12.0 - 9.0 * B - 6.0 * C) * ax * ax * ax
            + (-18.0 + 12.0 * B + 6.0 * C) * ax * ax
            + (6.0 - 2.0 * B))
            / 6.0
    } else if ax < 2.0 {
        ((-B - 6.0 * C) * ax * ax * ax
            + (6.0 * B + 30.0 * C) * ax * ax
            + (-12.0 * B - 48.0 * C) * ax
            + (8.0 * B + 24.0 * C))
            / 6.0
    } else {
        0.0
    }
}

#[inline]
fn lanczos(ax: f32, a: f32) -> f32 {
    if ax < 1e-8 {
        1.0
    } else if ax < a {
        let pi_x = std::f32::consts::PI * ax;
        let pi_x_a = pi_x / a;
        (pi_x.sin() / pi_x) * (pi_x_a.sin() / pi_x_a)
    } else {
        0.0
    }
}

/// Precomputed kernel for one output coordinate.
struct Taps {
    start: usize,
    weights: Vec<f32>,
}

/// Builds the tap list for one axis.
///
/// When downscaling, the kernel widens by the scale ratio so every source
/// sample contributes.
fn build_taps(src_len: u32, dst_len: u32, filter: Filter) -> Vec<Taps> {
    let ratio = src_len as f32 / dst_len as f32;
    let widen = ratio.max(1.0);
    let support = filter.support() * widen;

    (0..dst_len)
        .map(|d| {
            let center = (d as f32 + 0.5) * ratio - 0.5;
            let start = ((center - support).floor().max(0.0)) as usize;
            let end = ((center + support).ceil() as usize).min(src_len as usize - 1);

            let mut weights = Vec::with_capacity(end - start + 1);
            let mut sum = 0.0f32;
            for s in start..=end {
                let w = filter.weight((s as f32 - center) / widen);
                weights.push(w);
                sum += w;
            }
            if sum.abs() > 1e-8 {
                for w in &mut weights {
                    *w /= sum;
                }
            }
            Taps { start, weights }
        })
        .collect()
}

/// Resamples a matrix to the exact target dimensions.
///
/// The bit depth and channel count are preserved; the ICC profile rides
/// along unchanged.
pub fn resize(image: &PixelMatrix, dst_w: u32, dst_h: u32, filter: Filter) -> PixelMatrix {
    if (image.width, image.height) == (dst_w, dst_h) {
        return image.clone();
    }

    let channels = image.channels as usize;
    let src = image.to_f32();

    // Horizontal pass.
    let h_taps = build_taps(image.width, dst_w, filter);
    let src_h = image.height as usize;
    let mut mid = vec![0.0f32; dst_w as usize * src_h * channels];
    mid.par_chunks_mut(dst_w as usize * channels)
        .enumerate()
        .for_each(|(y, row)| {
            let src_row = &src[y * image.width as usize * channels..];
            for (dx, taps) in h_taps.iter().enumerate() {
                for c in 0..channels {
                    let mut acc = 0.0f32;
                    for (i, w) in taps.weights.iter().enumerate() {
                        acc += w * src_row[(taps.start + i) * channels + c];
                    }
                    row[dx * channels + c] = acc;
                }
            }
        });

    // Vertical pass.
    let v_taps = build_taps(image.height, dst_h, filter);
    let mut out = vec![0.0f32; dst_w as usize * dst_h as usize * channels];
    out.par_chunks_mut(dst_w as usize * channels)
        .enumerate()
        .for_each(|(dy, row)| {
            let taps = &v_taps[dy];
            for dx in 0..dst_w as usize {
                for c in 0..channels {
                    let mut acc = 0.0f32;
                    for (i, w) in taps.weights.iter().enumerate() {
                        acc += w * mid[((taps.start + i) * dst_w as usize + dx) * channels + c];
                    }
                    row[dx * channels + c] = acc;
                }
            }
        });

    let mut result =
        PixelMatrix::from_f32(dst_w, dst_h, image.channels, image.bit_depth(), &out);
    result.icc = image.icc.clone();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn kernel_shapes() {
        assert_relative_eq!(Filter::Lanczos3.weight(0.0), 1.0, epsilon = 1e-3);
        assert_relative_eq!(Filter::Lanczos3.weight(3.0), 0.0, epsilon = 1e-3);
        assert_relative_eq!(Filter::Bilinear.weight(0.5), 0.5, epsilon = 1e-6);
        assert_eq!(Filter::Nearest.weight(0.4), 1.0);
        assert_eq!(Filter::Nearest.weight(0.6), 0.0);
    }

    #[test]
    fn identity_resize_is_a_copy() {
        let image = PixelMatrix::from_u8(4, 4, 1, (0..16).collect()).expect("geometry");
        let out = resize(&image, 4, 4, Filter::Lanczos3);
        assert_eq!(out.to_u8(), image.to_u8());
    }

    #[test]
    fn flat_image_stays_flat() {
        // Normalized kernels must not shift constant signals.
        let image = PixelMatrix::from_u8(64, 64, 3, vec![120; 64 * 64 * 3]).expect("geometry");
        for filter in [Filter::Bilinear, Filter::Bicubic, Filter::Lanczos3] {
            let out = resize(&image, 17, 29, filter);
            assert_eq!((out.width, out.height), (17, 29));
            for v in out.to_u8() {
                assert!((v as i32 - 120).abs() <= 1, "filter {filter:?} drifted to {v}");
            }
        }
    }

    #[test]
    fn downscale_averages() {
        // Alternating black/white columns halve to mid-gray.
        let data: Vec<u8> =
            (0..32 * 32).map(|i| if i % 2 == 0 { 0 } else { 255 }).collect();
        let image = PixelMatrix::from_u8(32, 32, 1, data).expect("geometry");
        let out = resize(&image, 16, 32, Filter::Bilinear);
        let center = out.get_pixel(8, 16)[0] >> 8;
        assert!((center as i32 - 127).abs() <= 16, "got {center}");
    }

    #[test]
    fn upscale_preserves_depth_and_channels() {
        let image = PixelMatrix::from_u16(8, 8, 4, vec![30000; 8 * 8 * 4]).expect("geometry");
        let out = resize(&image, 20, 20, Filter::Lanczos3);
        assert_eq!(out.bit_depth(), 16);
        assert_eq!(out.channels, 4);
        assert_eq!((out.width, out.height), (20, 20));
    }
}
