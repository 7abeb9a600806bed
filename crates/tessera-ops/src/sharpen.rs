//! Unsharp-mask sharpening.

use tessera_core::PixelMatrix;

/// Sharpens by unsharp mask: `out = src + amount * (src - blur(src))`.
///
/// The blur is a separable 3x3 gaussian. An amount of 0 returns the input
/// unchanged; typical values are 0.3-1.5.
pub fn sharpen(image: &PixelMatrix, amount: f32) -> PixelMatrix {
    if amount <= 0.0 {
        return image.clone();
    }

    let channels = image.channels as usize;
    let (w, h) = (image.width as usize, image.height as usize);
    let src = image.to_f32();

    let blurred = gaussian3(&src, w, h, channels);

    let out: Vec<f32> = src
        .iter()
        .zip(blurred.iter())
        .map(|(&s, &b)| s + amount * (s - b))
        .collect();

    let mut result = PixelMatrix::from_f32(image.width, image.height, image.channels, image.bit_depth(), &out);
    result.icc = image.icc.clone();
    result
}

/// Separable [1 2 1]/4 blur with clamped edges.
fn gaussian3(src: &[f32], w: usize, h: usize, channels: usize) -> Vec<f32> {
    let mut horizontal = vec![0.0f32; src.len()];
    for y in 0..h {
        for x in 0..w {
            let left = x.saturating_sub(1);
            let right = (x + 1).min(w - 1);
            for c in 0..channels {
                let idx = |col: usize| (y * w + col) * channels + c;
                horizontal[idx(x)] =
                    0.25 * src[idx(left)] + 0.5 * src[idx(x)] + 0.25 * src[idx(right)];
            }
        }
    }

    let mut out = vec![0.0f32; src.len()];
    for y in 0..h {
        let up = y.saturating_sub(1);
        let down = (y + 1).min(h - 1);
        for x in 0..w {
            for c in 0..channels {
                let idx = |row: usize| (row * w + x) * channels + c;
                out[idx(y)] = 0.25 * horizontal[idx(up)]
                    + 0.5 * horizontal[idx(y)]
                    + 0.25 * horizontal[idx(down)];
            }
        }
    }
    out
}
