//! Color transforms: grayscale and bitonal reduction.

use tessera_core::PixelMatrix;

use crate::ColorTransform;

/// Rec. 709 luma weights.
const LUMA_R: f32 = 0.2126;
const LUMA_G: f32 = 0.7152;
const LUMA_B: f32 = 0.0722;

/// Applies a color transform, returning the (possibly unchanged) matrix.
pub fn apply(image: &PixelMatrix, transform: ColorTransform) -> PixelMatrix {
    match transform {
        ColorTransform::Identity => image.clone(),
        ColorTransform::Gray => to_gray(image),
        ColorTransform::Bitonal => to_bitonal(image),
    }
}

/// Reduces to single-channel grayscale via Rec. 709 luma.
///
/// An alpha channel survives as gray+alpha. The ICC profile is dropped; it
/// described the discarded color channels.
pub fn to_gray(image: &PixelMatrix) -> PixelMatrix {
    let has_alpha = image.has_alpha();
    let out_channels: u8 = if has_alpha { 2 } else { 1 };
    let mut out = PixelMatrix::new(image.width, image.height, out_channels, image.bit_depth());

    for y in 0..image.height {
        for x in 0..image.width {
            let px = image.get_pixel(x, y);
            let gray = luma16(&px, image.channels);
            if has_alpha {
                out.put_pixel(x, y, &[gray, px[px.len() - 1]]);
            } else {
                out.put_pixel(x, y, &[gray]);
            }
        }
    }
    out
}

/// Reduces to black/white: linear luminance thresholded at 50 %.
pub fn to_bitonal(image: &PixelMatrix) -> PixelMatrix {
    let mut out = PixelMatrix::new(image.width, image.height, 1, 8);

    for y in 0..image.height {
        for x in 0..image.width {
            let px = image.get_pixel(x, y);
            let luminance = luma_linear(&px, image.channels);
            let value = if luminance >= 0.5 { u16::MAX } else { 0 };
            out.put_pixel(x, y, &[value]);
        }
    }
    out
}

/// Rec. 709 luma on encoded (gamma) samples, widened to 16 bits.
fn luma16(px: &[u16], channels: u8) -> u16 {
    if channels < 3 {
        return px[0];
    }
    let luma =
        LUMA_R * px[0] as f32 + LUMA_G * px[1] as f32 + LUMA_B * px[2] as f32;
    luma.round().clamp(0.0, u16::MAX as f32) as u16
}

/// Rec. 709 luminance computed on linearized samples.
fn luma_linear(px: &[u16], channels: u8) -> f32 {
    let lin = |v: u16| srgb_to_linear(v as f32 / u16::MAX as f32);
    if channels < 3 {
        lin(px[0])
    } else {
        LUMA_R * lin(px[0]) + LUMA_G * lin(px[1]) + LUMA_B * lin(px[2])
    }
}

/// The sRGB electro-optical transfer function.
fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 { v / 12.92 } else { ((v + 0.055) / 1.055).powf(2.4) }
}
