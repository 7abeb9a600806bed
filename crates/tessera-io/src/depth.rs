//! Bit-depth policy applied at the tail of every `read()`.
//!
//! Two independent knobs: `normalize` stretches each channel's observed
//! range to the full depth range, and `limit_to_8_bits` rescales deeper
//! sources to 8 bits per sample. Normalization always runs before depth
//! reduction so contrast gained from the stretch survives the narrowing.

use tessera_core::{PixelMatrix, Samples};

use crate::DecodeOptions;

/// Applies the configured read policy to a freshly decoded matrix.
pub fn apply_read_policy(matrix: PixelMatrix, options: &DecodeOptions) -> PixelMatrix {
    let matrix = if options.normalize { normalize(matrix) } else { matrix };
    if options.limit_to_8_bits && matrix.bit_depth() > 8 {
        reduce_to_8(matrix)
    } else {
        matrix
    }
}

/// Linearly stretches each channel's observed [min, max] to full range.
///
/// Alpha channels are left untouched; stretching coverage would change
/// compositing, not contrast.
pub fn normalize(mut matrix: PixelMatrix) -> PixelMatrix {
    let channels = matrix.channels as usize;
    let color_channels = if matrix.has_alpha() { channels - 1 } else { channels };

    match &mut matrix.samples {
        Samples::U8(data) => {
            let ranges = channel_ranges(data.iter().map(|&v| v as u32), channels, color_channels);
            stretch(data, channels, color_channels, &ranges, u8::MAX as u32, |v| v as u32, |v| {
                v as u8
            });
        }
        Samples::U16(data) => {
            let ranges = channel_ranges(data.iter().map(|&v| v as u32), channels, color_channels);
            stretch(data, channels, color_channels, &ranges, u16::MAX as u32, |v| v as u32, |v| {
                v as u16
            });
        }
    }
    matrix
}

/// Rescales 16-bit samples to 8 bits.
pub fn reduce_to_8(matrix: PixelMatrix) -> PixelMatrix {
    match &matrix.samples {
        Samples::U8(_) => matrix,
        Samples::U16(data) => {
            let reduced: Vec<u8> = data.iter().map(|&v| (v >> 8) as u8).collect();
            PixelMatrix {
                width: matrix.width,
                height: matrix.height,
                channels: matrix.channels,
                samples: Samples::U8(reduced),
                icc: matrix.icc,
            }
        }
    }
}

/// Observed (min, max) per color channel.
fn channel_ranges(
    samples: impl Iterator<Item = u32>,
    channels: usize,
    color_channels: usize,
) -> Vec<(u32, u32)> {
    let mut ranges = vec![(u32::MAX, 0u32); color_channels];
    for (i, v) in samples.enumerate() {
        let c = i % channels;
        if c < color_channels {
            let (min, max) = &mut ranges[c];
            *min = (*min).min(v);
            *max = (*max).max(v);
        }
    }
    ranges
}

fn stretch<T: Copy>(
    data: &mut [T],
    channels: usize,
    color_channels: usize,
    ranges: &[(u32, u32)],
    full: u32,
    widen: impl Fn(T) -> u32,
    narrow: impl Fn(u32) -> T,
) {
    for (i, v) in data.iter_mut().enumerate() {
        let c = i % channels;
        if c >= color_channels {
            continue;
        }
        let (min, max) = ranges[c];
        if max <= min {
            continue; // flat channel, nothing to stretch
        }
        let stretched = (widen(*v).saturating_sub(min)) as u64 * full as u64 / (max - min) as u64;
        *v = narrow(stretched.min(full as u64) as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_stretches_to_full_range() {
        let matrix = PixelMatrix::from_u8(2, 1, 1, vec![64, 192]).expect("geometry");
        let out = normalize(matrix);
        assert_eq!(out.to_u8(), vec![0, 255]);
    }

    #[test]
    fn normalize_skips_flat_channels() {
        let matrix = PixelMatrix::from_u8(2, 1, 1, vec![100, 100]).expect("geometry");
        let out = normalize(matrix);
        assert_eq!(out.to_u8(), vec![100, 100]);
    }

    #[test]
    fn normalize_leaves_alpha_alone() {
        let matrix = PixelMatrix::from_u8(2, 1, 2, vec![64, 10, 192, 20]).expect("geometry");
        let out = normalize(matrix);
        assert_eq!(out.to_u8(), vec![0, 10, 255, 20]);
    }

    #[test]
    fn policy_order_normalize_then_reduce() {
        // 16-bit values spanning 0x1000..0x2000; normalization must stretch
        // before the 8-bit reduction, otherwise both land on nearby bytes.
        let matrix = PixelMatrix::from_u16(2, 1, 1, vec![0x1000, 0x2000]).expect("geometry");
        let options = DecodeOptions { limit_to_8_bits: true, normalize: true };
        let out = apply_read_policy(matrix, &options);
        assert_eq!(out.bit_depth(), 8);
        assert_eq!(out.to_u8(), vec![0, 255]);
    }

    #[test]
    fn policy_without_flags_is_identity() {
        let matrix = PixelMatrix::from_u16(1, 1, 1, vec![0x1234]).expect("geometry");
        let out = apply_read_policy(matrix.clone(), &DecodeOptions::default());
        assert_eq!(out.samples, matrix.samples);
    }
}
