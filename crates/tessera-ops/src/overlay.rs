//! Overlay (watermark) compositing.

use tessera_core::PixelMatrix;

use crate::OverlayPosition;

/// Composites `overlay` onto `base` with source-over blending at the given
/// anchor position and inset.
///
/// The overlay is skipped entirely when it does not fit inside the base at
/// the requested inset; a watermark that covers the whole image is worse
/// than none.
pub fn composite(
    base: &PixelMatrix,
    overlay: &PixelMatrix,
    position: OverlayPosition,
    inset: u32,
) -> PixelMatrix {
    if overlay.width + 2 * inset > base.width || overlay.height + 2 * inset > base.height {
        return base.clone();
    }

    let (ox, oy) = anchor(position, base, overlay, inset);
    let mut out = base.clone();

    for y in 0..overlay.height {
        for x in 0..overlay.width {
            let over = rgba(overlay, x, y);
            let alpha = over[3] as u32;
            if alpha == 0 {
                continue;
            }

            let (bx, by) = (ox + x, oy + y);
            let under = rgba(base, bx, by);

            let mut blended = [0u16; 4];
            for c in 0..3 {
                blended[c] =
                    ((over[c] as u32 * alpha + under[c] as u32 * (65535 - alpha)) / 65535) as u16;
            }
            blended[3] = (alpha + under[3] as u32 * (65535 - alpha) / 65535) as u16;

            out.put_pixel(bx, by, &narrow(&blended, base.channels));
        }
    }
    out
}

fn anchor(
    position: OverlayPosition,
    base: &PixelMatrix,
    overlay: &PixelMatrix,
    inset: u32,
) -> (u32, u32) {
    let right = base.width - overlay.width - inset;
    let bottom = base.height - overlay.height - inset;
    let center_x = (base.width - overlay.width) / 2;
    let center_y = (base.height - overlay.height) / 2;

    match position {
        OverlayPosition::TopLeft => (inset, inset),
        OverlayPosition::TopCenter => (center_x, inset),
        OverlayPosition::TopRight => (right, inset),
        OverlayPosition::LeftCenter => (inset, center_y),
        OverlayPosition::Center => (center_x, center_y),
        OverlayPosition::RightCenter => (right, center_y),
        OverlayPosition::BottomLeft => (inset, bottom),
        OverlayPosition::BottomCenter => (center_x, bottom),
        OverlayPosition::BottomRight => (right, bottom),
    }
}

/// Reads a pixel widened to RGBA16.
fn rgba(image: &PixelMatrix, x: u32, y: u32) -> [u16; 4] {
    let px = image.get_pixel(x, y);
    match image.channels {
        4 => [px[0], px[1], px[2], px[3]],
        3 => [px[0], px[1], px[2], u16::MAX],
        2 => [px[0], px[0], px[0], px[1]],
        _ => [px[0], px[0], px[0], u16::MAX],
    }
}

/// Narrows an RGBA16 pixel back to the base layout.
fn narrow(px: &[u16; 4], channels: u8) -> Vec<u16> {
    match channels {
        4 => px.to_vec(),
        3 => px[..3].to_vec(),
        2 => vec![px[0], px[3]],
        _ => vec![px[0]],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_gray(width: u32, height: u32) -> PixelMatrix {
        PixelMatrix::from_u8(width, height, 3, vec![100; (width * height * 3) as usize])
            .expect("geometry")
    }

    fn opaque_white(width: u32, height: u32) -> PixelMatrix {
        PixelMatrix::from_u8(
            width,
            height,
            4,
            std::iter::repeat([255u8, 255, 255, 255])
                .take((width * height) as usize)
                .flatten()
                .collect(),
        )
        .expect("geometry")
    }

    #[test]
    fn bottom_right_anchor() {
        let base = base_gray(32, 32);
        let mark = opaque_white(4, 4);
        let out = composite(&base, &mark, OverlayPosition::BottomRight, 2);

        // Inside the mark
        assert_eq!(out.get_pixel(27, 27)[0] >> 8, 255);
        // Outside the mark
        assert_eq!(out.get_pixel(20, 20)[0] >> 8, 100);
    }

    #[test]
    fn alpha_blends() {
        let base = base_gray(8, 8);
        let mut mark = PixelMatrix::from_u8(2, 2, 4, vec![255, 255, 255, 128].repeat(4))
            .expect("geometry");
        mark.icc = None;
        let out = composite(&base, &mark, OverlayPosition::TopLeft, 0);
        let v = out.get_pixel(0, 0)[0] >> 8;
        // Halfway between 100 and 255.
        assert!((v as i32 - 177).abs() <= 2, "got {v}");
    }

    #[test]
    fn oversized_overlay_is_skipped() {
        let base = base_gray(8, 8);
        let mark = opaque_white(8, 8);
        let out = composite(&base, &mark, OverlayPosition::Center, 1);
        assert_eq!(out.to_u8(), base.to_u8());
    }
}
