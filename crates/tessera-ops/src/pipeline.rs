//! The pipeline executor.
//!
//! Turns one request - a source reader, its description, and a normalized
//! operation list - into encoded bytes on the output stream. The executor
//! owns the reduction-factor arithmetic: it picks the resolution level,
//! translates the crop into level coordinates, asks the reader for the
//! minimum region, and applies only the residual work on decoded pixels.
//! The full source is never materialized.

use std::io::{Cursor, Write};

use tracing::debug;

use tessera_core::{CancellationToken, Config, Error, Format, ImageInfo, MediaType, PixelMatrix, Result};
use tessera_io::{registry, DecodeOptions, EncodeOptions, ImageReader};

use crate::reduction::select_level;
use crate::resize::{resize, Filter};
use crate::{color, overlay, sharpen, transform, Operation, OperationList};

/// Executes an operation list against an opened reader, writing the
/// encoded derivative to `out`.
///
/// Returns the media type of the bytes written. `out` receives data only
/// after all pixel work succeeded, so a failed request never emits a
/// partial body from this layer.
pub fn execute(
    reader: &mut dyn ImageReader,
    info: &ImageInfo,
    ops: &OperationList,
    config: &Config,
    token: &CancellationToken,
    out: &mut dyn Write,
) -> Result<MediaType> {
    let encode = ops.encode();

    // Resolve the crop against the full extent.
    let crop_rect = ops
        .crop()
        .map(|c| c.resolve(info.width, info.height))
        .unwrap_or_else(|| tessera_core::Rect::full(info.width, info.height));
    if crop_rect.is_empty() {
        return Err(Error::invalid_request("crop selects no pixels"));
    }

    // Resolve the target size against the crop.
    let (target_w, target_h) = ops
        .scale()
        .map(|s| s.target(crop_rect.width, crop_rect.height))
        .unwrap_or((crop_rect.width, crop_rect.height));

    let max_pixels = config.processor.max_pixels;
    if max_pixels > 0 && target_w as u64 * target_h as u64 > max_pixels {
        return Err(Error::invalid_request(format!(
            "derivative of {target_w}x{target_h} exceeds the {max_pixels}-pixel limit"
        )));
    }

    // Pick the resolution level and the residual subsample.
    let scale_factor = ops
        .scale()
        .map(|s| s.factor(crop_rect.width, crop_rect.height))
        .unwrap_or(1.0);
    let choice = select_level(info, scale_factor);
    let level_scale = info.level_scale(choice.level);
    debug!(
        level = choice.level,
        reduction = choice.total_reduction(),
        subsample = choice.extra_subsample,
        "selected resolution level"
    );

    // Translate the crop into level coordinates.
    let level = info.level(choice.level);
    let level_region = crop_rect.scaled(level_scale).clipped_to(level.width, level.height);
    if level_region.is_empty() {
        return Err(Error::invalid_request("crop selects no pixels at this level"));
    }

    token.checkpoint()?;
    let (mut matrix, hints) =
        reader.read(choice.level, Some(level_region), choice.extra_subsample)?;

    if !hints.already_cropped {
        let in_matrix = level_region
            .scaled(1.0 / hints.subsample_applied as f64)
            .clipped_to(matrix.width, matrix.height);
        matrix = matrix.crop(in_matrix)?;
    }

    // Residual scale to the exact target. Identity residuals skip the
    // resampler entirely.
    token.checkpoint()?;
    if (matrix.width, matrix.height) != (target_w, target_h) {
        debug!(
            from_w = matrix.width,
            from_h = matrix.height,
            to_w = target_w,
            to_h = target_h,
            "residual resample"
        );
        matrix = resize(&matrix, target_w, target_h, Filter::Lanczos3);
    }

    // Remaining operations in canonical order.
    for op in ops.iter() {
        token.checkpoint()?;
        match op {
            Operation::Crop(_) | Operation::Scale(_) | Operation::Encode(_) => {}
            Operation::Transpose(axis) => matrix = transform::transpose(&matrix, *axis),
            Operation::Rotate(degrees) => matrix = transform::rotate(&matrix, *degrees),
            Operation::Color(t) => matrix = color::apply(&matrix, *t),
            Operation::Sharpen(amount) => matrix = sharpen::sharpen(&matrix, *amount),
            Operation::Overlay(o) => {
                let mark = load_overlay(&o.source)?;
                matrix = overlay::composite(&matrix, &mark, o.position, o.inset);
            }
        }
    }

    // Same-format metadata preservation.
    let metadata = if config.processor.metadata_preserve && info.format == encode.format {
        let blob = reader.metadata(0)?;
        (!blob.is_empty()).then_some(blob)
    } else {
        None
    };

    token.checkpoint()?;
    let writer = registry::writer_for(encode.format)?;
    let encode_options = EncodeOptions {
        quality: encode.quality,
        compression: encode.compression,
        metadata,
        background: encode.background,
    };
    writer.write(out, &matrix, &encode_options)?;

    Ok(encode.format.media_type())
}

/// Loads and fully decodes an overlay image from the filesystem.
fn load_overlay(path: &str) -> Result<PixelMatrix> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::internal(format!("overlay {path}: {e}")))?;
    let format = Format::detect(&bytes[..bytes.len().min(tessera_core::MAGIC_PROBE_LEN)], path)
        .ok_or_else(|| Error::internal(format!("overlay {path}: unrecognized format")))?;

    let mut reader = registry::reader_for(
        format,
        path,
        Box::new(Cursor::new(bytes)),
        DecodeOptions::default(),
    )?;
    let (matrix, _) = reader.read(0, None, 1)?;
    Ok(matrix)
}
