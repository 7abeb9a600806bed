//! Operations and the normalized operation list.
//!
//! An [`OperationList`] is the complete description of a derivative:
//! an ordered sequence holding at most one crop, at most one scale, and
//! exactly one terminal encode. Construction normalizes the sequence into
//! canonical order and drops identity operations, so two lists that mean
//! the same derivative compare - and fingerprint - equal.

use std::fmt::Write as _;

use tessera_core::{Error, Format, Rect, Result};
use tessera_io::Compression;

/// Region selection, resolved against the full image extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Crop {
    /// The full image.
    Full,
    /// A pixel rectangle, clipped to the image extent.
    Pixels(Rect),
    /// A rectangle in relative coordinates, each component in [0, 1].
    Percent {
        /// Left edge.
        x: f64,
        /// Top edge.
        y: f64,
        /// Width.
        width: f64,
        /// Height.
        height: f64,
    },
    /// The largest centered square.
    SquareCenter,
}

impl Crop {
    /// Resolves the crop to a pixel rectangle on a `width`x`height` image.
    pub fn resolve(&self, width: u32, height: u32) -> Rect {
        match *self {
            Crop::Full => Rect::full(width, height),
            Crop::Pixels(rect) => rect.clipped_to(width, height),
            Crop::Percent { x, y, width: w, height: h } => Rect::new(
                (x * width as f64).round() as u32,
                (y * height as f64).round() as u32,
                (w * width as f64).round() as u32,
                (h * height as f64).round() as u32,
            )
            .clipped_to(width, height),
            Crop::SquareCenter => {
                let side = width.min(height);
                Rect::new((width - side) / 2, (height - side) / 2, side, side)
            }
        }
    }

    fn is_identity(&self) -> bool {
        matches!(self, Crop::Full)
            || matches!(
                self,
                Crop::Percent { x: 0.0, y: 0.0, width: 1.0, height: 1.0 }
            )
    }

    fn validate(&self) -> Result<()> {
        if let Crop::Percent { x, y, width, height } = *self {
            let in_range = |v: f64| (0.0..=1.0).contains(&v);
            if !(in_range(x) && in_range(y) && in_range(width) && in_range(height)) {
                return Err(Error::invalid_request("percent crop components must be in [0, 1]"));
            }
            if width == 0.0 || height == 0.0 {
                return Err(Error::invalid_request("percent crop must have positive extent"));
            }
        }
        if let Crop::Pixels(rect) = self
            && rect.is_empty()
        {
            return Err(Error::invalid_request("pixel crop must have positive extent"));
        }
        Ok(())
    }

    fn canonical(&self, out: &mut String) {
        match *self {
            Crop::Full => out.push_str("crop:full"),
            Crop::Pixels(r) => {
                let _ = write!(out, "crop:px({},{},{},{})", r.x, r.y, r.width, r.height);
            }
            Crop::Percent { x, y, width, height } => {
                let _ = write!(out, "crop:pct({x},{y},{width},{height})");
            }
            Crop::SquareCenter => out.push_str("crop:square"),
        }
    }
}

/// Size selection, applied to the cropped region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scale {
    /// No scaling.
    Full,
    /// Uniform factor; 1.0 is the identity.
    Percent(f64),
    /// Fit to a width, preserving aspect.
    FitWidth(u32),
    /// Fit to a height, preserving aspect.
    FitHeight(u32),
    /// Fit inside a box, preserving aspect.
    FitInside {
        /// Box width.
        width: u32,
        /// Box height.
        height: u32,
    },
    /// Exact output size, aspect ratio not preserved.
    Fill {
        /// Output width.
        width: u32,
        /// Output height.
        height: u32,
    },
}

impl Scale {
    /// Output dimensions for a `width`x`height` source region.
    pub fn target(&self, width: u32, height: u32) -> (u32, u32) {
        let clamp = |v: f64| (v.round() as u32).max(1);
        match *self {
            Scale::Full => (width, height),
            Scale::Percent(p) => (clamp(width as f64 * p), clamp(height as f64 * p)),
            Scale::FitWidth(w) => {
                let f = w as f64 / width as f64;
                (w.max(1), clamp(height as f64 * f))
            }
            Scale::FitHeight(h) => {
                let f = h as f64 / height as f64;
                (clamp(width as f64 * f), h.max(1))
            }
            Scale::FitInside { width: bw, height: bh } => {
                let f = (bw as f64 / width as f64).min(bh as f64 / height as f64);
                (clamp(width as f64 * f), clamp(height as f64 * f))
            }
            Scale::Fill { width: w, height: h } => (w.max(1), h.max(1)),
        }
    }

    /// The larger of the two axis factors; level selection keys off it so
    /// the chosen level is never too small in either axis.
    pub fn factor(&self, width: u32, height: u32) -> f64 {
        let (tw, th) = self.target(width, height);
        (tw as f64 / width as f64).max(th as f64 / height as f64)
    }

    /// Returns `true` for a uniform factor of exactly 1.0.
    pub fn is_full(&self) -> bool {
        matches!(self, Scale::Full) || matches!(self, Scale::Percent(p) if *p == 1.0)
    }

    fn validate(&self) -> Result<()> {
        match *self {
            Scale::Percent(p) if !(p > 0.0 && p.is_finite()) => {
                Err(Error::invalid_request("scale percent must be positive and finite"))
            }
            Scale::FitWidth(0) | Scale::FitHeight(0) => {
                Err(Error::invalid_request("scale target must be positive"))
            }
            Scale::FitInside { width: 0, .. }
            | Scale::FitInside { height: 0, .. }
            | Scale::Fill { width: 0, .. }
            | Scale::Fill { height: 0, .. } => {
                Err(Error::invalid_request("scale target must be positive"))
            }
            _ => Ok(()),
        }
    }

    fn canonical(&self, out: &mut String) {
        match *self {
            Scale::Full => out.push_str("scale:full"),
            Scale::Percent(p) => {
                let _ = write!(out, "scale:pct({p})");
            }
            Scale::FitWidth(w) => {
                let _ = write!(out, "scale:fitw({w})");
            }
            Scale::FitHeight(h) => {
                let _ = write!(out, "scale:fith({h})");
            }
            Scale::FitInside { width, height } => {
                let _ = write!(out, "scale:fit({width},{height})");
            }
            Scale::Fill { width, height } => {
                let _ = write!(out, "scale:fill({width},{height})");
            }
        }
    }
}

/// Mirror axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Mirror left-right.
    Horizontal,
    /// Mirror top-bottom.
    Vertical,
}

/// Color reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorTransform {
    /// No change.
    Identity,
    /// Grayscale via Rec. 709 luma.
    Gray,
    /// Black/white via a 50 % threshold on linear luminance.
    Bitonal,
}

/// Corner or edge an overlay is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayPosition {
    /// Top-left corner.
    TopLeft,
    /// Top edge, centered.
    TopCenter,
    /// Top-right corner.
    TopRight,
    /// Left edge, centered.
    LeftCenter,
    /// Image center.
    Center,
    /// Right edge, centered.
    RightCenter,
    /// Bottom-left corner.
    BottomLeft,
    /// Bottom edge, centered.
    BottomCenter,
    /// Bottom-right corner.
    BottomRight,
}

/// A positioned overlay image (watermark).
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    /// Filesystem path of the overlay image.
    pub source: String,
    /// Anchor position.
    pub position: OverlayPosition,
    /// Pixel inset from the anchored edges.
    pub inset: u32,
}

/// Terminal encode operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Encode {
    /// Target format. Must have a writer.
    pub format: Format,
    /// Quality 0-100 (JPEG only).
    pub quality: u8,
    /// TIFF compression.
    pub compression: Compression,
    /// Background for alpha-less targets.
    pub background: Option<[u8; 3]>,
}

impl Encode {
    /// An encode with default quality and compression.
    pub fn new(format: Format) -> Self {
        Self { format, quality: 80, compression: Compression::default(), background: None }
    }

    fn canonical(&self, out: &mut String) {
        let _ = write!(out, "encode:{}(q{},{:?}", self.format, self.quality, self.compression);
        match self.background {
            Some([r, g, b]) => {
                let _ = write!(out, ",bg#{r:02x}{g:02x}{b:02x})");
            }
            None => out.push(')'),
        }
    }
}

/// One pipeline operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Region selection.
    Crop(Crop),
    /// Size selection.
    Scale(Scale),
    /// Rotation in degrees, [0, 360).
    Rotate(f64),
    /// Mirror.
    Transpose(Axis),
    /// Color reduction.
    Color(ColorTransform),
    /// Unsharp-mask amount.
    Sharpen(f32),
    /// Watermark.
    Overlay(Overlay),
    /// Terminal encode.
    Encode(Encode),
}

impl Operation {
    /// Canonical ordering rank. Normalization sorts stably by this, which
    /// enforces crop-before-scale and transpose/rotate-before-color.
    fn rank(&self) -> u8 {
        match self {
            Operation::Crop(_) => 0,
            Operation::Scale(_) => 1,
            Operation::Transpose(_) => 2,
            Operation::Rotate(_) => 3,
            Operation::Color(_) => 4,
            Operation::Sharpen(_) => 5,
            Operation::Overlay(_) => 6,
            Operation::Encode(_) => 7,
        }
    }

    fn is_identity(&self) -> bool {
        match self {
            Operation::Crop(c) => c.is_identity(),
            Operation::Scale(s) => s.is_full(),
            Operation::Rotate(deg) => *deg == 0.0,
            Operation::Color(c) => matches!(c, ColorTransform::Identity),
            Operation::Sharpen(amount) => *amount <= 0.0,
            _ => false,
        }
    }

    fn canonical(&self, out: &mut String) {
        match self {
            Operation::Crop(c) => c.canonical(out),
            Operation::Scale(s) => s.canonical(out),
            Operation::Rotate(deg) => {
                let _ = write!(out, "rotate({deg})");
            }
            Operation::Transpose(Axis::Horizontal) => out.push_str("flip(h)"),
            Operation::Transpose(Axis::Vertical) => out.push_str("flip(v)"),
            Operation::Color(ColorTransform::Gray) => out.push_str("color(gray)"),
            Operation::Color(ColorTransform::Bitonal) => out.push_str("color(bitonal)"),
            Operation::Color(ColorTransform::Identity) => out.push_str("color(identity)"),
            Operation::Sharpen(amount) => {
                let _ = write!(out, "sharpen({amount})");
            }
            Operation::Overlay(o) => {
                let _ = write!(out, "overlay({},{:?},{})", o.source, o.position, o.inset);
            }
            Operation::Encode(e) => e.canonical(out),
        }
    }
}

/// Normalized, validated operation sequence.
///
/// Construction is the only way to obtain one, so every instance upholds
/// the invariants: canonical order, no identity operations, at most one
/// crop, at most one scale, exactly one terminal encode.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationList {
    ops: Vec<Operation>,
}

impl OperationList {
    /// Normalizes and validates a raw operation sequence.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for structural violations and bad values;
    /// [`Error::UnsupportedOutputFormat`] when the encode target has no
    /// writer.
    pub fn new(raw: Vec<Operation>) -> Result<Self> {
        let mut crops = 0usize;
        let mut scales = 0usize;
        let mut encodes = 0usize;

        for op in &raw {
            match op {
                Operation::Crop(c) => {
                    crops += 1;
                    c.validate()?;
                }
                Operation::Scale(s) => {
                    scales += 1;
                    s.validate()?;
                }
                Operation::Rotate(deg) => {
                    if !deg.is_finite() || *deg < 0.0 || *deg >= 360.0 {
                        return Err(Error::invalid_request(
                            "rotation must lie in [0, 360) degrees",
                        ));
                    }
                }
                Operation::Sharpen(amount) => {
                    if !amount.is_finite() || *amount < 0.0 {
                        return Err(Error::invalid_request("sharpen amount must be non-negative"));
                    }
                }
                Operation::Encode(e) => {
                    encodes += 1;
                    if e.quality > 100 {
                        return Err(Error::invalid_request("quality must be in 0..=100"));
                    }
                    if !e.format.is_writable() {
                        return Err(Error::UnsupportedOutputFormat(e.format.to_string()));
                    }
                }
                _ => {}
            }
        }

        if crops > 1 {
            return Err(Error::invalid_request("at most one crop is allowed"));
        }
        if scales > 1 {
            return Err(Error::invalid_request("at most one scale is allowed"));
        }
        if encodes != 1 {
            return Err(Error::invalid_request("exactly one encode is required"));
        }
        if !matches!(raw.last(), Some(Operation::Encode(_))) {
            return Err(Error::invalid_request("encode must be the terminal operation"));
        }

        let mut ops: Vec<Operation> = raw.into_iter().filter(|op| !op.is_identity()).collect();
        ops.sort_by_key(Operation::rank);
        Ok(Self { ops })
    }

    /// The operations in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.ops.iter()
    }

    /// The crop, if one survives normalization.
    pub fn crop(&self) -> Option<&Crop> {
        self.ops.iter().find_map(|op| match op {
            Operation::Crop(c) => Some(c),
            _ => None,
        })
    }

    /// The scale, if one survives normalization.
    pub fn scale(&self) -> Option<&Scale> {
        self.ops.iter().find_map(|op| match op {
            Operation::Scale(s) => Some(s),
            _ => None,
        })
    }

    /// The terminal encode.
    pub fn encode(&self) -> &Encode {
        self.ops
            .iter()
            .find_map(|op| match op {
                Operation::Encode(e) => Some(e),
                _ => None,
            })
            .expect("construction guarantees an encode")
    }

    /// Stable canonical rendering, the fingerprint input.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        for (i, op) in self.ops.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            op.canonical(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_png() -> Operation {
        Operation::Encode(Encode::new(Format::Png))
    }

    #[test]
    fn normalization_orders_and_elides() {
        let a = OperationList::new(vec![
            Operation::Scale(Scale::FitWidth(256)),
            Operation::Crop(Crop::Pixels(Rect::new(0, 0, 512, 512))),
            Operation::Rotate(0.0),
            encode_png(),
        ])
        .expect("normalize");

        let b = OperationList::new(vec![
            Operation::Crop(Crop::Pixels(Rect::new(0, 0, 512, 512))),
            Operation::Scale(Scale::FitWidth(256)),
            encode_png(),
        ])
        .expect("normalize");

        // Same derivative, same canonical form.
        assert_eq!(a, b);
        assert_eq!(a.canonical(), b.canonical());
        assert!(a.canonical().starts_with("crop:px"));
    }

    #[test]
    fn structural_violations() {
        // No encode
        assert!(OperationList::new(vec![Operation::Crop(Crop::Full)]).is_err());
        // Two crops
        assert!(
            OperationList::new(vec![
                Operation::Crop(Crop::Full),
                Operation::Crop(Crop::SquareCenter),
                encode_png(),
            ])
            .is_err()
        );
        // Encode not terminal
        assert!(
            OperationList::new(vec![encode_png(), Operation::Crop(Crop::SquareCenter)]).is_err()
        );
    }

    #[test]
    fn value_validation() {
        assert!(
            OperationList::new(vec![Operation::Rotate(360.0), encode_png()]).is_err()
        );
        assert!(
            OperationList::new(vec![Operation::Scale(Scale::Percent(0.0)), encode_png()]).is_err()
        );
        assert!(
            OperationList::new(vec![
                Operation::Crop(Crop::Percent { x: 0.0, y: 0.0, width: 1.5, height: 1.0 }),
                encode_png(),
            ])
            .is_err()
        );

        let err = OperationList::new(vec![Operation::Encode(Encode::new(Format::Bmp))])
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOutputFormat(_)));
    }

    #[test]
    fn crop_resolution() {
        assert_eq!(Crop::Full.resolve(100, 80), Rect::full(100, 80));
        assert_eq!(Crop::SquareCenter.resolve(100, 80), Rect::new(10, 0, 80, 80));
        assert_eq!(
            Crop::Percent { x: 0.25, y: 0.25, width: 0.5, height: 0.5 }.resolve(200, 100),
            Rect::new(50, 25, 100, 50)
        );
        // Pixel rects clip to the extent.
        assert_eq!(
            Crop::Pixels(Rect::new(90, 0, 50, 50)).resolve(100, 100),
            Rect::new(90, 0, 10, 50)
        );
    }

    #[test]
    fn scale_targets() {
        assert_eq!(Scale::FitWidth(256).target(512, 512), (256, 256));
        assert_eq!(Scale::FitHeight(100).target(400, 200), (200, 100));
        assert_eq!(Scale::FitInside { width: 100, height: 100 }.target(400, 200), (100, 50));
        assert_eq!(Scale::Fill { width: 30, height: 70 }.target(400, 200), (30, 70));
        assert_eq!(Scale::Percent(0.25).target(8000, 8000), (2000, 2000));
    }

    #[test]
    fn scale_factor_uses_larger_axis() {
        // Fill distorts; the level must satisfy the less-reduced axis.
        let f = Scale::Fill { width: 200, height: 25 }.factor(400, 400);
        assert!((f - 0.5).abs() < 1e-9);
    }

    #[test]
    fn accessors() {
        let ops = OperationList::new(vec![
            Operation::Crop(Crop::SquareCenter),
            Operation::Scale(Scale::Percent(0.5)),
            Operation::Encode(Encode { quality: 92, ..Encode::new(Format::Jpeg) }),
        ])
        .expect("normalize");

        assert!(matches!(ops.crop(), Some(Crop::SquareCenter)));
        assert!(matches!(ops.scale(), Some(Scale::Percent(p)) if *p == 0.5));
        assert_eq!(ops.encode().quality, 92);
    }
}
