//! Decoded source description.
//!
//! [`ImageInfo`] is the "header" a reader extracts without decoding pixels:
//! full dimensions, the resolution pyramid, tile layout, sample geometry.
//! It is cheap to clone and is memoized per identifier by the info cache.

use crate::Format;

/// One resolution level of a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelInfo {
    /// Level width in pixels.
    pub width: u32,
    /// Level height in pixels.
    pub height: u32,
    /// Tile width, or 0 when the level is striped/monolithic.
    pub tile_width: u32,
    /// Tile height, or 0 when the level is striped/monolithic.
    pub tile_height: u32,
}

impl LevelInfo {
    /// A level without independent tiles.
    pub fn untiled(width: u32, height: u32) -> Self {
        Self { width, height, tile_width: 0, tile_height: 0 }
    }

    /// Returns `true` if the level is internally tiled.
    #[inline]
    pub fn is_tiled(&self) -> bool {
        self.tile_width > 0 && self.tile_height > 0
    }
}

/// Description of a source image, independent of any request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// The identifier this description belongs to.
    pub identifier: String,
    /// Detected source format.
    pub format: Format,
    /// Full-resolution width.
    pub width: u32,
    /// Full-resolution height.
    pub height: u32,
    /// Resolution levels, largest first. Always at least one entry.
    pub levels: Vec<LevelInfo>,
    /// Bits per sample in the source (8 or 16).
    pub bit_depth: u8,
    /// Samples per pixel.
    pub channels: u8,
    /// Whether the source embeds an ICC color profile.
    pub has_profile: bool,
}

impl ImageInfo {
    /// Creates a single-level description (non-pyramidal sources).
    pub fn single_level(
        identifier: impl Into<String>,
        format: Format,
        width: u32,
        height: u32,
        bit_depth: u8,
        channels: u8,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            format,
            width,
            height,
            levels: vec![LevelInfo::untiled(width, height)],
            bit_depth,
            channels,
            has_profile: false,
        }
    }

    /// Number of resolution levels.
    #[inline]
    pub fn num_resolutions(&self) -> u32 {
        self.levels.len() as u32
    }

    /// The level at the given index, clamped to the deepest available.
    pub fn level(&self, index: u32) -> &LevelInfo {
        let last = self.levels.len() - 1;
        &self.levels[(index as usize).min(last)]
    }

    /// The scale of a level relative to the full resolution.
    pub fn level_scale(&self, index: u32) -> f64 {
        self.level(index).width as f64 / self.width as f64
    }
}
