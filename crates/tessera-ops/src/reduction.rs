//! Reduction-factor calculus.
//!
//! A reduction factor `r` names a resolution 2^-r of full size. Level
//! selection picks the deepest stored level that is still at least as
//! large as the requested scale, so the residual resample in the pipeline
//! is always a downscale (or the identity). When the pyramid is shallower
//! than the request, the remainder becomes a software subsample applied by
//! the reader.

use tessera_core::ImageInfo;

/// Tolerance absorbing float error at level boundaries.
const EPSILON: f64 = 1e-9;

/// Outcome of level selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChoice {
    /// Index into the pyramid (0 = full resolution).
    pub level: u32,
    /// Reduction factor of the chosen level itself.
    pub level_reduction: u32,
    /// Additional power-of-two subsample the reader must apply.
    pub extra_subsample: u32,
}

impl LevelChoice {
    /// Total reduction factor including the software subsample.
    pub fn total_reduction(&self) -> u32 {
        self.level_reduction + self.extra_subsample.ilog2()
    }
}

/// The largest `r` whose scale 2^-r still covers the target scale.
///
/// Boundary equality counts as covering: a target of exactly 0.25 maps to
/// r = 2, not r = 3 (ties prefer the larger level).
pub fn factor_for_scale(scale: f64) -> u32 {
    if scale >= 1.0 {
        return 0;
    }
    let mut r = 0u32;
    while 0.5f64.powi(r as i32 + 1) + EPSILON >= scale && r < 31 {
        r += 1;
    }
    r
}

/// Picks the resolution level for a target scale.
///
/// A scale of 1.0 (or more) forces level 0 unconditionally; boundary
/// equality at smaller levels keeps the level with exactly the requested
/// width.
pub fn select_level(info: &ImageInfo, target_scale: f64) -> LevelChoice {
    if target_scale >= 1.0 {
        return LevelChoice { level: 0, level_reduction: 0, extra_subsample: 1 };
    }

    let wanted = factor_for_scale(target_scale);

    // Deepest stored level still covering the target, by actual widths.
    let mut level = 0u32;
    for (index, _) in info.levels.iter().enumerate().skip(1) {
        if info.level_scale(index as u32) + EPSILON >= target_scale {
            level = index as u32;
        } else {
            break;
        }
    }

    let level_reduction = reduction_of(info, level);
    let extra = wanted.saturating_sub(level_reduction);
    LevelChoice { level, level_reduction, extra_subsample: 1 << extra }
}

/// Reduction factor a stored level corresponds to, from its actual width.
fn reduction_of(info: &ImageInfo, level: u32) -> u32 {
    let scale = info.level_scale(level);
    if scale >= 1.0 {
        0
    } else {
        (1.0 / scale).log2().round() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{Format, LevelInfo};

    fn pyramid(widths: &[u32]) -> ImageInfo {
        let full = widths[0];
        let mut info = ImageInfo::single_level("p", Format::Tiff, full, full, 8, 3);
        info.levels = widths.iter().map(|&w| LevelInfo::untiled(w, w)).collect();
        info
    }

    #[test]
    fn factor_boundaries() {
        assert_eq!(factor_for_scale(1.0), 0);
        assert_eq!(factor_for_scale(2.0), 0);
        assert_eq!(factor_for_scale(0.75), 0);
        // Equality keeps the larger level.
        assert_eq!(factor_for_scale(0.5), 1);
        assert_eq!(factor_for_scale(0.25), 2);
        assert_eq!(factor_for_scale(0.2), 2);
        assert_eq!(factor_for_scale(0.125), 3);
    }

    #[test]
    fn deep_zoom_pyramid() {
        // The 10000-wide pyramid from a deep-zoom request: crop 512 wide,
        // fit to 256 -> scale 0.5 -> level 1 at 5000, residual 1.0.
        let info = pyramid(&[10000, 5000, 2500, 1250]);
        let choice = select_level(&info, 0.5);
        assert_eq!(choice.level, 1);
        assert_eq!(choice.level_reduction, 1);
        assert_eq!(choice.extra_subsample, 1);
        assert_eq!(choice.total_reduction(), 1);
    }

    #[test]
    fn full_scale_forces_level_zero() {
        let info = pyramid(&[1000, 1000, 500]);
        // A pyramid whose second level matches the full size must not
        // steal a percent-1.0 request from level 0.
        let choice = select_level(&info, 1.0);
        assert_eq!(choice.level, 0);
        assert_eq!(choice.extra_subsample, 1);
    }

    #[test]
    fn shallow_pyramid_subsamples_in_software() {
        // One level only; a 25% request becomes r=2 as a pure subsample.
        let info = pyramid(&[8000]);
        let choice = select_level(&info, 0.25);
        assert_eq!(choice.level, 0);
        assert_eq!(choice.level_reduction, 0);
        assert_eq!(choice.extra_subsample, 4);
        assert_eq!(choice.total_reduction(), 2);
    }

    #[test]
    fn request_deeper_than_pyramid() {
        let info = pyramid(&[4000, 2000]);
        // 1/16 scale: level 1 covers r=1, the reader decimates by 8 more.
        let choice = select_level(&info, 0.0625);
        assert_eq!(choice.level, 1);
        assert_eq!(choice.level_reduction, 1);
        assert_eq!(choice.extra_subsample, 8);
        assert_eq!(choice.total_reduction(), 4);
    }

    #[test]
    fn soundness_invariant() {
        // The chosen level is never more than twice as large as needed,
        // and never smaller than the target.
        let info = pyramid(&[10000, 5000, 2500, 1250, 625]);
        for scale in [0.9, 0.6, 0.5, 0.3, 0.25, 0.13, 0.11, 0.07] {
            let choice = select_level(&info, scale);
            let level_scale = info.level_scale(choice.level);
            assert!(level_scale + EPSILON >= scale, "level too small at {scale}");
            let effective = level_scale / choice.extra_subsample as f64;
            assert!(effective > scale * 0.5 - EPSILON, "over-reduced at {scale}");
        }
    }
}
