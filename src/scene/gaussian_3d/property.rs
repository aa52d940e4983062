//! 3DGS scene property implementation.
//!
//! The stored (inner) values are what the file holds.
//! The outer values are what the rasterizer consumes.

pub use super::*;

use crate::spherical_harmonics::sh_count;

/// Outer property value makers
impl Gaussian3dScene {
    /// Making values for [`Gaussian3dScene::colors_sh`]
    ///
    /// - `colors_sh_dc` is `[3]`.
    /// - `colors_sh_rest` is `[3, S - 1]` in channel-major order,
    ///   where `S` is `(colors_sh_degree + 1) ^ 2`.
    ///
    /// The output is `[M, 3]` flattened, zero above the degree.
    pub fn make_colors_sh(
        colors_sh_dc: &[f32],
        colors_sh_rest: &[f32],
        colors_sh_degree: u32,
    ) -> [f32; SH_COUNT_MAX * 3] {
        // S - 1
        let rest_count = sh_count(colors_sh_degree) - 1;
        debug_assert_eq!(colors_sh_dc.len(), 3);
        debug_assert_eq!(colors_sh_rest.len(), rest_count * 3);

        let mut colors_sh = [0.0; SH_COUNT_MAX * 3];
        colors_sh[0..3].copy_from_slice(colors_sh_dc);
        for j in 1..=rest_count {
            for c in 0..3 {
                colors_sh[j * 3 + c] = colors_sh_rest[c * rest_count + j - 1];
            }
        }
        colors_sh
    }

    /// Making values for [`Gaussian3dScene::opacities`]
    ///
    /// The output is in the open interval `(0, 1)`.
    #[inline]
    pub fn make_opacity(opacity: f32) -> f32 {
        // NOTE: The upper bound is the largest value below 1.
        (1.0 / (1.0 + (-opacity).exp()))
            .clamp(f32::MIN_POSITIVE, 1.0 - f32::EPSILON / 2.0)
    }

    /// Making values for [`Gaussian3dScene::rotations`]
    ///
    /// The quaternion is normalized.
    /// A zero quaternion yields NaN.
    #[inline]
    pub fn make_rotation(rotation: [f32; 4]) -> [f32; 4] {
        let norm = rotation.iter().map(|r| r * r).sum::<f32>().sqrt();
        rotation.map(|r| r / norm)
    }

    /// Making values for [`Gaussian3dScene::scalings`]
    ///
    /// The output is positive and finite.
    #[inline]
    pub fn make_scaling(scaling: [f32; 3]) -> [f32; 3] {
        scaling.map(|s| s.exp().clamp(f32::MIN_POSITIVE, f32::MAX))
    }
}

/// Inner property value makers
impl Gaussian3dScene {
    /// Making stored values from [`Gaussian3dScene::colors_sh`]
    ///
    /// The output is `([3], [3, M - 1])`, which is the inverse of
    /// [`Gaussian3dScene::make_colors_sh`] at [`SH_DEGREE_MAX`].
    pub fn make_inner_colors_sh(
        colors_sh: &[f32; SH_COUNT_MAX * 3]
    ) -> ([f32; 3], [f32; (SH_COUNT_MAX - 1) * 3]) {
        // M - 1
        let rest_count = SH_COUNT_MAX - 1;

        let mut colors_sh_dc = [0.0; 3];
        let mut colors_sh_rest = [0.0; (SH_COUNT_MAX - 1) * 3];
        colors_sh_dc.copy_from_slice(&colors_sh[0..3]);
        for j in 1..=rest_count {
            for c in 0..3 {
                colors_sh_rest[c * rest_count + j - 1] = colors_sh[j * 3 + c];
            }
        }
        (colors_sh_dc, colors_sh_rest)
    }

    /// Making stored values from [`Gaussian3dScene::opacities`]
    #[inline]
    pub fn make_inner_opacity(opacity: f32) -> f32 {
        (opacity / (1.0 - opacity)).ln()
    }

    /// Making stored values from [`Gaussian3dScene::rotations`]
    #[inline]
    pub fn make_inner_rotation(rotation: [f32; 4]) -> [f32; 4] {
        rotation
    }

    /// Making stored values from [`Gaussian3dScene::scalings`]
    #[inline]
    pub fn make_inner_scaling(scaling: [f32; 3]) -> [f32; 3] {
        scaling.map(f32::ln)
    }
}
