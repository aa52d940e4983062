use std::{f64::consts::PI, sync::LazyLock};

/// The count of spherical harmonics coefficients
pub const SH_COUNT_MAX: usize = (SH_DEGREE_MAX as usize + 1).pow(2);

/// The maximum degree of spherical harmonics
pub const SH_DEGREE_MAX: u32 = 3;

/// The real coefficients of orthonormalized spherical harmonics from degree 0 to 3
///
/// ## Examples
///
/// ```rust
/// use gausplat_viewer::spherical_harmonics::SH_COEF;
///
/// assert_eq!(SH_COEF.0[0], 0.28209479177387814);
/// assert_eq!(SH_COEF.3[3 + 2], 1.445305721320277);
/// ```
#[allow(clippy::type_complexity)]
pub static SH_COEF: LazyLock<([f64; 1], [f64; 3], [f64; 5], [f64; 7])> =
    LazyLock::new(|| {
        (
            [(1.0 / 4.0 / PI).sqrt()],
            [
                -(3.0 / 4.0 / PI).sqrt(),
                (3.0 / 4.0 / PI).sqrt(),
                -(3.0 / 4.0 / PI).sqrt(),
            ],
            [
                (15.0 / 4.0 / PI).sqrt(),
                -(15.0 / 4.0 / PI).sqrt(),
                (5.0 / 16.0 / PI).sqrt(),
                -(15.0 / 4.0 / PI).sqrt(),
                (15.0 / 16.0 / PI).sqrt(),
            ],
            [
                -(35.0 / 32.0 / PI).sqrt(),
                (105.0 / 4.0 / PI).sqrt(),
                -(21.0 / 32.0 / PI).sqrt(),
                (7.0 / 16.0 / PI).sqrt(),
                -(21.0 / 32.0 / PI).sqrt(),
                (105.0 / 16.0 / PI).sqrt(),
                -(35.0 / 32.0 / PI).sqrt(),
            ],
        )
    });

/// The count of coefficients up to (and including) `degree`, i.e., `(D + 1)^2`.
#[inline]
pub const fn sh_count(degree: u32) -> usize {
    (degree as usize + 1).pow(2)
}

/// Evaluating the view-dependent RGB color of one point.
///
/// - `colors_sh` is `[M * 3]` in interleaved RGB layout.
/// - `direction` should be normalized, pointing from the viewer to the point.
///
/// The result is offset by `0.5` and clamped to be non-negative.
pub fn evaluate(
    colors_sh: &[f32],
    degree: u32,
    direction: [f32; 3],
) -> [f32; 3] {
    debug_assert!(colors_sh.len() >= sh_count(degree.min(SH_DEGREE_MAX)) * 3);

    let coef = &*SH_COEF;
    let c = |j: usize| &colors_sh[j * 3..j * 3 + 3];
    let [x, y, z] = direction.map(f64::from);

    // [M]
    let mut bases = vec![coef.0[0]];
    if degree > 0 {
        bases.extend([coef.1[0] * y, coef.1[1] * z, coef.1[2] * x]);
    }
    if degree > 1 {
        let (xx, yy, zz) = (x * x, y * y, z * z);
        bases.extend([
            coef.2[0] * x * y,
            coef.2[1] * y * z,
            coef.2[2] * (2.0 * zz - xx - yy),
            coef.2[3] * x * z,
            coef.2[4] * (xx - yy),
        ]);
        if degree > 2 {
            bases.extend([
                coef.3[0] * y * (3.0 * xx - yy),
                coef.3[1] * x * y * z,
                coef.3[2] * y * (4.0 * zz - xx - yy),
                coef.3[3] * z * (2.0 * zz - 3.0 * xx - 3.0 * yy),
                coef.3[4] * x * (4.0 * zz - xx - yy),
                coef.3[5] * z * (xx - yy),
                coef.3[6] * x * (xx - 3.0 * yy),
            ]);
        }
    }

    let mut color_rgb = [0.5_f64; 3];
    for (j, basis) in bases.into_iter().enumerate() {
        for (channel, value) in color_rgb.iter_mut().zip(c(j)) {
            *channel += basis * *value as f64;
        }
    }

    color_rgb.map(|channel| channel.max(0.0) as f32)
}
