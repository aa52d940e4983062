//! Host linear algebra on small row-major matrices.

/// `[3, 3]` in **row-major order**, i.e., `M[row][col]`.
pub type Matrix3 = [[f32; 3]; 3];

pub trait Matrix3Extension {
    fn matmul(
        &self,
        rhs: &Self,
    ) -> Self;

    fn matvec(
        &self,
        rhs: &[f32; 3],
    ) -> [f32; 3];

    fn transpose(&self) -> Self;
}

impl Matrix3Extension for Matrix3 {
    #[inline]
    fn matmul(
        &self,
        rhs: &Self,
    ) -> Self {
        [0, 1, 2].map(|row| {
            [0, 1, 2].map(|col| (0..3).map(|k| self[row][k] * rhs[k][col]).sum())
        })
    }

    #[inline]
    fn matvec(
        &self,
        rhs: &[f32; 3],
    ) -> [f32; 3] {
        [0, 1, 2].map(|row| (0..3).map(|k| self[row][k] * rhs[k]).sum())
    }

    #[inline]
    fn transpose(&self) -> Self {
        [0, 1, 2].map(|row| [0, 1, 2].map(|col| self[col][row]))
    }
}

/// The rotation matrix of a unit quaternion `(w, x, y, z)`.
pub fn rotation_matrix(quaternion: &[f32; 4]) -> Matrix3 {
    let [w, x, y, z] = *quaternion;
    [
        [
            1.0 - 2.0 * (y * y + z * z),
            2.0 * (x * y - w * z),
            2.0 * (x * z + w * y),
        ],
        [
            2.0 * (x * y + w * z),
            1.0 - 2.0 * (x * x + z * z),
            2.0 * (y * z - w * x),
        ],
        [
            2.0 * (x * z - w * y),
            2.0 * (y * z + w * x),
            1.0 - 2.0 * (x * x + y * y),
        ],
    ]
}

/// The symmetric 3D covariance `R * S * S^T * R^T` as `[xx, xy, xz, yy, yz, zz]`.
pub fn covariance_3d(
    quaternion: &[f32; 4],
    scaling: &[f32; 3],
) -> [f32; 6] {
    let r = rotation_matrix(quaternion);
    // M = R * S
    let m = [0, 1, 2].map(|row| [0, 1, 2].map(|col| r[row][col] * scaling[col]));
    let sigma = m.matmul(&m.transpose());
    [
        sigma[0][0],
        sigma[0][1],
        sigma[0][2],
        sigma[1][1],
        sigma[1][2],
        sigma[2][2],
    ]
}

/// Normalizing `vector`, or returning it unchanged if its norm is zero.
#[inline]
pub fn normalize(vector: [f32; 3]) -> [f32; 3] {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.map(|v| v / norm)
    } else {
        vector
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn rotation_matrix_about_z() {
        use super::*;

        let half = std::f32::consts::FRAC_PI_4;
        let r = rotation_matrix(&[half.cos(), 0.0, 0.0, half.sin()]);

        let output = r.matvec(&[1.0, 0.0, 0.0]);
        let target = [0.0, 1.0, 0.0];
        for (output, target) in output.into_iter().zip(target) {
            assert!((output - target).abs() < 1e-6, "output: {output}");
        }

        let identity = r.matmul(&r.transpose());
        for row in 0..3 {
            for col in 0..3 {
                let target = if row == col { 1.0 } else { 0.0 };
                assert!((identity[row][col] - target).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn covariance_3d_of_axis_aligned() {
        use super::*;

        let output = covariance_3d(&[1.0, 0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]);
        let target = [1.0, 0.0, 0.0, 4.0, 0.0, 9.0];
        assert_eq!(output, target);
    }

    #[test]
    fn normalize_vectors() {
        use super::*;

        assert_eq!(normalize([3.0, 0.0, 4.0]), [0.6, 0.0, 0.8]);
        assert_eq!(normalize([0.0; 3]), [0.0; 3]);
    }
}
