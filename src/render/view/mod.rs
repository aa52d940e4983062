/// A view in 3D space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct View {
    /// The horizontal field of view in radians.
    pub field_of_view_x: f64,
    /// The vertical field of view in radians.
    pub field_of_view_y: f64,
    /// Image height.
    pub image_height: u32,
    /// Image width.
    pub image_width: u32,
    /// View ID.
    pub view_id: u32,
    /// Position in world space.
    pub view_position: [f64; 3],
    /// Affine transformation from world space to view space.
    ///
    /// It is in **column-major order**, i.e., `M[col][row]`.
    ///
    /// # Format
    ///
    /// ```plaintext
    /// [R_v   | T_v]
    /// [...   | ...]
    /// [0 0 0 | 1  ]
    /// ```
    pub view_transform: [[f64; 4]; 4],
}

/// Linear transformations.
impl View {
    /// Returns the affine transformation matrix.
    ///
    /// It is in **column-major order**, i.e., `M[col][row]`.
    #[inline]
    pub const fn transform(
        rotation: &[[f64; 3]; 3],
        translation: &[f64; 3],
    ) -> [[f64; 4]; 4] {
        let r = rotation;
        let t = [translation];
        [
            [r[0][0], r[0][1], r[0][2], 0.0],
            [r[1][0], r[1][1], r[1][2], 0.0],
            [r[2][0], r[2][1], r[2][2], 0.0],
            [t[0][0], t[0][1], t[0][2], 1.0],
        ]
    }

    /// Returns the perspective projection from view space to clip space.
    ///
    /// It is in **column-major order**, i.e., `M[col][row]`.
    /// The depth is mapped into `[0, 1]` between `z_near` and `z_far`.
    pub fn projection_transform(
        &self,
        z_near: f64,
        z_far: f64,
    ) -> [[f64; 4]; 4] {
        let depth_scale = z_far / (z_far - z_near);
        [
            [1.0 / self.field_of_view_x_half_tan(), 0.0, 0.0, 0.0],
            [0.0, 1.0 / self.field_of_view_y_half_tan(), 0.0, 0.0],
            [0.0, 0.0, depth_scale, 1.0],
            [0.0, 0.0, -z_near * depth_scale, 0.0],
        ]
    }

    /// Returns the transformation from world space to clip space.
    ///
    /// It is in **column-major order**, i.e., `M[col][row]`.
    pub fn view_projection_transform(
        &self,
        z_near: f64,
        z_far: f64,
    ) -> [[f64; 4]; 4] {
        let p = self.projection_transform(z_near, z_far);
        let v = &self.view_transform;
        // (P * V)[col][row] = sum_k P[k][row] * V[col][k]
        [0, 1, 2, 3].map(|col| {
            [0, 1, 2, 3].map(|row| (0..4).map(|k| p[k][row] * v[col][k]).sum())
        })
    }

    /// Transforming `position` from world space to view space.
    #[inline]
    pub fn to_view_space(
        &self,
        position: &[f64; 3],
    ) -> [f64; 3] {
        let m = &self.view_transform;
        [0, 1, 2].map(|row| {
            m[0][row] * position[0]
                + m[1][row] * position[1]
                + m[2][row] * position[2]
                + m[3][row]
        })
    }

    /// `tan(Fov_x / 2)`
    #[inline]
    pub fn field_of_view_x_half_tan(&self) -> f64 {
        (self.field_of_view_x / 2.0).tan()
    }

    /// `tan(Fov_y / 2)`
    #[inline]
    pub fn field_of_view_y_half_tan(&self) -> f64 {
        (self.field_of_view_y / 2.0).tan()
    }

    /// Whether all the numbers are finite.
    pub fn is_finite(&self) -> bool {
        self.field_of_view_x.is_finite()
            && self.field_of_view_y.is_finite()
            && self.view_position.iter().all(|c| c.is_finite())
            && self.view_transform.iter().flatten().all(|c| c.is_finite())
    }
}

/// Pixel space operations
impl View {
    /// Mapping a coordinate in NDC to the pixel space of `size` pixels.
    #[inline]
    pub fn ndc_to_pixel(
        ndc: f64,
        size: u32,
    ) -> f64 {
        ((ndc + 1.0) * size as f64 - 1.0) / 2.0
    }

    /// Mapping a coordinate in the pixel space of `size` pixels to NDC.
    #[inline]
    pub fn pixel_to_ndc(
        pixel: f64,
        size: u32,
    ) -> f64 {
        (pixel * 2.0 + 1.0) / size as f64 - 1.0
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn transform() {
        use super::*;

        let target = [
            [
                0.9870946659543874,
                0.011754269038001336,
                0.1597058471183149,
                0.0000000000000000,
            ],
            [
                -0.000481623211642526,
                0.9975159094549839,
                -0.07043989227191047,
                0.0000000000000000,
            ],
            [
                -0.1601370927782764,
                0.0694539238889973,
                0.9846482945564589,
                0.0000000000000000,
            ],
            [
                0.129242027423,
                0.0000000000000000,
                -0.3424233862,
                1.0000000000000000,
            ],
        ];
        let output = View::transform(
            &[
                [0.9870946659543874, 0.011754269038001336, 0.1597058471183149],
                [
                    -0.000481623211642526,
                    0.9975159094549839,
                    -0.07043989227191047,
                ],
                [-0.1601370927782764, 0.0694539238889973, 0.9846482945564589],
            ],
            &[0.129242027423, 0.0, -0.3424233862],
        );
        assert_eq!(output, target);
    }

    #[test]
    fn view_projection_of_identity_view() {
        use super::*;

        let view = View {
            field_of_view_x: std::f64::consts::FRAC_PI_2,
            field_of_view_y: std::f64::consts::FRAC_PI_2,
            view_transform: View::transform(
                &[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
                &[0.0, 0.0, 0.0],
            ),
            ..Default::default()
        };
        let m = view.view_projection_transform(0.1, 100.0);

        // A point on the near plane maps to depth 0, on the far plane to depth 1.
        let project = |p: [f64; 3]| {
            let clip = [0, 1, 2, 3].map(|row| {
                m[0][row] * p[0] + m[1][row] * p[1] + m[2][row] * p[2] + m[3][row]
            });
            [clip[0] / clip[3], clip[1] / clip[3], clip[2] / clip[3]]
        };
        let near = project([0.1, -0.1, 0.1]);
        let far = project([0.0, 0.0, 100.0]);
        assert!((near[0] - 1.0).abs() < 1e-9, "near: {near:?}");
        assert!((near[1] + 1.0).abs() < 1e-9, "near: {near:?}");
        assert!(near[2].abs() < 1e-9, "near: {near:?}");
        assert!((far[2] - 1.0).abs() < 1e-9, "far: {far:?}");
    }

    #[test]
    fn to_view_space_and_pixels() {
        use super::*;

        let view = View {
            view_transform: View::transform(
                &[[0.0, 1.0, 0.0], [-1.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
                &[0.0, 0.0, 2.0],
            ),
            ..Default::default()
        };
        // The first column is the image of the x axis.
        assert_eq!(view.to_view_space(&[1.0, 0.0, 0.0]), [0.0, 1.0, 2.0]);
        assert_eq!(view.to_view_space(&[0.0, 1.0, 0.0]), [-1.0, 0.0, 2.0]);
        assert!(view.is_finite());

        assert_eq!(View::ndc_to_pixel(-1.0, 16), -0.5);
        assert_eq!(View::ndc_to_pixel(1.0, 16), 15.5);
        assert_eq!(View::pixel_to_ndc(View::ndc_to_pixel(0.25, 16), 16), 0.25);

        let view = View {
            view_position: [f64::NAN, 0.0, 0.0],
            ..Default::default()
        };
        assert!(!view.is_finite());
    }
}
