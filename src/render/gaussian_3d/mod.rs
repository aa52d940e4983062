pub mod buffer;
pub mod host;

pub use super::View;
pub use crate::{
    error::Error,
    scene::gaussian_3d::{Aabb, Gaussian3dScene},
};
pub use buffer::{Gaussian3dDeviceBuffers, ScratchBuffer, ScratchBuffers};
pub use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
pub use host::HostRasterizer;

use std::fmt;

/// The low-pass filter added to the diagonal of 2D covariances.
pub const FILTER_LOW_PASS: f64 = 0.3;

/// The default edge length of a square tile in pixels.
pub const TILE_SIZE: u32 = 16;

/// A forward rasterizer of 3D Gaussians.
///
/// It reports errors through two channels:
/// - The returned result, for the failures of the call itself.
/// - [`Gaussian3dRasterizer::take_error`], for the failures of device work
///   which may be observed after the call.
pub trait Gaussian3dRasterizer<B: Backend> {
    /// Rasterizing the points into `colors_rgb_2d`.
    ///
    /// `colors_rgb_2d` is the output target of shape `[I_y, I_x, 3]`.
    /// The working memory is requested from `scratch`.
    fn rasterize_forward(
        &mut self,
        scratch: &mut ScratchBuffers<B>,
        input: RasterizeInput<B>,
        colors_rgb_2d: Tensor<B, 3>,
    ) -> Result<RasterizeOutput<B>, Error>;

    /// Taking the pending error of device work.
    fn take_error(&mut self) -> Option<String>;
}

/// The arguments of [`Gaussian3dRasterizer::rasterize_forward`].
#[derive(Clone)]
pub struct RasterizeInput<B: Backend> {
    /// `[3]`
    pub background: Tensor<B, 1>,
    /// `[P, M * 3]`
    pub colors_sh: Tensor<B, 2>,
    /// It should be no more than [`SH_DEGREE_MAX`](crate::spherical_harmonics::SH_DEGREE_MAX).
    pub colors_sh_degree: u32,
    /// `[P, 3]`
    ///
    /// It replaces the colors evaluated from `colors_sh` if present.
    pub colors_rgb_3d_precomputed: Option<Tensor<B, 2>>,
    /// `[P, 6]` (xx, xy, xz, yy, yz, zz)
    ///
    /// It replaces the covariances made of `rotations` and `scalings` if present.
    pub covariances_3d_precomputed: Option<Tensor<B, 2>>,
    /// The points outside are culled.
    pub crop_box: Option<Aabb>,
    /// `tan(Fov_x / 2)`
    pub field_of_view_x_half_tan: f64,
    /// `tan(Fov_y / 2)`
    pub field_of_view_y_half_tan: f64,
    /// `I_y`
    pub image_height: u32,
    /// `I_x`
    pub image_width: u32,
    /// Whether the points are already culled against the frustum.
    pub is_prefiltered: bool,
    /// Whether [`RasterizeOutput::radii`] is requested.
    pub is_radii_requested: bool,
    /// `[P, 1]`
    pub opacities: Tensor<B, 2>,
    /// `P`
    pub point_count: usize,
    /// `[P, 2]`
    ///
    /// The working memory of tighter screen extents in pixels for fast culling.
    pub point_rects: Option<Tensor<B, 2, Int>>,
    /// `[P, 3]`
    pub positions: Tensor<B, 2>,
    /// `[P, 4]` (w, x, y, z)
    pub rotations: Tensor<B, 2>,
    /// It multiplies `scalings`.
    pub scaling_modifier: f32,
    /// `[P, 3]`
    pub scalings: Tensor<B, 2>,
    /// `T`
    pub tile_size: u32,
    /// `[3]`
    pub view_position: Tensor<B, 1>,
    /// `[4, 4]` in row-major order
    pub view_projection_transform: Tensor<B, 2>,
    /// `[4, 4]` in row-major order
    pub view_transform: Tensor<B, 2>,
    pub z_near: f32,
}

#[derive(Clone)]
pub struct RasterizeOutput<B: Backend> {
    /// `[I_y, I_x, 3]`
    pub colors_rgb_2d: Tensor<B, 3>,
    /// `[P, 2]`
    pub point_rects: Option<Tensor<B, 2, Int>>,
    /// `[P]`
    pub radii: Option<Tensor<B, 1, Int>>,
    /// The number of points that touch at least one tile.
    pub rendered_count: usize,
}

impl<B: Backend> fmt::Debug for RasterizeInput<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct(&format!("RasterizeInput<{}>", B::name()))
            .field("point_count", &self.point_count)
            .field("colors_sh_degree", &self.colors_sh_degree)
            .field("crop_box", &self.crop_box)
            .field("image_height", &self.image_height)
            .field("image_width", &self.image_width)
            .field("is_prefiltered", &self.is_prefiltered)
            .field("is_radii_requested", &self.is_radii_requested)
            .field("point_rects.is_some()", &self.point_rects.is_some())
            .field("scaling_modifier", &self.scaling_modifier)
            .field("tile_size", &self.tile_size)
            .field("z_near", &self.z_near)
            .finish()
    }
}

impl<B: Backend> fmt::Debug for RasterizeOutput<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct(&format!("RasterizeOutput<{}>", B::name()))
            .field("colors_rgb_2d.dims()", &self.colors_rgb_2d.dims())
            .field("radii.is_some()", &self.radii.is_some())
            .field("rendered_count", &self.rendered_count)
            .finish()
    }
}
