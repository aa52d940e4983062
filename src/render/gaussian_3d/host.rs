//! A deterministic host implementation of the 3DGS forward rasterizer.
//!
//! It follows the tile-based pipeline of device kernels:
//! 1. Projecting each point to a 2D Gaussian.
//! 2. Binning the points into the tiles they touch, sorted by depth.
//! 3. Blending the points of each tile front to back for each pixel.

pub use super::*;

use crate::{
    function::{covariance_3d, normalize},
    spherical_harmonics::{self, SH_COUNT_MAX, SH_DEGREE_MAX},
};
use super::buffer::{read_chunks, read_floats};
use rayon::{
    iter::{
        IndexedParallelIterator, IntoParallelIterator, IntoParallelRefIterator,
        ParallelIterator,
    },
    slice::ParallelSliceMut,
};

/// Points nearer than it in view space are culled.
pub const DEPTH_MIN: f32 = 0.2;

/// The upper bound of alpha.
pub const OPACITY_MAX: f32 = 0.99;

/// Alpha below it is skipped.
pub const OPACITY_MIN: f32 = 1.0 / 255.0;

/// Blending stops when the transmittance falls below it.
pub const TRANSMITTANCE_MIN: f32 = 1e-4;

/// A host rasterizer using `rayon` for data parallelism.
#[derive(Clone, Debug, Default)]
pub struct HostRasterizer {
    error: Option<String>,
}

/// A point projected to the image plane.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct ProjectedPoint {
    color_rgb: [f32; 3],
    /// The inverse of the 2D covariance as `(a, b, c)`
    conic: [f32; 3],
    depth: f32,
    opacity: f32,
    /// In pixels
    position_2d: [f32; 2],
    radius: u32,
    /// Half extents of the screen rect in pixels
    rect_extent: [u32; 2],
    tile_touched_max: [u32; 2],
    tile_touched_min: [u32; 2],
}

/// The host copies of [`RasterizeInput`].
struct ProjectContext {
    colors_rgb_3d: Option<Vec<[f32; 3]>>,
    colors_sh: Vec<[f32; SH_COUNT_MAX * 3]>,
    colors_sh_degree: u32,
    covariances_3d: Option<Vec<[f32; 6]>>,
    crop_box: Option<Aabb>,
    field_of_view_x_half_tan: f32,
    field_of_view_y_half_tan: f32,
    focal_length_x: f32,
    focal_length_y: f32,
    image_height: u32,
    image_width: u32,
    is_rect_tight: bool,
    opacities: Vec<f32>,
    positions: Vec<[f32; 3]>,
    rotations: Vec<[f32; 4]>,
    scaling_modifier: f32,
    scalings: Vec<[f32; 3]>,
    tile_count_x: u32,
    tile_count_y: u32,
    tile_size: u32,
    view_position: [f32; 3],
    /// `[4, 4]` in row-major order
    view_projection_transform: Vec<f32>,
    /// `[4, 4]` in row-major order
    view_transform: Vec<f32>,
}

impl HostRasterizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: Backend> Gaussian3dRasterizer<B> for HostRasterizer {
    fn rasterize_forward(
        &mut self,
        scratch: &mut ScratchBuffers<B>,
        input: RasterizeInput<B>,
        colors_rgb_2d: Tensor<B, 3>,
    ) -> Result<RasterizeOutput<B>, Error> {
        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(target: "gausplat::viewer::gaussian_3d::host", "rasterize_forward");

        // I_x
        let image_width = input.image_width;
        // I_y
        let image_height = input.image_height;
        // P
        let point_count = input.point_count;
        // T
        let tile_size = input.tile_size;

        if tile_size == 0 {
            return Err(Error::Rasterizer("tile_size should be positive".into()));
        }
        if input.colors_sh_degree > SH_DEGREE_MAX {
            return Err(Error::Rasterizer(format!(
                "colors_sh_degree should be no more than {SH_DEGREE_MAX}, but got {}",
                input.colors_sh_degree
            )));
        }
        let target_dims = [image_height as usize, image_width as usize, 3];
        if colors_rgb_2d.dims() != target_dims {
            return Err(Error::Rasterizer(format!(
                "the target shape should be {target_dims:?}, but got {:?}",
                colors_rgb_2d.dims()
            )));
        }
        if input.positions.dims()[0] != point_count {
            return Err(Error::Rasterizer(format!(
                "point_count should be {}, but got {point_count}",
                input.positions.dims()[0]
            )));
        }

        let device = colors_rgb_2d.device();
        let background = read_floats(input.background)?;
        let background = [background[0], background[1], background[2]];
        let field_of_view_x_half_tan = input.field_of_view_x_half_tan as f32;
        let field_of_view_y_half_tan = input.field_of_view_y_half_tan as f32;
        let view_position = read_floats(input.view_position)?;

        let context = ProjectContext {
            colors_rgb_3d: input
                .colors_rgb_3d_precomputed
                .map(read_chunks::<B, 3>)
                .transpose()?,
            colors_sh: read_chunks(input.colors_sh)?,
            colors_sh_degree: input.colors_sh_degree,
            covariances_3d: input
                .covariances_3d_precomputed
                .map(read_chunks::<B, 6>)
                .transpose()?,
            crop_box: input.crop_box,
            field_of_view_x_half_tan,
            field_of_view_y_half_tan,
            focal_length_x: image_width as f32 / field_of_view_x_half_tan / 2.0,
            focal_length_y: image_height as f32 / field_of_view_y_half_tan / 2.0,
            image_height,
            image_width,
            is_rect_tight: input.point_rects.is_some(),
            opacities: read_floats(input.opacities)?,
            positions: read_chunks(input.positions)?,
            rotations: read_chunks(input.rotations)?,
            scaling_modifier: input.scaling_modifier,
            scalings: read_chunks(input.scalings)?,
            tile_count_x: image_width.div_ceil(tile_size),
            tile_count_y: image_height.div_ceil(tile_size),
            tile_size,
            view_position: [view_position[0], view_position[1], view_position[2]],
            view_projection_transform: read_floats(input.view_projection_transform)?,
            view_transform: read_floats(input.view_transform)?,
        };

        // Projecting

        if scratch
            .geometry(point_count * size_of::<ProjectedPoint>())
            .is_none()
            && point_count != 0
        {
            self.error = Some("the geometry region is unavailable".into());
        }

        // [P]
        let points = (0..point_count)
            .into_par_iter()
            .map(|index| context.project(index))
            .collect::<Vec<_>>();

        // Binning

        // [T] (tile_index << 32 | depth, point_index)
        let mut point_keys = points
            .par_iter()
            .enumerate()
            .filter_map(|(index, point)| Some((index, point.as_ref()?)))
            .flat_map_iter(|(index, point)| {
                let depth = point.depth.to_bits() as u64;
                let tile_count_x = context.tile_count_x;
                (point.tile_touched_min[1]..point.tile_touched_max[1]).flat_map(
                    move |tile_y| {
                        (point.tile_touched_min[0]..point.tile_touched_max[0]).map(
                            move |tile_x| {
                                let tile_index =
                                    tile_y as u64 * tile_count_x as u64 + tile_x as u64;
                                (tile_index << 32 | depth, index as u32)
                            },
                        )
                    },
                )
            })
            .collect::<Vec<_>>();

        if scratch
            .binning(point_keys.len() * size_of::<(u64, u32)>())
            .is_none()
            && !point_keys.is_empty()
        {
            self.error = Some("the binning region is unavailable".into());
        }

        // NOTE: Positive depths are ordered by their bits.
        point_keys.par_sort_unstable();

        // [(I_x / T) * (I_y / T), 2]
        let tile_point_ranges = {
            let tile_count = area(context.tile_count_x, context.tile_count_y);
            let mut ranges = vec![[0_usize; 2]; tile_count];
            for (key_index, (key, _)) in point_keys.iter().enumerate() {
                let tile_index = (key >> 32) as usize;
                if key_index == 0 || (point_keys[key_index - 1].0 >> 32) as usize != tile_index
                {
                    ranges[tile_index][0] = key_index;
                }
                ranges[tile_index][1] = key_index + 1;
            }
            ranges
        };

        // Blending

        if scratch
            .image(area(image_width, image_height) * size_of::<[u32; 2]>())
            .is_none()
            && area(image_width, image_height) != 0
        {
            self.error = Some("the image region is unavailable".into());
        }

        // [I_y, I_x, 3]
        let mut pixels = vec![0.0_f32; area(image_width, image_height) * 3];
        pixels
            .par_chunks_mut(image_width.max(1) as usize * 3)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, color) in row.chunks_exact_mut(3).enumerate() {
                    let tile_index = (y / tile_size as usize) * context.tile_count_x as usize
                        + x / tile_size as usize;
                    let [start, end] = tile_point_ranges[tile_index];
                    let mut transmittance = 1.0;
                    let mut color_rgb = [0.0; 3];

                    for &(_, index) in &point_keys[start..end] {
                        // NOTE: Every binned point is visible.
                        let Some(point) = &points[index as usize] else {
                            continue;
                        };
                        let dx = point.position_2d[0] - x as f32;
                        let dy = point.position_2d[1] - y as f32;
                        let [a, b, c] = point.conic;
                        let power = -0.5 * (a * dx * dx + c * dy * dy) - b * dx * dy;
                        if power > 0.0 {
                            continue;
                        }
                        let alpha = (point.opacity * power.exp()).min(OPACITY_MAX);
                        if alpha < OPACITY_MIN {
                            continue;
                        }
                        let transmittance_next = transmittance * (1.0 - alpha);
                        if transmittance_next < TRANSMITTANCE_MIN {
                            break;
                        }
                        for channel in 0..3 {
                            color_rgb[channel] +=
                                point.color_rgb[channel] * alpha * transmittance;
                        }
                        transmittance = transmittance_next;
                    }

                    for channel in 0..3 {
                        color[channel] =
                            color_rgb[channel] + transmittance * background[channel];
                    }
                }
            });

        if pixels.iter().any(|c| !c.is_finite()) {
            self.error = Some("non-finite colors are rasterized".into());
        }

        let rendered_count = points.iter().filter(|point| point.is_some()).count();

        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(
            target: "gausplat::viewer::gaussian_3d::host",
            "rasterize_forward > rendered_count ({rendered_count}) > tile_touched_count ({})",
            point_keys.len(),
        );

        let colors_rgb_2d =
            Tensor::from_data(TensorData::new(pixels, target_dims), &device);

        let radii = input.is_radii_requested.then(|| {
            let radii = points
                .iter()
                .map(|point| point.map(|p| p.radius as i32).unwrap_or_default())
                .collect::<Vec<_>>();
            Tensor::from_data(TensorData::new(radii, [point_count]), &device)
        });

        let point_rects = input.point_rects.map(|point_rects| {
            let rects = points
                .iter()
                .flat_map(|point| {
                    point.map(|p| p.rect_extent.map(|e| e as i32)).unwrap_or_default()
                })
                .collect::<Vec<_>>();
            Tensor::from_data(
                TensorData::new(rects, [point_count, 2]),
                &point_rects.device(),
            )
        });

        Ok(RasterizeOutput {
            colors_rgb_2d,
            point_rects,
            radii,
            rendered_count,
        })
    }

    fn take_error(&mut self) -> Option<String> {
        self.error.take()
    }
}

impl ProjectContext {
    /// Projecting the point at `index`, or `None` if it is culled.
    fn project(
        &self,
        index: usize,
    ) -> Option<ProjectedPoint> {
        let position = &self.positions[index];

        if let Some(crop_box) = &self.crop_box {
            if !crop_box.contains(position) {
                return None;
            }
        }

        let v = &self.view_transform;
        let vp = &self.view_projection_transform;
        let transform = |m: &[f32], row: usize| {
            m[row * 4] * position[0]
                + m[row * 4 + 1] * position[1]
                + m[row * 4 + 2] * position[2]
                + m[row * 4 + 3]
        };

        // [3]
        let position_3d_in_view = [0, 1, 2].map(|row| transform(v, row));
        let depth = position_3d_in_view[2];
        if depth.is_nan() || depth <= DEPTH_MIN {
            return None;
        }

        // [4]
        let position_3d_in_clip = [0, 1, 2, 3].map(|row| transform(vp, row));
        let w = 1.0 / (position_3d_in_clip[3] + 1e-7);
        let position_2d_in_ndc = [position_3d_in_clip[0] * w, position_3d_in_clip[1] * w];

        // [xx, xy, xz, yy, yz, zz]
        let s = match &self.covariances_3d {
            Some(covariances_3d) => covariances_3d[index],
            None => covariance_3d(
                &self.rotations[index],
                &self.scalings[index].map(|s| s * self.scaling_modifier),
            ),
        };
        let covariance_3d = [[s[0], s[1], s[2]], [s[1], s[3], s[4]], [s[2], s[4], s[5]]];

        // [2, 3]
        let jacobian = {
            let bound_x = self.field_of_view_x_half_tan * 1.3;
            let bound_y = self.field_of_view_y_half_tan * 1.3;
            let x = (position_3d_in_view[0] / depth).clamp(-bound_x, bound_x) * depth;
            let y = (position_3d_in_view[1] / depth).clamp(-bound_y, bound_y) * depth;
            let (fx, fy) = (self.focal_length_x, self.focal_length_y);
            [
                [fx / depth, 0.0, -fx * x / (depth * depth)],
                [0.0, fy / depth, -fy * y / (depth * depth)],
            ]
        };

        // [2, 3] = [2, 3] * [3, 3]
        let t = [0, 1].map(|row| {
            [0, 1, 2].map(|col| (0..3).map(|k| jacobian[row][k] * v[k * 4 + col]).sum::<f32>())
        });

        // [2, 2] = [2, 3] * [3, 3] * [3, 2]
        let covariance_2d = [0, 1].map(|row| {
            [0, 1].map(|col| {
                (0..3)
                    .map(|i| {
                        (0..3)
                            .map(|j| t[row][i] * covariance_3d[i][j] * t[col][j])
                            .sum::<f32>()
                    })
                    .sum::<f32>()
            })
        });
        let a = covariance_2d[0][0] + FILTER_LOW_PASS as f32;
        let b = covariance_2d[0][1];
        let c = covariance_2d[1][1] + FILTER_LOW_PASS as f32;

        let determinant = a * c - b * b;
        if determinant == 0.0 || !determinant.is_finite() {
            return None;
        }
        let conic = [c / determinant, -b / determinant, a / determinant];

        let middle = 0.5 * (a + c);
        let eigenvalue_max = middle + (middle * middle - determinant).max(0.1).sqrt();
        let radius = (3.0 * eigenvalue_max.sqrt()).ceil();
        if !radius.is_finite() {
            return None;
        }
        let radius = radius as u32;

        let position_2d = [
            View::ndc_to_pixel(position_2d_in_ndc[0] as f64, self.image_width) as f32,
            View::ndc_to_pixel(position_2d_in_ndc[1] as f64, self.image_height) as f32,
        ];
        if !position_2d.iter().all(|p| p.is_finite()) {
            return None;
        }

        let rect_extent = if self.is_rect_tight {
            [(3.0 * a.sqrt()).ceil() as u32, (3.0 * c.sqrt()).ceil() as u32]
        } else {
            [radius, radius]
        };

        let tile_size = self.tile_size as f32;
        let tile_counts = [self.tile_count_x, self.tile_count_y];
        let tile_touched = |offset: f32, axis: usize| {
            ((offset / tile_size).floor().max(0.0) as u32).min(tile_counts[axis])
        };
        let tile_touched_min =
            [0, 1].map(|axis| tile_touched(position_2d[axis] - rect_extent[axis] as f32, axis));
        let tile_touched_max = [0, 1].map(|axis| {
            tile_touched(
                position_2d[axis] + rect_extent[axis] as f32 + tile_size - 1.0,
                axis,
            )
        });
        if tile_touched_min[0] >= tile_touched_max[0]
            || tile_touched_min[1] >= tile_touched_max[1]
        {
            return None;
        }

        let color_rgb = match &self.colors_rgb_3d {
            Some(colors_rgb_3d) => colors_rgb_3d[index],
            None => {
                let direction = normalize([0, 1, 2].map(|i| position[i] - self.view_position[i]));
                spherical_harmonics::evaluate(
                    &self.colors_sh[index],
                    self.colors_sh_degree,
                    direction,
                )
            },
        };

        Some(ProjectedPoint {
            color_rgb,
            conic,
            depth,
            opacity: self.opacities[index],
            position_2d,
            radius,
            rect_extent,
            tile_touched_max,
            tile_touched_min,
        })
    }
}

/// `width * height` without overflow.
#[inline]
const fn area(
    width: u32,
    height: u32,
) -> usize {
    width as usize * height as usize
}
