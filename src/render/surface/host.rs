//! A host implementation of the graphics API.

pub use super::*;

use crate::{
    function::{normalize, rotation_matrix, Matrix3, Matrix3Extension},
    render::gaussian_3d::{buffer::read_floats, TensorData},
    spherical_harmonics,
};
use rayon::{
    iter::{IndexedParallelIterator, ParallelIterator},
    slice::{ParallelSlice, ParallelSliceMut},
};
use std::{
    cell::RefCell,
    rc::Rc,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// The shading floor of ellipsoids.
pub const SHADING_AMBIENT: f32 = 0.2;

/// A graphics API on host memory.
///
/// Interop is emulated by sharing the buffer memory with its registration.
#[derive(Clone, Debug, Default)]
pub struct HostGraphics {
    allocation_count: Arc<AtomicUsize>,
    is_interop_supported: bool,
}

/// An RGB image with a depth attachment.
#[derive(Clone, Debug, PartialEq)]
pub struct HostImage {
    /// `[H * W]`
    pub colors_rgb: Vec<[f32; 3]>,
    /// `[H * W]`
    pub depths: Vec<f32>,
    pub height: u32,
    pub width: u32,
}

#[derive(Debug)]
pub struct HostBuffer {
    memory: Rc<RefCell<Vec<u8>>>,
    _allocation: Allocation,
}

#[derive(Debug)]
pub struct HostRegistration {
    memory: Rc<RefCell<Vec<u8>>>,
    is_mapped: bool,
    _allocation: Allocation,
}

#[derive(Debug)]
pub struct HostPoints {
    colors_rgb: Vec<[f32; 3]>,
    positions: Vec<[f32; 3]>,
    _allocation: Allocation,
}

#[derive(Debug)]
pub struct HostEllipsoids {
    colors_rgb: Vec<[f32; 3]>,
    opacities: Vec<f32>,
    positions: Vec<[f32; 3]>,
    rotations: Vec<Matrix3>,
    scalings: Vec<[f32; 3]>,
    _allocation: Allocation,
}

/// A live handle counted by [`HostGraphics`].
#[derive(Debug)]
struct Allocation {
    count: Arc<AtomicUsize>,
}

/// A ray hit on an ellipsoid.
#[derive(Clone, Copy, Debug)]
struct Hit {
    color_rgb: [f32; 3],
    depth: f32,
}

impl HostGraphics {
    pub fn new(is_interop_supported: bool) -> Self {
        Self {
            allocation_count: Default::default(),
            is_interop_supported,
        }
    }

    /// The number of handles not released yet.
    #[inline]
    pub fn live_allocation_count(&self) -> usize {
        self.allocation_count.load(Ordering::Relaxed)
    }

    fn allocate(&self) -> Allocation {
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        Allocation {
            count: self.allocation_count.to_owned(),
        }
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}

impl HostImage {
    /// A black image with infinite depths.
    pub fn new(
        width: u32,
        height: u32,
    ) -> Self {
        let pixel_count = width as usize * height as usize;
        Self {
            colors_rgb: vec![[0.0; 3]; pixel_count],
            depths: vec![f32::INFINITY; pixel_count],
            height,
            width,
        }
    }

    /// Filling the colors with `color_rgb` and the depths with infinity.
    pub fn clear(
        &mut self,
        color_rgb: [f32; 3],
    ) {
        self.colors_rgb.fill(color_rgb);
        self.depths.fill(f32::INFINITY);
    }

    #[inline]
    pub fn pixel(
        &self,
        x: u32,
        y: u32,
    ) -> [f32; 3] {
        self.colors_rgb[(y * self.width + x) as usize]
    }
}

impl<B: Backend> Graphics<B> for HostGraphics {
    type Buffer = HostBuffer;
    type Ellipsoids = HostEllipsoids;
    type Points = HostPoints;
    type Registration = HostRegistration;
    type Target = HostImage;

    fn create_buffer(
        &mut self,
        size: usize,
    ) -> Result<Self::Buffer, Error> {
        Ok(HostBuffer {
            memory: Rc::new(RefCell::new(vec![0; size])),
            _allocation: self.allocate(),
        })
    }

    fn write_buffer(
        &mut self,
        buffer: &mut Self::Buffer,
        offset: usize,
        data: &[u8],
    ) -> Result<(), Error> {
        let mut memory = buffer.memory.borrow_mut();
        let size = memory.len();
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= size)
            .ok_or_else(|| {
                Error::Graphics(format!(
                    "the write of {} bytes at {offset} exceeds the buffer of {size} bytes",
                    data.len()
                ))
            })?;
        memory[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn register_buffer(
        &mut self,
        buffer: &Self::Buffer,
    ) -> Result<Self::Registration, Error> {
        if !self.is_interop_supported {
            return Err(Error::InteropUnavailable(
                "the compute device differs from the graphics device".into(),
            ));
        }
        Ok(HostRegistration {
            memory: buffer.memory.to_owned(),
            is_mapped: false,
            _allocation: self.allocate(),
        })
    }

    fn map_buffer(
        &mut self,
        registration: &mut Self::Registration,
        shape: [usize; 3],
        device: &B::Device,
    ) -> Result<Tensor<B, 3>, Error> {
        if registration.is_mapped {
            return Err(Error::Graphics("the buffer is already mapped".into()));
        }
        let memory = registration.memory.borrow();
        if memory.len() != shape.iter().product::<usize>() * size_of::<f32>() {
            return Err(Error::Graphics(format!(
                "the buffer of {} bytes mismatches the shape {shape:?}",
                memory.len()
            )));
        }
        let values = memory
            .chunks_exact(size_of::<f32>())
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect::<Vec<_>>();
        drop(memory);

        registration.is_mapped = true;
        Ok(Tensor::from_data(TensorData::new(values, shape), device))
    }

    fn unmap_buffer(
        &mut self,
        registration: &mut Self::Registration,
        tensor: Tensor<B, 3>,
    ) -> Result<(), Error> {
        if !registration.is_mapped {
            return Err(Error::Graphics("the buffer is not mapped".into()));
        }
        registration.is_mapped = false;

        let values = read_floats(tensor)?;
        let mut memory = registration.memory.borrow_mut();
        let bytes = bytemuck::cast_slice::<f32, u8>(&values);
        if memory.len() != bytes.len() {
            return Err(Error::Graphics(format!(
                "the buffer of {} bytes mismatches the tensor of {} bytes",
                memory.len(),
                bytes.len()
            )));
        }
        memory.copy_from_slice(bytes);
        Ok(())
    }

    fn copy_to_target(
        &mut self,
        buffer: &Self::Buffer,
        width: u32,
        height: u32,
        target: &mut Self::Target,
    ) -> Result<(), Error> {
        if (target.width, target.height) != (width, height) {
            return Err(Error::Graphics(format!(
                "the target size should be {width}x{height}, but got {}x{}",
                target.width, target.height
            )));
        }
        let memory = buffer.memory.borrow();
        if memory.len() != width as usize * height as usize * size_of::<[f32; 3]>() {
            return Err(Error::Graphics(format!(
                "the buffer of {} bytes mismatches {width}x{height} pixels",
                memory.len()
            )));
        }

        for (color, bytes) in target
            .colors_rgb
            .iter_mut()
            .zip(memory.chunks_exact(size_of::<[f32; 3]>()))
        {
            *color = bytemuck::pod_read_unaligned(bytes);
        }
        target.depths.fill(f32::INFINITY);

        Ok(())
    }

    fn clear_target(
        &mut self,
        target: &mut Self::Target,
        color_rgb: [f32; 3],
    ) -> Result<(), Error> {
        target.clear(color_rgb);
        Ok(())
    }

    fn create_points(
        &mut self,
        positions: &[[f32; 3]],
        colors_rgb: &[[f32; 3]],
    ) -> Result<Self::Points, Error> {
        if positions.len() != colors_rgb.len() {
            return Err(Error::Graphics(format!(
                "the point count {} mismatches the color count {}",
                positions.len(),
                colors_rgb.len()
            )));
        }
        Ok(HostPoints {
            colors_rgb: colors_rgb.to_vec(),
            positions: positions.to_vec(),
            _allocation: self.allocate(),
        })
    }

    fn draw_points(
        &mut self,
        points: &Self::Points,
        view: &View,
        target: &mut Self::Target,
    ) -> Result<(), Error> {
        let tan_x = view.field_of_view_x_half_tan();
        let tan_y = view.field_of_view_y_half_tan();

        for (position, color_rgb) in points.positions.iter().zip(&points.colors_rgb) {
            let position_in_view = view.to_view_space(&position.map(|c| c as f64));
            let depth = position_in_view[2];
            if depth.is_nan() || depth <= 0.0 {
                continue;
            }

            let ndc_x = position_in_view[0] / depth / tan_x;
            let ndc_y = position_in_view[1] / depth / tan_y;
            let x = View::ndc_to_pixel(ndc_x, target.width).round();
            let y = View::ndc_to_pixel(ndc_y, target.height).round();
            if !(x >= 0.0 && x < target.width as f64 && y >= 0.0 && y < target.height as f64)
            {
                continue;
            }

            let index = y as usize * target.width as usize + x as usize;
            let depth = depth as f32;
            if depth < target.depths[index] {
                target.depths[index] = depth;
                target.colors_rgb[index] = *color_rgb;
            }
        }

        Ok(())
    }

    fn create_ellipsoids(
        &mut self,
        scene: &Gaussian3dScene,
    ) -> Result<Self::Ellipsoids, Error> {
        Ok(HostEllipsoids {
            colors_rgb: scene
                .colors_sh
                .iter()
                .map(|colors_sh| spherical_harmonics::evaluate(colors_sh, 0, [0.0; 3]))
                .collect(),
            opacities: scene.opacities.to_owned(),
            positions: scene.positions.to_owned(),
            rotations: scene.rotations.iter().map(rotation_matrix).collect(),
            scalings: scene.scalings.to_owned(),
            _allocation: self.allocate(),
        })
    }

    fn draw_ellipsoids(
        &mut self,
        ellipsoids: &Self::Ellipsoids,
        view: &View,
        alpha_limit: f32,
        scaling_modifier: f32,
        target: &mut Self::Target,
    ) -> Result<(), Error> {
        let (width, height) = (target.width, target.height);
        let tan_x = view.field_of_view_x_half_tan();
        let tan_y = view.field_of_view_y_half_tan();
        let origin = view.view_position.map(|c| c as f32);
        // R_v^T in row-major order
        let view_rotation_inverse: Matrix3 = [0, 1, 2]
            .map(|row| [0, 1, 2].map(|col| view.view_transform[row][col] as f32));

        let ray_direction = |x: u32, y: u32| {
            let direction_in_view = [
                (View::pixel_to_ndc(x as f64, width) * tan_x) as f32,
                (View::pixel_to_ndc(y as f64, height) * tan_y) as f32,
                1.0,
            ];
            normalize(view_rotation_inverse.matvec(&direction_in_view))
        };

        // Opaque pass
        target
            .colors_rgb
            .par_chunks_mut(width.max(1) as usize)
            .zip(target.depths.par_chunks_mut(width.max(1) as usize))
            .enumerate()
            .for_each(|(y, (colors_rgb, depths))| {
                for (x, (color_rgb, depth)) in
                    colors_rgb.iter_mut().zip(depths.iter_mut()).enumerate()
                {
                    let direction = ray_direction(x as u32, y as u32);
                    let hit = (0..ellipsoids.positions.len())
                        .filter(|index| ellipsoids.opacities[*index] >= alpha_limit)
                        .filter_map(|index| {
                            ellipsoids.intersect(index, &origin, &direction, scaling_modifier)
                        })
                        .min_by(|a, b| a.depth.total_cmp(&b.depth));
                    if let Some(hit) = hit {
                        if hit.depth < *depth {
                            *depth = hit.depth;
                            *color_rgb = hit.color_rgb;
                        }
                    }
                }
            });

        // Additive pass
        target
            .colors_rgb
            .par_chunks_mut(width.max(1) as usize)
            .zip(target.depths.par_chunks(width.max(1) as usize))
            .enumerate()
            .for_each(|(y, (colors_rgb, depths))| {
                for (x, (color_rgb, depth)) in colors_rgb.iter_mut().zip(depths).enumerate() {
                    let direction = ray_direction(x as u32, y as u32);
                    for index in 0..ellipsoids.positions.len() {
                        let Some(hit) =
                            ellipsoids.intersect(index, &origin, &direction, scaling_modifier)
                        else {
                            continue;
                        };
                        if hit.depth < *depth {
                            let alpha = ellipsoids.opacities[index];
                            for channel in 0..3 {
                                color_rgb[channel] += hit.color_rgb[channel] * alpha;
                            }
                        }
                    }
                }
            });

        Ok(())
    }
}

impl HostEllipsoids {
    /// Intersecting the ray with the ellipsoid at `index`.
    fn intersect(
        &self,
        index: usize,
        origin: &[f32; 3],
        direction: &[f32; 3],
        scaling_modifier: f32,
    ) -> Option<Hit> {
        let rotation = &self.rotations[index];
        let scaling = self.scalings[index].map(|s| s * scaling_modifier);
        let position = &self.positions[index];

        // The ray in the local space of a unit sphere
        let rotation_inverse = rotation.transpose();
        let offset = rotation_inverse.matvec(&[0, 1, 2].map(|i| origin[i] - position[i]));
        let offset = [0, 1, 2].map(|i| offset[i] / scaling[i]);
        let step = rotation_inverse.matvec(direction);
        let step = [0, 1, 2].map(|i| step[i] / scaling[i]);

        let dot = |a: &[f32; 3], b: &[f32; 3]| a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
        let a = dot(&step, &step);
        let b = 2.0 * dot(&offset, &step);
        let c = dot(&offset, &offset) - 1.0;
        let discriminant = b * b - 4.0 * a * c;
        if !(discriminant >= 0.0 && a > 0.0) {
            return None;
        }
        let depth = (-b - discriminant.sqrt()) / (2.0 * a);
        if !(depth > 0.0) {
            return None;
        }

        // The normal of an ellipsoid is the sphere normal scaled inversely.
        let normal_in_local = [0, 1, 2].map(|i| (offset[i] + depth * step[i]) / scaling[i]);
        let normal = normalize(rotation.matvec(&normal_in_local));
        let shading = SHADING_AMBIENT + (1.0 - SHADING_AMBIENT) * dot(&normal, direction).abs();

        Some(Hit {
            color_rgb: self.colors_rgb[index].map(|c| c * shading),
            depth,
        })
    }
}
