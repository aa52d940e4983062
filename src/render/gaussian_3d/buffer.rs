//! Device-resident buffers of a 3DGS scene.

pub use super::*;

use crate::spherical_harmonics::SH_COUNT_MAX;
use burn::tensor::{BasicOps, Element, TensorKind};
use humansize::{format_size, BINARY};
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

/// Device copies of all per-point arrays and per-frame camera scalars.
#[derive(Clone)]
pub struct Gaussian3dDeviceBuffers<B: Backend> {
    /// `[3]`
    pub background: Tensor<B, 1>,
    /// `[P, M * 3]`
    pub colors_sh: Tensor<B, 2>,
    pub colors_sh_degree: u32,
    /// `[P, 1]`
    pub opacities: Tensor<B, 2>,
    /// `[P, 2]`
    pub point_rects: Tensor<B, 2, Int>,
    /// `[P, 3]`
    pub positions: Tensor<B, 2>,
    /// `[P, 4]` (w, x, y, z)
    pub rotations: Tensor<B, 2>,
    /// `[P, 3]`
    pub scalings: Tensor<B, 2>,
    /// `[3]`
    pub view_position: Tensor<B, 1>,
    /// `[4, 4]` in row-major order
    pub view_projection_transform: Tensor<B, 2>,
    /// `[4, 4]` in row-major order
    pub view_transform: Tensor<B, 2>,
}

/// A growable untyped device region.
///
/// Its capacity in bytes never shrinks.
pub struct ScratchBuffer<B: Backend> {
    allocation_id: u64,
    capacity: usize,
    device: B::Device,
    /// `[ceil(C / 4)]`
    memory: Option<Tensor<B, 1, Int>>,
}

/// The three growable regions requested by a rasterizer.
pub struct ScratchBuffers<B: Backend> {
    pub binning: ScratchBuffer<B>,
    pub geometry: ScratchBuffer<B>,
    pub image: ScratchBuffer<B>,
}

static ALLOCATION_ID_NEXT: AtomicU64 = AtomicU64::new(1);

impl<B: Backend> Gaussian3dDeviceBuffers<B> {
    /// Uploading the scene to `device`.
    pub fn upload(
        scene: &Gaussian3dScene,
        background: [f32; 3],
        device: &B::Device,
    ) -> Self {
        // P
        let point_count = scene.point_count();

        let make = |values: &[f32], channel_count: usize| {
            Tensor::<B, 2>::from_data(
                TensorData::new(values.to_vec(), [point_count, channel_count]),
                device,
            )
        };

        let buffers = Self {
            background: Tensor::from_data(TensorData::new(background.to_vec(), [3]), device),
            colors_sh: make(bytemuck::cast_slice(&scene.colors_sh), SH_COUNT_MAX * 3),
            colors_sh_degree: scene.colors_sh_degree,
            opacities: make(&scene.opacities, 1),
            point_rects: Tensor::zeros([point_count, 2], device),
            positions: make(bytemuck::cast_slice(&scene.positions), 3),
            rotations: make(bytemuck::cast_slice(&scene.rotations), 4),
            scalings: make(bytemuck::cast_slice(&scene.scalings), 3),
            view_position: Tensor::zeros([3], device),
            view_projection_transform: identity(device),
            view_transform: identity(device),
        };

        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(
            target: "gausplat::viewer::gaussian_3d::buffer",
            "upload > size ({})",
            buffers.size_readable(),
        );

        buffers
    }

    /// Writing the camera scalars of `view`.
    ///
    /// Non-finite values are rejected.
    pub fn upload_view(
        &mut self,
        view: &View,
        z_near: f32,
        z_far: f32,
    ) -> Result<(), Error> {
        if !view.is_finite() {
            return Err(Error::Validation(
                "the view transform and position".into(),
                "finite".into(),
            ));
        }
        let view_projection_transform =
            view.view_projection_transform(z_near as f64, z_far as f64);
        if !view_projection_transform.iter().flatten().all(|c| c.is_finite()) {
            return Err(Error::Validation(
                "the view-projection transform".into(),
                "finite".into(),
            ));
        }

        let device = self.device();
        let to_row_major = |m: &[[f64; 4]; 4]| {
            let values = (0..4)
                .flat_map(|row| (0..4).map(move |col| m[col][row] as f32))
                .collect::<Vec<_>>();
            Tensor::<B, 2>::from_data(TensorData::new(values, [4, 4]), &device)
        };

        self.view_transform = to_row_major(&view.view_transform);
        self.view_projection_transform = to_row_major(&view_projection_transform);
        self.view_position = Tensor::from_data(
            TensorData::new(view.view_position.map(|c| c as f32).to_vec(), [3]),
            &device,
        );

        Ok(())
    }

    /// Making the rasterizer arguments for `view`.
    ///
    /// The camera scalars should be written by [`Self::upload_view`] beforehand.
    /// The optional arguments are left unset.
    pub fn rasterize_input(
        &self,
        view: &View,
        scaling_modifier: f32,
        tile_size: u32,
        z_near: f32,
    ) -> RasterizeInput<B> {
        RasterizeInput {
            background: self.background.to_owned(),
            colors_sh: self.colors_sh.to_owned(),
            colors_sh_degree: self.colors_sh_degree,
            colors_rgb_3d_precomputed: None,
            covariances_3d_precomputed: None,
            crop_box: None,
            field_of_view_x_half_tan: view.field_of_view_x_half_tan(),
            field_of_view_y_half_tan: view.field_of_view_y_half_tan(),
            image_height: view.image_height,
            image_width: view.image_width,
            is_prefiltered: false,
            is_radii_requested: false,
            opacities: self.opacities.to_owned(),
            point_count: self.point_count(),
            point_rects: None,
            positions: self.positions.to_owned(),
            rotations: self.rotations.to_owned(),
            scaling_modifier,
            scalings: self.scalings.to_owned(),
            tile_size,
            view_position: self.view_position.to_owned(),
            view_projection_transform: self.view_projection_transform.to_owned(),
            view_transform: self.view_transform.to_owned(),
            z_near,
        }
    }

    /// Reading all per-point arrays back to the host.
    pub fn download(&self) -> Result<Gaussian3dScene, Error> {
        Ok(Gaussian3dScene {
            colors_sh: read_chunks(self.colors_sh.to_owned())?,
            colors_sh_degree: self.colors_sh_degree,
            opacities: read_floats(self.opacities.to_owned())?,
            positions: read_chunks(self.positions.to_owned())?,
            rotations: read_chunks(self.rotations.to_owned())?,
            scalings: read_chunks(self.scalings.to_owned())?,
        })
    }

    /// The device.
    #[inline]
    pub fn device(&self) -> B::Device {
        self.positions.device()
    }

    /// Number of points.
    #[inline]
    pub fn point_count(&self) -> usize {
        self.positions.dims()[0]
    }

    /// Size of the per-point arrays in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.point_count() * (SH_COUNT_MAX * 3 + 1 + 2 + 3 + 4 + 3) * size_of::<f32>()
    }

    /// Readable size of the per-point arrays.
    #[inline]
    pub fn size_readable(&self) -> String {
        format_size(self.size(), BINARY.decimal_places(1))
    }
}

impl<B: Backend> ScratchBuffer<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            allocation_id: 0,
            capacity: 0,
            device: device.to_owned(),
            memory: None,
        }
    }

    /// Requesting a region of at least `size` bytes.
    ///
    /// When `size` exceeds the capacity, the previous region is released first,
    /// then a region of `2 * size` bytes is allocated.
    /// It returns `None` if nothing has ever been allocated.
    pub fn acquire(
        &mut self,
        size: usize,
    ) -> Option<&Tensor<B, 1, Int>> {
        if size > self.capacity {
            // NOTE: The previous region is released before allocating.
            self.memory = None;

            let capacity = size.saturating_mul(2);
            let word_count = capacity.div_ceil(size_of::<u32>());
            self.memory = Some(Tensor::zeros([word_count], &self.device));
            self.capacity = capacity;
            self.allocation_id = ALLOCATION_ID_NEXT.fetch_add(1, Ordering::Relaxed);

            #[cfg(all(debug_assertions, not(test)))]
            log::debug!(
                target: "gausplat::viewer::gaussian_3d::buffer",
                "acquire > capacity ({})",
                format_size(capacity, BINARY.decimal_places(1)),
            );
        }

        self.memory.as_ref()
    }

    /// It changes only when the region grows. `0` means never allocated.
    #[inline]
    pub fn allocation_id(&self) -> u64 {
        self.allocation_id
    }

    /// Capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<B: Backend> ScratchBuffers<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            binning: ScratchBuffer::new(device),
            geometry: ScratchBuffer::new(device),
            image: ScratchBuffer::new(device),
        }
    }

    /// Requesting the per-point working region.
    #[inline]
    pub fn geometry(
        &mut self,
        size: usize,
    ) -> Option<&Tensor<B, 1, Int>> {
        self.geometry.acquire(size)
    }

    /// Requesting the per-tile-touch working region.
    #[inline]
    pub fn binning(
        &mut self,
        size: usize,
    ) -> Option<&Tensor<B, 1, Int>> {
        self.binning.acquire(size)
    }

    /// Requesting the per-pixel working region.
    #[inline]
    pub fn image(
        &mut self,
        size: usize,
    ) -> Option<&Tensor<B, 1, Int>> {
        self.image.acquire(size)
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.binning.capacity() + self.geometry.capacity() + self.image.capacity()
    }
}

/// `[4, 4]`
fn identity<B: Backend>(device: &B::Device) -> Tensor<B, 2> {
    let values = (0..16)
        .map(|index| if index % 5 == 0 { 1.0_f32 } else { 0.0 })
        .collect::<Vec<_>>();
    Tensor::from_data(TensorData::new(values, [4, 4]), device)
}

/// Reading a float tensor back to the host.
pub fn read_floats<B: Backend, const D: usize>(
    tensor: Tensor<B, D>
) -> Result<Vec<f32>, Error> {
    read_values(tensor)
}

/// Reading an int tensor back to the host.
pub fn read_ints<B: Backend, const D: usize>(
    tensor: Tensor<B, D, Int>
) -> Result<Vec<i64>, Error> {
    read_values(tensor)
}

fn read_values<B: Backend, const D: usize, K: TensorKind<B> + BasicOps<B>, E: Element>(
    tensor: Tensor<B, D, K>
) -> Result<Vec<E>, Error> {
    tensor
        .into_data()
        .convert::<E>()
        .into_vec::<E>()
        .map_err(|err| Error::Readback(format!("{err:?}")))
}

/// Reading a `[P, N]` float tensor back to the host as `P` arrays.
pub fn read_chunks<B: Backend, const N: usize>(
    tensor: Tensor<B, 2>
) -> Result<Vec<[f32; N]>, Error> {
    let dims = tensor.dims();
    if dims[1] != N {
        return Err(Error::Readback(format!(
            "the tensor shape {dims:?} mismatches [P, {N}]"
        )));
    }

    Ok(read_floats(tensor)?
        .chunks_exact(N)
        .map(|chunk| {
            let mut values = [0.0; N];
            values.copy_from_slice(chunk);
            values
        })
        .collect())
}

impl<B: Backend> fmt::Debug for Gaussian3dDeviceBuffers<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct(&format!("Gaussian3dDeviceBuffers<{}>", B::name()))
            .field("device", &self.device())
            .field("point_count", &self.point_count())
            .field("colors_sh_degree", &self.colors_sh_degree)
            .field("size", &self.size_readable())
            .finish()
    }
}

impl<B: Backend> fmt::Debug for ScratchBuffer<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ScratchBuffer")
            .field("allocation_id", &self.allocation_id)
            .field(
                "capacity",
                &format_size(self.capacity, BINARY.decimal_places(1)),
            )
            .finish()
    }
}

impl<B: Backend> fmt::Debug for ScratchBuffers<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ScratchBuffers")
            .field("binning", &self.binning)
            .field("geometry", &self.geometry)
            .field("image", &self.image)
            .finish()
    }
}
