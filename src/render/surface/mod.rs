//! The color buffer shared between the graphics API and the compute API.

pub mod host;

pub use super::View;
pub use crate::{error::Error, scene::gaussian_3d::Gaussian3dScene};
pub use burn::tensor::{backend::Backend, Tensor};
pub use host::{HostGraphics, HostImage};

use crate::render::gaussian_3d::buffer::read_floats;
use std::fmt;

/// The graphics API seen by the viewer.
///
/// All handles are owned values released on drop.
pub trait Graphics<B: Backend> {
    /// A linear buffer on the graphics API.
    type Buffer;
    /// A buffer registered with the compute API.
    type Registration;
    /// The destination of presentation.
    type Target;
    /// The vertex data of the point pass.
    type Points;
    /// The vertex data of the ellipsoid passes.
    type Ellipsoids;

    /// Creating a zeroed buffer of `size` bytes.
    fn create_buffer(
        &mut self,
        size: usize,
    ) -> Result<Self::Buffer, Error>;

    /// Writing `data` into `buffer` at `offset` bytes.
    fn write_buffer(
        &mut self,
        buffer: &mut Self::Buffer,
        offset: usize,
        data: &[u8],
    ) -> Result<(), Error>;

    /// Registering `buffer` with the compute API.
    ///
    /// It fails with [`Error::InteropUnavailable`] if the APIs cannot share memory.
    fn register_buffer(
        &mut self,
        buffer: &Self::Buffer,
    ) -> Result<Self::Registration, Error>;

    /// Mapping the registered buffer as a compute tensor of `shape`.
    fn map_buffer(
        &mut self,
        registration: &mut Self::Registration,
        shape: [usize; 3],
        device: &B::Device,
    ) -> Result<Tensor<B, 3>, Error>;

    /// Unmapping the registered buffer with the contents of `tensor`.
    fn unmap_buffer(
        &mut self,
        registration: &mut Self::Registration,
        tensor: Tensor<B, 3>,
    ) -> Result<(), Error>;

    /// Blitting the `[height, width, 3]` color buffer into `target`.
    fn copy_to_target(
        &mut self,
        buffer: &Self::Buffer,
        width: u32,
        height: u32,
        target: &mut Self::Target,
    ) -> Result<(), Error>;

    /// Filling the colors of `target` with `color_rgb` and resetting its depths.
    fn clear_target(
        &mut self,
        target: &mut Self::Target,
        color_rgb: [f32; 3],
    ) -> Result<(), Error>;

    /// Creating the vertex data of the point pass.
    fn create_points(
        &mut self,
        positions: &[[f32; 3]],
        colors_rgb: &[[f32; 3]],
    ) -> Result<Self::Points, Error>;

    /// Drawing each point as one pixel with depth testing.
    fn draw_points(
        &mut self,
        points: &Self::Points,
        view: &View,
        target: &mut Self::Target,
    ) -> Result<(), Error>;

    /// Creating the vertex data of the ellipsoid passes.
    fn create_ellipsoids(
        &mut self,
        scene: &Gaussian3dScene,
    ) -> Result<Self::Ellipsoids, Error>;

    /// Drawing each point as a shaded ellipsoid.
    ///
    /// 1. The ellipsoids with opacity of at least `alpha_limit` are drawn opaquely
    ///    with depth writing.
    /// 2. All ellipsoids in front of that depth are accumulated additively.
    fn draw_ellipsoids(
        &mut self,
        ellipsoids: &Self::Ellipsoids,
        view: &View,
        alpha_limit: f32,
        scaling_modifier: f32,
        target: &mut Self::Target,
    ) -> Result<(), Error>;
}

/// A `[H, W, 3]` float color buffer written by the compute API
/// and presented by the graphics API.
pub struct InteropSurface<B: Backend, G: Graphics<B>> {
    // NOTE: The registration should be released before the buffer.
    registration: Option<G::Registration>,
    fallback: Option<FallbackTarget<B>>,
    buffer: G::Buffer,
    device: B::Device,
    height: u32,
    width: u32,
    is_interop_requested: bool,
}

/// The compute-side target and its host copy.
struct FallbackTarget<B: Backend> {
    /// `[H, W, 3]`
    colors_rgb_2d: Tensor<B, 3>,
    /// `[H * W * 3 * 4]`
    colors_rgb_2d_host: Vec<u8>,
}

impl<B: Backend, G: Graphics<B>> InteropSurface<B, G> {
    /// Creating the color buffer of `width * height` pixels.
    ///
    /// If `use_interop` is `true` but the registration fails,
    /// the surface is degraded to the fallback path permanently.
    pub fn new(
        graphics: &mut G,
        width: u32,
        height: u32,
        use_interop: bool,
        device: &B::Device,
    ) -> Result<Self, Error> {
        let buffer = graphics.create_buffer(Self::buffer_size(width, height))?;
        let mut surface = Self {
            registration: None,
            fallback: None,
            buffer,
            device: device.to_owned(),
            height,
            width,
            is_interop_requested: use_interop,
        };

        surface.attach(graphics, use_interop);

        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(
            target: "gausplat::viewer::surface",
            "new > {surface:?}",
        );

        Ok(surface)
    }

    /// Rendering into the color buffer.
    ///
    /// `render` receives the output target of shape `[H, W, 3]`
    /// and returns the rendered colors of the same shape.
    pub fn render_with<F>(
        &mut self,
        graphics: &mut G,
        render: F,
    ) -> Result<(), Error>
    where
        F: FnOnce(Tensor<B, 3>) -> Result<Tensor<B, 3>, Error>,
    {
        let shape = [self.height as usize, self.width as usize, 3];

        if let Some(registration) = self.registration.as_mut() {
            let target = graphics.map_buffer(registration, shape, &self.device)?;
            // NOTE: The buffer is unmapped even if rendering fails.
            let output = render(target.to_owned()).and_then(|colors_rgb_2d| {
                check_shape(&colors_rgb_2d, shape)?;
                Ok(colors_rgb_2d)
            });
            return match output {
                Ok(colors_rgb_2d) => graphics.unmap_buffer(registration, colors_rgb_2d),
                Err(error) => {
                    graphics.unmap_buffer(registration, target)?;
                    Err(error)
                },
            };
        }

        if let Some(fallback) = self.fallback.as_mut() {
            let colors_rgb_2d = render(fallback.colors_rgb_2d.to_owned())?;
            check_shape(&colors_rgb_2d, shape)?;

            let colors_rgb_2d = read_floats(colors_rgb_2d)?;
            fallback.colors_rgb_2d_host.clear();
            fallback
                .colors_rgb_2d_host
                .extend_from_slice(bytemuck::cast_slice(&colors_rgb_2d));
            return graphics.write_buffer(&mut self.buffer, 0, &fallback.colors_rgb_2d_host);
        }

        Err(Error::Graphics("the surface has no render path".into()))
    }

    /// Resizing the color buffer while keeping the mode.
    pub fn resize(
        &mut self,
        graphics: &mut G,
        width: u32,
        height: u32,
    ) -> Result<(), Error> {
        if self.width == width && self.height == height {
            return Ok(());
        }

        let buffer = graphics.create_buffer(Self::buffer_size(width, height))?;

        // NOTE: The registration is released before the buffer it refers to.
        let is_registered = self.registration.take().is_some();
        self.fallback = None;
        self.buffer = buffer;
        self.width = width;
        self.height = height;

        self.attach(graphics, is_registered);

        Ok(())
    }

    /// Registering the color buffer, or allocating the fallback target.
    ///
    /// A failed registration is not fatal.
    fn attach(
        &mut self,
        graphics: &mut G,
        use_interop: bool,
    ) {
        if use_interop {
            match graphics.register_buffer(&self.buffer) {
                Ok(registration) => {
                    self.registration = Some(registration);
                    return;
                },
                Err(error) => log::warn!(
                    target: "gausplat::viewer::surface",
                    "Falling back to the host copy path: {error}",
                ),
            }
        }

        self.fallback = Some(FallbackTarget::new(self.width, self.height, &self.device));
    }

    /// Blitting the color buffer into `target`.
    #[inline]
    pub fn copy_to_target(
        &self,
        graphics: &mut G,
        target: &mut G::Target,
    ) -> Result<(), Error> {
        graphics.copy_to_target(&self.buffer, self.width, self.height, target)
    }

    /// Whether interop was requested but is unavailable.
    #[inline]
    pub fn is_degraded(&self) -> bool {
        self.is_interop_requested && self.registration.is_none()
    }

    /// Whether the color buffer is written by the compute API directly.
    #[inline]
    pub fn is_interop(&self) -> bool {
        self.registration.is_some()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// `[H * W * 3 * 4]`
    #[inline]
    pub const fn buffer_size(
        width: u32,
        height: u32,
    ) -> usize {
        width as usize * height as usize * 3 * size_of::<f32>()
    }
}

impl<B: Backend> FallbackTarget<B> {
    fn new(
        width: u32,
        height: u32,
        device: &B::Device,
    ) -> Self {
        Self {
            colors_rgb_2d: Tensor::zeros([height as usize, width as usize, 3], device),
            colors_rgb_2d_host: Vec::with_capacity(
                width as usize * height as usize * 3 * size_of::<f32>(),
            ),
        }
    }
}

fn check_shape<B: Backend>(
    colors_rgb_2d: &Tensor<B, 3>,
    shape: [usize; 3],
) -> Result<(), Error> {
    if colors_rgb_2d.dims() != shape {
        return Err(Error::Graphics(format!(
            "the rendered shape should be {shape:?}, but got {:?}",
            colors_rgb_2d.dims()
        )));
    }
    Ok(())
}

impl<B: Backend, G: Graphics<B>> fmt::Debug for InteropSurface<B, G> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct(&format!("InteropSurface<{}>", B::name()))
            .field("height", &self.height)
            .field("width", &self.width)
            .field("is_interop", &self.is_interop())
            .field("is_degraded", &self.is_degraded())
            .finish()
    }
}
