//! The presentation of one 3DGS scene in several modes.

pub mod config;

pub use crate::{
    error::Error,
    render::{
        gaussian_3d::{
            Backend, Gaussian3dDeviceBuffers, Gaussian3dRasterizer, ScratchBuffers, Tensor,
        },
        surface::{Graphics, InteropSurface},
        View,
    },
    scene::gaussian_3d::{Aabb, Gaussian3dScene},
};
pub use config::GaussianViewConfig;

use crate::spherical_harmonics;
use std::{
    fmt,
    fs::File,
    io::Write,
    path::Path,
};

/// The message shown once when the color buffer cannot be shared.
pub const INTEROP_ADVISORY: &str = "The graphics device cannot share memory with the compute \
     device, so each frame is copied through the host. Rendering may be slow.";

/// The maximum of the scaling modifier.
pub const SCALING_MODIFIER_MAX: f32 = 1.0;

/// The minimum of the scaling modifier.
pub const SCALING_MODIFIER_MIN: f32 = 0.001;

/// A view on the production compute backend.
pub type WgpuGaussianView<R, G> = GaussianView<crate::backend::Wgpu, R, G>;

/// How the points are presented.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum RenderMode {
    /// Blending the 3D Gaussians by the rasterizer.
    #[default]
    Splats,
    /// Drawing each position with its base color.
    Points,
    /// Drawing each point as a shaded ellipsoid.
    Ellipsoids,
}

/// A 3DGS scene on the device with its presentation state.
pub struct GaussianView<B: Backend, R, G: Graphics<B>> {
    bounds: Aabb,
    buffers: Gaussian3dDeviceBuffers<B>,
    config: GaussianViewConfig,
    crop_box: Aabb,
    ellipsoids: G::Ellipsoids,
    is_cropping: bool,
    is_interop_advisory_acknowledged: bool,
    mode: RenderMode,
    points: G::Points,
    rasterizer: R,
    scaling_modifier: f32,
    scratch: ScratchBuffers<B>,
    surface: InteropSurface<B, G>,
}

impl<B, R, G> GaussianView<B, R, G>
where
    B: Backend,
    R: Gaussian3dRasterizer<B>,
    G: Graphics<B>,
{
    /// Uploading `scene` and creating the surface of `width * height` pixels.
    pub fn new(
        scene: &Gaussian3dScene,
        config: GaussianViewConfig,
        rasterizer: R,
        graphics: &mut G,
        width: u32,
        height: u32,
        device: &B::Device,
    ) -> Result<Self, Error> {
        config.validate()?;

        let mut buffers = Gaussian3dDeviceBuffers::upload(scene, config.background(), device);
        buffers.colors_sh_degree = scene.colors_sh_degree.min(config.colors_sh_degree_max);

        let colors_rgb = scene
            .colors_sh
            .iter()
            .map(|colors_sh| spherical_harmonics::evaluate(colors_sh, 0, [0.0; 3]))
            .collect::<Vec<_>>();
        let points = graphics.create_points(&scene.positions, &colors_rgb)?;
        let ellipsoids = graphics.create_ellipsoids(scene)?;
        let surface =
            InteropSurface::new(graphics, width, height, config.is_interop_enabled, device)?;

        let bounds = scene.bounds();
        let scaling_modifier = config
            .scaling_modifier
            .clamp(SCALING_MODIFIER_MIN, SCALING_MODIFIER_MAX);

        log::info!(
            target: "gausplat::viewer::view",
            "new > point_count ({}) > size ({}) > is_interop ({})",
            buffers.point_count(),
            buffers.size_readable(),
            surface.is_interop(),
        );

        Ok(Self {
            bounds,
            buffers,
            config,
            crop_box: bounds,
            ellipsoids,
            is_cropping: false,
            is_interop_advisory_acknowledged: false,
            mode: RenderMode::default(),
            points,
            rasterizer,
            scaling_modifier,
            scratch: ScratchBuffers::new(device),
            surface,
        })
    }

    /// Rendering the scene from `view` into `target` in the current mode.
    ///
    /// The surface is resized to the image size of `view` if needed.
    pub fn render(
        &mut self,
        graphics: &mut G,
        view: &View,
        target: &mut G::Target,
    ) -> Result<(), Error> {
        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(
            target: "gausplat::viewer::view",
            "render > mode ({:?}) > view_id ({})",
            self.mode,
            view.view_id,
        );

        match self.mode {
            RenderMode::Points => {
                graphics.clear_target(target, self.config.background())?;
                graphics.draw_points(&self.points, view, target)
            },
            RenderMode::Ellipsoids => {
                graphics.clear_target(target, self.config.background())?;
                graphics.draw_ellipsoids(
                    &self.ellipsoids,
                    view,
                    self.config.ellipsoid_alpha_limit,
                    self.scaling_modifier,
                    target,
                )
            },
            RenderMode::Splats => self.render_splats(graphics, view, target),
        }
    }

    fn render_splats(
        &mut self,
        graphics: &mut G,
        view: &View,
        target: &mut G::Target,
    ) -> Result<(), Error> {
        if (self.surface.width(), self.surface.height())
            != (view.image_width, view.image_height)
        {
            self.surface
                .resize(graphics, view.image_width, view.image_height)?;
        }

        self.buffers
            .upload_view(view, self.config.z_near, self.config.z_far)?;

        let mut input = self.buffers.rasterize_input(
            view,
            self.scaling_modifier,
            self.config.tile_size,
            self.config.z_near,
        );
        if self.is_cropping {
            input.crop_box = Some(self.crop_box);
        }
        if self.config.is_fast_culling_enabled {
            input.point_rects = Some(self.buffers.point_rects.to_owned());
        }

        let rasterizer = &mut self.rasterizer;
        let scratch = &mut self.scratch;
        let mut point_rects = None;
        let output = self.surface.render_with(graphics, |colors_rgb_2d| {
            #[cfg(debug_assertions)]
            check_rasterizer::<B, R>(rasterizer)?;

            let output = rasterizer.rasterize_forward(scratch, input, colors_rgb_2d)?;

            #[cfg(debug_assertions)]
            check_rasterizer::<B, R>(rasterizer)?;

            point_rects = output.point_rects;
            Ok(output.colors_rgb_2d)
        });

        // NOTE: The error channel is checked once per frame in all builds,
        // even if the frame failed.
        check_rasterizer::<B, R>(&mut self.rasterizer)?;
        output?;

        if let Some(point_rects) = point_rects {
            self.buffers.point_rects = point_rects;
        }

        self.surface.copy_to_target(graphics, target)
    }

    /// Resizing the surface.
    #[inline]
    pub fn resize(
        &mut self,
        graphics: &mut G,
        width: u32,
        height: u32,
    ) -> Result<(), Error> {
        self.surface.resize(graphics, width, height)
    }

    /// Exporting the points inside the crop box to the 3DGS PLY file at `path`.
    ///
    /// It returns the number of exported points.
    pub fn export(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<usize, Error> {
        let path = path.as_ref();
        let point_count = self.export_to(&mut File::create(path)?)?;

        log::info!(
            target: "gausplat::viewer::view",
            "export > path ({}) > point_count ({point_count})",
            path.display(),
        );

        Ok(point_count)
    }

    /// Exporting to the path in the configuration.
    pub fn export_to_configured_path(&self) -> Result<usize, Error> {
        let path = self.config.export_path.as_ref().ok_or_else(|| {
            Error::Validation("export_path".into(), "configured".into())
        })?;
        self.export(path)
    }

    /// Exporting the points inside the crop box in the 3DGS PLY format.
    ///
    /// It returns the number of exported points.
    pub fn export_to(
        &self,
        writer: &mut impl Write,
    ) -> Result<usize, Error> {
        let scene = self.buffers.download()?.crop(&self.crop_box);
        scene.encode_polygon(writer)?;
        Ok(scene.point_count())
    }
}

/// Presentation states
impl<B: Backend, R, G: Graphics<B>> GaussianView<B, R, G> {
    #[inline]
    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    #[inline]
    pub fn set_mode(
        &mut self,
        mode: RenderMode,
    ) -> &mut Self {
        self.mode = mode;
        self
    }

    /// The bounding box of all positions.
    #[inline]
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    #[inline]
    pub fn crop_box(&self) -> Aabb {
        self.crop_box
    }

    #[inline]
    pub fn is_cropping(&self) -> bool {
        self.is_cropping
    }

    /// Whether the rasterizer culls the points outside the crop box.
    #[inline]
    pub fn set_cropping(
        &mut self,
        is_cropping: bool,
    ) -> &mut Self {
        self.is_cropping = is_cropping;
        self
    }

    pub fn set_crop_min_x(
        &mut self,
        value: f32,
    ) -> &mut Self {
        self.set_crop(0, false, value)
    }

    pub fn set_crop_min_y(
        &mut self,
        value: f32,
    ) -> &mut Self {
        self.set_crop(1, false, value)
    }

    pub fn set_crop_min_z(
        &mut self,
        value: f32,
    ) -> &mut Self {
        self.set_crop(2, false, value)
    }

    pub fn set_crop_max_x(
        &mut self,
        value: f32,
    ) -> &mut Self {
        self.set_crop(0, true, value)
    }

    pub fn set_crop_max_y(
        &mut self,
        value: f32,
    ) -> &mut Self {
        self.set_crop(1, true, value)
    }

    pub fn set_crop_max_z(
        &mut self,
        value: f32,
    ) -> &mut Self {
        self.set_crop(2, true, value)
    }

    /// Setting one corner coordinate clamped into the scene bounds.
    fn set_crop(
        &mut self,
        axis: usize,
        is_max: bool,
        value: f32,
    ) -> &mut Self {
        let value = if value.is_nan() {
            self.bounds.min[axis]
        } else {
            value
        };
        if is_max {
            self.crop_box.max[axis] = value;
        } else {
            self.crop_box.min[axis] = value;
        }
        self.crop_box = self.crop_box.clamp_into(&self.bounds);
        self
    }

    #[inline]
    pub fn scaling_modifier(&self) -> f32 {
        self.scaling_modifier
    }

    /// Setting the scaling modifier clamped into `[0.001, 1.0]`.
    pub fn set_scaling_modifier(
        &mut self,
        scaling_modifier: f32,
    ) -> &mut Self {
        self.scaling_modifier = if scaling_modifier.is_nan() {
            SCALING_MODIFIER_MAX
        } else {
            scaling_modifier.clamp(SCALING_MODIFIER_MIN, SCALING_MODIFIER_MAX)
        };
        self
    }

    /// The one-time message while the surface is degraded.
    pub fn interop_advisory(&self) -> Option<&'static str> {
        (self.surface.is_degraded()
            && !self.is_interop_advisory_acknowledged
            && !self.config.is_interop_advisory_suppressed)
            .then_some(INTEROP_ADVISORY)
    }

    /// Acknowledging the advisory, and suppressing it in the configuration
    /// if `is_dont_show_again` is `true`.
    pub fn acknowledge_interop_advisory(
        &mut self,
        is_dont_show_again: bool,
    ) -> &mut Self {
        self.is_interop_advisory_acknowledged = true;
        if is_dont_show_again {
            self.config.is_interop_advisory_suppressed = true;
        }
        self
    }

    #[inline]
    pub fn config(&self) -> &GaussianViewConfig {
        &self.config
    }

    #[inline]
    pub fn is_degraded(&self) -> bool {
        self.surface.is_degraded()
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.buffers.point_count()
    }

    #[inline]
    pub fn scratch(&self) -> &ScratchBuffers<B> {
        &self.scratch
    }
}

fn check_rasterizer<B: Backend, R: Gaussian3dRasterizer<B>>(
    rasterizer: &mut R
) -> Result<(), Error> {
    match rasterizer.take_error() {
        Some(error) => Err(Error::Rasterizer(error)),
        None => Ok(()),
    }
}

impl<B: Backend, R, G: Graphics<B>> fmt::Debug for GaussianView<B, R, G> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct(&format!("GaussianView<{}>", B::name()))
            .field("buffers", &self.buffers)
            .field("crop_box", &self.crop_box)
            .field("is_cropping", &self.is_cropping)
            .field("mode", &self.mode)
            .field("scaling_modifier", &self.scaling_modifier)
            .field("scratch", &self.scratch)
            .field("surface", &self.surface)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        render::{
            gaussian_3d::{HostRasterizer, RasterizeInput, RasterizeOutput},
            surface::{HostGraphics, HostImage},
        },
        spherical_harmonics::{SH_COEF, SH_COUNT_MAX},
    };
    use burn::backend::NdArray;
    use std::io::Cursor;

    type B = NdArray<f32>;

    /// A rasterizer whose device work always fails.
    #[derive(Default)]
    struct FailingRasterizer {
        inner: HostRasterizer,
        error: Option<String>,
    }

    impl Gaussian3dRasterizer<B> for FailingRasterizer {
        fn rasterize_forward(
            &mut self,
            scratch: &mut ScratchBuffers<B>,
            input: RasterizeInput<B>,
            colors_rgb_2d: Tensor<B, 3>,
        ) -> Result<RasterizeOutput<B>, Error> {
            self.error = Some("out of memory".into());
            self.inner.rasterize_forward(scratch, input, colors_rgb_2d)
        }

        fn take_error(&mut self) -> Option<String> {
            self.error.take()
        }
    }

    /// A rasterizer whose first frame fails with a pending error.
    #[derive(Default)]
    struct FlakyRasterizer {
        inner: HostRasterizer,
        error: Option<String>,
        frame_count: usize,
    }

    impl Gaussian3dRasterizer<B> for FlakyRasterizer {
        fn rasterize_forward(
            &mut self,
            scratch: &mut ScratchBuffers<B>,
            input: RasterizeInput<B>,
            colors_rgb_2d: Tensor<B, 3>,
        ) -> Result<RasterizeOutput<B>, Error> {
            self.frame_count += 1;
            if self.frame_count == 1 {
                self.error = Some("device lost".into());
                return Err(Error::Rasterizer("launch failed".into()));
            }
            self.inner.rasterize_forward(scratch, input, colors_rgb_2d)
        }

        fn take_error(&mut self) -> Option<String> {
            self.error.take()
        }
    }

    fn make_view() -> View {
        View {
            field_of_view_x: std::f64::consts::FRAC_PI_2,
            field_of_view_y: std::f64::consts::FRAC_PI_2,
            image_height: 16,
            image_width: 16,
            view_transform: View::transform(
                &[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
                &[0.0, 0.0, 0.0],
            ),
            ..Default::default()
        }
    }

    /// Three points in front of the view, sorted as if imported.
    fn make_scene() -> Gaussian3dScene {
        let colors = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let source = Gaussian3dScene {
            colors_sh: colors
                .iter()
                .map(|color| {
                    let mut colors_sh = [0.0; SH_COUNT_MAX * 3];
                    for channel in 0..3 {
                        colors_sh[channel] = (color[channel] - 0.5) / SH_COEF.0[0] as f32;
                    }
                    colors_sh[4] = 0.125;
                    colors_sh
                })
                .collect(),
            colors_sh_degree: 3,
            opacities: vec![0.9, 0.5, 0.25],
            positions: vec![[0.0, 0.0, 5.0], [1.0, 1.0, 6.0], [-1.0, -0.5, 8.0]],
            rotations: vec![[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.5; 4]],
            scalings: vec![[0.1; 3], [0.2, 0.1, 0.05], [0.3; 3]],
        };

        let mut bytes = vec![];
        source.encode_polygon(&mut bytes).unwrap();
        Gaussian3dScene::decode_polygon(&mut Cursor::new(bytes), 3).unwrap()
    }

    fn make_gaussian_view<R: Gaussian3dRasterizer<B>>(
        graphics: &mut HostGraphics,
        config: GaussianViewConfig,
        rasterizer: R,
    ) -> GaussianView<B, R, HostGraphics> {
        GaussianView::new(
            &make_scene(),
            config,
            rasterizer,
            graphics,
            16,
            16,
            &Default::default(),
        )
        .unwrap()
    }

    #[test]
    fn render_splats_with_or_without_interop() {
        let mut graphics = HostGraphics::new(true);

        let images = [true, false].map(|is_interop_enabled| {
            let config = GaussianViewConfig::new().with_is_interop_enabled(is_interop_enabled);
            let mut view = make_gaussian_view(&mut graphics, config, HostRasterizer::new());
            assert_eq!(view.mode(), RenderMode::Splats);
            assert!(!view.is_degraded());

            let mut image = HostImage::new(16, 16);
            view.render(&mut graphics, &make_view(), &mut image).unwrap();
            image
        });

        let [target, output] = &images;
        assert_eq!(output, target);
        assert!(target.pixel(7, 7)[0] > 0.3, "target: {:?}", target.pixel(7, 7));
        assert_eq!(target.pixel(0, 15), [0.0; 3]);
    }

    #[test]
    fn render_splats_resizes_surface() {
        let mut graphics = HostGraphics::new(true);
        let mut view =
            make_gaussian_view(&mut graphics, GaussianViewConfig::new(), HostRasterizer::new());

        let mut camera = make_view();
        camera.image_width = 8;
        camera.image_height = 4;
        let mut image = HostImage::new(8, 4);
        view.render(&mut graphics, &camera, &mut image).unwrap();

        let mut image = HostImage::new(16, 16);
        let output = view.render(&mut graphics, &camera, &mut image);
        assert!(matches!(output, Err(Error::Graphics(_))), "output: {output:?}");
    }

    #[test]
    fn render_points_and_ellipsoids() {
        let mut graphics = HostGraphics::new(true);
        let config = GaussianViewConfig::new().with_is_white_background(true);
        let mut view = make_gaussian_view(&mut graphics, config, HostRasterizer::new());

        view.set_mode(RenderMode::Points);
        assert_eq!(view.mode(), RenderMode::Points);
        let mut image = HostImage::new(16, 16);
        view.render(&mut graphics, &make_view(), &mut image).unwrap();
        let colored_count = image.colors_rgb.iter().filter(|c| **c != [1.0; 3]).count();
        assert_eq!(colored_count, 3);

        view.set_mode(RenderMode::Ellipsoids);
        let mut image = HostImage::new(17, 17);
        view.render(&mut graphics, &make_view(), &mut image).unwrap();
        // Only the opaque red one is drawn at the center.
        let center = image.pixel(8, 8);
        assert!(center[0] > 0.1 && center[1] < 1e-6, "center: {center:?}");
        assert_eq!(image.pixel(0, 0), [1.0; 3]);

        // The mode changes have no side effects.
        view.set_mode(RenderMode::Splats);
        assert_eq!(view.scratch().capacity(), 0);
    }

    #[test]
    fn render_with_failing_rasterizer() {
        let mut graphics = HostGraphics::new(true);
        let mut view = make_gaussian_view(
            &mut graphics,
            GaussianViewConfig::new(),
            FailingRasterizer::default(),
        );

        let mut image = HostImage::new(16, 16);
        let output = view.render(&mut graphics, &make_view(), &mut image);
        assert!(matches!(output, Err(Error::Rasterizer(_))), "output: {output:?}");
    }

    #[test]
    fn render_reports_errors_of_failed_frame() {
        let mut graphics = HostGraphics::new(true);
        let mut view = make_gaussian_view(
            &mut graphics,
            GaussianViewConfig::new(),
            FlakyRasterizer::default(),
        );
        let mut image = HostImage::new(16, 16);

        let output = view.render(&mut graphics, &make_view(), &mut image);
        assert!(matches!(output, Err(Error::Rasterizer(_))), "output: {output:?}");
        assert_eq!(view.rasterizer.error, None);

        view.render(&mut graphics, &make_view(), &mut image).unwrap();
        assert!(image.pixel(7, 7)[0] > 0.3, "center: {:?}", image.pixel(7, 7));
    }

    #[test]
    fn render_splats_degraded_matches_interop() {
        let images = [true, false].map(|is_interop_supported| {
            let mut graphics = HostGraphics::new(is_interop_supported);
            let mut view = make_gaussian_view(
                &mut graphics,
                GaussianViewConfig::new(),
                HostRasterizer::new(),
            );
            assert_eq!(view.is_degraded(), !is_interop_supported);

            let mut image = HostImage::new(16, 16);
            view.render(&mut graphics, &make_view(), &mut image).unwrap();
            image
        });

        let [target, output] = &images;
        assert_eq!(output, target);
        assert!(target.pixel(7, 7)[0] > 0.3, "target: {:?}", target.pixel(7, 7));
    }

    #[test]
    fn render_splats_after_failed_registration_on_resize() {
        let mut camera = make_view();
        camera.image_width = 12;
        camera.image_height = 10;

        let mut graphics = HostGraphics::new(true);
        let mut view =
            make_gaussian_view(&mut graphics, GaussianViewConfig::new(), HostRasterizer::new());
        let mut target = HostImage::new(12, 10);
        view.render(&mut graphics, &camera, &mut target).unwrap();

        let mut view =
            make_gaussian_view(&mut graphics, GaussianViewConfig::new(), HostRasterizer::new());
        assert!(!view.is_degraded());

        let mut graphics = HostGraphics::new(false);
        let mut output = HostImage::new(12, 10);
        view.render(&mut graphics, &camera, &mut output).unwrap();
        assert!(view.is_degraded());
        assert_eq!(view.interop_advisory(), Some(INTEROP_ADVISORY));
        assert_eq!(output, target);

        view.resize(&mut graphics, 12, 10).unwrap();
        view.render(&mut graphics, &camera, &mut output).unwrap();
        assert_eq!(output, target);
    }

    #[test]
    fn render_with_non_finite_view() {
        let mut graphics = HostGraphics::new(true);
        let mut view =
            make_gaussian_view(&mut graphics, GaussianViewConfig::new(), HostRasterizer::new());

        let mut camera = make_view();
        camera.view_position[1] = f64::NAN;
        let mut image = HostImage::new(16, 16);
        let output = view.render(&mut graphics, &camera, &mut image);
        assert!(matches!(output, Err(Error::Validation(..))), "output: {output:?}");
    }

    #[test]
    fn scratch_stable_across_frames() {
        let mut graphics = HostGraphics::new(true);
        let mut view =
            make_gaussian_view(&mut graphics, GaussianViewConfig::new(), HostRasterizer::new());
        let mut image = HostImage::new(16, 16);

        view.render(&mut graphics, &make_view(), &mut image).unwrap();
        let allocation_ids = [
            view.scratch().binning.allocation_id(),
            view.scratch().geometry.allocation_id(),
            view.scratch().image.allocation_id(),
        ];
        let capacity = view.scratch().capacity();
        assert!(allocation_ids.iter().all(|id| *id != 0));

        view.render(&mut graphics, &make_view(), &mut image).unwrap();
        assert_eq!(view.scratch().binning.allocation_id(), allocation_ids[0]);
        assert_eq!(view.scratch().geometry.allocation_id(), allocation_ids[1]);
        assert_eq!(view.scratch().image.allocation_id(), allocation_ids[2]);
        assert_eq!(view.scratch().capacity(), capacity);
    }

    #[test]
    fn crop_setters_clamp() {
        let mut graphics = HostGraphics::new(true);
        let mut view =
            make_gaussian_view(&mut graphics, GaussianViewConfig::new(), HostRasterizer::new());

        let bounds = view.bounds();
        assert_eq!(bounds.min, [-1.0, -0.5, 5.0]);
        assert_eq!(bounds.max, [1.0, 1.0, 8.0]);
        assert_eq!(view.crop_box(), bounds);
        assert!(!view.is_cropping());

        view.set_crop_min_x(-10.0)
            .set_crop_max_x(0.5)
            .set_crop_min_y(0.0)
            .set_crop_max_y(10.0)
            .set_crop_min_z(f32::NAN)
            .set_crop_max_z(6.0)
            .set_cropping(true);
        let output = view.crop_box();
        assert_eq!(output.min, [-1.0, 0.0, 5.0]);
        assert_eq!(output.max, [0.5, 1.0, 6.0]);
        assert!(view.is_cropping());

        view.set_scaling_modifier(0.0);
        assert_eq!(view.scaling_modifier(), SCALING_MODIFIER_MIN);
        view.set_scaling_modifier(2.0);
        assert_eq!(view.scaling_modifier(), SCALING_MODIFIER_MAX);
        view.set_scaling_modifier(0.5);
        assert_eq!(view.scaling_modifier(), 0.5);
    }

    #[test]
    fn render_with_crop_box() {
        let mut graphics = HostGraphics::new(true);
        let mut view =
            make_gaussian_view(&mut graphics, GaussianViewConfig::new(), HostRasterizer::new());

        view.set_crop_min_z(6.0).set_cropping(true);
        let mut image = HostImage::new(16, 16);
        view.render(&mut graphics, &make_view(), &mut image).unwrap();
        // The red one at the center is culled.
        assert!(image.pixel(7, 7)[0] < 1e-3, "center: {:?}", image.pixel(7, 7));
    }

    #[test]
    fn export_round_trip() {
        let mut graphics = HostGraphics::new(true);
        let view =
            make_gaussian_view(&mut graphics, GaussianViewConfig::new(), HostRasterizer::new());

        let mut bytes = vec![];
        let point_count = view.export_to(&mut bytes).unwrap();
        assert_eq!(point_count, 3);

        let target = make_scene();
        let output = Gaussian3dScene::decode_polygon(&mut Cursor::new(bytes), 3).unwrap();
        assert_eq!(output.point_count(), target.point_count());
        assert_eq!(output.positions, target.positions);
        for index in 0..point_count {
            let (output, target) = (output.opacities[index], target.opacities[index]);
            assert!((output - target).abs() < 1e-5, "{output} != {target}");
        }
        let pairs = output
            .colors_sh
            .iter()
            .flatten()
            .zip(target.colors_sh.iter().flatten())
            .chain(output.rotations.iter().flatten().zip(target.rotations.iter().flatten()))
            .chain(output.scalings.iter().flatten().zip(target.scalings.iter().flatten()));
        for (output, target) in pairs {
            assert!((output - target).abs() < 1e-5, "{output} != {target}");
        }
    }

    #[test]
    fn export_cropped() {
        let mut graphics = HostGraphics::new(true);
        let mut view =
            make_gaussian_view(&mut graphics, GaussianViewConfig::new(), HostRasterizer::new());
        view.set_crop_max_z(6.0);

        let mut bytes = vec![];
        let point_count = view.export_to(&mut bytes).unwrap();
        assert_eq!(point_count, 2);

        let output = Gaussian3dScene::decode_polygon(&mut Cursor::new(bytes), 3).unwrap();
        assert_eq!(output.point_count(), 2);
        assert!(output.positions.iter().all(|p| p[2] <= 6.0));

        let output = view.export_to_configured_path();
        assert!(matches!(output, Err(Error::Validation(..))), "output: {output:?}");
    }

    #[test]
    fn interop_advisory_once() {
        let mut graphics = HostGraphics::new(false);
        let mut view =
            make_gaussian_view(&mut graphics, GaussianViewConfig::new(), HostRasterizer::new());
        assert!(view.is_degraded());
        assert_eq!(view.interop_advisory(), Some(INTEROP_ADVISORY));

        view.acknowledge_interop_advisory(false);
        assert_eq!(view.interop_advisory(), None);
        assert!(!view.config().is_interop_advisory_suppressed);

        let mut view =
            make_gaussian_view(&mut graphics, GaussianViewConfig::new(), HostRasterizer::new());
        view.acknowledge_interop_advisory(true);
        assert!(view.config().is_interop_advisory_suppressed);

        let config = GaussianViewConfig::new().with_is_interop_advisory_suppressed(true);
        let view = make_gaussian_view(&mut graphics, config, HostRasterizer::new());
        assert_eq!(view.interop_advisory(), None);

        let mut graphics = HostGraphics::new(true);
        let view =
            make_gaussian_view(&mut graphics, GaussianViewConfig::new(), HostRasterizer::new());
        assert_eq!(view.interop_advisory(), None);
    }

    #[test]
    fn handles_released_on_drop() {
        let mut graphics = HostGraphics::new(true);
        {
            let _view = make_gaussian_view(
                &mut graphics,
                GaussianViewConfig::new(),
                HostRasterizer::new(),
            );
            // The points, the ellipsoids, the buffer and its registration
            assert_eq!(graphics.live_allocation_count(), 4);
        }
        assert_eq!(graphics.live_allocation_count(), 0);
    }
}
