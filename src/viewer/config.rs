pub use super::*;

use crate::{
    render::gaussian_3d::TILE_SIZE, scene::gaussian_3d::ModelDirectory,
    spherical_harmonics::SH_DEGREE_MAX,
};
use burn::config::Config;

/// The options of [`GaussianView`].
///
/// It is persisted by the application as JSON.
#[derive(Config, Debug)]
pub struct GaussianViewConfig {
    #[config(default = "SH_DEGREE_MAX")]
    /// It should be no more than [`SH_DEGREE_MAX`].
    pub colors_sh_degree_max: u32,
    #[config(default = 0.2)]
    /// The ellipsoids with lower opacity are not drawn opaquely.
    pub ellipsoid_alpha_limit: f32,
    /// The default destination of export.
    pub export_path: Option<String>,
    #[config(default = true)]
    /// Whether the rasterizer culls with tighter screen extents.
    pub is_fast_culling_enabled: bool,
    #[config(default = false)]
    /// The "don't show again" preference of the interop advisory.
    pub is_interop_advisory_suppressed: bool,
    #[config(default = true)]
    /// Whether the color buffer is shared with the compute API.
    pub is_interop_enabled: bool,
    #[config(default = false)]
    pub is_white_background: bool,
    #[config(default = 1.0)]
    /// It is clamped into `[0.001, 1.0]`.
    pub scaling_modifier: f32,
    #[config(default = "TILE_SIZE")]
    pub tile_size: u32,
    #[config(default = 100.0)]
    pub z_far: f32,
    #[config(default = 0.01)]
    pub z_near: f32,
}

impl GaussianViewConfig {
    /// The options of a trained model.
    pub fn from_model_directory(model: &ModelDirectory) -> Self {
        Self::new()
            .with_colors_sh_degree_max(model.colors_sh_degree)
            .with_is_white_background(model.is_white_background)
    }

    /// `[1, 1, 1]` if white, otherwise `[0, 0, 0]`.
    #[inline]
    pub fn background(&self) -> [f32; 3] {
        if self.is_white_background {
            [1.0; 3]
        } else {
            [0.0; 3]
        }
    }

    /// Checking the options which cannot be clamped.
    pub fn validate(&self) -> Result<(), Error> {
        if self.colors_sh_degree_max > SH_DEGREE_MAX {
            return Err(Error::Validation(
                format!("colors_sh_degree_max ({})", self.colors_sh_degree_max),
                format!("no more than {SH_DEGREE_MAX}"),
            ));
        }
        if self.tile_size == 0 {
            return Err(Error::Validation("tile_size (0)".into(), "positive".into()));
        }
        if !(self.z_near > 0.0 && self.z_near < self.z_far && self.z_far.is_finite()) {
            return Err(Error::Validation(
                format!("z_near ({}) and z_far ({})", self.z_near, self.z_far),
                "finite with 0 < z_near < z_far".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn default_options() {
        use super::*;

        let config = GaussianViewConfig::new();
        assert_eq!(config.colors_sh_degree_max, 3);
        assert_eq!(config.ellipsoid_alpha_limit, 0.2);
        assert_eq!(config.export_path, None);
        assert!(config.is_fast_culling_enabled);
        assert!(!config.is_interop_advisory_suppressed);
        assert!(config.is_interop_enabled);
        assert_eq!(config.background(), [0.0; 3]);
        assert_eq!(config.scaling_modifier, 1.0);
        assert_eq!(config.tile_size, 16);
        assert_eq!(config.z_far, 100.0);
        assert_eq!(config.z_near, 0.01);
        config.validate().unwrap();
    }

    #[test]
    fn invalid_options() {
        use super::*;

        let output = GaussianViewConfig::new().with_colors_sh_degree_max(4).validate();
        assert!(matches!(output, Err(Error::Validation(..))), "output: {output:?}");

        let output = GaussianViewConfig::new().with_tile_size(0).validate();
        assert!(matches!(output, Err(Error::Validation(..))), "output: {output:?}");

        let output = GaussianViewConfig::new().with_z_near(200.0).validate();
        assert!(matches!(output, Err(Error::Validation(..))), "output: {output:?}");

        let output = GaussianViewConfig::new().with_z_near(-1.0).validate();
        assert!(matches!(output, Err(Error::Validation(..))), "output: {output:?}");
    }

    #[test]
    fn save_and_load() {
        use super::*;

        let path = std::env::temp_dir().join(format!(
            "gausplat-viewer-config-{}.json",
            std::process::id()
        ));
        let target = GaussianViewConfig::new()
            .with_export_path(Some("scene.ply".into()))
            .with_is_interop_advisory_suppressed(true)
            .with_scaling_modifier(0.5);
        target.save(&path).unwrap();

        let output = GaussianViewConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(output.export_path.as_deref(), Some("scene.ply"));
        assert!(output.is_interop_advisory_suppressed);
        assert_eq!(output.scaling_modifier, 0.5);
    }

    #[test]
    fn from_model_directory() {
        use super::*;

        let model = ModelDirectory {
            colors_sh_degree: 1,
            is_white_background: true,
            path: "model".into(),
            source_path: None,
        };
        let config = GaussianViewConfig::from_model_directory(&model);
        assert_eq!(config.colors_sh_degree_max, 1);
        assert_eq!(config.background(), [1.0; 3]);
    }
}
