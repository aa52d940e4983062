//! A trained model directory.
//!
//! ```plaintext
//! <model>/
//!     cfg_args
//!     point_cloud/
//!         iteration_<N>/
//!             point_cloud_sibr.ply
//! ```

pub use super::*;

use std::{
    fs,
    path::{Path, PathBuf},
};

/// The arguments file of a trained model.
pub const CONFIG_FILE_NAME: &str = "cfg_args";

/// The point cloud file in each iteration directory.
pub const POINT_CLOUD_FILE_NAME: &str = "point_cloud_sibr.ply";

#[derive(Clone, Debug, PartialEq)]
pub struct ModelDirectory {
    /// The degree of spherical harmonics the model was trained with.
    pub colors_sh_degree: u32,
    pub is_white_background: bool,
    pub path: PathBuf,
    /// The dataset the model was trained on.
    pub source_path: Option<PathBuf>,
}

impl ModelDirectory {
    /// Opening the model directory at `path` and reading its arguments.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_owned();
        let config_path = path.join(CONFIG_FILE_NAME);

        let config = fs::read_to_string(&config_path).map_err(|err| {
            Error::ModelDirectory(format!(
                "cannot read {}: {err}",
                config_path.display()
            ))
        })?;
        // NOTE: Only the first line holds the arguments.
        let config = config.lines().next().unwrap_or_default();

        let colors_sh_degree = find_argument(config, "sh_degree")
            .ok_or_else(|| {
                Error::ModelDirectory(format!("missing sh_degree in {config:?}"))
            })?
            .parse::<u32>()
            .map_err(|err| Error::ModelDirectory(format!("invalid sh_degree: {err}")))?;
        if colors_sh_degree > SH_DEGREE_MAX {
            return Err(Error::Validation(
                format!("sh_degree ({colors_sh_degree})"),
                format!("no more than {SH_DEGREE_MAX}"),
            ));
        }

        let is_white_background = find_argument(config, "white_background")
            .is_some_and(|value| value.contains("True"));

        let source_path = find_argument(config, "source_path")
            .map(|value| value.trim_matches(['\'', '"']))
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        log::info!(
            target: "gausplat::viewer::gaussian_3d::model",
            "open > path ({}) > sh_degree ({colors_sh_degree})",
            path.display(),
        );

        Ok(Self {
            colors_sh_degree,
            is_white_background,
            path,
            source_path,
        })
    }

    /// The path of the point cloud file at `iteration`.
    ///
    /// It chooses the largest numbered iteration if `iteration` is `None`.
    pub fn point_cloud_path(
        &self,
        iteration: Option<u32>,
    ) -> Result<PathBuf, Error> {
        let directory = self.path.join("point_cloud");

        let iteration = match iteration {
            Some(iteration) => iteration,
            None => self.iterations()?.last().copied().ok_or_else(|| {
                Error::ModelDirectory(format!(
                    "no iteration directory in {}",
                    directory.display()
                ))
            })?,
        };

        Ok(directory
            .join(format!("iteration_{iteration}"))
            .join(POINT_CLOUD_FILE_NAME))
    }

    /// The numbers of all iteration directories in ascending order.
    pub fn iterations(&self) -> Result<Vec<u32>, Error> {
        let directory = self.path.join("point_cloud");

        let entries = fs::read_dir(&directory).map_err(|err| {
            Error::ModelDirectory(format!("cannot read {}: {err}", directory.display()))
        })?;

        let mut iterations = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()?
                    .strip_prefix("iteration_")?
                    .parse::<u32>()
                    .ok()
            })
            .collect::<Vec<_>>();
        iterations.sort_unstable();

        Ok(iterations)
    }
}

/// Finding the raw value of `name` in `Namespace(name=value, ...)`.
fn find_argument<'a>(
    line: &'a str,
    name: &str,
) -> Option<&'a str> {
    let pattern = format!("{name}=");
    let start = line
        .match_indices(&pattern)
        .map(|(index, _)| index)
        .find(|&index| {
            line[..index]
                .chars()
                .next_back()
                .map_or(true, |c| !c.is_alphanumeric() && c != '_')
        })?
        + pattern.len();

    let value = &line[start..];
    let end = value.find([',', ')']).unwrap_or(value.len());
    Some(value[..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "Namespace(compute_cov3D_python=False, data_device='cuda', \
        eval=False, images='images', model_path='./output/b2c3', resolution=-1, \
        sh_degree=3, source_path='/data/garden', white_background=True)";

    fn make_directory(
        name: &str,
        config: Option<&str>,
        iterations: &[u32],
    ) -> PathBuf {
        let path = std::env::temp_dir()
            .join(format!("gausplat-viewer-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).unwrap();
        if let Some(config) = config {
            fs::write(path.join(CONFIG_FILE_NAME), format!("{config}\n")).unwrap();
        }
        for iteration in iterations {
            fs::create_dir_all(
                path.join("point_cloud").join(format!("iteration_{iteration}")),
            )
            .unwrap();
        }
        path
    }

    #[test]
    fn find_argument_values() {
        assert_eq!(find_argument(CONFIG, "sh_degree"), Some("3"));
        assert_eq!(find_argument(CONFIG, "white_background"), Some("True"));
        assert_eq!(find_argument(CONFIG, "source_path"), Some("'/data/garden'"));
        assert_eq!(find_argument(CONFIG, "path"), None);
        assert_eq!(find_argument(CONFIG, "missing"), None);
    }

    #[test]
    fn open_and_find_largest_iteration() {
        let path = make_directory("largest", Some(CONFIG), &[7000, 30000, 900]);

        let model = ModelDirectory::open(&path).unwrap();
        assert_eq!(model.colors_sh_degree, 3);
        assert!(model.is_white_background);
        assert_eq!(model.source_path, Some(PathBuf::from("/data/garden")));
        assert_eq!(model.iterations().unwrap(), vec![900, 7000, 30000]);

        let target = path
            .join("point_cloud")
            .join("iteration_30000")
            .join(POINT_CLOUD_FILE_NAME);
        let output = model.point_cloud_path(None).unwrap();
        assert_eq!(output, target);

        let target = path
            .join("point_cloud")
            .join("iteration_7000")
            .join(POINT_CLOUD_FILE_NAME);
        let output = model.point_cloud_path(Some(7000)).unwrap();
        assert_eq!(output, target);

        fs::remove_dir_all(path).unwrap();
    }

    #[test]
    fn open_without_config() {
        let path = make_directory("unconfigured", None, &[]);

        let output = ModelDirectory::open(&path);
        assert!(matches!(output, Err(Error::ModelDirectory(_))), "output: {output:?}");

        fs::remove_dir_all(path).unwrap();
    }

    #[test]
    fn point_cloud_path_without_iteration() {
        let path = make_directory(
            "uniterated",
            Some("Namespace(sh_degree=1, white_background=False)"),
            &[],
        );

        let model = ModelDirectory::open(&path).unwrap();
        assert_eq!(model.colors_sh_degree, 1);
        assert!(!model.is_white_background);
        assert_eq!(model.source_path, None);

        let output = model.point_cloud_path(None);
        assert!(matches!(output, Err(Error::ModelDirectory(_))), "output: {output:?}");

        fs::remove_dir_all(path).unwrap();
    }
}
