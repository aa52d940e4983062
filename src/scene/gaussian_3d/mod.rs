pub mod export;
pub mod import;
pub mod model;
pub mod morton;
pub mod property;

pub use crate::{
    error::Error,
    spherical_harmonics::{SH_COEF, SH_COUNT_MAX, SH_DEGREE_MAX},
};
pub use export::PointRecord;
pub use gausplat_loader::source::polygon;
pub use model::ModelDirectory;

use crate::spherical_harmonics::sh_count;
use gausplat_loader::function::Decoder;
use humansize::{format_size, BINARY};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use std::{fmt, io::Cursor, sync::LazyLock};

/// The header of the 3DGS PLY format at degree 3 with no point.
pub static POLYGON_HEADER_3DGS: LazyLock<polygon::Header> = LazyLock::new(|| {
    // NOTE: The header text is valid.
    polygon_header_3dgs(SH_DEGREE_MAX).unwrap()
});

const POLYGON_HEADER_3DGS_TEXT: &str = "\
ply
format binary_little_endian 1.0
element vertex 0
property float x
property float y
property float z
property float nx
property float ny
property float nz
property float f_dc_0
property float f_dc_1
property float f_dc_2
property float f_rest_0
property float f_rest_1
property float f_rest_2
property float f_rest_3
property float f_rest_4
property float f_rest_5
property float f_rest_6
property float f_rest_7
property float f_rest_8
property float f_rest_9
property float f_rest_10
property float f_rest_11
property float f_rest_12
property float f_rest_13
property float f_rest_14
property float f_rest_15
property float f_rest_16
property float f_rest_17
property float f_rest_18
property float f_rest_19
property float f_rest_20
property float f_rest_21
property float f_rest_22
property float f_rest_23
property float f_rest_24
property float f_rest_25
property float f_rest_26
property float f_rest_27
property float f_rest_28
property float f_rest_29
property float f_rest_30
property float f_rest_31
property float f_rest_32
property float f_rest_33
property float f_rest_34
property float f_rest_35
property float f_rest_36
property float f_rest_37
property float f_rest_38
property float f_rest_39
property float f_rest_40
property float f_rest_41
property float f_rest_42
property float f_rest_43
property float f_rest_44
property float opacity
property float scale_0
property float scale_1
property float scale_2
property float rot_0
property float rot_1
property float rot_2
property float rot_3
end_header
";

/// The header of the 3DGS PLY format at `colors_sh_degree` with no point.
///
/// The rest coefficients above the degree are left out.
pub fn polygon_header_3dgs(colors_sh_degree: u32) -> Result<polygon::Header, Error> {
    if colors_sh_degree > SH_DEGREE_MAX {
        return Err(Error::Validation(
            format!("colors_sh_degree ({colors_sh_degree})"),
            format!("no more than {SH_DEGREE_MAX}"),
        ));
    }

    let colors_sh_rest_count = (sh_count(colors_sh_degree) - 1) * 3;
    let text = POLYGON_HEADER_3DGS_TEXT
        .lines()
        .filter(|line| match line.strip_prefix("property float f_rest_") {
            Some(index) => index
                .parse::<usize>()
                .is_ok_and(|index| index < colors_sh_rest_count),
            None => true,
        })
        .fold(String::new(), |mut text, line| {
            text.push_str(line);
            text.push('\n');
            text
        });

    Ok(polygon::Header::decode(&mut Cursor::new(text))?)
}

/// A host-resident 3DGS point cloud in structure-of-arrays layout.
///
/// All arrays share one index space of length `P`.
#[derive(Clone, Default, PartialEq)]
pub struct Gaussian3dScene {
    /// `[P, M * 3]`
    ///
    /// Interleaved RGB, coefficients above [`Self::colors_sh_degree`] are zero.
    pub colors_sh: Vec<[f32; SH_COUNT_MAX * 3]>,
    /// The degree of spherical harmonics stored in the source file.
    pub colors_sh_degree: u32,
    /// `[P]`
    pub opacities: Vec<f32>,
    /// `[P, 3]`
    pub positions: Vec<[f32; 3]>,
    /// `[P, 4]` (w, x, y, z)
    pub rotations: Vec<[f32; 4]>,
    /// `[P, 3]`
    pub scalings: Vec<[f32; 3]>,
}

/// An axis-aligned bounding box.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub max: [f32; 3],
    pub min: [f32; 3],
}

impl Gaussian3dScene {
    /// Number of points.
    #[inline]
    pub fn point_count(&self) -> usize {
        let point_count_target = self.positions.len();
        let point_count_other = self.colors_sh.len();
        debug_assert_eq!(point_count_other, point_count_target);
        let point_count_other = self.opacities.len();
        debug_assert_eq!(point_count_other, point_count_target);
        let point_count_other = self.rotations.len();
        debug_assert_eq!(point_count_other, point_count_target);
        let point_count_other = self.scalings.len();
        debug_assert_eq!(point_count_other, point_count_target);

        point_count_target
    }

    /// The bounding box of all positions.
    #[inline]
    pub fn bounds(&self) -> Aabb {
        Aabb::from_positions(&self.positions)
    }

    /// Keeping the points inside `crop_box` (inclusive).
    pub fn crop(
        &self,
        crop_box: &Aabb,
    ) -> Self {
        let indices = self
            .positions
            .iter()
            .enumerate()
            .filter(|(_, position)| crop_box.contains(position))
            .map(|(index, _)| index as u32)
            .collect::<Vec<_>>();

        self.select(&indices)
    }

    /// Gathering the points at `indices` in order.
    pub fn select(
        &self,
        indices: &[u32],
    ) -> Self {
        Self {
            colors_sh: morton::permute(&self.colors_sh, indices),
            colors_sh_degree: self.colors_sh_degree,
            opacities: morton::permute(&self.opacities, indices),
            positions: morton::permute(&self.positions, indices),
            rotations: morton::permute(&self.rotations, indices),
            scalings: morton::permute(&self.scalings, indices),
        }
    }

    /// Size of the attributes in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.point_count() * (SH_COUNT_MAX * 3 + 1 + 3 + 4 + 3) * size_of::<f32>()
    }

    /// Readable size of the attributes.
    #[inline]
    pub fn size_readable(&self) -> String {
        format_size(self.size(), BINARY.decimal_places(1))
    }
}

impl Aabb {
    /// The tightest box around `positions`.
    ///
    /// It is a zero-sized box at the origin if there is no position.
    pub fn from_positions(positions: &[[f32; 3]]) -> Self {
        if positions.is_empty() {
            return Self::default();
        }

        positions
            .par_iter()
            .map(|position| Self {
                max: *position,
                min: *position,
            })
            .reduce(
                || Self {
                    max: [f32::NEG_INFINITY; 3],
                    min: [f32::INFINITY; 3],
                },
                |a, b| Self {
                    max: [0, 1, 2].map(|i| a.max[i].max(b.max[i])),
                    min: [0, 1, 2].map(|i| a.min[i].min(b.min[i])),
                },
            )
    }

    /// Whether every coordinate lies in `[min, max]`.
    #[inline]
    pub fn contains(
        &self,
        position: &[f32; 3],
    ) -> bool {
        (0..3).all(|i| self.min[i] <= position[i] && position[i] <= self.max[i])
    }

    /// `max - min`
    #[inline]
    pub fn extent(&self) -> [f32; 3] {
        [0, 1, 2].map(|i| self.max[i] - self.min[i])
    }

    /// Clamping both corners into `bounds`.
    pub fn clamp_into(
        &self,
        bounds: &Aabb,
    ) -> Self {
        let clamp = |value: f32, i: usize| value.clamp(bounds.min[i], bounds.max[i]);
        Self {
            max: [0, 1, 2].map(|i| clamp(self.max[i], i)),
            min: [0, 1, 2].map(|i| clamp(self.min[i], i)),
        }
    }
}

impl fmt::Debug for Gaussian3dScene {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct("Gaussian3dScene")
            .field("point_count", &self.point_count())
            .field("colors_sh_degree", &self.colors_sh_degree)
            .field("bounds", &self.bounds())
            .field("size", &self.size_readable())
            .finish()
    }
}
