//! 3DGS scene export implementation.

pub use super::*;

use bytemuck::{Pod, Zeroable};
use gausplat_loader::function::Encoder;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

/// A stored point of degree 3 in the 3DGS PLY format.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PointRecord {
    pub position: [f32; 3],
    /// Unused
    pub normal: [f32; 3],
    pub colors_sh_dc: [f32; 3],
    /// `[3, M - 1]`
    pub colors_sh_rest: [f32; (SH_COUNT_MAX - 1) * 3],
    pub opacity: f32,
    pub scaling: [f32; 3],
    /// (w, x, y, z)
    pub rotation: [f32; 4],
}

/// Scene exporters
impl Gaussian3dScene {
    /// Export the scene in the 3DGS PLY format.
    ///
    /// The spherical harmonics are always written at degree 3.
    pub fn encode_polygon(
        &self,
        writer: &mut impl Write,
    ) -> Result<(), Error> {
        let writer = &mut BufWriter::new(writer);

        let point_count = self.point_count();

        let mut records = (0..point_count)
            .into_par_iter()
            .map(|index| {
                let (colors_sh_dc, colors_sh_rest) =
                    Self::make_inner_colors_sh(&self.colors_sh[index]);
                PointRecord {
                    position: self.positions[index],
                    normal: [0.0; 3],
                    colors_sh_dc,
                    colors_sh_rest,
                    opacity: Self::make_inner_opacity(self.opacities[index]),
                    scaling: Self::make_inner_scaling(self.scalings[index]),
                    rotation: Self::make_inner_rotation(self.rotations[index]),
                }
            })
            .collect::<Vec<_>>();

        // NOTE: The data format is binary little-endian.
        if cfg!(target_endian = "big") {
            bytemuck::cast_slice_mut::<PointRecord, u32>(&mut records)
                .iter_mut()
                .for_each(|word| *word = word.to_le());
        }

        let mut header = POLYGON_HEADER_3DGS.to_owned();
        // NOTE: The header has the vertex element.
        header.get_mut("vertex").unwrap().count = point_count;
        header.encode(writer)?;

        writer.write_all(bytemuck::cast_slice(&records))?;
        writer.flush()?;

        Ok(())
    }

    /// Export the scene to the 3DGS PLY file at `path`.
    pub fn write_polygon_file(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<(), Error> {
        let path = path.as_ref();

        log::info!(
            target: "gausplat::viewer::gaussian_3d::export",
            "write_polygon_file > path ({}) > point_count ({})",
            path.display(),
            self.point_count(),
        );

        self.encode_polygon(&mut File::create(path)?)
    }
}
