//! 3DGS scene import implementation.

pub use super::*;

use crate::spherical_harmonics::sh_count;
use gausplat_loader::function::DecoderWith;
use rayon::{
    iter::{IntoParallelIterator, IntoParallelRefIterator, ParallelIterator},
    slice::ParallelSlice,
};
use std::{
    fs::File,
    io::{BufRead, BufReader, Cursor, Read},
    mem::take,
    path::Path,
};

/// The line ending the polygon header.
pub const POLYGON_HEADER_END: &str = "end_header";

/// Scene importers
impl Gaussian3dScene {
    /// Import the scene in the 3DGS PLY format.
    ///
    /// The points are reordered along the Morton curve of their bounding box
    /// and their properties are activated.
    pub fn decode_polygon(
        reader: &mut impl Read,
        colors_sh_degree: u32,
    ) -> Result<Self, Error> {
        #[cfg(all(debug_assertions, not(test)))]
        let duration = std::time::Instant::now();

        if colors_sh_degree > SH_DEGREE_MAX {
            return Err(Error::Validation(
                format!("colors_sh_degree ({colors_sh_degree})"),
                format!("no more than {SH_DEGREE_MAX}"),
            ));
        }

        let reader = &mut BufReader::new(reader);

        // P
        let point_count = decode_polygon_header(reader)?;

        log::info!(
            target: "gausplat::viewer::gaussian_3d::import",
            "decode_polygon > point_count ({point_count})",
        );

        // S
        let colors_sh_count = sh_count(colors_sh_degree);
        // 14 + 3 * S
        let record_size = (14 + 3 * colors_sh_count) * size_of::<f32>();
        let payload_size = point_count
            .checked_mul(record_size)
            .ok_or_else(|| {
                Error::MismatchedPolygonHeader3DGS(format!(
                    "point count ({point_count}) is too large"
                ))
            })?;

        let mut payload = vec![];
        reader
            .take(payload_size as u64)
            .read_to_end(&mut payload)?;
        if payload.len() < payload_size {
            return Err(Error::TruncatedPolygonPayload {
                expected: point_count,
                actual: payload.len() / record_size,
            });
        }

        let mut header = polygon_header_3dgs(colors_sh_degree)?;
        // NOTE: The header has the vertex element.
        header.get_mut("vertex").unwrap().count = point_count;
        let payload =
            polygon::Payload::decode_with(&mut Cursor::new(payload), &header)?;
        let mut object = polygon::Object { header, payload };

        // [P]
        let mut take_values = |name: &str| -> Vec<f32> {
            // NOTE: The property is in the header.
            let data = object.elem_prop_mut("vertex", name).unwrap().data;
            take(data)
                .par_chunks_exact(size_of::<f32>())
                .map(bytemuck::pod_read_unaligned)
                .collect()
        };

        // [3, P]
        let colors_sh_dc = [0, 1, 2].map(|i| take_values(&format!("f_dc_{i}")));
        // [3 * (S - 1), P]
        let colors_sh_rest = (0..(colors_sh_count - 1) * 3)
            .map(|i| take_values(&format!("f_rest_{i}")))
            .collect::<Vec<_>>();
        let opacities = take_values("opacity");
        let positions = ["x", "y", "z"].map(&mut take_values);
        let rotations = [0, 1, 2, 3].map(|i| take_values(&format!("rot_{i}")));
        let scalings = [0, 1, 2].map(|i| take_values(&format!("scale_{i}")));

        // [P, 3]
        let positions = (0..point_count)
            .into_par_iter()
            .map(|index| positions.each_ref().map(|values| values[index]))
            .collect::<Vec<_>>();
        let bounds = Aabb::from_positions(&positions);
        // [P]
        let indices = morton::reorder_indices(&positions, &bounds);

        let scene = Self {
            colors_sh: indices
                .par_iter()
                .map(|&index| {
                    let index = index as usize;
                    let colors_sh_dc =
                        colors_sh_dc.each_ref().map(|values| values[index]);
                    let colors_sh_rest = colors_sh_rest
                        .iter()
                        .map(|values| values[index])
                        .collect::<Vec<_>>();
                    Self::make_colors_sh(
                        &colors_sh_dc,
                        &colors_sh_rest,
                        colors_sh_degree,
                    )
                })
                .collect(),
            colors_sh_degree,
            opacities: indices
                .par_iter()
                .map(|&index| Self::make_opacity(opacities[index as usize]))
                .collect(),
            positions: morton::permute(&positions, &indices),
            rotations: indices
                .par_iter()
                .map(|&index| {
                    let index = index as usize;
                    Self::make_rotation(rotations.each_ref().map(|values| values[index]))
                })
                .collect(),
            scalings: indices
                .par_iter()
                .map(|&index| {
                    let index = index as usize;
                    Self::make_scaling(scalings.each_ref().map(|values| values[index]))
                })
                .collect(),
        };

        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(
            target: "gausplat::viewer::gaussian_3d::import",
            "decode_polygon > duration ({:?}) > size ({})",
            duration.elapsed(),
            scene.size_readable(),
        );

        Ok(scene)
    }

    /// Import the scene from the 3DGS PLY file at `path`.
    pub fn read_polygon_file(
        path: impl AsRef<Path>,
        colors_sh_degree: u32,
    ) -> Result<Self, Error> {
        let path = path.as_ref();

        log::info!(
            target: "gausplat::viewer::gaussian_3d::import",
            "read_polygon_file > path ({})",
            path.display(),
        );

        Self::decode_polygon(&mut File::open(path)?, colors_sh_degree)
    }
}

/// Reading the header lines and returning the point count.
///
/// ```plaintext
/// <free-form line>
/// <free-form line>
/// ... <point count>
/// <property line> ...
/// end_header
/// ```
fn decode_polygon_header(reader: &mut impl BufRead) -> Result<usize, Error> {
    let mut line = String::new();
    let mut read_line = |line: &mut String| -> Result<bool, Error> {
        line.clear();
        let is_eof = reader.read_line(line)? == 0;
        let len = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(len);
        Ok(!is_eof)
    };

    for index in 0..2 {
        if !read_line(&mut line)? {
            return Err(Error::MismatchedPolygonHeader3DGS(format!(
                "missing header line {index}"
            )));
        }
    }

    if !read_line(&mut line)? {
        return Err(Error::MismatchedPolygonHeader3DGS(
            "missing element line".into(),
        ));
    }
    let point_count = line
        .split_whitespace()
        .last()
        .and_then(|count| count.parse::<usize>().ok())
        .ok_or_else(|| {
            Error::MismatchedPolygonHeader3DGS(format!(
                "unparsable point count in {line:?}"
            ))
        })?;

    loop {
        if !read_line(&mut line)? {
            return Err(Error::MismatchedPolygonHeader3DGS(format!(
                "missing {POLYGON_HEADER_END:?}"
            )));
        }
        if line.trim_end() == POLYGON_HEADER_END {
            break;
        }
    }

    Ok(point_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encoding stored records of degree `colors_sh_degree` in the 3DGS PLY format.
    pub fn polygon_bytes(
        records: &[Vec<f32>],
        colors_sh_degree: u32,
        line_ending: &str,
    ) -> Vec<u8> {
        let rest_count = (sh_count(colors_sh_degree) - 1) * 3;
        let mut names = vec!["x", "y", "z", "nx", "ny", "nz"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        names.extend((0..3).map(|i| format!("f_dc_{i}")));
        names.extend((0..rest_count).map(|i| format!("f_rest_{i}")));
        names.push("opacity".into());
        names.extend((0..3).map(|i| format!("scale_{i}")));
        names.extend((0..4).map(|i| format!("rot_{i}")));

        let mut lines = vec![
            "ply".to_string(),
            "format binary_little_endian 1.0".into(),
            format!("element vertex {}", records.len()),
        ];
        lines.extend(names.iter().map(|name| format!("property float {name}")));
        lines.push("end_header".into());

        let mut bytes = lines
            .into_iter()
            .flat_map(|line| format!("{line}{line_ending}").into_bytes())
            .collect::<Vec<_>>();
        for record in records {
            assert_eq!(record.len(), names.len());
            bytes.extend(record.iter().flat_map(|value| value.to_le_bytes()));
        }
        bytes
    }

    /// A stored record of degree 0.
    pub fn record_0(
        position: [f32; 3],
        opacity: f32,
    ) -> Vec<f32> {
        let mut record = position.to_vec();
        record.extend([0.0; 3]);
        record.extend([0.5, 0.25, 0.125]);
        record.push(opacity);
        record.extend([0.0, -1.0, 1.0]);
        record.extend([2.0, 0.0, 0.0, 0.0]);
        record
    }

    #[test]
    fn decode_polygon_degree_0() {
        use std::io::Cursor;

        let source = polygon_bytes(
            &[
                record_0([1.0, 1.0, 1.0], 0.0),
                record_0([0.0, 0.0, 0.0], 2.0),
                record_0([0.5, 0.0, 1.0], -2.0),
            ],
            0,
            "\n",
        );

        let scene =
            Gaussian3dScene::decode_polygon(&mut Cursor::new(source), 0).unwrap();

        assert_eq!(scene.point_count(), 3);
        assert_eq!(scene.colors_sh_degree, 0);
        assert_eq!(
            scene.bounds(),
            Aabb {
                max: [1.0; 3],
                min: [0.0; 3],
            }
        );

        // Reordered along the Morton curve
        let target = vec![[0.0, 0.0, 0.0], [0.5, 0.0, 1.0], [1.0, 1.0, 1.0]];
        assert_eq!(scene.positions, target);
        let target = [2.0, -2.0, 0.0].map(Gaussian3dScene::make_opacity).to_vec();
        assert_eq!(scene.opacities, target);

        for index in 0..3 {
            assert_eq!(scene.colors_sh[index][..3], [0.5, 0.25, 0.125]);
            assert!(scene.colors_sh[index][3..].iter().all(|c| *c == 0.0));
            assert_eq!(scene.rotations[index], [1.0, 0.0, 0.0, 0.0]);
            assert_eq!(scene.scalings[index], [1.0, (-1.0_f32).exp(), 1.0_f32.exp()]);
        }
    }

    #[test]
    fn decode_polygon_crlf() {
        use std::io::Cursor;

        let source = polygon_bytes(&[record_0([1.0, 2.0, 3.0], 0.0)], 0, "\r\n");

        let scene =
            Gaussian3dScene::decode_polygon(&mut Cursor::new(source), 0).unwrap();
        assert_eq!(scene.positions, vec![[1.0, 2.0, 3.0]]);
        assert_eq!(scene.opacities, vec![0.5]);
    }

    #[test]
    fn decode_polygon_empty() {
        use std::io::Cursor;

        let source = polygon_bytes(&[], 0, "\n");

        let scene =
            Gaussian3dScene::decode_polygon(&mut Cursor::new(source), 0).unwrap();
        assert_eq!(scene.point_count(), 0);
        assert_eq!(scene.bounds(), Aabb::default());
    }

    #[test]
    fn decode_polygon_truncated() {
        use std::io::Cursor;

        let mut source = polygon_bytes(
            &[
                record_0([1.0, 1.0, 1.0], 0.0),
                record_0([0.0, 0.0, 0.0], 2.0),
                record_0([0.5, 0.0, 1.0], -2.0),
            ],
            0,
            "\n",
        );
        source.truncate(source.len() - 1);

        let output = Gaussian3dScene::decode_polygon(&mut Cursor::new(source), 0);
        assert!(
            matches!(
                output,
                Err(Error::TruncatedPolygonPayload {
                    expected: 3,
                    actual: 2
                })
            ),
            "output: {output:?}"
        );
    }

    #[test]
    fn decode_polygon_sentinel_with_trailing_whitespace() {
        use std::io::Cursor;

        let source = polygon_bytes(&[record_0([1.0, 2.0, 3.0], 0.0)], 0, "\n");
        let sentinel = b"end_header\n";
        let position = source
            .windows(sentinel.len())
            .position(|window| window == sentinel)
            .unwrap();
        let mut source_padded = source[..position].to_vec();
        source_padded.extend(b"end_header \t\r\n");
        source_padded.extend(&source[position + sentinel.len()..]);

        let scene =
            Gaussian3dScene::decode_polygon(&mut Cursor::new(source_padded), 0).unwrap();
        assert_eq!(scene.positions, vec![[1.0, 2.0, 3.0]]);
    }

    #[test]
    fn decode_polygon_huge_count_on_short_payload() {
        use std::io::Cursor;

        let mut source = b"ply\nformat binary_little_endian 1.0\nelement vertex 100000000\n\
            end_header\n"
            .to_vec();
        source.extend([0; 10]);

        let output = Gaussian3dScene::decode_polygon(&mut Cursor::new(source), 3);
        assert!(
            matches!(
                output,
                Err(Error::TruncatedPolygonPayload {
                    expected: 100000000,
                    actual: 0
                })
            ),
            "output: {output:?}"
        );
    }

    #[test]
    fn decode_polygon_mismatched_header() {
        use std::io::Cursor;

        let sources: [&[u8]; 3] = [
            b"ply\n",
            b"ply\nformat binary_little_endian 1.0\nelement vertex many\nend_header\n",
            b"ply\nformat binary_little_endian 1.0\nelement vertex 1\nproperty float x\n",
        ];
        for source in sources {
            let output = Gaussian3dScene::decode_polygon(&mut Cursor::new(source), 3);
            assert!(
                matches!(output, Err(Error::MismatchedPolygonHeader3DGS(_))),
                "output: {output:?}"
            );
        }
    }

    #[test]
    fn decode_polygon_invalid_degree() {
        use std::io::Cursor;

        let source = polygon_bytes(&[], 0, "\n");

        let output = Gaussian3dScene::decode_polygon(&mut Cursor::new(source), 4);
        assert!(matches!(output, Err(Error::Validation(..))), "output: {output:?}");
    }

    #[test]
    fn read_polygon_file_missing() {
        let output = Gaussian3dScene::read_polygon_file("/nonexistent/point_cloud.ply", 3);
        assert!(matches!(output, Err(Error::Io(_))), "output: {output:?}");
    }
}
