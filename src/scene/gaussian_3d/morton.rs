//! Spatial reordering by Morton (Z-order) keys.

pub use super::Aabb;

use rayon::{
    iter::{
        IndexedParallelIterator, IntoParallelIterator, IntoParallelRefIterator,
        ParallelIterator,
    },
    slice::ParallelSliceMut,
};

/// Bits per axis of a key.
pub const AXIS_BIT_COUNT: u32 = 21;

/// The largest grid coordinate on each axis.
pub const AXIS_MAX: u32 = (1 << AXIS_BIT_COUNT) - 1;

/// Spreading the lower 21 bits of `value` so that bit `i` moves to bit `3i`.
#[inline]
pub const fn spread_bits(value: u32) -> u64 {
    let mut x = value as u64 & AXIS_MAX as u64;
    x = (x | x << 32) & 0x001f_0000_0000_ffff;
    x = (x | x << 16) & 0x001f_0000_ff00_00ff;
    x = (x | x << 8) & 0x100f_00f0_0f00_f00f;
    x = (x | x << 4) & 0x10c3_0c30_c30c_30c3;
    x = (x | x << 2) & 0x1249_2492_4924_9249;
    x
}

/// Mapping a coordinate into `[0, AXIS_MAX]` against the box on one axis.
///
/// A zero-extent axis and a non-finite coordinate both map to `0`.
#[inline]
pub fn quantize(
    value: f32,
    min: f32,
    extent: f32,
) -> u32 {
    if extent.is_nan() || extent <= 0.0 {
        return 0;
    }
    // NOTE: NaN saturates to 0 when casting.
    let ratio = ((value - min) as f64 / extent as f64).clamp(0.0, 1.0);
    (ratio * AXIS_MAX as f64) as u32
}

/// The 63-bit Morton key of `position` inside `bounds`.
pub fn encode(
    position: &[f32; 3],
    bounds: &Aabb,
) -> u64 {
    let extent = bounds.extent();
    let [x, y, z] = [0, 1, 2].map(|i| quantize(position[i], bounds.min[i], extent[i]));

    spread_bits(x) | spread_bits(y) << 1 | spread_bits(z) << 2
}

/// The permutation sorting `positions` ascending by `(key, index)`.
pub fn reorder_indices(
    positions: &[[f32; 3]],
    bounds: &Aabb,
) -> Vec<u32> {
    // [P] (key, index)
    let mut keys = positions
        .par_iter()
        .enumerate()
        .map(|(index, position)| (encode(position, bounds), index as u32))
        .collect::<Vec<_>>();

    // NOTE: Each pair is unique, so the unstable sort is deterministic.
    keys.par_sort_unstable();

    keys.into_par_iter().map(|(_, index)| index).collect()
}

/// Gathering `values` at `indices`.
pub fn permute<T: Copy + Send + Sync>(
    values: &[T],
    indices: &[u32],
) -> Vec<T> {
    indices
        .par_iter()
        .map(|&index| values[index as usize])
        .collect()
}
