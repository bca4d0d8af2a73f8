//! Semi-Lagrangian advection
//!
//! For each destination cell the kernel traces back `p − dt · v(p)` and writes the
//! trilinearly interpolated source value there. Sample positions clamp to
//! `[0, W−1]` per axis; there is no wraparound. Interpolation is exact at integer
//! positions, so zero velocity or `dt == 0` reproduces the source bit for bit.

use crate::grid::GridDimensions;
use rayon::prelude::*;

// Helper to convert usize to f32, centralizing the intentional precision loss
#[inline]
#[expect(clippy::cast_precision_loss)]
fn usize_to_f32(v: usize) -> f32 {
    v as f32
}

#[inline]
#[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn floor_index(v: f32) -> usize {
    v.floor() as usize
}

/// Split a clamped coordinate into lower index, upper index and fraction
#[inline]
fn axis_sample(v: f32, extent: u32) -> (usize, usize, f32) {
    let max = usize_to_f32(extent as usize - 1);
    let v = if v.is_finite() { v.clamp(0.0, max) } else { 0.0 };
    let i0 = floor_index(v);
    let i1 = (i0 + 1).min(extent as usize - 1);
    (i0, i1, v - usize_to_f32(i0))
}

/// Trilinear sample of `field` at a fractional cell position, clamped to the grid
#[must_use]
pub fn sample_trilinear(dims: GridDimensions, field: &[f32], x: f32, y: f32, z: f32) -> f32 {
    let (x0, x1, fx) = axis_sample(x, dims.width);
    let (y0, y1, fy) = axis_sample(y, dims.height);
    let (z0, z1, fz) = axis_sample(z, dims.depth);

    let lerp = |a: f32, b: f32, t: f32| if t == 0.0 { a } else { a + (b - a) * t };

    let c00 = lerp(field[dims.index(x0, y0, z0)], field[dims.index(x1, y0, z0)], fx);
    let c10 = lerp(field[dims.index(x0, y1, z0)], field[dims.index(x1, y1, z0)], fx);
    let c01 = lerp(field[dims.index(x0, y0, z1)], field[dims.index(x1, y0, z1)], fx);
    let c11 = lerp(field[dims.index(x0, y1, z1)], field[dims.index(x1, y1, z1)], fx);

    let c0 = lerp(c00, c10, fy);
    let c1 = lerp(c01, c11, fy);
    lerp(c0, c1, fz)
}

/// Advect `source` along `(vx, vy, vz)` for `dt` seconds into `out`
pub fn advect_cpu(
    dims: GridDimensions,
    dt: f32,
    source: &[f32],
    velocity: [&[f32]; 3],
    out: &mut [f32],
) {
    let slice_len = dims.slice_len();
    let width = dims.width as usize;
    let [vx, vy, vz] = velocity;

    out.par_chunks_mut(slice_len)
        .enumerate()
        .for_each(|(z, slice)| {
            for (i, o) in slice.iter_mut().enumerate() {
                let (x, y) = (i % width, i / width);
                let c = dims.index(x, y, z);
                let px = usize_to_f32(x) - dt * vx[c];
                let py = usize_to_f32(y) - dt * vy[c];
                let pz = usize_to_f32(z) - dt * vz[c];
                *o = sample_trilinear(dims, source, px, py, pz);
            }
        });
}
