//! Implicit diffusion by Jacobi relaxation
//!
//! Solves `(1 + 6a)·x − a·Σ x[nbr] = prev` with `a = rate · dt` using a fixed
//! number of Jacobi sweeps. Each sweep reads the previous iterate and writes a
//! fresh one, so sweeps ping-pong through the scratch field instead of updating
//! in place. Neighbors clamp to the grid edge.

use crate::grid::GridDimensions;
use rayon::prelude::*;

/// Relaxation coefficient for one tick
#[inline]
#[must_use]
pub fn diffusion_coefficient(rate: f32, dt: f32) -> f32 {
    rate * dt
}

/// One Jacobi sweep: `out[c] = (prev[c] + a · Σ guess[nbr]) / (1 + 6a)`
///
/// `guess` is the previous iterate; the first sweep passes `prev` itself. With
/// `a == 0` the sweep copies `prev` exactly.
pub fn diffuse_step_cpu(dims: GridDimensions, a: f32, prev: &[f32], guess: &[f32], out: &mut [f32]) {
    let slice_len = dims.slice_len();
    let width = dims.width as usize;
    let inv = 1.0 / (1.0 + 6.0 * a);

    out.par_chunks_mut(slice_len)
        .enumerate()
        .for_each(|(z, slice)| {
            for (i, o) in slice.iter_mut().enumerate() {
                let (x, y) = (i % width, i / width);
                let c = dims.index(x, y, z);
                let n = dims.neighbors(x, y, z);
                let sum = guess[n.x_minus]
                    + guess[n.x_plus]
                    + guess[n.y_minus]
                    + guess[n.y_plus]
                    + guess[n.z_minus]
                    + guess[n.z_plus];
                *o = (prev[c] + a * sum) * inv;
            }
        });
}

/// Run `iterations` sweeps on host memory
///
/// Mirrors the dispatch sequence the scheduler records; used by tests and tools
/// that work on plain slices.
pub fn diffuse_cpu(dims: GridDimensions, a: f32, iterations: u32, field: &mut [f32]) {
    if iterations == 0 {
        return;
    }
    let prev = field.to_vec();
    let mut guess = prev.clone();
    let mut next = vec![0.0; prev.len()];
    for _ in 0..iterations {
        diffuse_step_cpu(dims, a, &prev, &guess, &mut next);
        std::mem::swap(&mut guess, &mut next);
    }
    field.copy_from_slice(&guess);
}
