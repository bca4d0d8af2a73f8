//! Pressure projection
//!
//! Makes the velocity field approximately divergence-free in three steps:
//!
//! 1. `div = ½(u[x+1] − u[x−1] + v[y+1] − v[y−1] + w[z+1] − w[z−1])`
//! 2. Jacobi relaxation of `Σ p[nbr] − 6p = div`, seeded with `p₀ = −div/6`
//! 3. `u −= ½(p[x+1] − p[x−1])` and likewise for `v` and `w`
//!
//! All differences use clamp-to-edge neighbors. The relaxation runs a fixed number
//! of sweeps, so the result is only approximately divergence-free.

use crate::grid::GridDimensions;
use rayon::prelude::*;

/// Central-difference divergence of `(vx, vy, vz)` into `out`
pub fn divergence_cpu(dims: GridDimensions, vx: &[f32], vy: &[f32], vz: &[f32], out: &mut [f32]) {
    let slice_len = dims.slice_len();
    let width = dims.width as usize;

    out.par_chunks_mut(slice_len)
        .enumerate()
        .for_each(|(z, slice)| {
            for (i, o) in slice.iter_mut().enumerate() {
                let n = dims.neighbors(i % width, i / width, z);
                *o = 0.5
                    * (vx[n.x_plus] - vx[n.x_minus] + vy[n.y_plus] - vy[n.y_minus] + vz[n.z_plus]
                        - vz[n.z_minus]);
            }
        });
}

/// One pressure sweep
///
/// With `guess == None` this is the seed pass `p = −div/6`; otherwise
/// `p = (Σ guess[nbr] − div) / 6`.
pub fn pressure_step_cpu(dims: GridDimensions, div: &[f32], guess: Option<&[f32]>, out: &mut [f32]) {
    let slice_len = dims.slice_len();
    let width = dims.width as usize;
    let sixth = 1.0 / 6.0;

    out.par_chunks_mut(slice_len)
        .enumerate()
        .for_each(|(z, slice)| {
            for (i, o) in slice.iter_mut().enumerate() {
                let (x, y) = (i % width, i / width);
                let c = dims.index(x, y, z);
                *o = match guess {
                    None => -div[c] * sixth,
                    Some(p) => {
                        let n = dims.neighbors(x, y, z);
                        (p[n.x_minus] + p[n.x_plus] + p[n.y_minus] + p[n.y_plus] + p[n.z_minus]
                            + p[n.z_plus]
                            - div[c])
                            * sixth
                    }
                };
            }
        });
}

/// Subtract `½∇p` from each velocity component into the output slices
pub fn subtract_gradient_cpu(
    dims: GridDimensions,
    velocity: [&[f32]; 3],
    pressure: &[f32],
    out: [&mut [f32]; 3],
) {
    let slice_len = dims.slice_len();
    let width = dims.width as usize;

    for (axis, (v, dst)) in velocity.into_iter().zip(out).enumerate() {
        dst.par_chunks_mut(slice_len)
            .enumerate()
            .for_each(|(z, slice)| {
                for (i, o) in slice.iter_mut().enumerate() {
                    let (x, y) = (i % width, i / width);
                    let n = dims.neighbors(x, y, z);
                    let gradient = match axis {
                        0 => pressure[n.x_plus] - pressure[n.x_minus],
                        1 => pressure[n.y_plus] - pressure[n.y_minus],
                        _ => pressure[n.z_plus] - pressure[n.z_minus],
                    };
                    *o = v[dims.index(x, y, z)] - 0.5 * gradient;
                }
            });
    }
}

/// Run a full projection on host memory with `iterations` pressure sweeps
///
/// Follows the same sweep sequence as the recorded dispatches. Zero iterations
/// leaves the velocity untouched.
pub fn project_cpu(dims: GridDimensions, iterations: u32, vx: &mut [f32], vy: &mut [f32], vz: &mut [f32]) {
    if iterations == 0 {
        return;
    }
    let n = dims.cell_count();
    let mut div = vec![0.0; n];
    divergence_cpu(dims, vx, vy, vz, &mut div);

    let mut pressure = vec![0.0; n];
    let mut next = vec![0.0; n];
    pressure_step_cpu(dims, &div, None, &mut pressure);
    for _ in 1..iterations {
        pressure_step_cpu(dims, &div, Some(&pressure), &mut next);
        std::mem::swap(&mut pressure, &mut next);
    }

    let (ox, oy, oz) = (vx.to_vec(), vy.to_vec(), vz.to_vec());
    subtract_gradient_cpu(dims, [&ox, &oy, &oz], &pressure, [vx, vy, vz]);
}

/// Interior cells at least `margin` cells away from every face
fn interior(dims: GridDimensions, margin: usize) -> impl Iterator<Item = (usize, usize, usize)> {
    let (w, h, d) = (dims.width as usize, dims.height as usize, dims.depth as usize);
    let xs = margin..w.saturating_sub(margin);
    let ys = margin..h.saturating_sub(margin);
    let zs = margin..d.saturating_sub(margin);
    zs.flat_map(move |z| {
        let xs = xs.clone();
        ys.clone()
            .flat_map(move |y| xs.clone().map(move |x| (x, y, z)))
    })
}

/// Sum of |div| over interior cells, accumulated in f64
#[must_use]
pub fn integrated_abs_divergence(
    dims: GridDimensions,
    vx: &[f32],
    vy: &[f32],
    vz: &[f32],
    margin: usize,
) -> f64 {
    let mut div = vec![0.0; dims.cell_count()];
    divergence_cpu(dims, vx, vy, vz, &mut div);
    interior(dims, margin)
        .map(|(x, y, z)| f64::from(div[dims.index(x, y, z)].abs()))
        .sum()
}

/// Mean |div| over interior cells; 0 when the margin leaves no interior
///
/// Only meaningful as a projection-quality measure when every axis keeps at
/// least two interior cells (`extent >= 2 * margin + 2`). With a single interior
/// cell the measure is dominated by the clamped faces, and a projection can
/// raise it.
#[must_use]
pub fn mean_abs_divergence(
    dims: GridDimensions,
    vx: &[f32],
    vy: &[f32],
    vz: &[f32],
    margin: usize,
) -> f64 {
    let count = interior(dims, margin).count();
    if count == 0 {
        return 0.0;
    }
    #[expect(clippy::cast_precision_loss)]
    let count = count as f64;
    integrated_abs_divergence(dims, vx, vy, vz, margin) / count
}
