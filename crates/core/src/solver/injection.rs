//! Emitter injection kernel
//!
//! Adds `weight · velocity` to the three velocity components and
//! `weight · density_amount` to density, where the weight comes from the
//! emitter's falloff kernel. The kernel writes every cell of the scratch slot
//! (`scratch = current + forcing`) so untouched cells carry over unchanged.
//! Magnitudes are per tick and not scaled by `dt`.

use crate::core_types::InjectionSource;
use crate::grid::GridDimensions;
use rayon::prelude::*;

// Helper to convert usize to f32, centralizing the intentional precision loss
#[inline]
#[expect(clippy::cast_precision_loss)]
fn usize_to_f32(v: usize) -> f32 {
    v as f32
}

/// Add one emitter's contribution on the CPU
///
/// # Arguments
///
/// * `current` - Current slots of `[vx, vy, vz, density]`
/// * `scratch` - Scratch slots of `[vx, vy, vz, density]`, fully overwritten
pub fn inject_cpu(
    dims: GridDimensions,
    source: &InjectionSource,
    current: [&[f32]; 4],
    scratch: [&mut [f32]; 4],
) {
    let amounts = [
        source.velocity.x,
        source.velocity.y,
        source.velocity.z,
        source.density_amount,
    ];

    for ((src, dst), amount) in current.into_iter().zip(scratch).zip(amounts) {
        add_weighted(dims, source, amount, src, dst);
    }
}

fn add_weighted(
    dims: GridDimensions,
    source: &InjectionSource,
    amount: f32,
    src: &[f32],
    dst: &mut [f32],
) {
    let slice_len = dims.slice_len();
    let width = dims.width as usize;

    dst.par_chunks_mut(slice_len)
        .zip(src.par_chunks(slice_len))
        .enumerate()
        .for_each(|(z, (out, inp))| {
            let fz = usize_to_f32(z);
            for (i, (o, &v)) in out.iter_mut().zip(inp).enumerate() {
                let x = usize_to_f32(i % width);
                let y = usize_to_f32(i / width);
                *o = v + source.weight_at(x, y, fz) * amount;
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{FalloffKernel, Vec3};
    use approx::assert_relative_eq;

    fn source(falloff: FalloffKernel) -> InjectionSource {
        InjectionSource {
            position: Vec3::new(4.0, 4.0, 4.0),
            radius: 2.0,
            velocity: Vec3::new(1.0, -2.0, 0.5),
            density_amount: 3.0,
            falloff,
        }
    }

    fn run(dims: GridDimensions, source: &InjectionSource, base: f32) -> [Vec<f32>; 4] {
        let n = dims.cell_count();
        let current = vec![base; n];
        let mut out = [vec![0.0; n], vec![0.0; n], vec![0.0; n], vec![0.0; n]];
        {
            let [a, b, c, d] = &mut out;
            inject_cpu(
                dims,
                source,
                [&current, &current, &current, &current],
                [a, b, c, d],
            );
        }
        out
    }

    #[test]
    fn test_center_receives_full_weight() {
        let dims = GridDimensions::cubic(9);
        let out = run(dims, &source(FalloffKernel::Smooth), 0.0);
        let center = dims.index(4, 4, 4);
        assert_relative_eq!(out[0][center], 1.0);
        assert_relative_eq!(out[1][center], -2.0);
        assert_relative_eq!(out[2][center], 0.5);
        assert_relative_eq!(out[3][center], 3.0);
    }

    #[test]
    fn test_outside_radius_copies_current() {
        let dims = GridDimensions::cubic(9);
        let out = run(dims, &source(FalloffKernel::Constant), 0.25);
        let far = dims.index(0, 0, 0);
        for channel in &out {
            assert_eq!(channel[far], 0.25);
        }
        // A cell at distance exactly 2 still counts for the constant kernel
        assert_relative_eq!(out[3][dims.index(6, 4, 4)], 3.25);
    }

    #[test]
    fn test_zero_radius_is_noop() {
        let dims = GridDimensions::cubic(5);
        let mut src = source(FalloffKernel::Constant);
        src.radius = 0.0;
        let out = run(dims, &src, 1.0);
        assert!(out.iter().all(|c| c.iter().all(|&v| v == 1.0)));
    }
}
