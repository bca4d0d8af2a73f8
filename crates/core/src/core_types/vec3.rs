//! Vector type alias for grid-space positions and velocities.

use nalgebra::Vector3;

/// 3D vector type for positions, velocities, and directions.
///
/// Alias for `nalgebra::Vector3<f32>`. Positions are measured in simulation grid
/// cells and velocities in cells per second.
pub type Vec3 = Vector3<f32>;

/// Build an orthonormal pair perpendicular to `axis`.
///
/// Used to derive transverse directions for oscillating emitters. A zero (or
/// non-finite) axis yields the X/Z pair so callers always get usable directions.
#[must_use]
pub fn transverse_basis(axis: &Vec3) -> (Vec3, Vec3) {
    let Some(dir) = axis.try_normalize(1.0e-6) else {
        return (Vec3::x(), Vec3::z());
    };

    // Pick the world axis least aligned with dir to avoid a degenerate cross product
    let helper = if dir.x.abs() < 0.9 { Vec3::x() } else { Vec3::y() };
    let first = dir.cross(&helper).normalize();
    let second = dir.cross(&first);
    (first, second)
}
