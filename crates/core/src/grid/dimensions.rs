//! Grid extents and clamp-to-edge addressing

use crate::core_types::Vec3;
use crate::error::{SimError, SimResult};
use serde::{Deserialize, Serialize};
use std::fmt;

// Helper to convert u32 to f32, centralizing the intentional precision loss
#[inline]
#[expect(clippy::cast_precision_loss)]
fn u32_to_f32(v: u32) -> f32 {
    v as f32
}

/// Fixed W×H×D grid extent
///
/// Cells are addressed by `(x, y, z)` and stored at `z·W·H + y·W + x`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDimensions {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

/// Linear indices of the six face neighbors, clamped to the grid edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbors {
    pub x_minus: usize,
    pub x_plus: usize,
    pub y_minus: usize,
    pub y_plus: usize,
    pub z_minus: usize,
    pub z_plus: usize,
}

impl GridDimensions {
    #[must_use]
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// N×N×N grid
    #[must_use]
    pub const fn cubic(n: u32) -> Self {
        Self::new(n, n, n)
    }

    #[must_use]
    pub const fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }

    /// Cells in one z-slice
    #[must_use]
    pub const fn slice_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Storage size of one `f32` field
    #[must_use]
    pub const fn byte_size(&self) -> u64 {
        self.cell_count() as u64 * std::mem::size_of::<f32>() as u64
    }

    #[inline]
    #[must_use]
    pub const fn index(&self, x: usize, y: usize, z: usize) -> usize {
        z * self.slice_len() + y * self.width as usize + x
    }

    /// Inverse of [`index`](Self::index)
    #[must_use]
    pub const fn coords(&self, index: usize) -> (usize, usize, usize) {
        let w = self.width as usize;
        let slice = self.slice_len();
        (index % w, (index % slice) / w, index / slice)
    }

    /// Face neighbors of `(x, y, z)` with out-of-range coordinates clamped to the edge
    #[inline]
    #[must_use]
    pub fn neighbors(&self, x: usize, y: usize, z: usize) -> Neighbors {
        let max_x = self.width as usize - 1;
        let max_y = self.height as usize - 1;
        let max_z = self.depth as usize - 1;
        Neighbors {
            x_minus: self.index(x.saturating_sub(1), y, z),
            x_plus: self.index((x + 1).min(max_x), y, z),
            y_minus: self.index(x, y.saturating_sub(1), z),
            y_plus: self.index(x, (y + 1).min(max_y), z),
            z_minus: self.index(x, y, z.saturating_sub(1)),
            z_plus: self.index(x, y, (z + 1).min(max_z)),
        }
    }

    /// Largest valid sample coordinate per axis
    #[must_use]
    pub fn max_coord(&self) -> Vec3 {
        Vec3::new(
            u32_to_f32(self.width.saturating_sub(1)),
            u32_to_f32(self.height.saturating_sub(1)),
            u32_to_f32(self.depth.saturating_sub(1)),
        )
    }

    /// Geometric center in cell coordinates
    #[must_use]
    pub fn center(&self) -> Vec3 {
        self.max_coord() * 0.5
    }

    /// Smallest axis extent
    #[must_use]
    pub fn min_extent(&self) -> f32 {
        u32_to_f32(self.width.min(self.height).min(self.depth))
    }

    #[must_use]
    pub fn extent(&self) -> Vec3 {
        Vec3::new(
            u32_to_f32(self.width),
            u32_to_f32(self.height),
            u32_to_f32(self.depth),
        )
    }

    /// Reject zero extents and grids whose cell count overflows addressing
    pub fn validate(&self) -> SimResult<()> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(SimError::InvalidConfig(format!(
                "grid dimensions must be non-zero, got {self}"
            )));
        }
        let cells = u64::from(self.width) * u64::from(self.height) * u64::from(self.depth);
        if cells > u64::from(u32::MAX) {
            return Err(SimError::InvalidConfig(format!(
                "grid {self} has {cells} cells, more than a field can address"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for GridDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

/// Extents of the simulation grid and of the backbone grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldLayout {
    /// Shared by every simulated and auxiliary field
    pub grid: GridDimensions,
    /// Resolution of the persistent backbone density field
    pub backbone: GridDimensions,
}

impl FieldLayout {
    #[must_use]
    pub const fn new(grid: GridDimensions, backbone: GridDimensions) -> Self {
        Self { grid, backbone }
    }

    pub fn validate(&self) -> SimResult<()> {
        self.grid.validate()?;
        self.backbone.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_layout() {
        let dims = GridDimensions::new(4, 3, 2);
        assert_eq!(dims.cell_count(), 24);
        assert_eq!(dims.index(0, 0, 0), 0);
        assert_eq!(dims.index(1, 0, 0), 1);
        assert_eq!(dims.index(0, 1, 0), 4);
        assert_eq!(dims.index(0, 0, 1), 12);
        assert_eq!(dims.index(3, 2, 1), 23);
        assert_eq!(dims.coords(23), (3, 2, 1));
        assert_eq!(dims.coords(dims.index(2, 1, 1)), (2, 1, 1));
    }

    #[test]
    fn test_neighbors_clamp_at_edges() {
        let dims = GridDimensions::cubic(3);
        let n = dims.neighbors(0, 0, 0);
        assert_eq!(n.x_minus, dims.index(0, 0, 0));
        assert_eq!(n.x_plus, dims.index(1, 0, 0));
        assert_eq!(n.z_minus, dims.index(0, 0, 0));

        let n = dims.neighbors(2, 2, 2);
        assert_eq!(n.x_plus, dims.index(2, 2, 2));
        assert_eq!(n.y_plus, dims.index(2, 2, 2));
        assert_eq!(n.y_minus, dims.index(2, 1, 2));
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(GridDimensions::new(0, 4, 4).validate().is_err());
        assert!(GridDimensions::cubic(8).validate().is_ok());
        assert!(GridDimensions::cubic(4096).validate().is_err());
    }

    #[test]
    fn test_center_and_display() {
        let dims = GridDimensions::new(9, 5, 3);
        assert_eq!(dims.center(), Vec3::new(4.0, 2.0, 1.0));
        assert_eq!(dims.to_string(), "9x5x3");
        assert_eq!(dims.byte_size(), 9 * 5 * 3 * 4);
    }
}
