//! Flat scalar field storage
//!
//! A [`ScalarField`] stores one `f32` per cell as a flat `Vec<f32>` in
//! `z·W·H + y·W + x` order.

use super::dimensions::GridDimensions;
use crate::error::{SimError, SimResult};

/// Scalar field over a 3D grid
///
/// `Default` produces an empty placeholder; it is used while a buffer is
/// temporarily taken out of its store for a kernel to write into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalarField {
    /// Field values, linear index `z·W·H + y·W + x`
    data: Vec<f32>,
    dimensions: GridDimensions,
}

impl ScalarField {
    /// Allocate a zero-filled field
    ///
    /// # Arguments
    ///
    /// * `dimensions` - Grid extent
    /// * `label` - Name reported if the allocation fails
    ///
    /// # Errors
    ///
    /// `SimError::ResourceAllocation` if the backing storage cannot be reserved.
    pub fn try_new(dimensions: GridDimensions, label: &str) -> SimResult<Self> {
        Self::try_with_value(dimensions, 0.0, label)
    }

    /// Allocate a field with every cell set to `value`
    pub fn try_with_value(dimensions: GridDimensions, value: f32, label: &str) -> SimResult<Self> {
        let cells = dimensions.cell_count();
        let mut data = Vec::new();
        data.try_reserve_exact(cells)
            .map_err(|_| SimError::ResourceAllocation {
                what: label.to_string(),
                bytes: dimensions.byte_size(),
            })?;
        data.resize(cells, value);
        Ok(Self { data, dimensions })
    }

    /// Wrap existing values
    ///
    /// # Errors
    ///
    /// `SimError::InvalidConfig` if `data` does not hold exactly one value per cell.
    pub fn from_vec(dimensions: GridDimensions, data: Vec<f32>) -> SimResult<Self> {
        if data.len() != dimensions.cell_count() {
            return Err(SimError::InvalidConfig(format!(
                "field of {dimensions} needs {} values, got {}",
                dimensions.cell_count(),
                data.len()
            )));
        }
        Ok(Self { data, dimensions })
    }

    #[must_use]
    pub fn dimensions(&self) -> GridDimensions {
        self.dimensions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Value at `(x, y, z)`
    ///
    /// # Panics
    ///
    /// Panics if coordinates are out of bounds
    #[must_use]
    pub fn get(&self, x: usize, y: usize, z: usize) -> f32 {
        assert!(self.in_bounds(x, y, z), "Coordinates out of bounds");
        self.data[self.dimensions.index(x, y, z)]
    }

    /// # Panics
    ///
    /// Panics if coordinates are out of bounds
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: f32) {
        assert!(self.in_bounds(x, y, z), "Coordinates out of bounds");
        let index = self.dimensions.index(x, y, z);
        self.data[index] = value;
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// Overwrite every cell from `values`
    ///
    /// # Errors
    ///
    /// `SimError::Submission` on a length mismatch.
    pub fn copy_from(&mut self, values: &[f32]) -> SimResult<()> {
        if values.len() != self.data.len() {
            return Err(SimError::Submission(format!(
                "upload of {} values into a field of {} cells",
                values.len(),
                self.data.len()
            )));
        }
        self.data.copy_from_slice(values);
        Ok(())
    }

    /// Sum of all cells, accumulated in f64
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.data.iter().map(|&v| f64::from(v)).sum()
    }

    /// Largest cell value, or 0 for an empty field
    #[must_use]
    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(0.0_f32, f32::max)
    }

    fn in_bounds(&self, x: usize, y: usize, z: usize) -> bool {
        x < self.dimensions.width as usize
            && y < self.dimensions.height as usize
            && z < self.dimensions.depth as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_creation() {
        let field = ScalarField::try_new(GridDimensions::new(4, 5, 6), "test").unwrap();
        assert_eq!(field.len(), 120);
        assert!(field.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_field_get_set() {
        let dims = GridDimensions::cubic(10);
        let mut field = ScalarField::try_new(dims, "test").unwrap();
        field.set(3, 4, 5, 123.45);
        assert_eq!(field.get(3, 4, 5), 123.45);

        // Verify z-major linear indexing
        assert_eq!(field.as_slice()[5 * 100 + 4 * 10 + 3], 123.45);
    }

    #[test]
    fn test_from_vec_length_check() {
        let dims = GridDimensions::cubic(2);
        assert!(ScalarField::from_vec(dims, vec![1.0; 8]).is_ok());
        assert!(matches!(
            ScalarField::from_vec(dims, vec![1.0; 7]),
            Err(SimError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_copy_from_length_check() {
        let mut field = ScalarField::try_with_value(GridDimensions::cubic(2), 3.0, "test").unwrap();
        assert_eq!(field.sum(), 24.0);
        assert!(field.copy_from(&[1.0; 3]).is_err());
        field.copy_from(&[0.5; 8]).unwrap();
        assert_eq!(field.max(), 0.5);
    }

    #[test]
    #[should_panic(expected = "Coordinates out of bounds")]
    fn test_field_bounds_check() {
        let field = ScalarField::try_new(GridDimensions::cubic(4), "test").unwrap();
        let _ = field.get(4, 0, 0);
    }

    #[test]
    fn test_default_is_empty_placeholder() {
        let field = ScalarField::default();
        assert!(field.is_empty());
        assert_eq!(field.dimensions().cell_count(), 0);
    }
}
