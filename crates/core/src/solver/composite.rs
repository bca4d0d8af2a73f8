//! Compositing simulated density into the backbone
//!
//! The backbone usually has a finer resolution than the simulation grid. Each
//! backbone cell maps to simulation coordinates by cell centers
//! (`(x + 0.5) · sim_w / bb_w − 0.5`), samples density trilinearly and blends it
//! into the backbone in place. The backbone is single-buffered; every cell is read
//! and written by the same invocation only.

use super::advection::sample_trilinear;
use crate::error::{SimError, SimResult};
use crate::grid::GridDimensions;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

// Helper to convert usize to f32, centralizing the intentional precision loss
#[inline]
#[expect(clippy::cast_precision_loss)]
fn usize_to_f32(v: usize) -> f32 {
    v as f32
}

/// Blend formula applied per backbone cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum CompositeMode {
    /// `max(b, strength · s)`
    #[default]
    Max = 0,
    /// `min(b + strength · s, ceiling)`
    Additive = 1,
    /// Where `s > threshold`, move `b` toward `s` by `strength`
    Threshold = 2,
}

impl CompositeMode {
    #[must_use]
    pub const fn selector(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub const fn from_selector(selector: u32) -> Option<Self> {
        match selector {
            0 => Some(Self::Max),
            1 => Some(Self::Additive),
            2 => Some(Self::Threshold),
            _ => None,
        }
    }
}

/// Compositing tunables
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeSettings {
    pub mode: CompositeMode,
    /// Scale (Max, Additive) or blend factor (Threshold) applied to sampled density
    pub strength: f32,
    /// Minimum sampled density that affects the backbone in Threshold mode
    pub threshold: f32,
    /// Upper bound for Additive mode
    pub ceiling: f32,
}

impl Default for CompositeSettings {
    fn default() -> Self {
        Self {
            mode: CompositeMode::Max,
            strength: 1.0,
            threshold: 0.05,
            ceiling: 1.0,
        }
    }
}

impl CompositeSettings {
    pub fn validate(&self) -> SimResult<()> {
        if !self.strength.is_finite() || self.strength < 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "composite strength must be finite and non-negative, got {}",
                self.strength
            )));
        }
        if !self.threshold.is_finite() || !self.ceiling.is_finite() {
            return Err(SimError::InvalidConfig(
                "composite threshold and ceiling must be finite".to_string(),
            ));
        }
        if self.mode == CompositeMode::Threshold && self.strength > 1.0 {
            return Err(SimError::InvalidConfig(format!(
                "threshold blend factor must be within [0, 1], got {}",
                self.strength
            )));
        }
        Ok(())
    }

    /// Blend sampled density `s` into backbone value `b`
    #[inline]
    #[must_use]
    pub fn blend(&self, b: f32, s: f32) -> f32 {
        match self.mode {
            CompositeMode::Max => b.max(self.strength * s),
            CompositeMode::Additive => (b + self.strength * s).min(self.ceiling),
            CompositeMode::Threshold => {
                if s > self.threshold {
                    b + (s - b) * self.strength
                } else {
                    b
                }
            }
        }
    }
}

/// Map a backbone cell index to simulation coordinates along one axis
#[inline]
fn to_sim(i: usize, backbone_extent: u32, sim_extent: u32) -> f32 {
    (usize_to_f32(i) + 0.5) * usize_to_f32(sim_extent as usize)
        / usize_to_f32(backbone_extent as usize)
        - 0.5
}

/// Blend `density` (simulation grid) into `backbone` in place
pub fn composite_cpu(
    sim: GridDimensions,
    backbone_dims: GridDimensions,
    settings: &CompositeSettings,
    density: &[f32],
    backbone: &mut [f32],
) {
    let slice_len = backbone_dims.slice_len();
    let width = backbone_dims.width as usize;

    backbone
        .par_chunks_mut(slice_len)
        .enumerate()
        .for_each(|(z, slice)| {
            let sz = to_sim(z, backbone_dims.depth, sim.depth);
            for (i, b) in slice.iter_mut().enumerate() {
                let sx = to_sim(i % width, backbone_dims.width, sim.width);
                let sy = to_sim(i / width, backbone_dims.height, sim.height);
                let s = sample_trilinear(sim, density, sx, sy, sz);
                *b = settings.blend(*b, s);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_blend_modes() {
        let max = CompositeSettings::default();
        assert_eq!(max.blend(0.3, 0.1), 0.3);
        assert_eq!(max.blend(0.3, 0.8), 0.8);

        let add = CompositeSettings {
            mode: CompositeMode::Additive,
            strength: 0.5,
            ..Default::default()
        };
        assert_relative_eq!(add.blend(0.3, 0.4), 0.5);
        assert_eq!(add.blend(0.9, 2.0), 1.0);

        let threshold = CompositeSettings {
            mode: CompositeMode::Threshold,
            strength: 0.5,
            threshold: 0.2,
            ..Default::default()
        };
        assert_eq!(threshold.blend(0.4, 0.1), 0.4);
        assert_relative_eq!(threshold.blend(0.0, 0.6), 0.3);
    }

    #[test]
    fn test_composite_same_resolution() {
        let dims = GridDimensions::cubic(4);
        let mut density = vec![0.0; dims.cell_count()];
        density[dims.index(1, 2, 3)] = 0.9;
        let mut backbone = vec![0.2; dims.cell_count()];
        composite_cpu(dims, dims, &CompositeSettings::default(), &density, &mut backbone);
        assert_relative_eq!(backbone[dims.index(1, 2, 3)], 0.9);
        assert_eq!(backbone[0], 0.2);
    }

    #[test]
    fn test_composite_upsamples() {
        let sim = GridDimensions::cubic(2);
        let bb = GridDimensions::cubic(4);
        let density = vec![1.0; sim.cell_count()];
        let mut backbone = vec![0.0; bb.cell_count()];
        composite_cpu(sim, bb, &CompositeSettings::default(), &density, &mut backbone);
        assert!(backbone.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_cell_center_mapping() {
        // 4 backbone cells over 2 sim cells: centers at -0.25, 0.25, 0.75, 1.25
        assert_relative_eq!(to_sim(0, 4, 2), -0.25);
        assert_relative_eq!(to_sim(3, 4, 2), 1.25);
        assert_relative_eq!(to_sim(5, 8, 8), 5.0);
    }

    #[test]
    fn test_validate() {
        assert!(CompositeSettings::default().validate().is_ok());
        let bad = CompositeSettings {
            strength: f32::NAN,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = CompositeSettings {
            mode: CompositeMode::Threshold,
            strength: 2.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
