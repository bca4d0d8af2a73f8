//! Quality presets for grid resolution
//!
//! A preset fixes the simulation grid and the backbone grid together. The
//! backbone is always finer than the simulation grid: it carries the static
//! detail the renderer samples while the simulation only perturbs it.

use crate::grid::{FieldLayout, GridDimensions};
use serde::{Deserialize, Serialize};

/// Quality preset determining grid resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    /// 32³ simulation, 64³ backbone
    Low,
    /// 64³ simulation, 128³ backbone
    #[default]
    Medium,
    /// 128³ simulation, 512³ backbone
    High,
}

impl QualityPreset {
    /// Simulation grid edge length in cells
    #[must_use]
    pub const fn grid_edge(&self) -> u32 {
        match self {
            Self::Low => 32,
            Self::Medium => 64,
            Self::High => 128,
        }
    }

    /// Backbone grid edge length in cells
    #[must_use]
    pub const fn backbone_edge(&self) -> u32 {
        match self {
            Self::Low => 64,
            Self::Medium => 128,
            Self::High => 512,
        }
    }

    #[must_use]
    pub const fn grid_dimensions(&self) -> GridDimensions {
        GridDimensions::cubic(self.grid_edge())
    }

    #[must_use]
    pub const fn backbone_dimensions(&self) -> GridDimensions {
        GridDimensions::cubic(self.backbone_edge())
    }

    #[must_use]
    pub const fn layout(&self) -> FieldLayout {
        FieldLayout::new(self.grid_dimensions(), self.backbone_dimensions())
    }

    /// Recommended preset for the current machine
    ///
    /// Uses the logical core count as a proxy for CPU throughput; GPU sessions
    /// can afford `High` regardless.
    #[must_use]
    pub fn recommended(gpu: bool) -> Self {
        if gpu {
            return Self::High;
        }
        match std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get) {
            0..=3 => Self::Low,
            _ => Self::Medium,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_dimensions() {
        assert_eq!(QualityPreset::Low.grid_dimensions(), GridDimensions::cubic(32));
        assert_eq!(QualityPreset::Medium.backbone_dimensions(), GridDimensions::cubic(128));
        assert_eq!(QualityPreset::High.grid_dimensions(), GridDimensions::cubic(128));
        assert_eq!(QualityPreset::High.backbone_dimensions(), GridDimensions::cubic(512));
    }

    #[test]
    fn test_backbone_is_finer() {
        for preset in [QualityPreset::Low, QualityPreset::Medium, QualityPreset::High] {
            assert!(preset.backbone_edge() > preset.grid_edge());
        }
    }

    #[test]
    fn test_recommended() {
        assert_eq!(QualityPreset::recommended(true), QualityPreset::High);
        assert_ne!(QualityPreset::recommended(false), QualityPreset::High);
    }
}
