//! Simulation configuration
//!
//! [`SimulationConfig`] gathers everything needed to create a session: grid
//! resolution, step constants, solver iteration counts, compositing, noise and
//! emitters. Every section uses `#[serde(default)]`, so a JSON file only needs to
//! name what it changes.

use crate::core_types::Emitter;
use crate::error::{SimError, SimResult};
use crate::grid::{FieldLayout, GridDimensions};
use crate::solver::{CompositeSettings, NoiseSettings, QualityPreset};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Failure to load a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    LoadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {source}")]
    ParseFailed {
        #[from]
        source: serde_json::Error,
    },
}

/// Physical constants of one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConstants {
    /// Velocity diffusion rate in cells²/s
    pub viscosity: f32,
    /// Density diffusion rate in cells²/s
    pub diffusion_rate: f32,
}

impl Default for StepConstants {
    fn default() -> Self {
        Self {
            viscosity: 0.05,
            diffusion_rate: 0.02,
        }
    }
}

/// Fixed relaxation work and synchronization budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Jacobi sweeps per diffusion
    pub diffusion_iterations: u32,
    /// Pressure sweeps per projection; 0 disables projection
    pub pressure_iterations: u32,
    /// Bounded wait for device completion after each submission
    pub sync_timeout_ms: u64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            diffusion_iterations: 4,
            pressure_iterations: 4,
            sync_timeout_ms: 2_000,
        }
    }
}

impl SolverSettings {
    #[must_use]
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }
}

/// Which compute backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// GPU when available, CPU otherwise
    #[default]
    Auto,
    Cpu,
    /// GPU, falling back to CPU with a warning if it cannot be created
    Gpu,
}

/// Everything needed to create a simulation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub quality: QualityPreset,
    /// Overrides the preset's simulation grid
    pub grid: Option<GridDimensions>,
    /// Overrides the preset's backbone grid
    pub backbone: Option<GridDimensions>,
    pub step: StepConstants,
    pub solver: SolverSettings,
    pub composite: CompositeSettings,
    pub noise: NoiseSettings,
    /// Empty selects [`Emitter::default_set`] for the grid
    pub emitters: Vec<Emitter>,
    pub backend: BackendPreference,
    /// Seed for the initial backbone
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            quality: QualityPreset::default(),
            grid: None,
            backbone: None,
            step: StepConstants::default(),
            solver: SolverSettings::default(),
            composite: CompositeSettings::default(),
            noise: NoiseSettings::default(),
            emitters: Vec::new(),
            backend: BackendPreference::default(),
            seed: 0x6e65_6275_6c61,
        }
    }
}

impl SimulationConfig {
    /// Read a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Simulation and backbone extents after applying overrides
    #[must_use]
    pub fn layout(&self) -> FieldLayout {
        FieldLayout::new(
            self.grid.unwrap_or_else(|| self.quality.grid_dimensions()),
            self.backbone
                .unwrap_or_else(|| self.quality.backbone_dimensions()),
        )
    }

    /// Configured emitters, or the default set when none are configured
    #[must_use]
    pub fn resolved_emitters(&self) -> Vec<Emitter> {
        if self.emitters.is_empty() {
            let grid = self.layout().grid;
            Emitter::default_set(grid.center(), grid.min_extent())
        } else {
            self.emitters.clone()
        }
    }

    /// Reject values no session can run with
    ///
    /// # Errors
    ///
    /// `SimError::InvalidConfig` naming the first offending value.
    pub fn validate(&self) -> SimResult<()> {
        self.layout().validate()?;

        for (name, value) in [
            ("viscosity", self.step.viscosity),
            ("diffusion_rate", self.step.diffusion_rate),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SimError::InvalidConfig(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }

        if self.solver.sync_timeout_ms == 0 {
            return Err(SimError::InvalidConfig(
                "sync_timeout_ms must be positive".to_string(),
            ));
        }

        self.composite.validate()?;
        self.noise.validate()?;

        if let Some(i) = self.emitters.iter().position(|e| !e.is_valid()) {
            return Err(SimError::InvalidConfig(format!(
                "emitter {i} has a non-finite value or negative radius"
            )));
        }
        Ok(())
    }
}
