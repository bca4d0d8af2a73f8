//! Localized forcing sources
//!
//! An emitter adds velocity and density to every cell within its radius, weighted by
//! a falloff kernel. Emitters are plain data: the simulation re-evaluates their motion
//! model each tick and hands the resulting [`InjectionSource`] to the scheduler.

use super::vec3::{transverse_basis, Vec3};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

/// Radial weighting applied to an emitter's contribution
///
/// The discriminant is the integer selector passed to the injection kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum FalloffKernel {
    /// Full strength everywhere inside the radius
    Constant = 0,
    /// `1 - d/r`
    Linear = 1,
    /// `(1 - (d/r)²)²`, zero slope at the rim
    #[default]
    Smooth = 2,
    /// `exp(-4 (d/r)²)`, truncated at the radius
    Gaussian = 3,
}

impl FalloffKernel {
    /// Integer selector understood by the injection kernel
    #[must_use]
    pub const fn selector(self) -> u32 {
        self as u32
    }

    /// Decode a kernel selector
    #[must_use]
    pub const fn from_selector(selector: u32) -> Option<Self> {
        match selector {
            0 => Some(Self::Constant),
            1 => Some(Self::Linear),
            2 => Some(Self::Smooth),
            3 => Some(Self::Gaussian),
            _ => None,
        }
    }

    /// Weight for a cell at `distance` from a source of `radius`.
    ///
    /// Zero outside the radius and for non-positive radii.
    #[must_use]
    pub fn weight(self, distance: f32, radius: f32) -> f32 {
        if radius <= 0.0 || distance > radius {
            return 0.0;
        }
        let t = distance / radius;
        match self {
            Self::Constant => 1.0,
            Self::Linear => 1.0 - t,
            Self::Smooth => {
                let s = 1.0 - t * t;
                s * s
            }
            Self::Gaussian => (-4.0 * t * t).exp(),
        }
    }
}

/// How an emitter's velocity evolves with elapsed time
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmitterMotion {
    /// Constant velocity
    #[default]
    Static,
    /// Base velocity plus a sinusoidal swirl in the plane transverse to it
    Oscillating {
        /// Transverse speed in cells/s
        amplitude: f32,
        /// Oscillation frequency in Hz
        frequency_hz: f32,
        /// Phase offset in radians
        phase: f32,
    },
}

/// Point/radius forcing source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emitter {
    /// Center in grid cells
    pub position: Vec3,
    /// Influence radius in grid cells
    pub radius: f32,
    /// Base velocity in cells/s
    pub velocity: Vec3,
    /// Density added at full weight per tick
    pub density_amount: f32,
    /// Radial weighting
    #[serde(default)]
    pub falloff: FalloffKernel,
    /// Velocity evolution over time
    #[serde(default)]
    pub motion: EmitterMotion,
}

/// An emitter evaluated at one instant, ready for injection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InjectionSource {
    pub position: Vec3,
    pub radius: f32,
    pub velocity: Vec3,
    pub density_amount: f32,
    pub falloff: FalloffKernel,
}

impl InjectionSource {
    /// Weight of the cell at integer coordinates `(x, y, z)`
    #[inline]
    #[must_use]
    pub fn weight_at(&self, x: f32, y: f32, z: f32) -> f32 {
        let d = Vec3::new(x, y, z) - self.position;
        self.falloff.weight(d.norm(), self.radius)
    }
}

impl Emitter {
    /// Static emitter with no velocity or density
    #[must_use]
    pub fn new(position: Vec3, radius: f32) -> Self {
        Self {
            position,
            radius,
            velocity: Vec3::zeros(),
            density_amount: 0.0,
            falloff: FalloffKernel::default(),
            motion: EmitterMotion::Static,
        }
    }

    #[must_use]
    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }

    #[must_use]
    pub fn with_density(mut self, density_amount: f32) -> Self {
        self.density_amount = density_amount;
        self
    }

    #[must_use]
    pub fn with_falloff(mut self, falloff: FalloffKernel) -> Self {
        self.falloff = falloff;
        self
    }

    #[must_use]
    pub fn with_motion(mut self, motion: EmitterMotion) -> Self {
        self.motion = motion;
        self
    }

    /// Velocity at `elapsed` seconds
    #[must_use]
    pub fn velocity_at(&self, elapsed: f32) -> Vec3 {
        match self.motion {
            EmitterMotion::Static => self.velocity,
            EmitterMotion::Oscillating {
                amplitude,
                frequency_hz,
                phase,
            } => {
                let (u, w) = transverse_basis(&self.velocity);
                let theta = TAU * frequency_hz * elapsed + phase;
                self.velocity + (u * theta.sin() + w * theta.cos()) * amplitude
            }
        }
    }

    /// Evaluate the motion model at `elapsed` seconds
    #[must_use]
    pub fn source_at(&self, elapsed: f32) -> InjectionSource {
        InjectionSource {
            position: self.position,
            radius: self.radius,
            velocity: self.velocity_at(elapsed),
            density_amount: self.density_amount,
            falloff: self.falloff,
        }
    }

    /// Whether every numeric property is finite and the radius non-negative
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let motion_ok = match self.motion {
            EmitterMotion::Static => true,
            EmitterMotion::Oscillating {
                amplitude,
                frequency_hz,
                phase,
            } => amplitude.is_finite() && frequency_hz.is_finite() && phase.is_finite(),
        };
        self.position.iter().all(|v| v.is_finite())
            && self.velocity.iter().all(|v| v.is_finite())
            && self.radius.is_finite()
            && self.radius >= 0.0
            && self.density_amount.is_finite()
            && motion_ok
    }

    /// Default nebula forcing for a grid centered at `center` with smallest extent `extent`.
    ///
    /// A rising, swirling core plus two opposing side jets that shear against it.
    #[must_use]
    pub fn default_set(center: Vec3, extent: f32) -> Vec<Self> {
        let offset = Vec3::new(extent * 0.25, 0.0, 0.0);
        vec![
            Self::new(center, extent * 0.12)
                .with_velocity(Vec3::new(0.0, extent * 0.1, 0.0))
                .with_density(0.6)
                .with_falloff(FalloffKernel::Smooth)
                .with_motion(EmitterMotion::Oscillating {
                    amplitude: extent * 0.05,
                    frequency_hz: 0.15,
                    phase: 0.0,
                }),
            Self::new(center - offset, extent * 0.08)
                .with_velocity(Vec3::new(extent * 0.15, 0.0, 0.0))
                .with_density(0.4)
                .with_falloff(FalloffKernel::Gaussian),
            Self::new(center + offset, extent * 0.08)
                .with_velocity(Vec3::new(-extent * 0.15, 0.0, 0.0))
                .with_density(0.4)
                .with_falloff(FalloffKernel::Gaussian)
                .with_motion(EmitterMotion::Oscillating {
                    amplitude: extent * 0.04,
                    frequency_hz: 0.1,
                    phase: std::f32::consts::PI,
                }),
        ]
    }
}
