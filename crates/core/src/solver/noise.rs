//! Procedural backbone generation
//!
//! Fills the persistent backbone density field from layered 3D value noise
//! (fractal Brownian motion): each octave runs at `lacunarity` times the frequency
//! and `gain` times the amplitude of the previous one. The noise is sampled at
//! normalized grid coordinates offset by a [`SeedVector`], shaped into `[0, 1]`
//! by a coverage threshold, and attenuated toward the grid edges so the nebula
//! sits inside the volume.
//!
//! Generation is deterministic: the same seed vector and settings produce a
//! bit-identical field regardless of thread count.

use crate::core_types::Vec3;
use crate::error::{SimError, SimResult};
use crate::grid::ScalarField;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Prime multipliers for lattice hashing
const SEED_X: u32 = 1619;
const SEED_Y: u32 = 31337;
const SEED_Z: u32 = 6971;
const SEED_LAYER: u32 = 1013;

/// Maximum value for positive i32 as f64 for safe conversion
const MAX_I32_POSITIVE: f64 = 0x7fff_ffff as f64;

/// Range of the offsets drawn for a seed vector, in noise-space units
const SEED_OFFSET_RANGE: f32 = 1024.0;

// Helper to convert usize to f32, centralizing the intentional precision loss
#[inline]
#[expect(clippy::cast_precision_loss)]
fn usize_to_f32(v: usize) -> f32 {
    v as f32
}

/// Integer lattice hash, returns a value in [0, 1]
#[inline]
#[expect(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
fn hash_3d(x: i32, y: i32, z: i32, layer: u32) -> f32 {
    let mut n = x
        .wrapping_mul(SEED_X as i32)
        .wrapping_add(y.wrapping_mul(SEED_Y as i32))
        .wrapping_add(z.wrapping_mul(SEED_Z as i32))
        .wrapping_add(layer.wrapping_mul(SEED_LAYER) as i32);
    n = (n << 13) ^ n;
    n = n
        .wrapping_mul(n.wrapping_mul(n).wrapping_mul(15731).wrapping_add(789_221))
        .wrapping_add(1_376_312_589);
    (f64::from(n & 0x7fff_ffff) / MAX_I32_POSITIVE) as f32
}

/// Hermite smoothing of the interpolation weight
#[inline]
fn smoothstep(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

#[inline]
#[expect(clippy::cast_possible_truncation)]
fn lattice(v: f32) -> i32 {
    v.floor() as i32
}

/// Smoothly interpolated lattice noise in [0, 1]
fn value_noise_3d(p: Vec3, layer: u32) -> f32 {
    let (x0, y0, z0) = (lattice(p.x), lattice(p.y), lattice(p.z));
    let fx = smoothstep(p.x - p.x.floor());
    let fy = smoothstep(p.y - p.y.floor());
    let fz = smoothstep(p.z - p.z.floor());

    let corner = |dx: i32, dy: i32, dz: i32| {
        hash_3d(
            x0.wrapping_add(dx),
            y0.wrapping_add(dy),
            z0.wrapping_add(dz),
            layer,
        )
    };
    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;

    let x00 = lerp(corner(0, 0, 0), corner(1, 0, 0), fx);
    let x10 = lerp(corner(0, 1, 0), corner(1, 1, 0), fx);
    let x01 = lerp(corner(0, 0, 1), corner(1, 0, 1), fx);
    let x11 = lerp(corner(0, 1, 1), corner(1, 1, 1), fx);
    lerp(lerp(x00, x10, fy), lerp(x01, x11, fy), fz)
}

/// Noise-space offset selecting one nebula out of the infinite noise volume
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeedVector {
    pub offset: Vec3,
}

impl SeedVector {
    #[must_use]
    pub fn new(offset: Vec3) -> Self {
        Self { offset }
    }

    /// Deterministic offset derived from an integer seed
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::sample(&mut rng)
    }

    /// Fresh offset from the thread RNG
    #[must_use]
    pub fn random() -> Self {
        Self::sample(&mut rand::rng())
    }

    fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            offset: Vec3::new(
                rng.random_range(-SEED_OFFSET_RANGE..SEED_OFFSET_RANGE),
                rng.random_range(-SEED_OFFSET_RANGE..SEED_OFFSET_RANGE),
                rng.random_range(-SEED_OFFSET_RANGE..SEED_OFFSET_RANGE),
            ),
        }
    }
}

/// Generator tunables
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseSettings {
    /// Number of fBm layers
    pub octaves: u32,
    /// Lattice cells spanned by the grid for the first octave
    pub base_frequency: f32,
    /// Amplitude ratio between successive octaves
    pub gain: f32,
    /// Frequency ratio between successive octaves
    pub lacunarity: f32,
    /// Peak density after shaping
    pub density_scale: f32,
    /// Noise values below this level produce empty space
    pub coverage: f32,
    /// Exponent of the spherical edge falloff; 0 disables it
    pub falloff: f32,
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self {
            octaves: 5,
            base_frequency: 3.0,
            gain: 0.5,
            lacunarity: 2.0,
            density_scale: 1.0,
            coverage: 0.45,
            falloff: 1.5,
        }
    }
}

impl NoiseSettings {
    pub fn validate(&self) -> SimResult<()> {
        let finite = [
            self.base_frequency,
            self.gain,
            self.lacunarity,
            self.density_scale,
            self.coverage,
            self.falloff,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite {
            return Err(SimError::InvalidConfig(
                "noise settings must be finite".to_string(),
            ));
        }
        if self.octaves == 0 || self.octaves > 16 {
            return Err(SimError::InvalidConfig(format!(
                "noise octaves must be within 1..=16, got {}",
                self.octaves
            )));
        }
        if !(0.0..1.0).contains(&self.coverage) {
            return Err(SimError::InvalidConfig(format!(
                "noise coverage must be within [0, 1), got {}",
                self.coverage
            )));
        }
        if self.gain <= 0.0 || self.base_frequency <= 0.0 || self.falloff < 0.0 {
            return Err(SimError::InvalidConfig(
                "noise gain and frequency must be positive, falloff non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// One-shot generator for the backbone field
#[derive(Debug, Clone, Default)]
pub struct ProceduralSeeder {
    settings: NoiseSettings,
}

impl ProceduralSeeder {
    #[must_use]
    pub fn new(settings: NoiseSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &NoiseSettings {
        &self.settings
    }

    /// Normalized fBm at a noise-space position, in [0, 1]
    #[must_use]
    pub fn fbm(&self, p: Vec3) -> f32 {
        let mut total = 0.0_f32;
        let mut amplitude = 1.0_f32;
        let mut amplitude_sum = 0.0_f32;
        let mut frequency = 1.0_f32;

        for octave in 0..self.settings.octaves {
            total += value_noise_3d(p * frequency, octave) * amplitude;
            amplitude_sum += amplitude;
            amplitude *= self.settings.gain;
            frequency *= self.settings.lacunarity;
        }

        if amplitude_sum > 0.0 {
            total / amplitude_sum
        } else {
            0.0
        }
    }

    /// Shaped density at normalized grid coordinates `uvw ∈ [0, 1]³`
    #[must_use]
    pub fn density_at(&self, uvw: Vec3, seed: &SeedVector) -> f32 {
        let s = &self.settings;
        let n = self.fbm(uvw * s.base_frequency + seed.offset);
        let shaped = ((n - s.coverage) / (1.0 - s.coverage)).clamp(0.0, 1.0);

        // Spherical attenuation: 1 at the center, 0 at the inscribed sphere
        let r = ((uvw - Vec3::repeat(0.5)) * 2.0).norm().min(1.0);
        let mask = (1.0 - r * r).powf(s.falloff);

        shaped * mask * s.density_scale
    }

    /// Write every cell of `field` exactly once
    pub fn generate(&self, field: &mut ScalarField, seed: &SeedVector) {
        let dims = field.dimensions();
        if dims.cell_count() == 0 {
            return;
        }
        let slice_len = dims.slice_len();
        let width = dims.width as usize;
        let extent = dims.extent();

        field
            .as_mut_slice()
            .par_chunks_mut(slice_len)
            .enumerate()
            .for_each(|(z, slice)| {
                for (i, cell) in slice.iter_mut().enumerate() {
                    let uvw = Vec3::new(
                        (usize_to_f32(i % width) + 0.5) / extent.x,
                        (usize_to_f32(i / width) + 0.5) / extent.y,
                        (usize_to_f32(z) + 0.5) / extent.z,
                    );
                    *cell = self.density_at(uvw, seed);
                }
            });
    }
}
