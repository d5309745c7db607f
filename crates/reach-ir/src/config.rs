//! Run configuration for a sampling pipeline.
//!
//! Every section carries defaults, so a TOML file only needs the keys it
//! changes:
//!
//! ```toml
//! [sampler]
//! samples = 50000
//!
//! [shell]
//! inner_gap_factor = 3.0
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::IrError;

/// Joint-space sampler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Number of joint configurations to draw.
    pub samples: u32,
    /// Iterations between pose restore + yield.
    pub sample_chunk: u32,
    /// RNG seed; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            samples: 20_000,
            sample_chunk: 2_500,
            seed: None,
        }
    }
}

/// Directional shell extraction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Azimuth bins over `[-π, π)`.
    pub theta_bins: u32,
    /// Polar bins over `[0, π]`.
    pub phi_bins: u32,
    /// Radii at or below this are ignored for cavity detection.
    pub inner_min_radius: f64,
    /// A gap must exceed this multiple of the median radial step.
    pub inner_gap_factor: f64,
    /// Minimum radii in a bin before a cavity is considered.
    pub inner_min_samples: u32,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            theta_bins: 72,
            phi_bins: 36,
            inner_min_radius: 0.02,
            inner_gap_factor: 4.0,
            inner_min_samples: 12,
        }
    }
}

/// PCD2 upload settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Points per frame.
    pub chunk_points: u32,
    /// Frames between cooperative yields.
    pub yield_every_chunks: u32,
    /// Optional stream label announced before the first frame.
    pub kind: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_points: 200_000,
            yield_every_chunks: 2,
            kind: None,
        }
    }
}

/// Voxel downsampling for local display/export.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Voxel edge length; `None` disables dedup.
    pub voxel_size: Option<f64>,
}

/// Progress split between sampling and upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Share of the progress bar owned by sampling, in `[0, 1]`.
    pub sampling_fraction: f64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            sampling_fraction: 0.95,
        }
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Sampler section.
    pub sampler: SamplerConfig,
    /// Shell extraction section; `None` skips extraction.
    pub shell: Option<ShellConfig>,
    /// Upload section.
    pub stream: StreamConfig,
    /// Dedup section.
    pub dedup: DedupConfig,
    /// Progress section.
    pub progress: ProgressConfig,
}

impl PipelineConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, IrError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, IrError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Configuration for a resolution preset.
    pub fn from_preset(resolution: Resolution) -> Self {
        let mut config = Self::default();
        resolution.apply(&mut config);
        config
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), IrError> {
        if self.sampler.sample_chunk == 0 {
            return Err(IrError::Invalid("sampler.sample_chunk must be > 0".into()));
        }
        if self.stream.chunk_points == 0 {
            return Err(IrError::Invalid("stream.chunk_points must be > 0".into()));
        }
        if self.stream.yield_every_chunks == 0 {
            return Err(IrError::Invalid(
                "stream.yield_every_chunks must be > 0".into(),
            ));
        }
        if let Some(shell) = &self.shell {
            if shell.theta_bins == 0 || shell.phi_bins == 0 {
                return Err(IrError::Invalid("shell bins must be > 0".into()));
            }
            if !(shell.inner_gap_factor.is_finite() && shell.inner_gap_factor > 0.0) {
                return Err(IrError::Invalid(
                    "shell.inner_gap_factor must be positive".into(),
                ));
            }
        }
        if let Some(size) = self.dedup.voxel_size {
            if !(size.is_finite() && size > 0.0) {
                return Err(IrError::Invalid(format!(
                    "dedup.voxel_size must be positive, got {size}"
                )));
            }
        }
        let fraction = self.progress.sampling_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(IrError::Invalid(format!(
                "progress.sampling_fraction must be in [0, 1], got {fraction}"
            )));
        }
        Ok(())
    }
}

/// Convenience presets trading run time against density.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Quick preview.
    Low,
    /// Default density.
    Medium,
    /// Dense cloud for export.
    High,
}

impl Resolution {
    /// Sample count for this preset.
    pub fn samples(self) -> u32 {
        match self {
            Resolution::Low => 20_000,
            Resolution::Medium => 80_000,
            Resolution::High => 250_000,
        }
    }

    /// Voxel size hint for this preset.
    pub fn voxel_size(self) -> f64 {
        match self {
            Resolution::Low => 0.02,
            Resolution::Medium => 0.01,
            Resolution::High => 0.005,
        }
    }

    /// Overwrite the preset-controlled fields of `config`.
    pub fn apply(self, config: &mut PipelineConfig) {
        config.sampler.samples = self.samples();
        config.dedup.voxel_size = Some(self.voxel_size());
    }
}

impl std::str::FromStr for Resolution {
    type Err = IrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Resolution::Low),
            "medium" | "med" => Ok(Resolution::Medium),
            "high" => Ok(Resolution::High),
            other => Err(IrError::Invalid(format!("unknown resolution: {other}"))),
        }
    }
}
