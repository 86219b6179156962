// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};

use crate::error::{PtychoError, PtychoResult};

/// Difference-map engine configuration with orthogonal probe relaxation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmoprConfig {
    /// Difference-map mixing factor, valid interval [0, 1].
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Number of outer iterations before the probe update starts.
    #[serde(default = "default_probe_update_start")]
    pub probe_update_start: usize,
    /// If true, update the object before the probe in the overlap loop.
    #[serde(default = "default_update_object_first")]
    pub update_object_first: bool,
    /// Threshold on the relative probe change that interrupts the inner
    /// overlap loop.
    #[serde(default = "default_overlap_converge_factor")]
    pub overlap_converge_factor: f64,
    /// Maximum number of iterations for the overlap constraint loop.
    #[serde(default = "default_overlap_max_iterations")]
    pub overlap_max_iterations: usize,
    /// Weight of the current object in the update.
    #[serde(default = "default_object_inertia")]
    pub object_inertia: f64,
    /// Fourier constraint is met once the rms model/data error falls below
    /// this fraction. `None` disables the power bound entirely.
    #[serde(default = "default_fourier_relax_factor")]
    pub fourier_relax_factor: Option<f64>,
    /// Gaussian smoothing (pixel) of the current object prior to update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obj_smooth_std: Option<f64>,
    /// Desired limits (min, max) of the object modulus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_object: Option<(f64, f64)>,
    /// Metric factor in the exit + probe augmented space.
    #[serde(default = "default_ip_metric")]
    pub ip_metric: f64,
    /// Dimension of the subspace spanned by the probe ensemble.
    #[serde(default = "default_subspace_dim")]
    pub subspace_dim: usize,
    /// Valid probe area as fraction of the probe frame (circular support).
    #[serde(default = "default_probe_support")]
    pub probe_support: Option<f64>,
    /// Compute the photon log-likelihood error each Fourier update.
    #[serde(default = "default_photon_errors")]
    pub photon_errors: bool,
    /// Optional annealing position refinement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_refinement: Option<PosRefConfig>,
}

fn default_alpha() -> f64 {
    1.0
}
fn default_probe_update_start() -> usize {
    2
}
fn default_update_object_first() -> bool {
    true
}
fn default_overlap_converge_factor() -> f64 {
    0.05
}
fn default_overlap_max_iterations() -> usize {
    10
}
fn default_object_inertia() -> f64 {
    1e-4
}
fn default_fourier_relax_factor() -> Option<f64> {
    Some(0.05)
}
fn default_ip_metric() -> f64 {
    1.0
}
fn default_subspace_dim() -> usize {
    1
}
fn default_probe_support() -> Option<f64> {
    Some(0.7)
}
fn default_photon_errors() -> bool {
    true
}

impl Default for DmoprConfig {
    fn default() -> Self {
        DmoprConfig {
            alpha: default_alpha(),
            probe_update_start: default_probe_update_start(),
            update_object_first: default_update_object_first(),
            overlap_converge_factor: default_overlap_converge_factor(),
            overlap_max_iterations: default_overlap_max_iterations(),
            object_inertia: default_object_inertia(),
            fourier_relax_factor: default_fourier_relax_factor(),
            obj_smooth_std: None,
            clip_object: None,
            ip_metric: default_ip_metric(),
            subspace_dim: default_subspace_dim(),
            probe_support: default_probe_support(),
            photon_errors: default_photon_errors(),
            position_refinement: None,
        }
    }
}

impl DmoprConfig {
    /// Load from a JSON file.
    pub fn from_file(path: &str) -> PtychoResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PtychoResult<()> {
        if !self.alpha.is_finite() || !(0.0..=1.0).contains(&self.alpha) {
            return Err(PtychoError::Config(
                "alpha must be finite and in [0, 1]".to_string(),
            ));
        }
        if self.overlap_max_iterations == 0 {
            return Err(PtychoError::Config(
                "overlap_max_iterations must be >= 1".to_string(),
            ));
        }
        if !self.overlap_converge_factor.is_finite() || self.overlap_converge_factor < 0.0 {
            return Err(PtychoError::Config(
                "overlap_converge_factor must be finite and >= 0".to_string(),
            ));
        }
        if !self.object_inertia.is_finite() || self.object_inertia < 0.0 {
            return Err(PtychoError::Config(
                "object_inertia must be finite and >= 0".to_string(),
            ));
        }
        if let Some(frf) = self.fourier_relax_factor {
            if !frf.is_finite() || frf <= 0.0 {
                return Err(PtychoError::Config(
                    "fourier_relax_factor must be finite and > 0 when given".to_string(),
                ));
            }
        }
        if let Some(std) = self.obj_smooth_std {
            if !std.is_finite() || std <= 0.0 {
                return Err(PtychoError::Config(
                    "obj_smooth_std must be finite and > 0 when given".to_string(),
                ));
            }
        }
        if let Some((lo, hi)) = self.clip_object {
            if !lo.is_finite() || !hi.is_finite() || lo < 0.0 || lo >= hi {
                return Err(PtychoError::Config(
                    "clip_object bounds must satisfy 0 <= min < max".to_string(),
                ));
            }
        }
        if !self.ip_metric.is_finite() || self.ip_metric <= 0.0 {
            return Err(PtychoError::Config(
                "ip_metric must be finite and > 0".to_string(),
            ));
        }
        if self.subspace_dim == 0 {
            return Err(PtychoError::Config(
                "subspace_dim must be >= 1; the zero-rank ensemble reduction is not supported"
                    .to_string(),
            ));
        }
        if let Some(supp) = self.probe_support {
            if !supp.is_finite() || !(0.0..=1.0).contains(&supp) {
                return Err(PtychoError::Config(
                    "probe_support must be finite and in [0, 1]".to_string(),
                ));
            }
        }
        if let Some(ref pos) = self.position_refinement {
            pos.validate()?;
        }
        Ok(())
    }
}

/// Error metric used during position refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefineMetric {
    #[default]
    Fourier,
    Photon,
}

/// Annealing position refinement parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosRefConfig {
    /// First outer iteration at which refinement runs.
    pub start: usize,
    /// Iteration at which the search radius reaches zero.
    pub stop: usize,
    /// Refinement runs every `interval` iterations within [start, stop).
    #[serde(default = "default_posref_interval")]
    pub interval: usize,
    /// Initial search radius at `start`, in coordinate units.
    pub amplitude: f64,
    /// Absolute cap on a single trial shift.
    pub max_shift: f64,
    /// Number of trial perturbations per view.
    #[serde(default = "default_posref_nshifts")]
    pub nshifts: usize,
    #[serde(default)]
    pub metric: RefineMetric,
    /// RNG seed for reproducible trial draws.
    #[serde(default = "default_posref_seed")]
    pub seed: u64,
}

fn default_posref_interval() -> usize {
    1
}
fn default_posref_nshifts() -> usize {
    4
}
fn default_posref_seed() -> u64 {
    1
}

impl PosRefConfig {
    pub fn validate(&self) -> PtychoResult<()> {
        if self.start >= self.stop {
            return Err(PtychoError::Config(format!(
                "position_refinement window requires start < stop, got {}..{}",
                self.start, self.stop
            )));
        }
        if self.interval == 0 {
            return Err(PtychoError::Config(
                "position_refinement.interval must be >= 1".to_string(),
            ));
        }
        if self.nshifts == 0 {
            return Err(PtychoError::Config(
                "position_refinement.nshifts must be >= 1".to_string(),
            ));
        }
        if !self.amplitude.is_finite() || self.amplitude <= 0.0 {
            return Err(PtychoError::Config(
                "position_refinement.amplitude must be finite and > 0".to_string(),
            ));
        }
        if !self.max_shift.is_finite() || self.max_shift <= 0.0 {
            return Err(PtychoError::Config(
                "position_refinement.max_shift must be finite and > 0".to_string(),
            ));
        }
        Ok(())
    }
}
