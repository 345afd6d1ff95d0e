use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

pub mod assign;
pub mod config;
pub mod controller;
pub mod history;

pub use config::SungridConfig;
pub use controller::{ControllerMode, Phase, SimulationController, Snapshot};

/// Display state of a single panel in the grid.
///
/// Panels are identified by 1-based ids; one `PanelState` exists per panel.
/// State vectors are never mutated in place: every detection or simulation
/// step produces a wholly new vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelState {
    On,
    Hotspot,
    Standby,
}

/// Outcome of a hotspot detection pass over an uploaded thermal image.
///
/// Invariants:
/// - `total_panels` is positive.
/// - Every id in `hotspot_panels` lies in `[1, total_panels]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub total_panels: u32,
    pub hotspot_panels: BTreeSet<u32>,
    /// Relative path to an annotated copy of the uploaded image, when the
    /// detection service produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotated_image: Option<String>,
}

impl DetectionResult {
    /// Check the structural invariants above, fail-closed on violation.
    pub fn validate(&self) -> Result<()> {
        if self.total_panels == 0 {
            return Err(SungridError::InvalidInput(
                "detection reported zero panels".into(),
            ));
        }
        for &id in &self.hotspot_panels {
            if id == 0 || id > self.total_panels {
                return Err(SungridError::InvalidInput(format!(
                    "hotspot id {} out of range 1..={}",
                    id, self.total_panels
                )));
            }
        }
        Ok(())
    }
}

/// Request for one optimization step over the current panel set.
///
/// `required_on` is user-supplied and deliberately not clamped to the
/// healthy-panel count; services absorb the excess with `min()`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub total_panels: u32,
    pub hotspot_panels: BTreeSet<u32>,
    pub required_on: u32,
}

/// Outcome of one optimization step.
///
/// Invariants:
/// - `panels_on`, `panels_off` and `hotspot_panels` are pairwise disjoint
///   and their union is exactly `[1, total_panels]`.
/// - `damage_percent >= 0`, `efficiency_percent` in `[0, 100]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub panels_on: BTreeSet<u32>,
    pub panels_off: BTreeSet<u32>,
    pub hotspot_panels: BTreeSet<u32>,
    pub damage_percent: f64,
    pub efficiency_percent: f64,
}

impl SimulationResult {
    /// Check the partition invariant against `total_panels`, fail-closed.
    pub fn validate(&self, total_panels: u32) -> Result<()> {
        let mut seen: BTreeSet<u32> = BTreeSet::new();
        let sets = [
            ("panels_on", &self.panels_on),
            ("panels_off", &self.panels_off),
            ("hotspot_panels", &self.hotspot_panels),
        ];
        for (name, set) in sets {
            for &id in set.iter() {
                if id == 0 || id > total_panels {
                    return Err(SungridError::InvalidInput(format!(
                        "{} id {} out of range 1..={}",
                        name, id, total_panels
                    )));
                }
                if !seen.insert(id) {
                    return Err(SungridError::InvalidInput(format!(
                        "panel {} appears in more than one result set",
                        id
                    )));
                }
            }
        }
        if seen.len() != total_panels as usize {
            return Err(SungridError::InvalidInput(format!(
                "result covers {} of {} panels",
                seen.len(),
                total_panels
            )));
        }
        if self.damage_percent < 0.0 {
            return Err(SungridError::InvalidInput(format!(
                "negative damage {}",
                self.damage_percent
            )));
        }
        if !(0.0..=100.0).contains(&self.efficiency_percent) {
            return Err(SungridError::InvalidInput(format!(
                "efficiency {} outside 0..=100",
                self.efficiency_percent
            )));
        }
        Ok(())
    }
}

/// Aggregate counters for the current state vector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub on: u32,
    pub off: u32,
    pub hotspot: u32,
    pub damage_percent: f64,
    pub efficiency_percent: f64,
}

impl Default for AggregateStats {
    fn default() -> Self {
        Self {
            on: 0,
            off: 0,
            hotspot: 0,
            damage_percent: 0.0,
            efficiency_percent: 100.0,
        }
    }
}

/// One point in the per-step metrics time series. Immutable once appended.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    /// 1-based step number, monotonically increasing per session.
    pub step: u64,
    pub damage_percent: f64,
    pub efficiency_percent: f64,
    pub hotspot_count: u32,
}

/// Unified error type for sungrid operations.
#[derive(Debug, Error)]
pub enum SungridError {
    /// The remote detection/optimization service could not complete a call:
    /// transport failure, non-success status, or a malformed response body.
    /// Recovered by falling back to local generation, never surfaced as a
    /// hard failure by the controller.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// An operation was attempted without the inputs it needs. Checked
    /// before any side effect; rejected calls mutate no state.
    #[error("input required: {0}")]
    InputRequired(String),

    /// Structured data violated a documented invariant.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration failed validation at construction time.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, SungridError>;

/// Capability interface shared by the remote service client and the local
/// fallback generator.
///
/// Both implementations return structurally identical results so the
/// assignment engine has exactly one code path regardless of source. The
/// controller depends only on this trait and selects the implementation by
/// its current mode.
pub trait PanelService: Send + Sync {
    /// Detect panels and hotspots in an uploaded thermal image.
    ///
    /// Postconditions:
    /// - Returned result satisfies `DetectionResult::validate`.
    fn detect(&self, image: &[u8], filename: &str) -> Result<DetectionResult>;

    /// Run one optimization step for the given panel set.
    ///
    /// Postconditions:
    /// - Returned result satisfies `SimulationResult::validate` for
    ///   `request.total_panels`; hotspot panels are never reported on.
    fn simulate(&self, request: &SimulationRequest) -> Result<SimulationResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[u32]) -> BTreeSet<u32> {
        v.iter().copied().collect()
    }

    #[test]
    fn detection_result_accepts_in_range_hotspots() {
        let result = DetectionResult {
            total_panels: 16,
            hotspot_panels: ids(&[3, 9]),
            annotated_image: None,
        };
        assert!(result.validate().is_ok());
    }

    #[test]
    fn detection_result_rejects_out_of_range_hotspot() {
        let result = DetectionResult {
            total_panels: 10,
            hotspot_panels: ids(&[11]),
            annotated_image: None,
        };
        assert!(matches!(
            result.validate(),
            Err(SungridError::InvalidInput(_))
        ));
    }

    #[test]
    fn detection_result_rejects_zero_panels() {
        let result = DetectionResult {
            total_panels: 0,
            hotspot_panels: BTreeSet::new(),
            annotated_image: None,
        };
        assert!(result.validate().is_err());
    }

    #[test]
    fn simulation_result_accepts_exact_partition() {
        let result = SimulationResult {
            panels_on: ids(&[1, 2, 4]),
            panels_off: ids(&[6]),
            hotspot_panels: ids(&[3, 5]),
            damage_percent: 5.0,
            efficiency_percent: 84.0,
        };
        assert!(result.validate(6).is_ok());
    }

    #[test]
    fn simulation_result_rejects_overlapping_sets() {
        let result = SimulationResult {
            panels_on: ids(&[1, 2]),
            panels_off: ids(&[2, 3]),
            hotspot_panels: ids(&[4]),
            damage_percent: 0.0,
            efficiency_percent: 100.0,
        };
        assert!(result.validate(4).is_err());
    }

    #[test]
    fn simulation_result_rejects_incomplete_coverage() {
        let result = SimulationResult {
            panels_on: ids(&[1]),
            panels_off: ids(&[2]),
            hotspot_panels: BTreeSet::new(),
            damage_percent: 0.0,
            efficiency_percent: 100.0,
        };
        assert!(result.validate(3).is_err());
    }

    #[test]
    fn simulation_result_rejects_efficiency_out_of_range() {
        let result = SimulationResult {
            panels_on: ids(&[1]),
            panels_off: BTreeSet::new(),
            hotspot_panels: BTreeSet::new(),
            damage_percent: 0.0,
            efficiency_percent: 101.0,
        };
        assert!(result.validate(1).is_err());
    }
}
