//! Local fallback generation.
//!
//! A random stand-in for the remote service, used when it is unreachable.
//! Output mirrors the remote mock's shape and formulas so a degraded
//! session looks and behaves like a live one.

use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::sync::Mutex;
use sungrid_core::config::FallbackConfig;
use sungrid_core::{
    DetectionResult, PanelService, Result, SimulationRequest, SimulationResult, SungridError,
};

/// Locally generated detections and simulation steps.
///
/// The RNG sits behind a mutex so the generator can serve concurrent
/// callers through the shared `PanelService` trait object.
pub struct LocalGenerator {
    config: FallbackConfig,
    rng: Mutex<StdRng>,
}

impl LocalGenerator {
    /// Create a generator seeded from OS entropy.
    pub fn new(config: FallbackConfig) -> Result<Self> {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Create a generator with a fixed seed, for reproducible output.
    pub fn with_seed(config: FallbackConfig, seed: u64) -> Result<Self> {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: FallbackConfig, rng: StdRng) -> Result<Self> {
        if config.min_panels == 0 || config.max_panels < config.min_panels {
            return Err(SungridError::ConfigError(format!(
                "panel range {}..={} is empty",
                config.min_panels, config.max_panels
            )));
        }
        if config.max_hotspots < config.min_hotspots {
            return Err(SungridError::ConfigError(format!(
                "hotspot range {}..={} is empty",
                config.min_hotspots, config.max_hotspots
            )));
        }
        Ok(Self {
            config,
            rng: Mutex::new(rng),
        })
    }

    fn rng(&self) -> std::sync::MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PanelService for LocalGenerator {
    /// Generate a plausible detection. The image bytes are ignored; the
    /// panel and hotspot counts are drawn from the configured ranges.
    fn detect(&self, _image: &[u8], _filename: &str) -> Result<DetectionResult> {
        let c = &self.config;
        let mut rng = self.rng();

        let total_panels = rng.gen_range(c.min_panels..=c.max_panels);
        let max_hotspots = c.max_hotspots.min(total_panels);
        let min_hotspots = c.min_hotspots.min(max_hotspots);
        let hotspot_count = rng.gen_range(min_hotspots..=max_hotspots);
        let hotspot_panels: BTreeSet<u32> = (1..=total_panels)
            .choose_multiple(&mut *rng, hotspot_count as usize)
            .into_iter()
            .collect();

        tracing::debug!(total_panels, hotspots = hotspot_panels.len(), "generated local detection");
        Ok(DetectionResult {
            total_panels,
            hotspot_panels,
            annotated_image: None,
        })
    }

    /// Run one local optimization step: random healthy panels go on, the
    /// rest stand by, damage and efficiency follow the remote mock's
    /// formulas.
    fn simulate(&self, request: &SimulationRequest) -> Result<SimulationResult> {
        let total = request.total_panels;
        if total == 0 {
            return Err(SungridError::InvalidInput(
                "cannot simulate zero panels".into(),
            ));
        }
        for &id in &request.hotspot_panels {
            if id == 0 || id > total {
                return Err(SungridError::InvalidInput(format!(
                    "hotspot id {} out of range 1..={}",
                    id, total
                )));
            }
        }

        let c = &self.config;
        let hotspot_panels = request.hotspot_panels.clone();
        let healthy: Vec<u32> = (1..=total)
            .filter(|id| !hotspot_panels.contains(id))
            .collect();
        let activated = (request.required_on as usize).min(healthy.len());

        let mut rng = self.rng();
        let panels_on: BTreeSet<u32> = healthy
            .iter()
            .copied()
            .choose_multiple(&mut *rng, activated)
            .into_iter()
            .collect();
        let panels_off: BTreeSet<u32> = healthy
            .iter()
            .copied()
            .filter(|id| !panels_on.contains(id))
            .collect();

        let hotspots = hotspot_panels.len() as f64;
        let damage_percent =
            rng.gen_range(0.0..=c.max_random_damage) + hotspots * c.damage_per_hotspot;
        let inactive = (total as usize - activated) as f64;
        let efficiency_percent =
            (100.0 - hotspots * c.hotspot_penalty - inactive * c.idle_penalty)
                .max(c.efficiency_floor);

        tracing::debug!(
            on = panels_on.len(),
            efficiency = efficiency_percent,
            damage = damage_percent,
            "generated local simulation step"
        );
        Ok(SimulationResult {
            panels_on,
            panels_off,
            hotspot_panels,
            damage_percent,
            efficiency_percent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(seed: u64) -> LocalGenerator {
        LocalGenerator::with_seed(FallbackConfig::default(), seed).expect("valid config")
    }

    fn request(total: u32, hotspots: &[u32], required_on: u32) -> SimulationRequest {
        SimulationRequest {
            total_panels: total,
            hotspot_panels: hotspots.iter().copied().collect(),
            required_on,
        }
    }

    #[test]
    fn detections_stay_within_configured_ranges() {
        let gen = generator(7);
        for _ in 0..25 {
            let d = gen.detect(b"ignored", "ignored.jpg").expect("detect");
            assert!((12..=20).contains(&d.total_panels));
            assert!((1..=3).contains(&(d.hotspot_panels.len() as u32)));
            assert!(d.validate().is_ok());
        }
    }

    #[test]
    fn same_seed_reproduces_the_same_detection() {
        let a = generator(42).detect(b"x", "x.jpg").expect("detect");
        let b = generator(42).detect(b"x", "x.jpg").expect("detect");
        assert_eq!(a, b);
    }

    #[test]
    fn simulate_activates_exactly_the_requested_healthy_panels() {
        let gen = generator(3);
        let result = gen.simulate(&request(10, &[2, 5], 4)).expect("simulate");

        assert_eq!(result.panels_on.len(), 4);
        assert_eq!(result.panels_off.len(), 4);
        assert!(result.validate(10).is_ok());
    }

    #[test]
    fn hotspot_panels_are_never_activated() {
        let gen = generator(11);
        for _ in 0..25 {
            let result = gen.simulate(&request(10, &[2, 5, 9], 7)).expect("simulate");
            assert!(result.panels_on.is_disjoint(&result.hotspot_panels));
        }
    }

    #[test]
    fn excess_required_on_saturates_at_healthy_count() {
        let gen = generator(5);
        let result = gen.simulate(&request(8, &[1, 2, 3], 50)).expect("simulate");

        assert_eq!(result.panels_on.len(), 5);
        assert!(result.panels_off.is_empty());
    }

    #[test]
    fn efficiency_follows_penalty_formula() {
        // 10 panels, 2 hotspots, 4 on: 100 - 2*8 - 6*2 = 72.
        let gen = generator(9);
        let result = gen.simulate(&request(10, &[2, 5], 4)).expect("simulate");
        assert_eq!(result.efficiency_percent, 72.0);
    }

    #[test]
    fn efficiency_never_drops_below_the_floor() {
        // 100 - 6*8 - 10*2 would be 32; floored at 50.
        let gen = generator(13);
        let result = gen
            .simulate(&request(10, &[1, 2, 3, 4, 5, 6], 0))
            .expect("simulate");
        assert_eq!(result.efficiency_percent, 50.0);
    }

    #[test]
    fn damage_combines_random_component_and_hotspot_term() {
        let gen = generator(17);
        for _ in 0..25 {
            let result = gen.simulate(&request(10, &[2, 5], 4)).expect("simulate");
            // 2 hotspots contribute 4.0; the random component adds 0..=5.
            assert!(result.damage_percent >= 4.0);
            assert!(result.damage_percent <= 9.0);
        }
    }

    #[test]
    fn rejects_out_of_range_hotspot() {
        let gen = generator(1);
        let err = gen
            .simulate(&request(5, &[9], 2))
            .expect_err("should reject");
        assert!(matches!(err, SungridError::InvalidInput(_)));
    }

    #[test]
    fn rejects_empty_panel_range_config() {
        let config = FallbackConfig {
            min_panels: 10,
            max_panels: 5,
            ..FallbackConfig::default()
        };
        assert!(matches!(
            LocalGenerator::with_seed(config, 1),
            Err(SungridError::ConfigError(_))
        ));
    }
}
