//! Configuration for the sungrid controller and its service adapters.
//!
//! # Configuration Sources
//!
//! Configuration can be loaded from:
//! - Environment variables (prefixed with `SUNGRID_`)
//! - Programmatic defaults via the builder
//!
//! # Example
//!
//! ```rust,ignore
//! use sungrid_core::config::SungridConfig;
//!
//! let config = SungridConfig::builder()
//!     .base_url("http://detector.internal:8000")
//!     .auto_repeat_period_ms(2000)
//!     .build()?;
//! ```

use crate::{Result, SungridError};
use serde::{Deserialize, Serialize};

/// Complete sungrid configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SungridConfig {
    /// Remote detection/optimization service.
    pub service: ServiceConfig,

    /// Auto-repeat timer.
    pub auto_repeat: AutoRepeatConfig,

    /// Local fallback generation.
    pub fallback: FallbackConfig,

    /// Logging configuration for the embedding process.
    pub logging: LoggingConfig,
}

impl SungridConfig {
    /// Create a new configuration builder.
    pub fn builder() -> SungridConfigBuilder {
        SungridConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Looks for variables prefixed with `SUNGRID_`:
    /// - `SUNGRID_API_BASE` - Base URL of the detection/optimization service
    /// - `SUNGRID_TIMEOUT_MS` - HTTP timeout in milliseconds
    /// - `SUNGRID_AUTO_PERIOD_MS` - Auto-repeat period in milliseconds
    /// - `SUNGRID_LOG_LEVEL` - Logging level (trace, debug, info, warn, error)
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(base) = std::env::var("SUNGRID_API_BASE") {
            config.service.base_url = base;
        }

        if let Ok(timeout) = std::env::var("SUNGRID_TIMEOUT_MS") {
            config.service.timeout_ms = timeout.parse().map_err(|e| {
                SungridError::ConfigError(format!("Invalid SUNGRID_TIMEOUT_MS: {}", e))
            })?;
        }

        if let Ok(period) = std::env::var("SUNGRID_AUTO_PERIOD_MS") {
            config.auto_repeat.period_ms = period.parse().map_err(|e| {
                SungridError::ConfigError(format!("Invalid SUNGRID_AUTO_PERIOD_MS: {}", e))
            })?;
        }

        if let Ok(level) = std::env::var("SUNGRID_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.service.base_url.starts_with("http://")
            && !self.service.base_url.starts_with("https://")
        {
            return Err(SungridError::ConfigError(format!(
                "base_url must be http(s), got {:?}",
                self.service.base_url
            )));
        }
        if self.service.timeout_ms == 0 {
            return Err(SungridError::ConfigError("timeout_ms must be > 0".into()));
        }

        if self.auto_repeat.period_ms < 100 {
            return Err(SungridError::ConfigError(
                "period_ms must be at least 100ms".into(),
            ));
        }

        let f = &self.fallback;
        if f.min_panels == 0 || f.max_panels < f.min_panels {
            return Err(SungridError::ConfigError(format!(
                "panel range {}..={} is empty",
                f.min_panels, f.max_panels
            )));
        }
        if f.max_hotspots < f.min_hotspots || f.max_hotspots > f.min_panels {
            return Err(SungridError::ConfigError(format!(
                "hotspot range {}..={} does not fit {} panels",
                f.min_hotspots, f.max_hotspots, f.min_panels
            )));
        }
        if !(0.0..=100.0).contains(&f.efficiency_floor) {
            return Err(SungridError::ConfigError(
                "efficiency_floor must be within 0..=100".into(),
            ));
        }
        if f.max_random_damage < 0.0 || f.damage_per_hotspot < 0.0 {
            return Err(SungridError::ConfigError(
                "damage parameters must be non-negative".into(),
            ));
        }
        if f.hotspot_penalty < 0.0 || f.idle_penalty < 0.0 {
            return Err(SungridError::ConfigError(
                "efficiency penalties must be non-negative".into(),
            ));
        }

        Ok(())
    }
}

/// Remote service endpoint configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the detection/optimization service.
    pub base_url: String,

    /// Timeout in milliseconds for each HTTP call.
    pub timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".into(),
            timeout_ms: 10_000,
        }
    }
}

/// Auto-repeat timer configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AutoRepeatConfig {
    /// Fixed period between automatic simulation steps, in milliseconds.
    pub period_ms: u64,
}

impl Default for AutoRepeatConfig {
    fn default() -> Self {
        Self { period_ms: 4_000 }
    }
}

/// Parameters for local fallback generation. Defaults mirror the remote
/// service's mock behavior so fallback output is indistinguishable in shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Inclusive range for the generated panel count.
    pub min_panels: u32,
    pub max_panels: u32,

    /// Inclusive range for the generated hotspot count.
    pub min_hotspots: u32,
    pub max_hotspots: u32,

    /// Upper bound of the uniform random damage component.
    pub max_random_damage: f64,

    /// Additional damage contributed per hotspot.
    pub damage_per_hotspot: f64,

    /// Efficiency penalty per hotspot.
    pub hotspot_penalty: f64,

    /// Efficiency penalty per inactive panel.
    pub idle_penalty: f64,

    /// Lower bound for reported efficiency.
    pub efficiency_floor: f64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            min_panels: 12,
            max_panels: 20,
            min_hotspots: 1,
            max_hotspots: 3,
            max_random_damage: 5.0,
            damage_per_hotspot: 2.0,
            hotspot_penalty: 8.0,
            idle_penalty: 2.0,
            efficiency_floor: 50.0,
        }
    }
}

/// Logging configuration.
///
/// The library only emits `tracing` events; installing a subscriber is the
/// embedding process's job, driven by these settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// JSON output format.
    pub json_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json_output: false,
        }
    }
}

/// Builder for SungridConfig.
#[derive(Default)]
pub struct SungridConfigBuilder {
    config: SungridConfig,
}

impl SungridConfigBuilder {
    /// Set the remote service base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.service.base_url = url.into();
        self
    }

    /// Set the per-call HTTP timeout in milliseconds.
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.service.timeout_ms = timeout_ms;
        self
    }

    /// Set the auto-repeat period in milliseconds.
    pub fn auto_repeat_period_ms(mut self, period_ms: u64) -> Self {
        self.config.auto_repeat.period_ms = period_ms;
        self
    }

    /// Set the generated panel count range.
    pub fn panel_range(mut self, min: u32, max: u32) -> Self {
        self.config.fallback.min_panels = min;
        self.config.fallback.max_panels = max;
        self
    }

    /// Set the generated hotspot count range.
    pub fn hotspot_range(mut self, min: u32, max: u32) -> Self {
        self.config.fallback.min_hotspots = min;
        self.config.fallback.max_hotspots = max;
        self
    }

    /// Set the efficiency floor for fallback simulation.
    pub fn efficiency_floor(mut self, floor: f64) -> Self {
        self.config.fallback.efficiency_floor = floor;
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Enable JSON log output.
    pub fn json_logs(mut self, enabled: bool) -> Self {
        self.config.logging.json_output = enabled;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<SungridConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
