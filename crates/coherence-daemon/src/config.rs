//! Configuration for coherence-daemon

use coherence_monitor::MonitorConfig;
use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Engine configuration
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Simulated metric source
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Simulated metric source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Components to report
    #[serde(default = "default_components")]
    pub components: Vec<String>,

    /// RNG seed; entropy when unset
    #[serde(default)]
    pub seed: Option<u64>,

    /// Centre of the sine wave
    #[serde(default = "default_baseline")]
    pub baseline: f64,

    /// Sine amplitude
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,

    /// Half-width of the uniform noise added to each reading
    #[serde(default = "default_noise")]
    pub noise: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            components: default_components(),
            seed: None,
            baseline: default_baseline(),
            amplitude: default_amplitude(),
            noise: default_noise(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_components() -> Vec<String> {
    ["memory", "attention", "reasoning", "perception", "integration"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_baseline() -> f64 {
    0.8
}

fn default_amplitude() -> f64 {
    0.2
}

fn default_noise() -> f64 {
    0.05
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then an optional file, then
    /// `COHERENCE_`-prefixed environment variables (`__` between sections,
    /// e.g. `COHERENCE_MONITOR__THRESHOLDS__COHERENCE_THRESHOLD=0.8`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("COHERENCE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Check that the loaded configuration is usable.
    pub fn validate(&self) -> Result<(), String> {
        self.monitor.validate().map_err(|e| e.to_string())?;

        if self.simulation.components.is_empty() {
            return Err("simulation.components must name at least one component".to_string());
        }
        for (name, value) in [
            ("baseline", self.simulation.baseline),
            ("amplitude", self.simulation.amplitude),
            ("noise", self.simulation.noise),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(format!("simulation.{} must be finite and non-negative", name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.simulation.components.len(), 5);
        assert!(config.simulation.seed.is_none());
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_without_file_matches_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.monitor, MonitorConfig::default());
        assert_eq!(config.simulation, SimulationConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!(
            "coherenced-config-{}.toml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "[monitor.thresholds]\n\
             coherence_threshold = 0.8\n\
             anomaly_sensitivity = -1.0\n\
             \n\
             [simulation]\n\
             components = [\"alpha\", \"beta\"]\n\
             seed = 7\n",
        )
        .unwrap();

        let config = DaemonConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.monitor.thresholds.coherence_threshold, 0.8);
        assert_eq!(config.monitor.thresholds.critical_threshold, 0.3);
        // out-of-range thresholds are clamped on load
        assert_eq!(config.monitor.thresholds.anomaly_sensitivity, 0.0);
        assert_eq!(config.simulation.components, vec!["alpha", "beta"]);
        assert_eq!(config.simulation.seed, Some(7));
        assert_eq!(config.simulation.baseline, 0.8);
    }

    #[test]
    fn test_validate_rejects_empty_components() {
        let mut config = DaemonConfig::default();
        config.simulation.components.clear();
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.simulation.noise = f64::NAN;
        assert!(config.validate().is_err());
    }
}
