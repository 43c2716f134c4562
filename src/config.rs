//! Configuration system using Figment
//!
//! Settings are layered, highest precedence last:
//! 1. Compiled-in defaults
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `PYRO_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! PYRO_LINK__READ_TIMEOUT_MS=2000
//! PYRO_SWEEP__DEADBAND=0.5
//! PYRO_AUTOGAIN__SEED=[30,30]
//! ```
//!
//! # Example
//!
//! ```no_run
//! use uw_pyrometer::config::Settings;
//!
//! let settings = Settings::load_from("pyrometer.toml")?;
//! println!("Settle timeout: {:?}", settings.sweep.settle_timeout());
//! # Ok::<(), uw_pyrometer::error::PyroError>(())
//! ```

use crate::error::{AppResult, PyroError};
use crate::protocol::GainPair;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Serial link to the pyrometer board
    #[serde(default)]
    pub link: LinkSettings,
    /// Gain auto-tuning search
    #[serde(default)]
    pub autogain: AutoGainSettings,
    /// Periodic acquisition
    #[serde(default)]
    pub sampling: SamplingSettings,
    /// Calibration sweep timing
    #[serde(default)]
    pub sweep: SweepSettings,
    /// Reference blackbody term of the emissivity fit
    #[serde(default)]
    pub optics: OpticsSettings,
}

/// Serial link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Line rate in symbols per second
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-exchange read timeout in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Auto-gain configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoGainSettings {
    /// Upper bound on trial gain pairs
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Early stop once both channel errors are below this many counts
    #[serde(default = "default_tolerance")]
    pub tolerance: u16,
    /// Starting pair `[thermopile, thermistor]` when no previous result exists
    #[serde(default = "default_seed")]
    pub seed: [u8; 2],
    /// Wait after each gain change before measuring, in milliseconds
    #[serde(default = "default_gain_settle_ms")]
    pub settle_ms: u64,
}

/// Sampling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingSettings {
    /// Time between ticks in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Number of most recent samples averaged
    #[serde(default = "default_average")]
    pub average: usize,
    /// Samples to collect; `0` runs until cancelled, absent means `average`
    #[serde(default)]
    pub samples: Option<usize>,
}

/// Calibration sweep configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Tolerance around the setpoint considered reached, in C
    #[serde(default = "default_deadband")]
    pub deadband: f64,
    /// Bound on the total wait for one plateau, in seconds
    #[serde(default = "default_settle_timeout_secs")]
    pub settle_timeout_secs: f64,
    /// Controller poll interval while settling, in seconds
    #[serde(default = "default_settle_poll_secs")]
    pub settle_poll_secs: f64,
    /// Pause after writing a setpoint and after restarting the controller, in seconds
    #[serde(default = "default_apply_delay_secs")]
    pub apply_delay_secs: f64,
    /// Controller poll interval while averaging the block temperature, in seconds
    #[serde(default = "default_block_poll_secs")]
    pub block_poll_secs: f64,
}

/// Optics of the reference term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpticsSettings {
    /// Geometric coupling between block and thermopile (m^2 sr); multiplies sigma T^4
    #[serde(default = "default_geometry_factor")]
    pub geometry_factor: f64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for AutoGainSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            seed: default_seed(),
            settle_ms: default_gain_settle_ms(),
        }
    }
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            average: default_average(),
            samples: None,
        }
    }
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            deadband: default_deadband(),
            settle_timeout_secs: default_settle_timeout_secs(),
            settle_poll_secs: default_settle_poll_secs(),
            apply_delay_secs: default_apply_delay_secs(),
            block_poll_secs: default_block_poll_secs(),
        }
    }
}

impl Default for OpticsSettings {
    fn default() -> Self {
        Self {
            geometry_factor: default_geometry_factor(),
        }
    }
}

impl LinkSettings {
    /// Bound on one whole reply.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl AutoGainSettings {
    /// Seed used when the caller has none.
    pub fn seed_gains(&self) -> GainPair {
        GainPair::new(self.seed[0], self.seed[1])
    }

    /// Wait after each gain change.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl SamplingSettings {
    /// Time between REPORT requests.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Sample count to collect, falling back to the averaging window.
    pub fn sample_count(&self) -> usize {
        self.samples.unwrap_or(self.average)
    }
}

/// Duration views of the sweep timings.
///
/// These convert without checking; call [`SweepSettings::validate`] first, as
/// negative or non-finite seconds panic.
impl SweepSettings {
    /// Bound on one settle wait.
    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.settle_timeout_secs)
    }

    /// Controller poll while settling.
    pub fn settle_poll(&self) -> Duration {
        Duration::from_secs_f64(self.settle_poll_secs)
    }

    /// Pause around each setpoint write.
    pub fn apply_delay(&self) -> Duration {
        Duration::from_secs_f64(self.apply_delay_secs)
    }

    /// Controller poll while averaging.
    pub fn block_poll(&self) -> Duration {
        Duration::from_secs_f64(self.block_poll_secs)
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_baud_rate() -> u32 {
    9600
}

fn default_read_timeout_ms() -> u64 {
    4000
}

fn default_max_iterations() -> u32 {
    32
}

fn default_tolerance() -> u16 {
    64
}

fn default_seed() -> [u8; 2] {
    [20, 20]
}

fn default_gain_settle_ms() -> u64 {
    200
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_average() -> usize {
    1
}

fn default_deadband() -> f64 {
    0.2
}

fn default_settle_timeout_secs() -> f64 {
    600.0
}

fn default_settle_poll_secs() -> f64 {
    20.0
}

fn default_apply_delay_secs() -> f64 {
    3.0
}

fn default_block_poll_secs() -> f64 {
    10.0
}

fn default_geometry_factor() -> f64 {
    1.0e-8
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load defaults overlaid with `PYRO_` environment variables.
    pub fn load() -> AppResult<Self> {
        Self::extract(Self::figment())
    }

    /// Load defaults, then the TOML file at `path`, then the environment.
    ///
    /// A missing file is not an error; its layer is simply empty.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::extract(
            Figment::from(Serialized::defaults(Settings::default()))
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed("PYRO_").split("__")),
        )
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Env::prefixed("PYRO_").split("__"))
    }

    fn extract(figment: Figment) -> AppResult<Self> {
        let settings: Self = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Render the effective settings as TOML.
    pub fn to_toml_string(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PyroError::Validation(format!("Cannot render settings: {}", e)))
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - The link rate and read timeout are non-zero
    /// - The auto-gain iteration bound is in 1..=255 and the seed gains are non-zero
    /// - The averaging window is non-zero and the sampling interval is positive
    /// - Every sweep duration is positive and finite, and the deadband is positive
    pub fn validate(&self) -> AppResult<()> {
        if self.link.baud_rate == 0 || self.link.read_timeout_ms == 0 {
            return Err(PyroError::Validation(
                "link.baud_rate and link.read_timeout_ms must be non-zero".to_string(),
            ));
        }

        if !(1..=255).contains(&self.autogain.max_iterations) {
            return Err(PyroError::Validation(format!(
                "Invalid autogain.max_iterations {}. Must be 1-255",
                self.autogain.max_iterations
            )));
        }
        if self.autogain.seed.contains(&0) {
            return Err(PyroError::Validation(
                "autogain.seed gains must be in 1-255".to_string(),
            ));
        }

        if self.sampling.average == 0 {
            return Err(PyroError::Validation(
                "sampling.average must be at least 1".to_string(),
            ));
        }
        if self.sampling.interval_ms == 0 {
            return Err(PyroError::Validation(
                "sampling.interval_ms must be positive".to_string(),
            ));
        }

        self.sweep.validate()
    }
}

impl SweepSettings {
    /// Check that every duration converts and the deadband is positive.
    pub fn validate(&self) -> AppResult<()> {
        let durations = [
            ("sweep.settle_timeout_secs", self.settle_timeout_secs),
            ("sweep.settle_poll_secs", self.settle_poll_secs),
            ("sweep.block_poll_secs", self.block_poll_secs),
        ];
        for (name, value) in durations {
            if !(value.is_finite() && value > 0.0) {
                return Err(PyroError::Validation(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if !(self.apply_delay_secs.is_finite() && self.apply_delay_secs >= 0.0) {
            return Err(PyroError::Validation(format!(
                "sweep.apply_delay_secs must be non-negative, got {}",
                self.apply_delay_secs
            )));
        }
        if self.deadband.is_nan() || self.deadband <= 0.0 {
            return Err(PyroError::Validation(format!(
                "sweep.deadband must be positive, got {}",
                self.deadband
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.link.read_timeout(), Duration::from_secs(4));
        assert_eq!(settings.autogain.seed_gains(), GainPair::new(20, 20));
        assert_eq!(settings.autogain.max_iterations, 32);
        assert_eq!(settings.sampling.sample_count(), 1);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[sweep]
deadband = 0.5
settle_timeout_secs = 120.0

[sampling]
average = 8
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.sweep.deadband, 0.5);
        assert_eq!(settings.sweep.settle_timeout(), Duration::from_secs(120));
        assert_eq!(settings.sampling.average, 8);
        assert_eq!(settings.sampling.sample_count(), 8);
        assert_eq!(settings.link.baud_rate, 9600);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut settings = Settings::default();
        settings.sampling.average = 0;
        assert!(matches!(settings.validate(), Err(PyroError::Validation(_))));

        let mut settings = Settings::default();
        settings.autogain.seed = [0, 20];
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.sweep.settle_poll_secs = -1.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_sweep_section_validates_alone() {
        assert!(SweepSettings::default().validate().is_ok());

        let mut sweep = SweepSettings::default();
        sweep.settle_timeout_secs = -4.0;
        assert!(matches!(sweep.validate(), Err(PyroError::Validation(_))));

        let mut sweep = SweepSettings::default();
        sweep.deadband = 0.0;
        assert!(sweep.validate().is_err());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[sweep]\ndeadband = \"wide\"").unwrap();
        let err = Settings::load_from(file.path()).unwrap_err();
        assert!(matches!(err, PyroError::Config(_)));
    }

    #[test]
    fn test_toml_rendering_round_trips() {
        let rendered = Settings::default().to_toml_string().unwrap();
        assert!(rendered.contains("[sweep]"));
        let parsed: Settings = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, Settings::default());
    }
}
