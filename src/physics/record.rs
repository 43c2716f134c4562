//! Per-board calibration record

use crate::error::{AppResult, PyroError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Per-board calibration scalars.
///
/// Loaded once and then owned, unchanged, by the device session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationRecord {
    /// Thermistor resistance at room temperature, in the board's R_T / R4 units.
    pub thermistor_zero: f64,
    /// Thermopile responsivity in V/uW.
    pub thermopile_responsivity: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CalibrationFile {
    thermistor: ThermistorSection,
    thermopile: ThermopileSection,
}

#[derive(Debug, Serialize, Deserialize)]
struct ThermistorSection {
    room_temp: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ThermopileSection {
    responsivity: f64,
}

/// Bundled reference record, also shipped as `data/default_calibration.yaml`.
pub const DEFAULT_CALIBRATION_YAML: &str = include_str!("../../data/default_calibration.yaml");

impl CalibrationRecord {
    /// Validated record; both constants must be positive and finite.
    pub fn new(thermistor_zero: f64, thermopile_responsivity: f64) -> AppResult<Self> {
        let record = Self {
            thermistor_zero,
            thermopile_responsivity,
        };
        record.validate()?;
        Ok(record)
    }

    /// Parse a calibration document.
    pub fn from_yaml_str(text: &str) -> AppResult<Self> {
        let file: CalibrationFile = serde_yaml::from_str(text)?;
        Self::new(file.thermistor.room_temp, file.thermopile.responsivity)
    }

    /// Load a calibration file from disk.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let record = Self::from_yaml_str(&text)?;
        info!(
            "Loaded calibration from {}: R0 {}, responsivity {}",
            path.display(),
            record.thermistor_zero,
            record.thermopile_responsivity
        );
        Ok(record)
    }

    /// Serialize in the same layout `from_yaml_str` reads.
    pub fn to_yaml_string(&self) -> AppResult<String> {
        let file = CalibrationFile {
            thermistor: ThermistorSection {
                room_temp: self.thermistor_zero,
            },
            thermopile: ThermopileSection {
                responsivity: self.thermopile_responsivity,
            },
        };
        Ok(serde_yaml::to_string(&file)?)
    }

    fn validate(&self) -> AppResult<()> {
        for (name, value) in [
            ("thermistor.room_temp", self.thermistor_zero),
            ("thermopile.responsivity", self.thermopile_responsivity),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(PyroError::Validation(format!(
                    "Calibration {} must be positive, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

impl Default for CalibrationRecord {
    fn default() -> Self {
        Self {
            thermistor_zero: 220_000.0,
            thermopile_responsivity: 1.1e-4,
        }
    }
}
