//! Custom error types for the pyrometer crate.
//!
//! This module defines the primary error type, `PyroError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the failures that can occur between the serial link, the physical conversions,
//! and the calibration sweep.
//!
//! ## Error Hierarchy
//!
//! - **`ReadTimeout` / `Framing`**: The link failure class. A reply either never
//!   synchronized inside the link timeout or was cut short after the sync match.
//!   Both are treated as "the board power-cycled" and invalidate the cached gains.
//! - **`Precondition`**: A derived quantity was requested before the gain it
//!   depends on is known.
//! - **`Validation`**: An address, gain, or setting is out of range. Raised before
//!   any I/O and never retried.
//! - **`SettleTimeout`**: The reference block did not reach its plateau in time.
//!   Fatal to the calibration sweep.
//! - **`Controller`**: The temperature controller collaborator reported a failure.
//! - **`Config` / `CalibrationFile`**: Configuration layer and calibration record
//!   parsing failures.
//!
//! Auto-gain exhaustion is not an error: the tuner logs a warning and
//! returns its best-effort gains.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, PyroError>;

/// Every failure the crate reports.
#[derive(Error, Debug)]
pub enum PyroError {
    /// No sync match inside the link timeout.
    #[error("Read timed out after {0:?} waiting for a reply")]
    ReadTimeout(Duration),

    /// Reply cut short after the sync match.
    #[error("Framing error: expected {expected} reply bytes after sync, received {received}")]
    Framing {
        /// Payload bytes the reply should carry.
        expected: usize,
        /// Payload bytes that arrived before the deadline.
        received: usize,
    },

    /// A quantity was requested before the gain it depends on is known.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Argument or setting out of range.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The block did not reach its setpoint in time.
    #[error("Temperature did not settle at {target:.1} C within {waited:?}")]
    SettleTimeout {
        /// Setpoint in C.
        target: f64,
        /// How long the block was given.
        waited: Duration,
    },

    /// The temperature controller failed.
    #[error("Temperature controller error: {0}")]
    Controller(String),

    /// Layered configuration could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Calibration record could not be parsed or written.
    #[error("Calibration file error: {0}")]
    CalibrationFile(#[from] serde_yaml::Error),

    /// Link or file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or configured.
    #[cfg(feature = "instrument_serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// CSV export failed.
    #[cfg(feature = "storage_csv")]
    #[error("Export error: {0}")]
    Export(#[from] csv::Error),

    /// A spawned task panicked or was cancelled.
    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The crate was built without a required feature.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl PyroError {
    /// True for the errors that mean the reply frame was lost on the link.
    ///
    /// Periodic sampling retries these in place; one-shot callers see them.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Self::ReadTimeout(_) | Self::Framing { .. })
    }
}

impl From<figment::Error> for PyroError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}
