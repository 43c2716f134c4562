//! Driver library for the UW two-channel pyrometer board.
//!
//! The board carries a thermopile and a thermistor, each behind a digitally
//! programmable amplifier, and answers a small binary protocol over a serial
//! line. This library covers the wire protocol, conversion of ADC counts to
//! physical quantities, gain auto-tuning, periodic sampling, and the
//! emissivity calibration sweep against a heated reference block. It is used by
//! the `uw-pyrometer` command line tool.

pub mod adapters;
pub mod autogain;
pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod measurement;
pub mod physics;
pub mod protocol;

pub use error::{AppResult, PyroError};
