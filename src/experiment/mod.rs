//! Emissivity calibration
//!
//! A calibration run steps a heated reference block through a list of
//! setpoints and records the pyrometer's response on each plateau.
//!
//! # Architecture
//!
//! - **Dataset**: append-only table, one row per plateau
//! - **Orchestrator**: settles the block, re-tunes gains, and runs the
//!   pyrometer sampler alongside a block-temperature averager
//! - **Regression**: straight-line fit of received power against the block's
//!   blackbody term
//!
//! # Example
//!
//! ```rust,ignore
//! use uw_pyrometer::experiment::CalibrationOrchestrator;
//!
//! let orchestrator = CalibrationOrchestrator::new(controller, &settings)?;
//! let result = orchestrator.run(&pyrometer, &[30.0, 50.0, 70.0]).await?;
//! println!("e = {:.3}", result.fit.emissivity);
//! ```

pub mod dataset;
pub mod orchestrator;
pub mod regression;

pub use dataset::CalibrationDataset;
pub use orchestrator::{average_block_temperature, CalibrationOrchestrator, SweepResult, UpdateHook};
pub use regression::{fit_emissivity, EmissivityFit};
