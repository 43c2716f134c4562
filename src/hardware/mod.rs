//! Board session and collaborating devices
//!
//! - [`transport`]: framed exchanges over a serial link
//! - [`pyrometer`]: the board session (cached gains, calibration) and its async handle
//! - [`controller`]: capability interface of the heated reference block
//! - [`mock`]: simulated controller for running without hardware

pub mod controller;
pub mod mock;
pub mod pyrometer;
pub mod transport;

pub use controller::{check_controller, TemperatureController};
pub use mock::SimulatedController;
pub use pyrometer::{Pyrometer, PyrometerHandle};
pub use transport::Transport;
