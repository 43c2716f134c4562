//! Mock Hardware Implementations
//!
//! Simulated collaborators for running a calibration sweep without a heated
//! block on the bench.
//!
//! # Available Mocks
//!
//! - `SimulatedController` - temperature controller whose block walks toward
//!   the applied setpoint by a fixed step on every read

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::error::{AppResult, PyroError};
use crate::hardware::controller::TemperatureController;

// =============================================================================
// SimulatedController - Heated Block
// =============================================================================

struct BlockState {
    current: f64,
    stored_target: Option<f64>,
    applied_target: Option<f64>,
    standby: bool,
    ramp_per_read: f64,
    fail_reads: bool,
    reads: usize,
}

/// Simulated PID controller with a heated block.
///
/// - `set_target` only stores the setpoint; `apply` makes it active
/// - each `read_current` moves the block toward the active setpoint by at
///   most the ramp step, so settling is deterministic in reads, not time
/// - standby freezes the block
///
/// Clones share the same block, so a simulated pyrometer can look at it
/// through [`block_sensor`](Self::block_sensor).
///
/// # Example
///
/// ```rust,ignore
/// let controller = SimulatedController::new(22.0).with_ramp(1.0);
/// controller.set_target(25.0).await?;
/// controller.apply().await?;
/// assert_eq!(controller.read_current().await?, 23.0);
/// ```
#[derive(Clone)]
pub struct SimulatedController {
    state: Arc<Mutex<BlockState>>,
}

impl SimulatedController {
    /// Block at `initial` C that reaches any setpoint on the first read.
    pub fn new(initial: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(BlockState {
                current: initial,
                stored_target: None,
                applied_target: None,
                standby: false,
                ramp_per_read: f64::INFINITY,
                fail_reads: false,
                reads: 0,
            })),
        }
    }

    /// Limit how far the block moves per read, in C. Zero means it never moves.
    pub fn with_ramp(self, ramp_per_read: f64) -> Self {
        self.lock().ramp_per_read = ramp_per_read.abs();
        self
    }

    /// Make every read fail, as a disconnected controller would.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Whether the last `enter_standby` has not been followed by an `apply`.
    pub fn in_standby(&self) -> bool {
        self.lock().standby
    }

    /// Setpoint made active by the last `apply`.
    pub fn applied_target(&self) -> Option<f64> {
        self.lock().applied_target
    }

    /// Number of `read_current` calls so far.
    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    /// Block temperature without advancing the simulation.
    pub fn block_sensor(&self) -> impl Fn() -> f64 + Send + Sync + 'static {
        let state = Arc::clone(&self.state);
        move || state.lock().unwrap_or_else(PoisonError::into_inner).current
    }

    fn lock(&self) -> MutexGuard<'_, BlockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TemperatureController for SimulatedController {
    async fn set_target(&self, target: f64) -> AppResult<()> {
        self.lock().stored_target = Some(target);
        Ok(())
    }

    async fn apply(&self) -> AppResult<()> {
        let mut state = self.lock();
        state.applied_target = state.stored_target;
        state.standby = false;
        debug!("SimulatedController: setpoint {:?} active", state.applied_target);
        Ok(())
    }

    async fn read_current(&self) -> AppResult<f64> {
        let mut state = self.lock();
        if state.fail_reads {
            return Err(PyroError::Controller("simulated read failure".to_string()));
        }
        state.reads += 1;
        if let (Some(target), false) = (state.applied_target, state.standby) {
            let step = (target - state.current).clamp(-state.ramp_per_read, state.ramp_per_read);
            state.current += step;
        }
        Ok(state.current)
    }

    async fn enter_standby(&self) -> AppResult<()> {
        self.lock().standby = true;
        debug!("SimulatedController: standby");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_setpoint_needs_apply() {
        let controller = SimulatedController::new(20.0);
        controller.set_target(40.0).await.unwrap();
        assert_eq!(controller.read_current().await.unwrap(), 20.0);
        controller.apply().await.unwrap();
        assert_eq!(controller.read_current().await.unwrap(), 40.0);
        assert_eq!(controller.read_count(), 2);
    }

    #[tokio::test]
    async fn test_ramp_limits_each_read() {
        let controller = SimulatedController::new(20.0).with_ramp(1.5);
        controller.set_target(17.0).await.unwrap();
        controller.apply().await.unwrap();
        assert_eq!(controller.read_current().await.unwrap(), 18.5);
        assert_eq!(controller.read_current().await.unwrap(), 17.0);
        assert_eq!(controller.read_current().await.unwrap(), 17.0);
    }

    #[tokio::test]
    async fn test_standby_freezes_block_and_sensor_sees_it() {
        let controller = SimulatedController::new(20.0).with_ramp(1.0);
        let sensor = controller.block_sensor();
        controller.set_target(30.0).await.unwrap();
        controller.apply().await.unwrap();
        controller.read_current().await.unwrap();
        controller.enter_standby().await.unwrap();
        assert_eq!(controller.read_current().await.unwrap(), 21.0);
        assert_eq!(sensor(), 21.0);
        assert!(controller.in_standby());
    }
}
