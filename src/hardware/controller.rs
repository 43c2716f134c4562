//! Temperature controller capability
//!
//! The heated reference block is driven by a separate PID controller on its own
//! connection. The calibration sweep only needs four operations from it, so any
//! controller that can set a setpoint, apply it, and report its process value
//! can take part.
//!
//! Implementations must not block the runtime: a driver that talks over a
//! blocking port should hop to the blocking pool inside each method.

use crate::config::SweepSettings;
use crate::error::{AppResult, PyroError};
use async_trait::async_trait;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, info};

/// Setpoint used by [`check_controller`] to prove the block heats.
pub const CHECK_TEMPERATURE: f64 = 32.0;

/// Setpoint the block is returned to after [`check_controller`].
pub const IDLE_TEMPERATURE: f64 = 20.0;

/// Narrow capability interface for a heated block controller.
#[async_trait]
pub trait TemperatureController: Send + Sync {
    /// Store a new setpoint in C. It takes effect on [`apply`](Self::apply).
    async fn set_target(&self, target: f64) -> AppResult<()>;

    /// Restart the control loop so the stored setpoint takes effect.
    async fn apply(&self) -> AppResult<()>;

    /// Current process value in C.
    async fn read_current(&self) -> AppResult<f64>;

    /// Stop heating.
    async fn enter_standby(&self) -> AppResult<()>;
}

/// Exercise a controller: heat to 32 C, return to 20 C, then stand by.
///
/// Returns every temperature read on the way up. Fails with `SettleTimeout` if
/// the block does not reach the check temperature within the settle timeout,
/// and with `Validation` before touching the controller if `settings` is invalid.
pub async fn check_controller<C>(controller: &C, settings: &SweepSettings) -> AppResult<Vec<f64>>
where
    C: TemperatureController + ?Sized,
{
    settings.validate()?;
    let start_temp = controller.read_current().await.map_err(|e| {
        PyroError::Controller(format!("No initial temperature could be read: {}", e))
    })?;
    info!("Start temperature: {:.1} C", start_temp);
    let mut trace = vec![start_temp];

    controller.set_target(CHECK_TEMPERATURE).await?;
    sleep(settings.apply_delay()).await;
    controller.apply().await?;

    let started = Instant::now();
    let limit = settings.settle_timeout();
    while trace.last().copied().unwrap_or(start_temp) < CHECK_TEMPERATURE {
        sleep(settings.settle_poll()).await;
        if started.elapsed() > limit {
            return Err(PyroError::SettleTimeout {
                target: CHECK_TEMPERATURE,
                waited: limit,
            });
        }
        let current = controller.read_current().await?;
        debug!("Temperature {:5.1} C", current);
        trace.push(current);
    }
    info!("Reached {:.1} C", CHECK_TEMPERATURE);

    controller.set_target(IDLE_TEMPERATURE).await?;
    sleep(settings.apply_delay()).await;
    controller.apply().await?;
    controller.enter_standby().await?;

    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::SimulatedController;
    use std::time::Duration;

    fn fast_settings() -> SweepSettings {
        SweepSettings {
            deadband: 0.2,
            settle_timeout_secs: 1.0,
            settle_poll_secs: 0.005,
            apply_delay_secs: 0.0,
            block_poll_secs: 0.005,
        }
    }

    #[tokio::test]
    async fn test_check_heats_then_idles() {
        let controller = SimulatedController::new(22.0).with_ramp(2.0);
        let trace = check_controller(&controller, &fast_settings()).await.unwrap();
        assert_eq!(trace[0], 22.0);
        assert!(*trace.last().unwrap() >= CHECK_TEMPERATURE);
        assert!(controller.in_standby());
        assert_eq!(controller.applied_target(), Some(IDLE_TEMPERATURE));
    }

    #[tokio::test]
    async fn test_check_times_out_on_stuck_block() {
        let controller = SimulatedController::new(22.0).with_ramp(0.0);
        let mut settings = fast_settings();
        settings.settle_timeout_secs = 0.05;
        let err = check_controller(&controller, &settings).await.unwrap_err();
        match err {
            PyroError::SettleTimeout { target, waited } => {
                assert_eq!(target, CHECK_TEMPERATURE);
                assert_eq!(waited, Duration::from_millis(50));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_check_rejects_invalid_timing_before_io() {
        let controller = SimulatedController::new(22.0);
        for bad in [-1.0, f64::NAN, f64::INFINITY] {
            let mut settings = fast_settings();
            settings.settle_timeout_secs = bad;
            assert!(matches!(
                check_controller(&controller, &settings).await,
                Err(PyroError::Validation(_))
            ));
        }
        let mut settings = fast_settings();
        settings.apply_delay_secs = -0.5;
        assert!(matches!(
            check_controller(&controller, &settings).await,
            Err(PyroError::Validation(_))
        ));
        assert_eq!(controller.read_count(), 0);
        assert_eq!(controller.applied_target(), None);
    }

    #[tokio::test]
    async fn test_check_needs_initial_reading() {
        let controller = SimulatedController::new(22.0);
        controller.fail_reads(true);
        assert!(matches!(
            check_controller(&controller, &fast_settings()).await,
            Err(PyroError::Controller(_))
        ));
    }
}
