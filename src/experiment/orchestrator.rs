//! Emissivity calibration sweep
//!
//! For every setpoint the orchestrator:
//!
//! 1. sets the block controller and waits for the block to settle, bounded
//!    by the settle timeout
//! 2. re-tunes the pyrometer gains, seeded with the previous plateau's result
//! 3. samples the pyrometer while a second task averages the block
//!    temperature; the sampler's completion signal stops the averager
//! 4. appends the plateau to the dataset and calls the update hook
//!
//! After the last setpoint the dataset is fitted for emissivity and
//! background. A settle timeout aborts the whole sweep.

use crate::adapters::SerialLink;
use crate::autogain::GainAutoTuner;
use crate::config::{Settings, SweepSettings};
use crate::error::{AppResult, PyroError};
use crate::experiment::dataset::CalibrationDataset;
use crate::experiment::regression::{fit_emissivity, EmissivityFit};
use crate::hardware::{PyrometerHandle, TemperatureController};
use crate::measurement::{CompletionSignal, Quantity, SampleMode, Sampler, SamplerConfig};
use crate::physics::BandpassTable;
use crate::protocol::GainPair;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Callback invoked with the cumulative dataset after each plateau.
pub type UpdateHook<'a> = Box<dyn FnMut(&CalibrationDataset) -> AppResult<()> + Send + 'a>;

/// Result of a full sweep.
///
/// The dataset survives a failed fit, so the plateaus can still be exported.
#[derive(Debug)]
pub struct SweepResult {
    /// Every recorded plateau.
    pub dataset: CalibrationDataset,
    /// Emissivity and background, or why they could not be fitted.
    pub fit: AppResult<EmissivityFit>,
}

/// Drives a block controller and a pyrometer through a list of setpoints.
pub struct CalibrationOrchestrator {
    controller: Arc<dyn TemperatureController>,
    tuner: GainAutoTuner,
    sampler: Sampler,
    sweep: SweepSettings,
    bandpass: BandpassTable,
    geometry_factor: f64,
}

impl CalibrationOrchestrator {
    /// Build from settings. Sampling always derives physical quantities.
    pub fn new(controller: Arc<dyn TemperatureController>, settings: &Settings) -> AppResult<Self> {
        settings.validate()?;
        let sampler = Sampler::new(SamplerConfig::from_settings(
            &settings.sampling,
            SampleMode::Physical,
        ))?;
        Ok(Self {
            controller,
            tuner: GainAutoTuner::from_settings(&settings.autogain),
            sampler,
            sweep: settings.sweep.clone(),
            bandpass: BandpassTable::default(),
            geometry_factor: settings.optics.geometry_factor,
        })
    }

    /// Weight radiated power by `bandpass` in the emissivity fit.
    pub fn with_bandpass(mut self, bandpass: BandpassTable) -> Self {
        self.bandpass = bandpass;
        self
    }

    /// Run the sweep without an update hook.
    pub async fn run<L: SerialLink + 'static>(
        &self,
        pyrometer: &PyrometerHandle<L>,
        setpoints: &[f64],
    ) -> AppResult<SweepResult> {
        self.run_with_hook(pyrometer, setpoints, None).await
    }

    /// Run the sweep, handing the cumulative dataset to `hook` after each plateau.
    ///
    /// A hook error aborts the sweep. A failed fit does not; it lands in
    /// [`SweepResult::fit`].
    pub async fn run_with_hook<L: SerialLink + 'static>(
        &self,
        pyrometer: &PyrometerHandle<L>,
        setpoints: &[f64],
        mut hook: Option<UpdateHook<'_>>,
    ) -> AppResult<SweepResult> {
        if setpoints.is_empty() {
            return Err(PyroError::Validation(
                "Calibration sweep needs at least one setpoint".to_string(),
            ));
        }

        let mut dataset = CalibrationDataset::new(self.sampler.config().mode.quantities());
        let signal = CompletionSignal::new();
        let mut gains: Option<GainPair> = None;

        for (index, &target) in setpoints.iter().enumerate() {
            info!("Setpoint {}/{}: {:.1} C", index + 1, setpoints.len(), target);
            self.set_and_settle(target).await?;

            info!("Setting gains");
            let outcome = self.tuner.run_shared(pyrometer, gains).await?;
            gains = Some(outcome.gains);

            signal.clear();
            let sampling = {
                let sampler = self.sampler.clone();
                let pyrometer = pyrometer.clone();
                let signal = signal.clone();
                tokio::spawn(async move { sampler.run(&pyrometer, &signal).await })
            };
            let averaging = tokio::spawn(average_block_temperature(
                Arc::clone(&self.controller),
                signal.clone(),
                self.sweep.block_poll(),
            ));
            let (summary, block_temp) = tokio::try_join!(
                async { sampling.await.map_err(PyroError::from).and_then(|r| r) },
                async { averaging.await.map_err(PyroError::from).and_then(|r| r) }
            )?;

            dataset.push_plateau(&summary.averages, block_temp, outcome.gains)?;
            let temp = summary.averages.get(Quantity::Temperature);
            let power = summary.averages.get(Quantity::Power);
            info!(
                "Block {:.1} C; pyrometer {:.1} C, {:.1} uW",
                block_temp,
                temp.unwrap_or(f64::NAN),
                power.unwrap_or(f64::NAN)
            );

            if let Some(hook) = hook.as_mut() {
                hook(&dataset)?;
            }
        }

        let fit = fit_emissivity(&dataset, &self.bandpass, self.geometry_factor);
        match &fit {
            Ok(fit) => info!(
                "Emissivity {:.3}, background {:.1} uW",
                fit.emissivity,
                fit.background * 1e6
            ),
            Err(err) => warn!("Emissivity fit failed: {}", err),
        }
        Ok(SweepResult { dataset, fit })
    }

    /// Command `target` and wait until the block is within the deadband.
    pub async fn set_and_settle(&self, target: f64) -> AppResult<f64> {
        self.controller.set_target(target).await?;
        sleep(self.sweep.apply_delay()).await;
        self.controller.apply().await?;
        sleep(self.sweep.apply_delay()).await;

        let limit = self.sweep.settle_timeout();
        let wait = async {
            loop {
                let current = self.controller.read_current().await?;
                if (current - target).abs() <= self.sweep.deadband {
                    return Ok::<f64, PyroError>(current);
                }
                debug!("Not at temperature yet ({:.2} C)", current);
                sleep(self.sweep.settle_poll()).await;
            }
        };
        match timeout(limit, wait).await {
            Ok(settled) => settled,
            Err(_) => Err(PyroError::SettleTimeout {
                target,
                waited: limit,
            }),
        }
    }
}

/// Poll the block until `signal` is set and return the mean reading.
///
/// Always reads once up front. The signal is checked before every later poll,
/// never during one. A failed read sets the signal so the sampler stops too.
pub async fn average_block_temperature(
    controller: Arc<dyn TemperatureController>,
    signal: CompletionSignal,
    poll: Duration,
) -> AppResult<f64> {
    let result = async {
        let mut readings = vec![controller.read_current().await?];
        loop {
            tokio::select! {
                _ = sleep(poll) => {}
                _ = signal.wait() => {}
            }
            if signal.is_set() {
                break;
            }
            readings.push(controller.read_current().await?);
        }
        debug!("Done measuring block temperature ({} readings)", readings.len());
        Ok::<f64, PyroError>(readings.iter().sum::<f64>() / readings.len() as f64)
    }
    .await;
    if result.is_err() {
        signal.set();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SimulatedController;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.sweep.apply_delay_secs = 0.0;
        settings.sweep.settle_poll_secs = 0.005;
        settings.sweep.settle_timeout_secs = 0.1;
        settings.sweep.block_poll_secs = 0.005;
        settings
    }

    #[tokio::test]
    async fn test_settles_within_deadband() {
        let controller = Arc::new(SimulatedController::new(20.0).with_ramp(1.0));
        let orchestrator = CalibrationOrchestrator::new(controller.clone(), &settings()).unwrap();
        let settled = orchestrator.set_and_settle(23.9).await.unwrap();
        assert!((settled - 23.9).abs() <= 0.2);
        assert_eq!(controller.applied_target(), Some(23.9));
    }

    #[tokio::test]
    async fn test_settle_timeout_bounds_total_wait() {
        let controller = Arc::new(SimulatedController::new(20.0).with_ramp(0.0));
        let orchestrator = CalibrationOrchestrator::new(controller, &settings()).unwrap();
        let started = std::time::Instant::now();
        let err = orchestrator.set_and_settle(50.0).await.unwrap_err();
        assert!(matches!(err, PyroError::SettleTimeout { target, .. } if target == 50.0));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_averager_reads_once_then_stops_on_signal() {
        let controller = Arc::new(SimulatedController::new(31.0));
        let signal = CompletionSignal::new();
        signal.set();
        let mean = average_block_temperature(controller.clone(), signal, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(mean, 31.0);
        assert_eq!(controller.read_count(), 1);
    }

    #[tokio::test]
    async fn test_averager_failure_sets_signal() {
        let controller = Arc::new(SimulatedController::new(31.0));
        controller.fail_reads(true);
        let signal = CompletionSignal::new();
        let result =
            average_block_temperature(controller, signal.clone(), Duration::from_millis(1)).await;
        assert!(matches!(result, Err(PyroError::Controller(_))));
        assert!(signal.is_set());
    }
}
