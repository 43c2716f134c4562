//! Periodic acquisition loop
//!
//! Each tick takes one reading, derives the configured quantities, and pushes
//! them into a [`SampleHistory`] bounded by the averaging window. The result is
//! the mean over that window.
//!
//! A link failure is not a tick: it is logged, the gains active at the start
//! are written back (the board probably lost them), and the reading is retried
//! straight away without waiting for the interval.
//!
//! The loop ends when the target count is reached, when the shared
//! [`CompletionSignal`] is set by someone else, or on any other error. The
//! signal is set on every exit so watchers always wake up.

use crate::adapters::SerialLink;
use crate::config::SamplingSettings;
use crate::error::{AppResult, PyroError};
use crate::hardware::PyrometerHandle;
use crate::measurement::{derive, CompletionSignal, SampleAverages, SampleHistory, SampleMode};
use std::time::Duration;
use tracing::{debug, warn};

/// How a sampling run is paced and summarised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerConfig {
    /// Time between REPORT requests.
    pub interval: Duration,
    /// Averaging window, at least one.
    pub average: usize,
    /// Readings to take; zero runs until cancelled.
    pub samples: usize,
    /// Quantities derived from each reading.
    pub mode: SampleMode,
}

impl SamplerConfig {
    /// Config from the sampling section, recording `mode` quantities.
    pub fn from_settings(settings: &SamplingSettings, mode: SampleMode) -> Self {
        Self {
            interval: settings.interval(),
            average: settings.average,
            samples: settings.sample_count(),
            mode,
        }
    }
}

/// Progress after one successful reading.
#[derive(Debug, Clone)]
pub struct SampleProgress {
    /// Successful readings so far.
    pub taken: usize,
    /// False while fewer readings than the window have been taken.
    pub window_filled: bool,
    /// Means over the current window.
    pub averages: SampleAverages,
}

/// Outcome of a sampling run.
#[derive(Debug, Clone)]
pub struct SampleSummary {
    /// Successful readings.
    pub taken: usize,
    /// Link failures that were retried.
    pub retries: usize,
    /// Means over the last window.
    pub averages: SampleAverages,
}

/// Periodic REPORT loop over a shared session.
#[derive(Debug, Clone)]
pub struct Sampler {
    config: SamplerConfig,
}

impl Sampler {
    /// Reject a zero window or interval.
    pub fn new(config: SamplerConfig) -> AppResult<Self> {
        if config.average == 0 {
            return Err(PyroError::Validation(
                "Averaging window must be at least one sample".to_string(),
            ));
        }
        if config.interval.is_zero() {
            return Err(PyroError::Validation(
                "Sampling interval must be positive".to_string(),
            ));
        }
        if config.samples > 0 && config.samples < config.average {
            warn!(
                "{} samples not enough for {} point averaging",
                config.samples, config.average
            );
        }
        Ok(Self { config })
    }

    /// Pacing in use.
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Sample until done; see the module docs for when that is.
    pub async fn run<L: SerialLink + 'static>(
        &self,
        pyrometer: &PyrometerHandle<L>,
        signal: &CompletionSignal,
    ) -> AppResult<SampleSummary> {
        self.run_with_progress(pyrometer, signal, |_| {}).await
    }

    /// Like [`run`](Self::run), calling `progress` after every reading.
    pub async fn run_with_progress<L, F>(
        &self,
        pyrometer: &PyrometerHandle<L>,
        signal: &CompletionSignal,
        mut progress: F,
    ) -> AppResult<SampleSummary>
    where
        L: SerialLink + 'static,
        F: FnMut(&SampleProgress) + Send,
    {
        let result = self.acquire(pyrometer, signal, &mut progress).await;
        signal.set();
        result
    }

    async fn acquire<L, F>(
        &self,
        pyrometer: &PyrometerHandle<L>,
        signal: &CompletionSignal,
        progress: &mut F,
    ) -> AppResult<SampleSummary>
    where
        L: SerialLink + 'static,
        F: FnMut(&SampleProgress) + Send,
    {
        let mode = self.config.mode;
        let restore = pyrometer.gains().await;
        if mode == SampleMode::Physical && restore.is_none() {
            return Err(PyroError::Precondition(
                "Gains must be set before physical sampling".to_string(),
            ));
        }

        let mut history = SampleHistory::new(self.config.average);
        let mut taken = 0;
        let mut retries = 0;

        while !signal.is_set() {
            let reading = pyrometer
                .with_blocking(move |p| {
                    let sample = p.get_measurement(false)?;
                    derive(&sample, mode, &p.converter())
                })
                .await;

            let values = match reading {
                Ok(values) => values,
                Err(err) if err.is_link_failure() => {
                    warn!("Reading lost, retrying: {}", err);
                    retries += 1;
                    if let Some(gains) = restore {
                        pyrometer.set_gains(gains, false).await?;
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };

            history.push(&values);
            taken += 1;
            debug!("Sample {} of {}", taken, self.config.samples);

            progress(&SampleProgress {
                taken,
                window_filled: history.is_full(),
                averages: history.averages(),
            });

            if self.config.samples > 0 && taken >= self.config.samples {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = signal.wait() => {}
            }
        }

        Ok(SampleSummary {
            taken,
            retries,
            averages: history.averages(),
        })
    }
}
