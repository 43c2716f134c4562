//! Closed-loop gain search
//!
//! Both amplifier potentiometers divide the sensor signal: a larger byte means
//! a smaller swing at the ADC. The tuner applies a trial pair, takes one
//! reading, and proposes the next pair per channel:
//!
//! - a channel at full scale doubles its gain to leave saturation quickly
//! - otherwise the gain is scaled by how far the reading is from its goal
//!   (thermopile: 256 counts away from mid-scale, either side; thermistor:
//!   mid-scale)
//! - a proposal equal to the current trial is nudged by one toward the goal
//!
//! Each channel keeps its own best gain. The search stops when both best errors
//! are inside the tolerance, when the next proposal is the best pair already
//! seen, or after the iteration limit. The best pair is always written back
//! before returning.

use crate::adapters::SerialLink;
use crate::config::AutoGainSettings;
use crate::error::{AppResult, PyroError};
use crate::hardware::{Pyrometer, PyrometerHandle};
use crate::protocol::GainPair;
use std::time::Duration;
use tracing::{debug, info, warn};

/// ADC mid-scale.
const MID_SCALE: i32 = 512;

/// Thermopile goal distance from mid-scale.
const THERMOPILE_OFFSET: i32 = 256;

/// Readings at or above this are treated as saturated.
const FULL_SCALE: u16 = 1023;

const MIN_GAIN: i32 = 1;
const MAX_GAIN: i32 = 255;

/// Why the search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Both channels are within tolerance.
    WithinTolerance,
    /// The next trial would repeat the best pair.
    FixedPoint,
    /// Ran out of iterations; the best pair found is still applied.
    Exhausted,
}

/// Result of one auto-gain run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoGainOutcome {
    /// Gains left applied on the board.
    pub gains: GainPair,
    /// Trials performed.
    pub iterations: u32,
    /// Best thermopile and thermistor errors, in counts.
    pub errors: (u16, u16),
    /// Why the search stopped.
    pub termination: Termination,
}

impl AutoGainOutcome {
    /// Whether the search stopped before running out of iterations.
    pub fn converged(&self) -> bool {
        self.termination != Termination::Exhausted
    }
}

#[derive(Debug, Clone, Copy)]
struct Best {
    gain: u8,
    error: u16,
}

impl Best {
    fn offer(&mut self, gain: u8, error: u16) {
        if error < self.error {
            *self = Self { gain, error };
        }
    }
}

/// Gain search parameters.
#[derive(Debug, Clone)]
pub struct GainAutoTuner {
    max_iterations: u32,
    tolerance: u16,
    default_seed: GainPair,
    settle: Duration,
}

impl Default for GainAutoTuner {
    fn default() -> Self {
        Self::from_settings(&AutoGainSettings::default())
    }
}

impl GainAutoTuner {
    /// Tuner with the configured limits and seed.
    pub fn from_settings(settings: &AutoGainSettings) -> Self {
        Self {
            max_iterations: settings.max_iterations,
            tolerance: settings.tolerance,
            default_seed: settings.seed_gains(),
            settle: settings.settle(),
        }
    }

    /// Override the wait between applying a trial and reading it back.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Search from `seed`, or the configured default pair.
    ///
    /// Blocks for the whole search. Link failures propagate; exhausting the
    /// iteration limit does not.
    pub fn run<L: SerialLink>(
        &self,
        pyrometer: &mut Pyrometer<L>,
        seed: Option<GainPair>,
    ) -> AppResult<AutoGainOutcome> {
        if self.max_iterations == 0 {
            return Err(PyroError::Validation(
                "Auto-gain needs at least one iteration".to_string(),
            ));
        }
        let seed = seed.unwrap_or(self.default_seed);
        let mut trial = GainPair::new(
            clamp_gain(seed.thermopile.into()),
            clamp_gain(seed.thermistor.into()),
        );
        let mut best_tp = Best {
            gain: trial.thermopile,
            error: u16::MAX,
        };
        let mut best_tr = Best {
            gain: trial.thermistor,
            error: u16::MAX,
        };

        let mut iterations = 0;
        let mut termination = Termination::Exhausted;
        while iterations < self.max_iterations {
            iterations += 1;
            pyrometer.set_gains(trial, false)?;
            std::thread::sleep(self.settle);
            let sample = pyrometer.get_measurement(false)?;

            let (error_tp, error_tr) = errors(sample.thermopile, sample.thermistor);
            best_tp.offer(trial.thermopile, error_tp);
            best_tr.offer(trial.thermistor, error_tr);
            debug!(
                "Auto-gain {}: gains {} read tp {} tr {} (errors {} / {})",
                iterations, trial, sample.thermopile, sample.thermistor, error_tp, error_tr
            );

            if best_tp.error.max(best_tr.error) < self.tolerance {
                termination = Termination::WithinTolerance;
                break;
            }

            let next = GainPair::new(
                next_thermopile_gain(trial.thermopile, sample.thermopile),
                next_thermistor_gain(trial.thermistor, sample.thermistor),
            );
            if next == GainPair::new(best_tp.gain, best_tr.gain) {
                termination = Termination::FixedPoint;
                break;
            }
            trial = next;
        }

        let gains = GainPair::new(best_tp.gain, best_tr.gain);
        if termination == Termination::Exhausted {
            warn!(
                "Auto-gain did not converge in {} iterations; using best gains {} (errors {} / {})",
                iterations, gains, best_tp.error, best_tr.error
            );
        } else {
            info!("Auto-gain settled on {} after {} iterations", gains, iterations);
        }

        pyrometer.set_gains(gains, false)?;
        std::thread::sleep(self.settle);

        Ok(AutoGainOutcome {
            gains,
            iterations,
            errors: (best_tp.error, best_tr.error),
            termination,
        })
    }

    /// Run the search on the blocking pool against a shared session.
    pub async fn run_shared<L: SerialLink + 'static>(
        &self,
        handle: &PyrometerHandle<L>,
        seed: Option<GainPair>,
    ) -> AppResult<AutoGainOutcome> {
        let tuner = self.clone();
        handle.with_blocking(move |p| tuner.run(p, seed)).await
    }
}

fn errors(thermopile: u16, thermistor: u16) -> (u16, u16) {
    let tp_offset = (i32::from(thermopile) - MID_SCALE).abs();
    let error_tp = (tp_offset - THERMOPILE_OFFSET).unsigned_abs();
    let error_tr = (i32::from(thermistor) - MID_SCALE).unsigned_abs();
    (to_u16(error_tp), to_u16(error_tr))
}

fn to_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

fn clamp_gain(gain: i32) -> u8 {
    // Clamped into 1..=255, so the conversion cannot fail.
    u8::try_from(gain.clamp(MIN_GAIN, MAX_GAIN)).unwrap_or(u8::MAX)
}

fn next_thermopile_gain(gain: u8, reading: u16) -> u8 {
    if reading >= FULL_SCALE {
        return clamp_gain(i32::from(gain) * 2);
    }
    let offset = (i32::from(reading) - MID_SCALE).abs();
    let guess = offset * i32::from(gain) / THERMOPILE_OFFSET;
    let guess = if guess == i32::from(gain) {
        // Too large a swing needs more attenuation.
        if offset > THERMOPILE_OFFSET {
            guess + 1
        } else {
            guess - 1
        }
    } else {
        guess
    };
    clamp_gain(guess)
}

fn next_thermistor_gain(gain: u8, reading: u16) -> u8 {
    if reading >= FULL_SCALE {
        return clamp_gain(i32::from(gain) * 2);
    }
    let guess = i32::from(reading) * i32::from(gain) / MID_SCALE;
    let guess = if guess == i32::from(gain) {
        if i32::from(reading) > MID_SCALE {
            guess + 1
        } else {
            guess - 1
        }
    } else {
        guess
    };
    clamp_gain(guess)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{BoardModel, MockLink};
    use crate::protocol::{DeviceAddress, RawSample};
    use std::sync::Arc;

    fn tuner() -> GainAutoTuner {
        GainAutoTuner::default().with_settle(Duration::ZERO)
    }

    fn session(model: BoardModel) -> (MockLink, Pyrometer<MockLink>) {
        let link = MockLink::board(3, model);
        let pyro = Pyrometer::new(
            link.clone(),
            DeviceAddress::new(3).unwrap(),
            Duration::from_millis(50),
            None,
        );
        (link, pyro)
    }

    #[test]
    fn test_errors_bias_thermopile_to_quarter_points() {
        assert_eq!(errors(768, 512), (0, 0));
        assert_eq!(errors(256, 512), (0, 0));
        assert_eq!(errors(512, 600), (256, 88));
    }

    #[test]
    fn test_saturation_doubles_and_clamps() {
        for reading in [1023, 1024, u16::MAX] {
            assert_eq!(next_thermopile_gain(20, reading), 40);
            assert_eq!(next_thermistor_gain(30, reading), 60);
            assert_eq!(next_thermistor_gain(200, reading), 255);
        }
    }

    #[test]
    fn test_unchanged_guess_is_nudged() {
        // offset 256 * 10 / 256 == 10, swing is on target from below
        assert_eq!(next_thermopile_gain(10, 768 + 10), 11);
        assert_eq!(next_thermopile_gain(10, 768), 9);
        assert_eq!(next_thermistor_gain(10, 520), 11);
        assert_eq!(next_thermistor_gain(1, 0), 1);
    }

    #[test]
    fn test_converges_on_inverse_gain_board() {
        let model: BoardModel = Arc::new(|gains| {
            let g = gains.map_or(1, |g| g.thermopile.max(1));
            let h = gains.map_or(1, |g| g.thermistor.max(1));
            RawSample {
                reference: 512,
                thermopile: (512 + 256 * 37 / u16::from(g)).min(1023),
                thermistor: (512u32 * 55 / u32::from(h)).min(1023) as u16,
            }
        });
        let (link, mut pyro) = session(model);
        let outcome = tuner().run(&mut pyro, None).unwrap();
        assert!(outcome.converged());
        assert!(outcome.iterations < 32);
        assert!(outcome.errors.0 < 64 && outcome.errors.1 < 64);
        assert_eq!(link.board_gains(), Some(outcome.gains));
        assert_eq!(pyro.gains(), Some(outcome.gains));
    }

    #[test]
    fn test_always_saturated_board_stays_in_range() {
        let model: BoardModel = Arc::new(|_| RawSample {
            reference: 1023,
            thermistor: 1023,
            thermopile: 1023,
        });
        let (link, mut pyro) = session(model);
        let outcome = tuner().run(&mut pyro, Some(GainPair::new(0, 255))).unwrap();
        assert_eq!(outcome.termination, Termination::Exhausted);
        assert_eq!(outcome.iterations, 32);
        assert!(outcome.gains.thermopile >= 1);
        assert!(outcome.gains.thermistor >= 1);
        for frame in link.written() {
            if frame[2] == 0x01 {
                assert!(frame[3] >= 1 && frame[4] >= 1);
            }
        }
        // Final write re-applies the best pair.
        let last = link.written().last().cloned().unwrap();
        assert_eq!(last, vec![0x55, 3, 0x01, outcome.gains.thermopile, outcome.gains.thermistor]);
    }

    #[test]
    fn test_link_failure_propagates() {
        let model: BoardModel = Arc::new(|_| RawSample {
            reference: 512,
            thermistor: 512,
            thermopile: 768,
        });
        let (link, mut pyro) = session(model);
        link.drop_reports([true]);
        assert!(matches!(
            tuner().run(&mut pyro, None),
            Err(PyroError::ReadTimeout(_))
        ));
    }
}
