//! Periodic sampling of the board and the quantities it yields

use crate::error::AppResult;
use crate::physics::{adc_to_voltage, PhysicalConverter};
use crate::protocol::RawSample;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

pub mod history;
pub mod sampler;

pub use history::{SampleAverages, SampleHistory};
pub use sampler::{SampleProgress, SampleSummary, Sampler, SamplerConfig};

/// A quantity derived from one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quantity {
    /// Thermistor channel voltage at the ADC.
    ThermistorVoltage,
    /// Thermistor temperature, C.
    Temperature,
    /// Reference channel voltage at the ADC.
    ReferenceVoltage,
    /// Thermopile channel voltage at the ADC.
    ThermopileAdcVoltage,
    /// Thermopile voltage ahead of the amplifier.
    ThermopileVoltage,
    /// Net radiant power on the thermopile, uW.
    Power,
}

impl Quantity {
    /// Column name used in datasets and exports.
    pub fn name(self) -> &'static str {
        match self {
            Self::ThermistorVoltage => "tr_v",
            Self::Temperature => "temp",
            Self::ReferenceVoltage => "ref_v",
            Self::ThermopileAdcVoltage => "tp_adc_v",
            Self::ThermopileVoltage => "tp_v",
            Self::Power => "power",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which quantities a reading is turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleMode {
    /// ADC voltages only; works without gains.
    Adc,
    /// Voltages, temperature, and power; needs gains.
    #[default]
    Physical,
}

impl SampleMode {
    /// Quantities this mode records, in column order.
    pub fn quantities(self) -> &'static [Quantity] {
        match self {
            Self::Adc => &[
                Quantity::ReferenceVoltage,
                Quantity::ThermistorVoltage,
                Quantity::ThermopileAdcVoltage,
            ],
            Self::Physical => &[
                Quantity::ThermistorVoltage,
                Quantity::Temperature,
                Quantity::ReferenceVoltage,
                Quantity::ThermopileVoltage,
                Quantity::Power,
            ],
        }
    }
}

/// Turn one reading into the quantities of `mode`, in [`SampleMode::quantities`] order.
pub fn derive(
    sample: &RawSample,
    mode: SampleMode,
    converter: &PhysicalConverter<'_>,
) -> AppResult<Vec<(Quantity, f64)>> {
    let tr_v = adc_to_voltage(f64::from(sample.thermistor));
    let ref_v = adc_to_voltage(f64::from(sample.reference));
    let tp_adc_v = adc_to_voltage(f64::from(sample.thermopile));

    Ok(match mode {
        SampleMode::Adc => vec![
            (Quantity::ReferenceVoltage, ref_v),
            (Quantity::ThermistorVoltage, tr_v),
            (Quantity::ThermopileAdcVoltage, tp_adc_v),
        ],
        SampleMode::Physical => vec![
            (Quantity::ThermistorVoltage, tr_v),
            (Quantity::Temperature, converter.thermistor_temperature(tr_v)?),
            (Quantity::ReferenceVoltage, ref_v),
            (Quantity::ThermopileVoltage, converter.thermopile_voltage(tp_adc_v, ref_v)?),
            (Quantity::Power, converter.thermopile_power(tp_adc_v, ref_v)?),
        ],
    })
}

/// Shared completion flag.
///
/// Set by the sampler when it stops for any reason, and settable by anyone who
/// wants it to stop. Clones observe the same flag.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionSignal {
    /// New signal, initially clear.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the flag and wake every waiter.
    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    /// Lower the flag for the next run.
    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    /// Current state of the flag.
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is set; immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|set| *set).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{CalibrationRecord, ThermistorCurve};
    use crate::protocol::GainPair;
    use std::time::Duration;

    #[test]
    fn test_adc_mode_needs_no_gains() {
        let cal = CalibrationRecord::default();
        let curve = ThermistorCurve::default();
        let conv = PhysicalConverter::new(&cal, &curve, None);
        let sample = RawSample {
            reference: 512,
            thermistor: 256,
            thermopile: 1024,
        };
        let values = derive(&sample, SampleMode::Adc, &conv).unwrap();
        assert_eq!(
            values,
            vec![
                (Quantity::ReferenceVoltage, 2.5),
                (Quantity::ThermistorVoltage, 1.25),
                (Quantity::ThermopileAdcVoltage, 5.0),
            ]
        );
        assert!(derive(&sample, SampleMode::Physical, &conv).is_err());
    }

    #[test]
    fn test_physical_mode_order_matches_quantities() {
        let cal = CalibrationRecord::default();
        let curve = ThermistorCurve::default();
        let conv = PhysicalConverter::new(&cal, &curve, Some(GainPair::new(51, 51)));
        let sample = RawSample {
            reference: 512,
            thermistor: 400,
            thermopile: 600,
        };
        let values = derive(&sample, SampleMode::Physical, &conv).unwrap();
        let names: Vec<_> = values.iter().map(|(q, _)| *q).collect();
        assert_eq!(names, SampleMode::Physical.quantities());
    }

    #[tokio::test]
    async fn test_signal_wakes_waiters() {
        let signal = CompletionSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        signal.set();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_set());
        signal.clear();
        assert!(!signal.is_set());
    }
}
