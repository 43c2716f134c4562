//! ADC voltage to physical quantity conversion
//!
//! The thermistor sits in a divider ahead of a programmable amplifier, and
//! the thermopile swings around the reference rail through a second fixed
//! stage. Both conversions need the gain currently on the board.

use crate::error::{AppResult, PyroError};
use crate::physics::{CalibrationRecord, ThermistorCurve};
use crate::protocol::GainPair;
use tracing::{debug, warn};

/// Counts spanned by the 10-bit ADC.
pub const ADC_FULL_SCALE: f64 = 1024.0;

/// ADC full-scale voltage.
pub const ADC_REFERENCE_VOLTS: f64 = 5.0;

/// Thermistor divider resistor, in the units of [`CalibrationRecord::thermistor_zero`].
const DIVIDER_RESISTANCE: f64 = 2.2e6;

/// Fixed second-stage gain of the thermopile amplifier.
const THERMOPILE_STAGE_GAIN: f64 = 51.0;

/// Potentiometer steps.
const POT_STEPS: f64 = 255.0;

/// ADC counts to volts at the ADC input.
pub fn adc_to_voltage(counts: f64) -> f64 {
    counts * ADC_REFERENCE_VOLTS / ADC_FULL_SCALE
}

/// Converts ADC voltages to physical quantities for one board state.
///
/// Borrowed from the session for the duration of one conversion; the gains are
/// whatever the session last applied, or `None` if nothing has been applied
/// since it opened or since the board was last assumed power-cycled.
#[derive(Debug, Clone, Copy)]
pub struct PhysicalConverter<'a> {
    calibration: &'a CalibrationRecord,
    curve: &'a ThermistorCurve,
    gains: Option<GainPair>,
}

impl<'a> PhysicalConverter<'a> {
    /// Bind a record, curve and gains.
    pub fn new(
        calibration: &'a CalibrationRecord,
        curve: &'a ThermistorCurve,
        gains: Option<GainPair>,
    ) -> Self {
        Self {
            calibration,
            curve,
            gains,
        }
    }

    fn gains(&self) -> AppResult<GainPair> {
        self.gains
            .ok_or_else(|| PyroError::Precondition("Potentiometer not set".to_string()))
    }

    /// Thermistor resistance normalized to its room-temperature value.
    pub fn thermistor_resistance(&self, thermistor_voltage: f64) -> AppResult<f64> {
        let gain = f64::from(self.gains()?.thermistor);
        let pre_amp_voltage = gain * thermistor_voltage / POT_STEPS;
        let resistance = DIVIDER_RESISTANCE / (ADC_REFERENCE_VOLTS / pre_amp_voltage - 1.0);
        debug!("Resistance {}", resistance);
        Ok(resistance / self.calibration.thermistor_zero)
    }

    /// Thermistor temperature in C.
    pub fn thermistor_temperature(&self, thermistor_voltage: f64) -> AppResult<f64> {
        let normalized = self.thermistor_resistance(thermistor_voltage)?;
        if !self.curve.covers(normalized) {
            warn!(
                "Thermistor temperature is out of calibration range (R/R0 = {:.4})",
                normalized
            );
        }
        Ok(self.curve.temperature(normalized))
    }

    /// Thermopile voltage ahead of the amplifier, in V.
    pub fn thermopile_voltage(
        &self,
        thermopile_voltage: f64,
        reference_voltage: f64,
    ) -> AppResult<f64> {
        let gain = f64::from(self.gains()?.thermopile);
        Ok(gain * (thermopile_voltage - reference_voltage) / (POT_STEPS * THERMOPILE_STAGE_GAIN))
    }

    /// Net radiant power on the thermopile, in uW.
    pub fn thermopile_power(
        &self,
        thermopile_voltage: f64,
        reference_voltage: f64,
    ) -> AppResult<f64> {
        let pre_amp = self.thermopile_voltage(thermopile_voltage, reference_voltage)?;
        Ok(pre_amp / self.calibration.thermopile_responsivity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter(
        gains: Option<GainPair>,
    ) -> (CalibrationRecord, ThermistorCurve, Option<GainPair>) {
        (CalibrationRecord::default(), ThermistorCurve::default(), gains)
    }

    #[test]
    fn test_adc_to_voltage_is_affine() {
        assert_eq!(adc_to_voltage(0.0), 0.0);
        assert_eq!(adc_to_voltage(1024.0), 5.0);
        assert_eq!(adc_to_voltage(512.0), 2.5);
    }

    #[test]
    fn test_conversions_need_gains() {
        let (cal, curve, gains) = converter(None);
        let conv = PhysicalConverter::new(&cal, &curve, gains);
        assert!(matches!(
            conv.thermistor_temperature(2.5),
            Err(PyroError::Precondition(_))
        ));
        assert!(matches!(
            conv.thermopile_voltage(3.0, 2.5),
            Err(PyroError::Precondition(_))
        ));
        assert!(matches!(
            conv.thermopile_power(3.0, 2.5),
            Err(PyroError::Precondition(_))
        ));
    }

    #[test]
    fn test_thermopile_voltage_and_power() {
        let (cal, curve, gains) = converter(Some(GainPair::new(255, 10)));
        let conv = PhysicalConverter::new(&cal, &curve, gains);
        let v = conv.thermopile_voltage(3.52, 2.5).unwrap();
        assert!((v - 1.02 / 51.0).abs() < 1e-12);
        let p = conv.thermopile_power(3.52, 2.5).unwrap();
        assert!((p - v / 1.1e-4).abs() < 1e-9);
    }

    #[test]
    fn test_thermistor_at_room_resistance() {
        // pre-amp 5/11 V gives R = 2.2e6 / 10 = 220k, the default R0.
        let (cal, curve, gains) = converter(Some(GainPair::new(1, 51)));
        let conv = PhysicalConverter::new(&cal, &curve, gains);
        let voltage = (5.0 / 11.0) * 255.0 / 51.0;
        let r = conv.thermistor_resistance(voltage).unwrap();
        assert!((r - 1.0).abs() < 1e-9);
        let t = conv.thermistor_temperature(voltage).unwrap();
        assert!((t - 22.0).abs() < 0.5);
    }
}
