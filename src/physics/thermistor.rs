//! NTC thermistor curve

use crate::error::{AppResult, PyroError};
use crate::physics::LookupTable;

/// Temperature at which the curve is normalized to 1.0, in C.
pub const ROOM_TEMPERATURE: f64 = 22.0;

const KELVIN_OFFSET: f64 = 273.15;
const DEFAULT_BETA: f64 = 3950.0;

/// Thermistor resistance versus temperature, normalized to room temperature.
///
/// Resistance falls monotonically as temperature rises (NTC).
#[derive(Debug, Clone, PartialEq)]
pub struct ThermistorCurve {
    // normalized resistance (ascending) -> temperature
    table: LookupTable,
}

impl ThermistorCurve {
    /// Build from `(temperature C, resistance)` points ordered by ascending temperature.
    ///
    /// Resistances may be in any unit; they are divided by the interpolated
    /// value at [`ROOM_TEMPERATURE`].
    pub fn from_points(points: &[(f64, f64)]) -> AppResult<Self> {
        if points.len() < 2 {
            return Err(PyroError::Validation(
                "Thermistor curve needs at least two points".to_string(),
            ));
        }
        if points
            .windows(2)
            .any(|w| !(w[0].0 < w[1].0 && w[0].1 > w[1].1))
        {
            return Err(PyroError::Validation(
                "Thermistor curve must have rising temperature and falling resistance".to_string(),
            ));
        }

        let by_temperature = LookupTable::from_pairs(points.iter().copied())?;
        let room = by_temperature.interpolate(ROOM_TEMPERATURE);
        if room <= 0.0 {
            return Err(PyroError::Validation(
                "Thermistor resistance at room temperature must be positive".to_string(),
            ));
        }

        let table = LookupTable::from_pairs(points.iter().rev().map(|&(t, r)| (r / room, t)))?;
        Ok(Self { table })
    }

    /// Curve of an ideal NTC with the given beta, -40 C to 150 C in 5 C steps.
    pub fn beta_model(beta: f64) -> Self {
        let t0 = ROOM_TEMPERATURE + KELVIN_OFFSET;
        // 150 C first so the normalized resistance ascends.
        let (xs, ys) = (-8..=30)
            .rev()
            .map(|i| {
                let t = f64::from(i) * 5.0;
                ((beta * (1.0 / (t + KELVIN_OFFSET) - 1.0 / t0)).exp(), t)
            })
            .unzip();
        Self {
            table: LookupTable::from_sorted(xs, ys),
        }
    }

    /// Temperature for a normalized resistance; clamps outside the covered range.
    pub fn temperature(&self, normalized_resistance: f64) -> f64 {
        self.table.interpolate(normalized_resistance)
    }

    /// Whether the normalized resistance lies strictly inside the table.
    pub fn covers(&self, normalized_resistance: f64) -> bool {
        let (low, high) = self.table.domain();
        low < normalized_resistance && normalized_resistance < high
    }
}

impl Default for ThermistorCurve {
    fn default() -> Self {
        Self::beta_model(DEFAULT_BETA)
    }
}
