//! Conversion of raw ADC counts into physical quantities.
//!
//! Everything here is pure arithmetic over a [`CalibrationRecord`], a
//! [`ThermistorCurve`], and the gains currently applied to the board.

pub mod converter;
pub mod lookup;
pub mod record;
pub mod thermistor;

pub use converter::{adc_to_voltage, PhysicalConverter, ADC_FULL_SCALE, ADC_REFERENCE_VOLTS};
pub use lookup::{BandpassTable, LookupTable};
pub use record::CalibrationRecord;
pub use thermistor::{ThermistorCurve, ROOM_TEMPERATURE};
