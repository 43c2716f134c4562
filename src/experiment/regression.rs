//! Emissivity fit
//!
//! For each plateau the thermopile sees the block, and radiates back at its
//! own temperature. With `k = sigma * G` (G the geometric factor) and `bp(T)`
//! the in-band fraction:
//!
//! ```text
//! x = k * bp(T_block) * T_block^4
//! y = P * 1e-6 + k * bp(T_tp) * T_tp^4
//! y = background + emissivity * x
//! ```
//!
//! Temperatures are in kelvin and `P` is the measured power in uW, so `x`,
//! `y`, and the background are in W.

use crate::error::{AppResult, PyroError};
use crate::experiment::dataset::{CalibrationDataset, BLOCK_TEMP};
use crate::measurement::Quantity;
use crate::physics::BandpassTable;
use tracing::debug;

/// Stefan-Boltzmann constant, W m^-2 K^-4.
pub const STEFAN_BOLTZMANN: f64 = 5.670_374_419e-8;

const KELVIN_OFFSET: f64 = 273.15;

/// Fitted calibration constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmissivityFit {
    /// Slope of received against reference power.
    pub emissivity: f64,
    /// Background power, W.
    pub background: f64,
}

/// Reference and received power terms of every plateau, in W.
pub fn power_terms(
    dataset: &CalibrationDataset,
    bandpass: &BandpassTable,
    geometry_factor: f64,
) -> AppResult<(Vec<f64>, Vec<f64>)> {
    let column = |name: &str| {
        dataset
            .column(name)
            .ok_or_else(|| PyroError::Validation(format!("Dataset has no '{}' column", name)))
    };
    let block = column(BLOCK_TEMP)?;
    let temp = column(Quantity::Temperature.name())?;
    let power = column(Quantity::Power.name())?;

    let k = STEFAN_BOLTZMANN * geometry_factor;
    let radiance = |t: f64| k * bandpass.fraction(t) * (t + KELVIN_OFFSET).powi(4);
    let x = block.iter().map(|&t| radiance(t)).collect();
    let y = power
        .iter()
        .zip(temp)
        .map(|(&p, &t)| p * 1e-6 + radiance(t))
        .collect();
    Ok((x, y))
}

/// Fit emissivity and background over every plateau in `dataset`.
///
/// A single plateau cannot be fitted: its power is taken as the background and
/// the emissivity is 1.
pub fn fit_emissivity(
    dataset: &CalibrationDataset,
    bandpass: &BandpassTable,
    geometry_factor: f64,
) -> AppResult<EmissivityFit> {
    let (x, y) = power_terms(dataset, bandpass, geometry_factor)?;
    match x.len() {
        0 => Err(PyroError::Validation(
            "No plateaus recorded; nothing to fit".to_string(),
        )),
        1 => {
            let power = dataset
                .column(Quantity::Power.name())
                .and_then(|c| c.first().copied())
                .unwrap_or_default();
            Ok(EmissivityFit {
                emissivity: 1.0,
                background: power * 1e-6,
            })
        }
        _ => {
            let (background, emissivity) = linear_fit(&x, &y)?;
            debug!("Fit e = {:.4}, bg = {:.3e} W", emissivity, background);
            Ok(EmissivityFit {
                emissivity,
                background,
            })
        }
    }
}

/// Ordinary least squares line through `(x, y)`; returns (intercept, slope).
pub fn linear_fit(x: &[f64], y: &[f64]) -> AppResult<(f64, f64)> {
    let n = x.len().min(y.len()) as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let (sxx, sxy) = x
        .iter()
        .zip(y)
        .fold((0.0, 0.0), |(sxx, sxy), (&xi, &yi)| {
            let dx = xi - mean_x;
            (sxx + dx * dx, sxy + dx * (yi - mean_y))
        });
    if sxx.is_nan() || sxx <= 0.0 {
        return Err(PyroError::Validation(
            "Block temperatures do not vary; the fit is undetermined".to_string(),
        ));
    }
    let slope = sxy / sxx;
    Ok((mean_y - slope * mean_x, slope))
}
