//! Interpolated tables

use crate::error::{AppResult, PyroError};

/// Piecewise-linear interpolation over a strictly ascending abscissa.
///
/// Inputs outside the table clamp to the first or last ordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl LookupTable {
    /// Build from parallel columns; `xs` must be strictly ascending.
    pub fn new(xs: Vec<f64>, ys: Vec<f64>) -> AppResult<Self> {
        if xs.len() != ys.len() || xs.len() < 2 {
            return Err(PyroError::Validation(format!(
                "Lookup table needs at least two (x, y) pairs, got {} x and {} y",
                xs.len(),
                ys.len()
            )));
        }
        if xs.windows(2).any(|w| w[0] >= w[1] || w[0].is_nan()) {
            return Err(PyroError::Validation(
                "Lookup table abscissa must be strictly ascending".to_string(),
            ));
        }
        Ok(Self { xs, ys })
    }

    /// Build from columns already known to be strictly ascending in `x`.
    pub(crate) fn from_sorted(xs: Vec<f64>, ys: Vec<f64>) -> Self {
        debug_assert!(xs.len() == ys.len() && xs.len() >= 2);
        Self { xs, ys }
    }

    /// Build from `(x, y)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (f64, f64)>) -> AppResult<Self> {
        let (xs, ys) = pairs.into_iter().unzip();
        Self::new(xs, ys)
    }

    /// Value at `x`, clamped to the end ordinates outside the table.
    pub fn interpolate(&self, x: f64) -> f64 {
        let last = self.xs.len() - 1;
        if x <= self.xs[0] {
            return self.ys[0];
        }
        if x >= self.xs[last] {
            return self.ys[last];
        }
        // First index whose abscissa exceeds x; always in 1..=last here.
        let hi = self.xs.partition_point(|&v| v <= x);
        let lo = hi - 1;
        let t = (x - self.xs[lo]) / (self.xs[hi] - self.xs[lo]);
        self.ys[lo] + t * (self.ys[hi] - self.ys[lo])
    }

    /// Smallest and largest abscissa.
    pub fn domain(&self) -> (f64, f64) {
        (self.xs[0], self.xs[self.xs.len() - 1])
    }
}

/// Fraction of blackbody emission that falls in the thermopile window, by temperature.
#[derive(Debug, Clone, PartialEq)]
pub enum BandpassTable {
    /// Every temperature passes in full.
    Flat,
    /// Interpolated from a measured table (temperature in C, fraction).
    Table(LookupTable),
}

impl BandpassTable {
    /// Table that passes everything.
    pub fn flat() -> Self {
        Self::Flat
    }

    /// Measured table from `(temperature C, fraction)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (f64, f64)>) -> AppResult<Self> {
        LookupTable::from_pairs(pairs).map(Self::Table)
    }

    /// In-band fraction at `temperature` C.
    pub fn fraction(&self, temperature: f64) -> f64 {
        match self {
            Self::Flat => 1.0,
            Self::Table(table) => table.interpolate(temperature),
        }
    }
}

impl Default for BandpassTable {
    fn default() -> Self {
        Self::Flat
    }
}
