//! Plateau table built up over a calibration sweep

use crate::error::{AppResult, PyroError};
use crate::measurement::{Quantity, SampleAverages};
use crate::protocol::GainPair;

/// Column holding the block temperature averaged over each plateau.
pub const BLOCK_TEMP: &str = "block_temp";
/// Column holding the thermopile gain applied during each plateau.
pub const TP_GAIN: &str = "tp_gain";
/// Column holding the thermistor gain applied during each plateau.
pub const TR_GAIN: &str = "tr_gain";

/// Append-only table with one row per plateau.
///
/// Column order: the sampled quantities in the order given at construction,
/// then block temperature and the two gains. Every column always has the same
/// length.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationDataset {
    quantities: Vec<Quantity>,
    columns: Vec<(String, Vec<f64>)>,
}

impl CalibrationDataset {
    /// Empty table recording `quantities` plus the block and gain columns.
    pub fn new(quantities: &[Quantity]) -> Self {
        let columns = quantities
            .iter()
            .map(|q| q.name())
            .chain([BLOCK_TEMP, TP_GAIN, TR_GAIN])
            .map(|name| (name.to_string(), Vec::new()))
            .collect();
        Self {
            quantities: quantities.to_vec(),
            columns,
        }
    }

    /// Append one plateau. Fails without touching the table if a quantity is missing.
    pub fn push_plateau(
        &mut self,
        averages: &SampleAverages,
        block_temp: f64,
        gains: GainPair,
    ) -> AppResult<()> {
        let mut row = Vec::with_capacity(self.columns.len());
        for quantity in &self.quantities {
            let value = averages.get(*quantity).ok_or_else(|| {
                PyroError::Validation(format!("Plateau is missing quantity '{}'", quantity))
            })?;
            row.push(value);
        }
        row.extend([
            block_temp,
            f64::from(gains.thermopile),
            f64::from(gains.thermistor),
        ]);
        for ((_, column), value) in self.columns.iter_mut().zip(row) {
            column.push(value);
        }
        Ok(())
    }

    /// Number of plateaus recorded.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, |(_, c)| c.len())
    }

    /// True before the first plateau.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values of the column called `name`.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.as_slice())
    }

    /// Column names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    /// Row `index` in column order.
    pub fn row(&self, index: usize) -> Option<Vec<f64>> {
        self.columns
            .iter()
            .map(|(_, c)| c.get(index).copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::SampleHistory;

    fn averages(temp: f64, power: f64) -> SampleAverages {
        let mut history = SampleHistory::new(1);
        history.push(&[(Quantity::Temperature, temp), (Quantity::Power, power)]);
        history.averages()
    }

    #[test]
    fn test_columns_and_rows() {
        let mut dataset = CalibrationDataset::new(&[Quantity::Temperature, Quantity::Power]);
        assert!(dataset.is_empty());
        dataset
            .push_plateau(&averages(25.0, 3.0), 30.0, GainPair::new(40, 50))
            .unwrap();
        dataset
            .push_plateau(&averages(26.0, 4.0), 50.0, GainPair::new(80, 50))
            .unwrap();

        let names: Vec<_> = dataset.names().collect();
        assert_eq!(names, vec!["temp", "power", "block_temp", "tp_gain", "tr_gain"]);
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.column(BLOCK_TEMP).unwrap(), &[30.0, 50.0]);
        assert_eq!(dataset.row(1).unwrap(), vec![26.0, 4.0, 50.0, 80.0, 50.0]);
        assert_eq!(dataset.row(2), None);
    }

    #[test]
    fn test_missing_quantity_leaves_table_unchanged() {
        let mut dataset =
            CalibrationDataset::new(&[Quantity::Temperature, Quantity::ThermopileVoltage]);
        let err = dataset
            .push_plateau(&averages(25.0, 3.0), 30.0, GainPair::new(1, 1))
            .unwrap_err();
        assert!(matches!(err, PyroError::Validation(_)));
        assert!(dataset.is_empty());
        assert_eq!(dataset.column("temp").unwrap().len(), 0);
    }
}
