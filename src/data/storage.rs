//! Dataset export with clean feature flag handling.
use crate::error::AppResult;
use crate::experiment::CalibrationDataset;
use std::path::{Path, PathBuf};

// ============================================================================
// CSV Exporter
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use tracing::info;

    /// Writes a calibration dataset as CSV.
    ///
    /// One header row of column names, then one row per plateau with three
    /// decimals. The file is rewritten in full on every export, so calling it
    /// after each plateau always leaves a complete file behind.
    pub struct CsvExporter {
        path: PathBuf,
    }

    impl CsvExporter {
        /// Exporter that writes to `path`. Nothing is touched until the first export.
        pub fn new(path: impl AsRef<Path>) -> Self {
            Self {
                path: path.as_ref().to_path_buf(),
            }
        }

        /// Destination file.
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Rewrite the file with every row of `dataset`.
        pub fn export(&self, dataset: &CalibrationDataset) -> AppResult<()> {
            info!("Writing {}", self.path.display());
            let mut writer = csv::Writer::from_path(&self.path)?;
            writer.write_record(dataset.names())?;
            for index in 0..dataset.len() {
                if let Some(row) = dataset.row(index) {
                    writer.write_record(row.iter().map(|v| format!("{:.3}", v)))?;
                }
            }
            writer.flush()?;
            info!("Writing done");
            Ok(())
        }
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;
    use crate::error::PyroError;

    /// CSV export stub; build with `storage_csv` for the real writer.
    pub struct CsvExporter {
        path: PathBuf,
    }

    impl CsvExporter {
        /// Exporter that would write to `path`.
        pub fn new(path: impl AsRef<Path>) -> Self {
            Self {
                path: path.as_ref().to_path_buf(),
            }
        }

        /// Destination file.
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Always fails with `FeatureNotEnabled`.
        pub fn export(&self, _dataset: &CalibrationDataset) -> AppResult<()> {
            Err(PyroError::FeatureNotEnabled("storage_csv".to_string()))
        }
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::CsvExporter;

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::CsvExporter;
