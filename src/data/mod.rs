//! Data export.

pub mod storage;

pub use storage::CsvExporter;
