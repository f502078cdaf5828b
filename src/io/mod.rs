//! Import/export formats.

pub mod csv;

pub use self::csv::{BookCsvReader, BookCsvWriter, CSV_COLUMNS};
