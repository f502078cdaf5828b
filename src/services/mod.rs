//! Business logic services.
//!
//! Services orchestrate storage backends and provide whole-catalog jobs.

mod bulk;

pub use bulk::{
    BulkOptions, BulkReport, ImageReencoder, export_csv, import_csv, reencode_images, seed,
};
