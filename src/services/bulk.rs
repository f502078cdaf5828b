//! Whole-catalog jobs: export, import, seeding and image re-encoding.
//!
//! Every job walks its source with [`BatchIterator`] or a streaming CSV
//! reader and writes in chunks, so memory use is bounded by the batch size
//! rather than the catalog size.

use crate::io::{BookCsvReader, BookCsvWriter};
use crate::models::{Book, DEFAULT_DATE_LAYOUT};
use crate::storage::{BatchIterator, BookStorage, DEFAULT_BATCH_SIZE, Deadline};
use crate::Result;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Options shared by the bulk jobs.
#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// Books per page read and per `create_books` call.
    pub batch_size: usize,
    /// Bound on each individual storage call.
    pub timeout: Option<Duration>,
    /// `chrono` format of date columns in CSV files.
    pub date_layout: String,
    /// Read and count without writing to the target.
    pub dry_run: bool,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: None,
            date_layout: DEFAULT_DATE_LAYOUT.to_string(),
            dry_run: false,
        }
    }
}

impl BulkOptions {
    /// Sets the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the CSV date layout.
    #[must_use]
    pub fn with_date_layout(mut self, layout: impl Into<String>) -> Self {
        self.date_layout = layout.into();
        self
    }

    /// Enables or disables dry run mode.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn deadline(&self) -> Deadline {
        self.timeout.map_or_else(Deadline::none, Deadline::after)
    }

    fn chunk_size(&self) -> usize {
        self.batch_size.max(1)
    }

    fn iterate<'a, S: BookStorage + ?Sized>(&self, storage: &'a S) -> BatchIterator<'a, S> {
        let iter = BatchIterator::new(storage, self.chunk_size());
        match self.timeout {
            Some(timeout) => iter.with_timeout(timeout),
            None => iter,
        }
    }
}

/// Counts reported by a bulk job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkReport {
    /// Books read from the source.
    pub processed: usize,
    /// Books written to the target.
    pub written: usize,
    /// Books read but deliberately left unchanged.
    pub skipped: usize,
    /// Wall time of the job.
    pub elapsed: Duration,
}

/// External image re-encoding step.
///
/// Implementations receive the stored base64 image and return the new one,
/// or `None` to leave the book untouched.
pub trait ImageReencoder {
    /// Re-encodes one image.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be decoded or encoded; the job
    /// stops at the first failure.
    fn reencode(&self, image_base64: &str) -> Result<Option<String>>;
}

impl<F> ImageReencoder for F
where
    F: Fn(&str) -> Result<Option<String>>,
{
    fn reencode(&self, image_base64: &str) -> Result<Option<String>> {
        self(image_base64)
    }
}

/// Writes every book in `storage` to `writer` as CSV.
///
/// # Errors
///
/// Returns the first storage or write error.
pub fn export_csv<S, W>(storage: &S, writer: W, options: &BulkOptions) -> Result<BulkReport>
where
    S: BookStorage + ?Sized,
    W: Write,
{
    let start = Instant::now();
    let mut report = BulkReport::default();
    let mut csv = BookCsvWriter::new(writer, options.date_layout.clone());

    for book in options.iterate(storage) {
        let book = book?;
        report.processed += 1;
        csv.write(&book)?;
        report.written += 1;
    }
    csv.finish()?;

    report.elapsed = start.elapsed();
    tracing::info!(
        backend = storage.backend_name(),
        exported = report.written,
        "Exported catalog"
    );
    Ok(report)
}

/// Reads books from CSV and creates them in `storage`, one
/// `create_books` call per chunk.
///
/// IDs in the file are discarded; the target assigns new ones.
///
/// # Errors
///
/// Returns the first parse or storage error. Chunks created before the error
/// stay committed.
pub fn import_csv<S, R>(storage: &S, reader: R, options: &BulkOptions) -> Result<BulkReport>
where
    S: BookStorage + ?Sized,
    R: Read,
{
    let start = Instant::now();
    let mut report = BulkReport::default();
    let mut chunk = Vec::with_capacity(options.chunk_size());

    for book in BookCsvReader::new(reader, options.date_layout.clone())? {
        chunk.push(book?);
        report.processed += 1;
        if chunk.len() >= options.chunk_size() {
            report.written += flush(storage, &mut chunk, options)?;
        }
    }
    report.written += flush(storage, &mut chunk, options)?;

    report.elapsed = start.elapsed();
    tracing::info!(
        backend = storage.backend_name(),
        imported = report.written,
        dry_run = options.dry_run,
        "Imported catalog"
    );
    Ok(report)
}

/// Copies every book from `source` into `target`.
///
/// # Errors
///
/// Returns the first read or write error.
pub fn seed<S, T>(source: &S, target: &T, options: &BulkOptions) -> Result<BulkReport>
where
    S: BookStorage + ?Sized,
    T: BookStorage + ?Sized,
{
    let start = Instant::now();
    let mut report = BulkReport::default();
    let mut chunk = Vec::with_capacity(options.chunk_size());

    for book in options.iterate(source) {
        chunk.push(book?);
        report.processed += 1;
        if chunk.len() >= options.chunk_size() {
            report.written += flush(target, &mut chunk, options)?;
        }
    }
    report.written += flush(target, &mut chunk, options)?;

    report.elapsed = start.elapsed();
    tracing::info!(
        source = source.backend_name(),
        target = target.backend_name(),
        seeded = report.written,
        "Seeded catalog"
    );
    Ok(report)
}

/// Re-encodes every stored image through `reencoder`.
///
/// Books without an image, and books whose image the reencoder leaves
/// unchanged, are counted as skipped.
///
/// # Errors
///
/// Returns the first read, re-encode or update error.
pub fn reencode_images<S, E>(storage: &S, reencoder: &E, options: &BulkOptions) -> Result<BulkReport>
where
    S: BookStorage + ?Sized,
    E: ImageReencoder + ?Sized,
{
    let start = Instant::now();
    let mut report = BulkReport::default();

    for book in options.iterate(storage) {
        let mut book = book?;
        report.processed += 1;
        if book.image_base64.is_empty() {
            report.skipped += 1;
            continue;
        }
        match reencoder.reencode(&book.image_base64)? {
            Some(image) if image != book.image_base64 => {
                book.image_base64 = image;
                if !options.dry_run {
                    storage.update_book(options.deadline(), &book, true)?;
                }
                report.written += 1;
            },
            _ => report.skipped += 1,
        }
    }

    report.elapsed = start.elapsed();
    tracing::info!(
        backend = storage.backend_name(),
        reencoded = report.written,
        skipped = report.skipped,
        "Re-encoded images"
    );
    Ok(report)
}

/// Creates the buffered books and empties the buffer.
fn flush<T: BookStorage + ?Sized>(
    target: &T,
    chunk: &mut Vec<Book>,
    options: &BulkOptions,
) -> Result<usize> {
    if chunk.is_empty() {
        return Ok(0);
    }
    let written = if options.dry_run {
        chunk.len()
    } else {
        target.create_books(options.deadline(), chunk)?.len()
    };
    tracing::debug!(written, "Flushed chunk");
    chunk.clear();
    Ok(written)
}
