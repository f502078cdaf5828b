//! Fixed-layout CSV format for book records.
//!
//! The read-only file backend, bulk export and bulk import all share this
//! layout, so a dump taken from any backend can seed any other.

use crate::models::{Book, StringBook};
use crate::{Error, Result};
use std::io::{Read, Write};

/// Exact header row of a book CSV file.
pub const CSV_COLUMNS: [&str; 13] = [
    "id",
    "title",
    "author",
    "description",
    "subject",
    "dewey-dec-class",
    "pages",
    "publisher",
    "publish-date",
    "added-date",
    "ean-isbn-13",
    "upc-isbn-10",
    "image-base64",
];

/// Reads [`Book`]s from CSV with the fixed column layout.
pub struct BookCsvReader<R: Read> {
    reader: csv::Reader<R>,
    date_layout: String,
    record: csv::StringRecord,
}

impl<R: Read> BookCsvReader<R> {
    /// Creates a reader and validates the header row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the header row differs from
    /// [`CSV_COLUMNS`] in any way, or [`Error::OperationFailed`] if it cannot
    /// be read.
    pub fn new(reader: R, date_layout: impl Into<String>) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);

        let headers = csv_reader
            .headers()
            .map_err(|e| Error::operation("read_csv_headers", e))?;
        if !headers.iter().eq(CSV_COLUMNS.iter().copied()) {
            return Err(Error::InvalidInput(format!(
                "csv header row must be {:?}, got {:?}",
                CSV_COLUMNS.join(","),
                headers.iter().collect::<Vec<_>>().join(",")
            )));
        }

        Ok(Self {
            reader: csv_reader,
            date_layout: date_layout.into(),
            record: csv::StringRecord::new(),
        })
    }

    /// Reads the next row as text fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is malformed or has the wrong width.
    pub fn next_string_book(&mut self) -> Result<Option<StringBook>> {
        let has_record = self
            .reader
            .read_record(&mut self.record)
            .map_err(|e| Error::operation("read_csv", e))?;
        if !has_record {
            return Ok(None);
        }
        string_book_from_record(&self.record).map(Some)
    }

    /// Reads the next row and converts it to a [`Book`].
    ///
    /// # Errors
    ///
    /// Returns an error if the row is malformed or a field fails to parse.
    pub fn next_book(&mut self) -> Result<Option<Book>> {
        match self.next_string_book()? {
            Some(sb) => sb.to_book(&self.date_layout).map(Some),
            None => Ok(None),
        }
    }

    /// Reads every remaining row.
    ///
    /// # Errors
    ///
    /// Returns the first row error encountered.
    pub fn read_all(mut self) -> Result<Vec<Book>> {
        let mut books = Vec::new();
        while let Some(book) = self.next_book()? {
            books.push(book);
        }
        Ok(books)
    }
}

impl<R: Read> Iterator for BookCsvReader<R> {
    type Item = Result<Book>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_book().transpose()
    }
}

/// Maps a CSV record onto the text fields, by position.
fn string_book_from_record(record: &csv::StringRecord) -> Result<StringBook> {
    if record.len() != CSV_COLUMNS.len() {
        return Err(Error::InvalidInput(format!(
            "csv row has {} fields, expected {}",
            record.len(),
            CSV_COLUMNS.len()
        )));
    }
    let field = |i: usize| record.get(i).unwrap_or_default().to_string();

    Ok(StringBook {
        id: field(0),
        title: field(1),
        author: field(2),
        description: field(3),
        subject: field(4),
        dewey_dec_class: field(5),
        pages: field(6),
        publisher: field(7),
        publish_date: field(8),
        added_date: field(9),
        ean_isbn13: field(10),
        upc_isbn10: field(11),
        image_base64: field(12),
    })
}

/// Writes [`Book`]s as CSV with the fixed column layout.
pub struct BookCsvWriter<W: Write> {
    writer: csv::Writer<W>,
    date_layout: String,
    headers_written: bool,
}

impl<W: Write> BookCsvWriter<W> {
    /// Creates a writer. The header row is written with the first book, or on
    /// [`BookCsvWriter::finish`] for an empty export.
    pub fn new(writer: W, date_layout: impl Into<String>) -> Self {
        let csv_writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);

        Self {
            writer: csv_writer,
            date_layout: date_layout.into(),
            headers_written: false,
        }
    }

    fn ensure_headers(&mut self) -> Result<()> {
        if !self.headers_written {
            self.writer
                .write_record(CSV_COLUMNS)
                .map_err(|e| Error::operation("write_csv_headers", e))?;
            self.headers_written = true;
        }
        Ok(())
    }

    /// Writes one book.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying writer fails.
    pub fn write(&mut self, book: &Book) -> Result<()> {
        self.ensure_headers()?;

        let sb = StringBook::from_book(book, &self.date_layout);
        self.writer
            .write_record([
                &sb.id,
                &sb.title,
                &sb.author,
                &sb.description,
                &sb.subject,
                &sb.dewey_dec_class,
                &sb.pages,
                &sb.publisher,
                &sb.publish_date,
                &sb.added_date,
                &sb.ean_isbn13,
                &sb.upc_isbn10,
                &sb.image_base64,
            ])
            .map_err(|e| Error::operation("write_csv", e))
    }

    /// Flushes buffered rows and returns the inner writer.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    pub fn finish(mut self) -> Result<W> {
        self.ensure_headers()?;
        self.writer
            .into_inner()
            .map_err(|e| Error::operation("flush_csv", e.error()))
    }
}
