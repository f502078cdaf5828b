//! Read-only backend over a CSV file.
//!
//! The whole catalog is parsed once at construction, sorted, and kept in
//! memory. Reads evaluate [`Filter::matches`] against the resident slice and
//! paginate in memory. Every mutation fails with [`Error::Unsupported`].

use crate::io::BookCsvReader;
use crate::models::{Book, BookId, DEFAULT_DATE_LAYOUT, Filter, Header, Subject, sort_books};
use crate::storage::traits::clamp_page;
use crate::storage::{BookStorage, Deadline};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::instrument;

/// Catalog compiled into the binary, served by `csv:` URLs without a path.
const EMBEDDED_LIBRARY: &str = include_str!("../../data/library.csv");

/// Read-only, in-memory backend loaded from CSV.
///
/// The book slice is immutable after load, so no locking is needed.
#[derive(Debug)]
pub struct CsvBackend {
    books: Vec<Book>,
}

impl CsvBackend {
    /// Loads the embedded catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded file fails to parse.
    pub fn embedded() -> Result<Self> {
        Self::from_reader(EMBEDDED_LIBRARY.as_bytes())
    }

    /// Loads a catalog from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| Error::operation(format!("open_csv {}", path.display()), e))?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Loads a catalog from any reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the header row does not match the fixed layout or
    /// any row fails to parse.
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        let books = BookCsvReader::new(reader, DEFAULT_DATE_LAYOUT)?.read_all()?;
        Ok(Self::from_books(books))
    }

    /// Builds the backend from books already in memory.
    #[must_use]
    pub fn from_books(mut books: Vec<Book>) -> Self {
        sort_books(&mut books);
        tracing::debug!(books = books.len(), "Loaded CSV catalog");
        Self { books }
    }

    /// Number of books held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.books.len()
    }

    /// Returns true if the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

/// Skips `offset` items and takes `limit`.
fn page<T>(items: impl Iterator<Item = T>, limit: i64, offset: i64) -> Vec<T> {
    let Some((limit, offset)) = clamp_page(limit, offset) else {
        return Vec::new();
    };
    let skip = usize::try_from(offset).unwrap_or(usize::MAX);
    let take = usize::try_from(limit).unwrap_or(usize::MAX);
    items.skip(skip).take(take).collect()
}

fn read_only(operation: &str) -> Error {
    Error::Unsupported(format!("{operation} on the read-only csv backend"))
}

impl BookStorage for CsvBackend {
    fn backend_name(&self) -> &'static str {
        "csv"
    }

    fn create_books(&self, _deadline: Deadline, _books: &[Book]) -> Result<Vec<Book>> {
        Err(read_only("create_books"))
    }

    #[instrument(skip(self), fields(operation = "read_book_subjects", backend = "csv"))]
    fn read_book_subjects(
        &self,
        _deadline: Deadline,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Subject>> {
        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        for book in &self.books {
            *counts.entry(book.header.subject.as_str()).or_default() += 1;
        }
        let subjects = counts
            .into_iter()
            .map(|(name, count)| Subject::new(name, count));
        Ok(page(subjects, limit, offset))
    }

    #[instrument(skip(self), fields(operation = "read_book_headers", backend = "csv"))]
    fn read_book_headers(
        &self,
        _deadline: Deadline,
        filter: &Filter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Header>> {
        let headers = self
            .books
            .iter()
            .filter(|book| filter.matches(book))
            .map(|book| book.header.clone());
        Ok(page(headers, limit, offset))
    }

    #[instrument(skip(self), fields(operation = "read_book", backend = "csv", book.id = %id))]
    fn read_book(&self, _deadline: Deadline, id: &BookId) -> Result<Book> {
        self.books
            .iter()
            .find(|book| &book.header.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("book {id}")))
    }

    fn update_book(&self, _deadline: Deadline, _book: &Book, _update_image: bool) -> Result<()> {
        Err(read_only("update_book"))
    }

    fn delete_book(&self, _deadline: Deadline, _id: &BookId) -> Result<()> {
        Err(read_only("delete_book"))
    }

    fn read_admin_password(&self, _deadline: Deadline) -> Result<Vec<u8>> {
        Err(read_only("read_admin_password"))
    }

    fn update_admin_password(&self, _deadline: Deadline, _hash: &[u8]) -> Result<()> {
        Err(read_only("update_admin_password"))
    }

    fn all_books(&self) -> Option<&[Book]> {
        Some(&self.books)
    }
}
