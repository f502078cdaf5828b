//! Book records and identifiers.

use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a book, assigned by the storage backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(String);

impl BookId {
    /// Creates a book ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if no ID has been assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for BookId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BookId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The identifying projection of a book shown in list views.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Backend-assigned identifier.
    pub id: BookId,
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Subject the book is shelved under.
    pub subject: String,
}

/// A complete catalog record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Identifying fields.
    pub header: Header,
    /// Free-form description.
    pub description: String,
    /// Dewey decimal classification code.
    pub dewey_dec_class: String,
    /// Page count, positive once persisted.
    pub pages: u32,
    /// Publisher.
    pub publisher: String,
    /// Publication date, if known.
    pub publish_date: Option<NaiveDate>,
    /// Date the book joined the catalog. Filled in on create when empty.
    pub added_date: Option<NaiveDate>,
    /// EAN / ISBN-13 code.
    pub ean_isbn13: String,
    /// UPC / ISBN-10 code.
    pub upc_isbn10: String,
    /// Cover image, base64 encoded.
    pub image_base64: String,
}

impl Book {
    /// Returns the book ID.
    #[must_use]
    pub const fn id(&self) -> &BookId {
        &self.header.id
    }

    /// Text form of this book, dates rendered with `date_layout`.
    #[must_use]
    pub fn to_string_book(&self, date_layout: &str) -> crate::models::StringBook {
        crate::models::StringBook::from_book(self, date_layout)
    }

    /// Checks the invariants a persisted book must hold.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the page count is zero.
    pub fn validate(&self) -> Result<()> {
        if self.pages == 0 {
            return Err(Error::InvalidInput(format!(
                "book {:?} must have a positive page count",
                self.header.title
            )));
        }
        Ok(())
    }

    /// Returns a copy prepared for insertion: fresh ID and an added date.
    #[must_use]
    pub fn prepared_for_create(&self, today: NaiveDate) -> Self {
        let mut book = self.clone();
        book.header.id = BookId::generate();
        if book.added_date.is_none() {
            book.added_date = Some(today);
        }
        book
    }
}

/// A distinct subject with the number of books shelved under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Subject name.
    pub name: String,
    /// Number of books with this subject.
    pub count: u64,
}

impl Subject {
    /// Creates a subject entry.
    #[must_use]
    pub fn new(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

/// Sorts headers by subject, then title. Equal keys keep their relative order.
pub fn sort_headers(headers: &mut [Header]) {
    headers.sort_by(|a, b| {
        a.subject
            .cmp(&b.subject)
            .then_with(|| a.title.cmp(&b.title))
    });
}

/// Sorts books by subject, then title. Equal keys keep their relative order.
pub fn sort_books(books: &mut [Book]) {
    books.sort_by(|a, b| {
        a.header
            .subject
            .cmp(&b.header.subject)
            .then_with(|| a.header.title.cmp(&b.header.title))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(id: &str, subject: &str, title: &str) -> Header {
        Header {
            id: BookId::new(id),
            title: title.to_string(),
            author: String::new(),
            subject: subject.to_string(),
        }
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = BookId::generate();
        let b = BookId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_sort_headers_subject_then_title() {
        let mut headers = vec![
            header("1", "Science", "Physics"),
            header("2", "Art", "Sculpture"),
            header("3", "Science", "Biology"),
            header("4", "Art", "Painting"),
        ];
        sort_headers(&mut headers);
        let ids: Vec<&str> = headers.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["4", "2", "3", "1"]);
    }

    #[test]
    fn test_sort_is_stable_for_equal_keys() {
        let mut headers = vec![
            header("first", "Art", "Same"),
            header("other", "Art", "Alpha"),
            header("second", "Art", "Same"),
            header("third", "Art", "Same"),
        ];
        sort_headers(&mut headers);
        let ids: Vec<&str> = headers.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["other", "first", "second", "third"]);
    }

    #[test]
    fn test_validate_rejects_zero_pages() {
        let book = Book::default();
        assert!(matches!(book.validate(), Err(Error::InvalidInput(_))));

        let book = Book {
            pages: 12,
            ..Book::default()
        };
        assert!(book.validate().is_ok());
    }

    #[test]
    fn test_prepared_for_create_assigns_id_and_added_date() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let mut book = Book {
            pages: 3,
            ..Book::default()
        };
        book.header.id = BookId::new("caller-supplied");

        let prepared = book.prepared_for_create(today);
        assert_ne!(prepared.header.id.as_str(), "caller-supplied");
        assert!(!prepared.header.id.is_empty());
        assert_eq!(prepared.added_date, Some(today));

        let earlier = NaiveDate::from_ymd_opt(2001, 1, 1).unwrap();
        book.added_date = Some(earlier);
        assert_eq!(book.prepared_for_create(today).added_date, Some(earlier));
    }
}
