//! All-text form of a book used at input boundaries.
//!
//! CSV rows and form posts arrive as strings. [`StringBook`] carries them
//! until [`StringBook::to_book`] coerces the numeric and date fields.

use crate::models::{Book, BookId, Header};
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Date layout used by the flat-file format and the default configuration.
pub const DEFAULT_DATE_LAYOUT: &str = "%Y-%m-%d";

/// Text mirror of [`Book`]; every field is a string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringBook {
    /// Identifier.
    pub id: String,
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Description.
    pub description: String,
    /// Subject.
    pub subject: String,
    /// Dewey decimal classification code.
    pub dewey_dec_class: String,
    /// Page count as text.
    pub pages: String,
    /// Publisher.
    pub publisher: String,
    /// Publication date as text; empty when unknown.
    pub publish_date: String,
    /// Added date as text; empty when unset.
    pub added_date: String,
    /// EAN / ISBN-13 code.
    pub ean_isbn13: String,
    /// UPC / ISBN-10 code.
    pub upc_isbn10: String,
    /// Base64 cover image.
    pub image_base64: String,
}

impl StringBook {
    /// Converts to a [`Book`], parsing dates with the given `chrono` layout.
    ///
    /// Fields are converted in order and the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidField`] with the field name and raw text when the
    /// page count is not an unsigned integer or a date does not fit the layout.
    pub fn to_book(&self, date_layout: &str) -> Result<Book> {
        let pages = self.pages.parse::<u32>().map_err(|e| Error::InvalidField {
            key: "pages",
            value: self.pages.clone(),
            cause: e.to_string(),
        })?;
        let publish_date = parse_date("publish_date", &self.publish_date, date_layout)?;
        let added_date = parse_date("added_date", &self.added_date, date_layout)?;

        Ok(Book {
            header: Header {
                id: BookId::new(&self.id),
                title: self.title.clone(),
                author: self.author.clone(),
                subject: self.subject.clone(),
            },
            description: self.description.clone(),
            dewey_dec_class: self.dewey_dec_class.clone(),
            pages,
            publisher: self.publisher.clone(),
            publish_date,
            added_date,
            ean_isbn13: self.ean_isbn13.clone(),
            upc_isbn10: self.upc_isbn10.clone(),
            image_base64: self.image_base64.clone(),
        })
    }

    /// Builds the text form of a book, formatting dates with the given layout.
    #[must_use]
    pub fn from_book(book: &Book, date_layout: &str) -> Self {
        let format_date = |date: Option<NaiveDate>| {
            date.map(|d| d.format(date_layout).to_string())
                .unwrap_or_default()
        };

        Self {
            id: book.header.id.to_string(),
            title: book.header.title.clone(),
            author: book.header.author.clone(),
            description: book.description.clone(),
            subject: book.header.subject.clone(),
            dewey_dec_class: book.dewey_dec_class.clone(),
            pages: book.pages.to_string(),
            publisher: book.publisher.clone(),
            publish_date: format_date(book.publish_date),
            added_date: format_date(book.added_date),
            ean_isbn13: book.ean_isbn13.clone(),
            upc_isbn10: book.upc_isbn10.clone(),
            image_base64: book.image_base64.clone(),
        }
    }
}

/// Parses an optional date; empty text means no date.
fn parse_date(key: &'static str, value: &str, layout: &str) -> Result<Option<NaiveDate>> {
    if value.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(value, layout)
        .map(Some)
        .map_err(|e| Error::InvalidField {
            key,
            value: value.to_string(),
            cause: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StringBook {
        StringBook {
            id: "b1".to_string(),
            title: "Cats of the World".to_string(),
            author: "A. Writer".to_string(),
            description: "Every cat, ranked.".to_string(),
            subject: "Animals".to_string(),
            dewey_dec_class: "599.75".to_string(),
            pages: "312".to_string(),
            publisher: "Feline Press".to_string(),
            publish_date: "1999-04-01".to_string(),
            added_date: "2020-10-13".to_string(),
            ean_isbn13: "9780000000001".to_string(),
            upc_isbn10: "0000000001".to_string(),
            image_base64: "aGVsbG8=".to_string(),
        }
    }

    #[test]
    fn test_to_book() {
        let book = sample().to_book(DEFAULT_DATE_LAYOUT).unwrap();
        assert_eq!(book.header.id.as_str(), "b1");
        assert_eq!(book.pages, 312);
        assert_eq!(book.publish_date, NaiveDate::from_ymd_opt(1999, 4, 1));
        assert_eq!(book.added_date, NaiveDate::from_ymd_opt(2020, 10, 13));
    }

    #[test]
    fn test_round_trip() {
        let original = sample();
        let book = original.to_book(DEFAULT_DATE_LAYOUT).unwrap();
        assert_eq!(StringBook::from_book(&book, DEFAULT_DATE_LAYOUT), original);
        assert_eq!(book.to_string_book(DEFAULT_DATE_LAYOUT), original);
    }

    #[test]
    fn test_custom_layout() {
        let mut sb = sample();
        sb.publish_date = "01/04/1999".to_string();
        sb.added_date = String::new();
        let book = sb.to_book("%d/%m/%Y").unwrap();
        assert_eq!(book.publish_date, NaiveDate::from_ymd_opt(1999, 4, 1));
        assert_eq!(book.added_date, None);
        assert_eq!(StringBook::from_book(&book, "%d/%m/%Y"), sb);
    }

    #[test]
    fn test_bad_pages_reports_key_and_value() {
        let mut sb = sample();
        sb.pages = "lots".to_string();
        sb.publish_date = "garbage".to_string();
        let err = sb.to_book(DEFAULT_DATE_LAYOUT).unwrap_err();
        assert!(
            matches!(err, Error::InvalidField { key: "pages", ref value, .. } if value == "lots")
        );
    }

    #[test]
    fn test_bad_date_reports_key_and_value() {
        let mut sb = sample();
        sb.added_date = "2020-13-45".to_string();
        let err = sb.to_book(DEFAULT_DATE_LAYOUT).unwrap_err();
        assert!(
            matches!(err, Error::InvalidField { key: "added_date", ref value, .. } if value == "2020-13-45")
        );
    }

    #[test]
    fn test_negative_pages_rejected() {
        let mut sb = sample();
        sb.pages = "-3".to_string();
        assert!(sb.to_book(DEFAULT_DATE_LAYOUT).is_err());
    }
}
