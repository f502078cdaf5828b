//! Data models for bookcase.
//!
//! Canonical in-memory shapes of catalog records and the rules for
//! validating, parsing and ordering them.

mod book;
mod filter;
mod string_book;

pub use book::{Book, BookId, Header, Subject, sort_books, sort_headers};
pub use filter::Filter;
pub use string_book::{DEFAULT_DATE_LAYOUT, StringBook};
