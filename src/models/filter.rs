//! Search filter over book headers.
//!
//! A filter is a list of free-text terms plus an optional exact subject.
//! Terms are OR'd across title, author and subject and compared as
//! case-insensitive substrings. Backends either evaluate [`Filter::matches`]
//! directly or translate the filter into their own query language.

use crate::models::{Book, Header};
use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Pattern every search term must match.
static TERM_PATTERN: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[A-Za-z0-9]+$").expect("static regex: term pattern")
});

/// A parsed, validated search query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    terms: Vec<String>,
    subject: String,
}

impl Filter {
    /// Parses a free-text query and an exact subject into a filter.
    ///
    /// The query is split on whitespace. Every token must be alphanumeric;
    /// a single bad token fails the whole parse.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the first invalid token.
    ///
    /// # Examples
    ///
    /// ```
    /// use bookcase::Filter;
    ///
    /// let filter = Filter::new("cats dogs", "Animals").unwrap();
    /// assert_eq!(filter.terms(), ["cats", "dogs"]);
    /// assert_eq!(filter.subject(), Some("Animals"));
    /// assert!(Filter::new("cats & dogs", "").is_err());
    /// ```
    pub fn new(query: &str, subject: impl Into<String>) -> Result<Self> {
        let mut terms = Vec::new();
        for token in query.split_whitespace() {
            if !TERM_PATTERN.is_match(token) {
                return Err(Error::InvalidInput(format!(
                    "search term {token:?} must contain only letters and digits"
                )));
            }
            terms.push(token.to_string());
        }

        Ok(Self {
            terms,
            subject: subject.into(),
        })
    }

    /// Returns a filter that matches every book.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Returns the free-text terms in query order.
    #[must_use]
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Returns the exact subject constraint, if any.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        if self.subject.is_empty() {
            None
        } else {
            Some(&self.subject)
        }
    }

    /// Returns true if the filter has neither terms nor a subject.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.subject.is_empty()
    }

    /// Returns true if the header satisfies the filter.
    #[must_use]
    pub fn matches_header(&self, header: &Header) -> bool {
        if let Some(subject) = self.subject() {
            if header.subject != subject {
                return false;
            }
        }
        if self.terms.is_empty() {
            return true;
        }

        let fields = [
            header.title.to_lowercase(),
            header.author.to_lowercase(),
            header.subject.to_lowercase(),
        ];
        self.terms.iter().any(|term| {
            let term = term.to_lowercase();
            fields.iter().any(|field| field.contains(&term))
        })
    }

    /// Returns true if the book satisfies the filter.
    #[must_use]
    pub fn matches(&self, book: &Book) -> bool {
        self.matches_header(&book.header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BookId;
    use test_case::test_case;

    fn book(title: &str, author: &str, subject: &str) -> Book {
        Book {
            header: Header {
                id: BookId::new("x"),
                title: title.to_string(),
                author: author.to_string(),
                subject: subject.to_string(),
            },
            pages: 1,
            ..Book::default()
        }
    }

    #[test_case("", &[] ; "empty query")]
    #[test_case("cat", &["cat"] ; "single term")]
    #[test_case("  cat \t dog\n", &["cat", "dog"] ; "extra whitespace")]
    #[test_case("R2D2 c3po", &["R2D2", "c3po"] ; "mixed digits")]
    fn test_parse_terms(query: &str, expected: &[&str]) {
        let filter = Filter::new(query, "").unwrap();
        assert_eq!(filter.terms(), expected);
    }

    #[test_case("cat's" ; "apostrophe")]
    #[test_case("cat dog-house" ; "hyphen in second token")]
    #[test_case("100%" ; "percent")]
    #[test_case("naïve" ; "non ascii letter")]
    fn test_parse_rejects_invalid_tokens(query: &str) {
        let result = Filter::new(query, "");
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = Filter::all();
        assert!(filter.is_empty());
        assert!(filter.matches(&book("", "", "")));
        assert!(filter.matches(&book("Dogs", "Someone", "Animals")));
    }

    #[test]
    fn test_terms_match_any_field_case_insensitively() {
        let filter = Filter::new("cat", "").unwrap();
        assert!(filter.matches(&book("Cats of the World", "A. Writer", "Animals")));
        assert!(filter.matches(&book("Catalog of Stars", "B. Writer", "Astronomy")));
        assert!(!filter.matches(&book("Dogs", "C. Writer", "Animals")));
        assert!(filter.matches(&book("Dogs", "Mr. McCATney", "Animals")));
        assert!(filter.matches(&book("Dogs", "C. Writer", "Education")));
    }

    #[test]
    fn test_terms_are_ored() {
        let filter = Filter::new("zebra dog", "").unwrap();
        assert!(filter.matches(&book("Dogs", "", "")));
        assert!(!filter.matches(&book("Cats", "", "")));
    }

    #[test]
    fn test_subject_must_match_exactly() {
        let filter = Filter::new("", "Animals").unwrap();
        assert!(filter.matches(&book("Dogs", "", "Animals")));
        assert!(!filter.matches(&book("Dogs", "", "animals")));
        assert!(!filter.matches(&book("Dogs", "", "Animals and Plants")));
    }

    #[test]
    fn test_subject_and_terms_combine() {
        let filter = Filter::new("cat", "Astronomy").unwrap();
        assert!(filter.matches(&book("Catalog of Stars", "", "Astronomy")));
        assert!(!filter.matches(&book("Cats of the World", "", "Animals")));
    }
}
