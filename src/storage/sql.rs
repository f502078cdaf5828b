//! SQL text shared by the relational backends.
//!
//! `SQLite` and PostgreSQL run the same statements apart from placeholder
//! syntax, the case-insensitive pattern operator and a few DDL types. The
//! functions here are pure: they build statement text and parameter values
//! and never touch a connection.
//!
//! The header filter is one parameterized clause:
//!
//! ```text
//! (no_subject OR subject = ?) AND (no_terms OR title ~ ? OR author ~ ? OR subject ~ ?)
//! ```
//!
//! The two boolean flags let the same statement serve filtered and unfiltered
//! listings without changing the SQL text.

use crate::models::Filter;

/// Column list of the `books` table in insert/select order.
pub const BOOK_COLUMNS: &str = "id, title, author, description, subject, dewey_dec_class, \
     pages, publisher, publish_date, added_date, ean_isbn13, upc_isbn10, image_base64";

/// The SQL dialect a statement is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `SQLite`: `?N` placeholders, `REGEXP` backed by a registered function.
    Sqlite,
    /// PostgreSQL: `$N` placeholders, `~*` operator.
    Postgres,
}

impl Dialect {
    /// Renders the `n`th (1-based) placeholder.
    #[must_use]
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Self::Sqlite => format!("?{n}"),
            Self::Postgres => format!("${n}"),
        }
    }

    /// The case-insensitive regular-expression match operator.
    #[must_use]
    pub const fn match_operator(self) -> &'static str {
        match self {
            Self::Sqlite => "REGEXP",
            Self::Postgres => "~*",
        }
    }

    /// Collation suffix giving byte-wise text ordering.
    const fn byte_order(self) -> &'static str {
        match self {
            Self::Sqlite => "",
            Self::Postgres => " COLLATE \"C\"",
        }
    }

    const fn seq_column(self) -> &'static str {
        match self {
            Self::Sqlite => "seq INTEGER PRIMARY KEY AUTOINCREMENT",
            Self::Postgres => "seq BIGSERIAL PRIMARY KEY",
        }
    }

    const fn date_type(self) -> &'static str {
        match self {
            Self::Sqlite => "TEXT",
            Self::Postgres => "DATE",
        }
    }

    const fn bytes_type(self) -> &'static str {
        match self {
            Self::Sqlite => "BLOB",
            Self::Postgres => "BYTEA",
        }
    }

    /// Idempotent schema creation, including the admin row.
    #[must_use]
    pub fn schema(self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS books (
                {seq},
                id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                description TEXT NOT NULL,
                subject TEXT NOT NULL,
                dewey_dec_class TEXT NOT NULL,
                pages INTEGER NOT NULL CHECK (pages > 0),
                publisher TEXT NOT NULL,
                publish_date {date},
                added_date {date} NOT NULL,
                ean_isbn13 TEXT NOT NULL,
                upc_isbn10 TEXT NOT NULL,
                image_base64 TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_books_subject_title ON books (subject, title);
            CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                password {bytes}
            );
            INSERT INTO users (username) VALUES ('{admin}') ON CONFLICT (username) DO NOTHING;",
            seq = self.seq_column(),
            date = self.date_type(),
            bytes = self.bytes_type(),
            admin = crate::storage::ADMIN_USERNAME,
        )
    }

    /// Insert of one book; parameters follow [`BOOK_COLUMNS`].
    #[must_use]
    pub fn insert_book(self) -> String {
        let placeholders: Vec<String> = (1..=13).map(|n| self.placeholder(n)).collect();
        format!(
            "INSERT INTO books ({BOOK_COLUMNS}) VALUES ({})",
            placeholders.join(", ")
        )
    }

    /// Full-row update by ID.
    ///
    /// Parameters: 1 id, 2..=12 the fields from title to `upc_isbn10` in
    /// [`BOOK_COLUMNS`] order, 13 the update-image flag, 14 the image.
    #[must_use]
    pub fn update_book(self) -> String {
        let p = |n| self.placeholder(n);
        format!(
            "UPDATE books SET title = {}, author = {}, description = {}, subject = {}, \
             dewey_dec_class = {}, pages = {}, publisher = {}, publish_date = {}, \
             added_date = {}, ean_isbn13 = {}, upc_isbn10 = {}, \
             image_base64 = CASE WHEN {} THEN {} ELSE image_base64 END \
             WHERE id = {}",
            p(2),
            p(3),
            p(4),
            p(5),
            p(6),
            p(7),
            p(8),
            p(9),
            p(10),
            p(11),
            p(12),
            p(13),
            p(14),
            p(1),
        )
    }

    /// Select of one full book by ID.
    #[must_use]
    pub fn select_book(self) -> String {
        format!(
            "SELECT {BOOK_COLUMNS} FROM books WHERE id = {}",
            self.placeholder(1)
        )
    }

    /// Delete of one book by ID.
    #[must_use]
    pub fn delete_book(self) -> String {
        format!("DELETE FROM books WHERE id = {}", self.placeholder(1))
    }

    /// The header filter clause; parameters 1..=4 per [`FilterParams`].
    #[must_use]
    pub fn header_filter_clause(self) -> String {
        let op = self.match_operator();
        let (p1, p2, p3, p4) = (
            self.placeholder(1),
            self.placeholder(2),
            self.placeholder(3),
            self.placeholder(4),
        );
        format!(
            "({p1} OR subject = {p2}) AND ({p3} OR title {op} {p4} OR author {op} {p4} OR subject {op} {p4})"
        )
    }

    /// Filtered, sorted, paginated header listing.
    ///
    /// Parameters 1..=4 per [`FilterParams`], 5 limit, 6 offset.
    #[must_use]
    pub fn select_headers(self) -> String {
        format!(
            "SELECT id, title, author, subject FROM books WHERE {} \
             ORDER BY subject{c} ASC, title{c} ASC, seq ASC LIMIT {} OFFSET {}",
            self.header_filter_clause(),
            self.placeholder(5),
            self.placeholder(6),
            c = self.byte_order(),
        )
    }

    /// Subject aggregation; parameters 1 limit, 2 offset.
    #[must_use]
    pub fn select_subjects(self) -> String {
        format!(
            "SELECT subject, COUNT(*) FROM books GROUP BY subject \
             ORDER BY subject{} ASC LIMIT {} OFFSET {}",
            self.byte_order(),
            self.placeholder(1),
            self.placeholder(2),
        )
    }

    /// Admin password read; parameter 1 username.
    #[must_use]
    pub fn select_password(self) -> String {
        format!(
            "SELECT password FROM users WHERE username = {}",
            self.placeholder(1)
        )
    }

    /// Admin password upsert; parameters 1 username, 2 hash.
    #[must_use]
    pub fn upsert_password(self) -> String {
        format!(
            "INSERT INTO users (username, password) VALUES ({}, {}) \
             ON CONFLICT (username) DO UPDATE SET password = excluded.password",
            self.placeholder(1),
            self.placeholder(2),
        )
    }
}

/// Parameter values for [`Dialect::header_filter_clause`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParams {
    /// Parameter 1: true when the filter has no subject.
    pub no_subject: bool,
    /// Parameter 2: the exact subject (empty when unset).
    pub subject: String,
    /// Parameter 3: true when the filter has no terms.
    pub no_terms: bool,
    /// Parameter 4: alternation of the escaped terms.
    pub pattern: String,
}

impl FilterParams {
    /// Translates a filter into parameter values.
    #[must_use]
    pub fn from_filter(filter: &Filter) -> Self {
        Self {
            no_subject: filter.subject().is_none(),
            subject: filter.subject().unwrap_or_default().to_string(),
            no_terms: filter.terms().is_empty(),
            pattern: terms_pattern(filter.terms()),
        }
    }
}

/// Joins terms into one regular-expression alternation.
#[must_use]
pub fn terms_pattern(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|")
}
