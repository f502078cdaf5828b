//! `SQLite` backend.
//!
//! Stores books and the administrator credential in a single database file
//! (or in memory). Mutations run inside a transaction and commit only when
//! exactly one row was affected per book; otherwise they roll back.
//!
//! # Concurrency Model
//!
//! Uses a `Mutex<Connection>` because `rusqlite::Connection` is not `Sync`.
//! Callers wait for the lock at most until their deadline, and a running
//! statement is interrupted once the deadline passes.

mod connection;

pub use connection::{
    MUTEX_LOCK_TIMEOUT, acquire_lock_with_timeout, clear_deadline, configure_connection,
    install_deadline, sqlite_error,
};

use crate::models::{Book, BookId, Filter, Header, Subject};
use crate::storage::metrics::measured;
use crate::storage::sql::{Dialect, FilterParams};
use crate::storage::traits::clamp_page;
use crate::storage::{ADMIN_USERNAME, BookStorage, Deadline};
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::instrument;

const BACKEND: &str = "sqlite";
const DIALECT: Dialect = Dialect::Sqlite;

/// `SQLite`-backed catalog.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    /// Path to the database (None for in-memory).
    db_path: Option<PathBuf>,
}

impl SqliteBackend {
    /// Opens (or creates) a database file and ensures the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = Connection::open(&db_path).map_err(|e| sqlite_error("open_sqlite", &e))?;
        Self::initialize(conn, Some(db_path))
    }

    /// Creates an in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| sqlite_error("open_sqlite_in_memory", &e))?;
        Self::initialize(conn, None)
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub const fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    fn initialize(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        configure_connection(&conn)?;
        conn.execute_batch(&DIALECT.schema())
            .map_err(|e| sqlite_error("create_schema", &e))?;

        tracing::debug!(path = ?db_path, "Opened SQLite catalog");
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Runs `f` on the locked connection with the deadline enforced.
    fn with_connection<T>(
        &self,
        deadline: Deadline,
        operation: &str,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        deadline.check(operation)?;
        let mut conn = acquire_lock_with_timeout(&self.conn, deadline, operation)?;
        install_deadline(&conn, deadline, operation)?;
        let result = f(&mut conn);
        let cleared = clear_deadline(&conn, operation);
        let value = result?;
        cleared?;
        Ok(value)
    }

    /// Runs `f` inside a transaction, committing on success.
    fn in_transaction<T>(
        &self,
        deadline: Deadline,
        operation: &str,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        self.with_connection(deadline, operation, |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| sqlite_error(operation, &e))?;
            match f(&tx) {
                Ok(value) => {
                    tx.commit().map_err(|e| sqlite_error(operation, &e))?;
                    Ok(value)
                },
                Err(err) => {
                    // the rollback itself must not be interrupted
                    if let Err(clear) = clear_deadline(&tx, operation) {
                        return Err(err.with_rollback_failure(clear));
                    }
                    match tx.rollback() {
                        Ok(()) => Err(err),
                        Err(rollback) => Err(err.with_rollback_failure(rollback)),
                    }
                },
            }
        })
    }
}

/// Requires exactly one affected row.
fn expect_one(operation: &str, id: &BookId, affected: usize) -> Result<()> {
    match affected {
        1 => Ok(()),
        0 => Err(Error::NotFound(format!("book {id}"))),
        n => Err(Error::IntegrityViolation {
            operation: operation.to_string(),
            affected: u64::try_from(n).unwrap_or(u64::MAX),
        }),
    }
}

fn book_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        header: Header {
            id: BookId::new(row.get::<_, String>(0)?),
            title: row.get(1)?,
            author: row.get(2)?,
            subject: row.get(4)?,
        },
        description: row.get(3)?,
        dewey_dec_class: row.get(5)?,
        pages: row.get(6)?,
        publisher: row.get(7)?,
        publish_date: row.get(8)?,
        added_date: row.get(9)?,
        ean_isbn13: row.get(10)?,
        upc_isbn10: row.get(11)?,
        image_base64: row.get(12)?,
    })
}

fn header_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Header> {
    Ok(Header {
        id: BookId::new(row.get::<_, String>(0)?),
        title: row.get(1)?,
        author: row.get(2)?,
        subject: row.get(3)?,
    })
}

impl BookStorage for SqliteBackend {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(
        skip(self, books),
        fields(operation = "create_books", backend = "sqlite", count = books.len())
    )]
    fn create_books(&self, deadline: Deadline, books: &[Book]) -> Result<Vec<Book>> {
        measured(BACKEND, "create_books", || {
            if books.is_empty() {
                return Ok(Vec::new());
            }
            for book in books {
                book.validate()?;
            }
            let today = chrono::Utc::now().date_naive();
            let created: Vec<Book> = books
                .iter()
                .map(|book| book.prepared_for_create(today))
                .collect();

            let sql = DIALECT.insert_book();
            self.in_transaction(deadline, "create_books", |tx| {
                let mut stmt = tx
                    .prepare_cached(&sql)
                    .map_err(|e| sqlite_error("create_books", &e))?;
                for book in &created {
                    let affected = stmt
                        .execute(params![
                            book.header.id.as_str(),
                            book.header.title,
                            book.header.author,
                            book.description,
                            book.header.subject,
                            book.dewey_dec_class,
                            book.pages,
                            book.publisher,
                            book.publish_date,
                            book.added_date,
                            book.ean_isbn13,
                            book.upc_isbn10,
                            book.image_base64,
                        ])
                        .map_err(|e| sqlite_error("create_books", &e))?;
                    expect_one("create_books", book.id(), affected)?;
                }
                Ok(())
            })?;

            tracing::debug!(count = created.len(), "Created books");
            Ok(created)
        })
    }

    #[instrument(skip(self), fields(operation = "read_book_subjects", backend = "sqlite"))]
    fn read_book_subjects(
        &self,
        deadline: Deadline,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Subject>> {
        measured(BACKEND, "read_book_subjects", || {
            let Some((limit, offset)) = clamp_page(limit, offset) else {
                return Ok(Vec::new());
            };
            self.with_connection(deadline, "read_book_subjects", |conn| {
                let mut stmt = conn
                    .prepare_cached(&DIALECT.select_subjects())
                    .map_err(|e| sqlite_error("read_book_subjects", &e))?;
                let rows = stmt
                    .query_map(params![limit, offset], |row| {
                        let name: String = row.get(0)?;
                        let count: i64 = row.get(1)?;
                        Ok(Subject::new(name, u64::try_from(count).unwrap_or_default()))
                    })
                    .map_err(|e| sqlite_error("read_book_subjects", &e))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(|e| sqlite_error("read_book_subjects", &e))
            })
        })
    }

    #[instrument(skip(self), fields(operation = "read_book_headers", backend = "sqlite"))]
    fn read_book_headers(
        &self,
        deadline: Deadline,
        filter: &Filter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Header>> {
        measured(BACKEND, "read_book_headers", || {
            let Some((limit, offset)) = clamp_page(limit, offset) else {
                return Ok(Vec::new());
            };
            let p = FilterParams::from_filter(filter);
            self.with_connection(deadline, "read_book_headers", |conn| {
                let mut stmt = conn
                    .prepare_cached(&DIALECT.select_headers())
                    .map_err(|e| sqlite_error("read_book_headers", &e))?;
                let rows = stmt
                    .query_map(
                        params![p.no_subject, p.subject, p.no_terms, p.pattern, limit, offset],
                        header_from_row,
                    )
                    .map_err(|e| sqlite_error("read_book_headers", &e))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(|e| sqlite_error("read_book_headers", &e))
            })
        })
    }

    #[instrument(skip(self), fields(operation = "read_book", backend = "sqlite", book.id = %id))]
    fn read_book(&self, deadline: Deadline, id: &BookId) -> Result<Book> {
        measured(BACKEND, "read_book", || {
            self.with_connection(deadline, "read_book", |conn| {
                conn.query_row(&DIALECT.select_book(), params![id.as_str()], book_from_row)
                    .optional()
                    .map_err(|e| sqlite_error("read_book", &e))?
                    .ok_or_else(|| Error::NotFound(format!("book {id}")))
            })
        })
    }

    #[instrument(
        skip(self, book),
        fields(operation = "update_book", backend = "sqlite", book.id = %book.id())
    )]
    fn update_book(&self, deadline: Deadline, book: &Book, update_image: bool) -> Result<()> {
        measured(BACKEND, "update_book", || {
            book.validate()?;
            let sql = DIALECT.update_book();
            self.in_transaction(deadline, "update_book", |tx| {
                let affected = tx
                    .execute(
                        &sql,
                        params![
                            book.header.id.as_str(),
                            book.header.title,
                            book.header.author,
                            book.description,
                            book.header.subject,
                            book.dewey_dec_class,
                            book.pages,
                            book.publisher,
                            book.publish_date,
                            book.added_date,
                            book.ean_isbn13,
                            book.upc_isbn10,
                            update_image,
                            book.image_base64,
                        ],
                    )
                    .map_err(|e| sqlite_error("update_book", &e))?;
                expect_one("update_book", book.id(), affected)
            })
        })
    }

    #[instrument(skip(self), fields(operation = "delete_book", backend = "sqlite", book.id = %id))]
    fn delete_book(&self, deadline: Deadline, id: &BookId) -> Result<()> {
        measured(BACKEND, "delete_book", || {
            self.in_transaction(deadline, "delete_book", |tx| {
                let affected = tx
                    .execute(&DIALECT.delete_book(), params![id.as_str()])
                    .map_err(|e| sqlite_error("delete_book", &e))?;
                expect_one("delete_book", id, affected)
            })
        })
    }

    #[instrument(skip(self), fields(operation = "read_admin_password", backend = "sqlite"))]
    fn read_admin_password(&self, deadline: Deadline) -> Result<Vec<u8>> {
        measured(BACKEND, "read_admin_password", || {
            self.with_connection(deadline, "read_admin_password", |conn| {
                let hash: Option<Option<Vec<u8>>> = conn
                    .query_row(&DIALECT.select_password(), params![ADMIN_USERNAME], |row| {
                        row.get(0)
                    })
                    .optional()
                    .map_err(|e| sqlite_error("read_admin_password", &e))?;
                hash.flatten()
                    .ok_or_else(|| Error::NotFound("admin password".to_string()))
            })
        })
    }

    #[instrument(skip(self, hash), fields(operation = "update_admin_password", backend = "sqlite"))]
    fn update_admin_password(&self, deadline: Deadline, hash: &[u8]) -> Result<()> {
        measured(BACKEND, "update_admin_password", || {
            self.in_transaction(deadline, "update_admin_password", |tx| {
                tx.execute(&DIALECT.upsert_password(), params![ADMIN_USERNAME, hash])
                    .map_err(|e| sqlite_error("update_admin_password", &e))?;
                Ok(())
            })
        })
    }
}
