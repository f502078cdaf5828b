//! PostgreSQL backend.
//!
//! Runs the shared relational statements against a pooled PostgreSQL
//! connection. The trait is synchronous, so every call is driven to
//! completion on a small runtime owned by the backend.

#[cfg(feature = "postgres")]
mod implementation {
    use crate::models::{Book, BookId, Filter, Header, Subject};
    use crate::storage::metrics::measured;
    use crate::storage::sql::{Dialect, FilterParams};
    use crate::storage::traits::clamp_page;
    use crate::storage::{ADMIN_USERNAME, BookStorage, Deadline};
    use crate::{Error, Result};
    use deadpool_postgres::{Config, Object, Pool, Runtime, Transaction};
    use std::time::Duration;
    use tokio_postgres::NoTls;
    use tracing::instrument;

    const BACKEND: &str = "postgres";
    const DIALECT: Dialect = Dialect::Postgres;

    /// Worker threads of the backend's private runtime.
    const RUNTIME_WORKERS: usize = 2;

    /// Advisory lock key serializing schema creation across processes.
    const SCHEMA_LOCK_KEY: i64 = 0x626f_6f6b;

    /// PostgreSQL-backed catalog.
    pub struct PostgresBackend {
        /// Connection pool.
        pool: Pool,
        /// Drives the pool's connections between calls.
        runtime: tokio::runtime::Runtime,
    }

    /// Helper to map pool errors.
    fn pool_error(e: impl std::fmt::Display) -> Error {
        Error::operation("postgres_get_client", e)
    }

    /// Helper to map query errors.
    fn query_error(op: &str, e: impl std::fmt::Display) -> Error {
        Error::operation(op, e)
    }

    /// Requires exactly one affected row.
    fn expect_one(operation: &str, id: &BookId, affected: u64) -> Result<()> {
        match affected {
            1 => Ok(()),
            0 => Err(Error::NotFound(format!("book {id}"))),
            n => Err(Error::IntegrityViolation {
                operation: operation.to_string(),
                affected: n,
            }),
        }
    }

    fn pages_param(book: &Book) -> Result<i32> {
        i32::try_from(book.pages).map_err(|_| {
            Error::InvalidInput(format!("page count {} is out of range", book.pages))
        })
    }

    fn book_from_row(row: &tokio_postgres::Row) -> Result<Book> {
        let map = |e: tokio_postgres::Error| query_error("postgres_decode_book", e);
        let pages: i32 = row.try_get(6).map_err(map)?;
        Ok(Book {
            header: Header {
                id: BookId::new(row.try_get::<_, String>(0).map_err(map)?),
                title: row.try_get(1).map_err(map)?,
                author: row.try_get(2).map_err(map)?,
                subject: row.try_get(4).map_err(map)?,
            },
            description: row.try_get(3).map_err(map)?,
            dewey_dec_class: row.try_get(5).map_err(map)?,
            pages: u32::try_from(pages)
                .map_err(|e| query_error("postgres_decode_book", e))?,
            publisher: row.try_get(7).map_err(map)?,
            publish_date: row.try_get(8).map_err(map)?,
            added_date: row.try_get(9).map_err(map)?,
            ean_isbn13: row.try_get(10).map_err(map)?,
            upc_isbn10: row.try_get(11).map_err(map)?,
            image_base64: row.try_get(12).map_err(map)?,
        })
    }

    fn header_from_row(row: &tokio_postgres::Row) -> Result<Header> {
        let map = |e: tokio_postgres::Error| query_error("postgres_decode_header", e);
        Ok(Header {
            id: BookId::new(row.try_get::<_, String>(0).map_err(map)?),
            title: row.try_get(1).map_err(map)?,
            author: row.try_get(2).map_err(map)?,
            subject: row.try_get(3).map_err(map)?,
        })
    }

    /// Commits on success, otherwise rolls back and chains any rollback failure.
    async fn finish<T>(tx: Transaction<'_>, operation: &str, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                tx.commit().await.map_err(|e| query_error(operation, e))?;
                Ok(value)
            },
            Err(err) => match tx.rollback().await {
                Ok(()) => Err(err),
                Err(rollback) => Err(err.with_rollback_failure(rollback)),
            },
        }
    }

    impl PostgresBackend {
        /// Default maximum connections in pool.
        const DEFAULT_POOL_MAX_SIZE: usize = 16;

        /// Connects and ensures the schema.
        ///
        /// # Errors
        ///
        /// Returns an error if the URL is invalid, the pool fails to
        /// initialize or the schema cannot be created.
        pub fn new(connection_url: &str) -> Result<Self> {
            Self::with_pool_size(connection_url, None)
        }

        /// Connects with a configurable pool size.
        ///
        /// # Errors
        ///
        /// Returns an error if the URL is invalid, the pool fails to
        /// initialize or the schema cannot be created.
        pub fn with_pool_size(connection_url: &str, pool_max_size: Option<usize>) -> Result<Self> {
            let config = Self::parse_connection_url(connection_url)?;
            let cfg = Self::build_pool_config(&config, pool_max_size);

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(RUNTIME_WORKERS)
                .thread_name("bookcase-postgres")
                .enable_all()
                .build()
                .map_err(|e| Error::operation("postgres_create_runtime", e))?;

            // the pool spawns connection tasks, so it must be built inside the runtime
            let pool = runtime.block_on(async {
                cfg.create_pool(Some(Runtime::Tokio1), NoTls)
                    .map_err(|e| Error::operation("postgres_create_pool", e))
            })?;

            let backend = Self { pool, runtime };
            backend.create_schema()?;
            tracing::debug!("Opened PostgreSQL catalog");
            Ok(backend)
        }

        /// Parses the connection URL into a tokio-postgres config.
        fn parse_connection_url(url: &str) -> Result<tokio_postgres::Config> {
            url.parse::<tokio_postgres::Config>()
                .map_err(|e| Error::InvalidInput(format!("postgres url: {e}")))
        }

        /// Extracts host string from tokio-postgres Host.
        #[cfg(unix)]
        fn host_to_string(h: &tokio_postgres::config::Host) -> String {
            match h {
                tokio_postgres::config::Host::Tcp(s) => s.clone(),
                tokio_postgres::config::Host::Unix(p) => p.to_string_lossy().to_string(),
            }
        }

        /// Extracts host string from tokio-postgres Host (Windows: Tcp only).
        #[cfg(not(unix))]
        fn host_to_string(h: &tokio_postgres::config::Host) -> String {
            let tokio_postgres::config::Host::Tcp(s) = h;
            s.clone()
        }

        /// Builds a deadpool config from tokio-postgres config.
        fn build_pool_config(
            config: &tokio_postgres::Config,
            pool_max_size: Option<usize>,
        ) -> Config {
            let mut cfg = Config::new();
            cfg.host = config.get_hosts().first().map(Self::host_to_string);
            cfg.port = config.get_ports().first().copied();
            cfg.user = config.get_user().map(String::from);
            cfg.password = config
                .get_password()
                .map(|p| String::from_utf8_lossy(p).to_string());
            cfg.dbname = config.get_dbname().map(String::from);

            let max_size = pool_max_size.unwrap_or(Self::DEFAULT_POOL_MAX_SIZE);
            cfg.pool = Some(deadpool_postgres::PoolConfig {
                max_size,
                timeouts: deadpool_postgres::Timeouts {
                    wait: Some(Duration::from_secs(5)),
                    create: Some(Duration::from_secs(5)),
                    recycle: Some(Duration::from_secs(5)),
                },
                ..Default::default()
            });

            cfg.manager = Some(deadpool_postgres::ManagerConfig {
                recycling_method: deadpool_postgres::RecyclingMethod::Fast,
            });

            cfg
        }

        fn create_schema(&self) -> Result<()> {
            // Concurrent CREATE ... IF NOT EXISTS can still collide in the catalog.
            let batch = format!(
                "BEGIN; SELECT pg_advisory_xact_lock({SCHEMA_LOCK_KEY}); {} COMMIT;",
                DIALECT.schema()
            );
            self.run(Deadline::none(), "create_schema", async |client: &mut Object| {
                client
                    .batch_execute(&batch)
                    .await
                    .map_err(|e| query_error("create_schema", e))
            })
        }

        /// Checks out a client and runs `f` on it, bounded by the deadline.
        ///
        /// When the deadline passes the in-flight query is cancelled on the
        /// server and [`Error::Timeout`] is returned. The client stays checked
        /// out until the cancel request completes and is then detached from
        /// the pool, so no other caller can pick up the interrupted
        /// connection. Must not be called from inside an async context.
        fn run<T, F>(&self, deadline: Deadline, operation: &str, f: F) -> Result<T>
        where
            F: AsyncFnOnce(&mut Object) -> Result<T>,
        {
            self.runtime.block_on(async {
                deadline.check(operation)?;

                let mut client = match deadline.remaining() {
                    Some(remaining) => tokio::time::timeout(remaining, self.pool.get())
                        .await
                        .map_err(|_| Error::timeout(operation))?,
                    None => self.pool.get().await,
                }
                .map_err(pool_error)?;

                let Some(remaining) = deadline.remaining() else {
                    return f(&mut client).await;
                };
                let cancel = client.cancel_token();
                let outcome = tokio::time::timeout(remaining, f(&mut client)).await;
                match outcome {
                    Ok(result) => result,
                    Err(_) => {
                        if let Err(e) = cancel.cancel_query(NoTls).await {
                            tracing::warn!(error = %e, operation, "Failed to cancel PostgreSQL query");
                        }
                        drop(Object::take(client));
                        Err(Error::timeout(operation))
                    },
                }
            })
        }
    }

    impl BookStorage for PostgresBackend {
        fn backend_name(&self) -> &'static str {
            BACKEND
        }

        #[instrument(
            skip(self, books),
            fields(operation = "create_books", backend = "postgres", count = books.len())
        )]
        fn create_books(&self, deadline: Deadline, books: &[Book]) -> Result<Vec<Book>> {
            measured(BACKEND, "create_books", || {
                if books.is_empty() {
                    return Ok(Vec::new());
                }
                for book in books {
                    book.validate()?;
                    pages_param(book)?;
                }
                let today = chrono::Utc::now().date_naive();
                let created: Vec<Book> = books
                    .iter()
                    .map(|book| book.prepared_for_create(today))
                    .collect();

                let sql = DIALECT.insert_book();
                self.run(deadline, "create_books", async |client: &mut Object| {
                    let tx = client
                        .transaction()
                        .await
                        .map_err(|e| query_error("create_books", e))?;
                    let result = async {
                        let stmt = tx
                            .prepare_cached(&sql)
                            .await
                            .map_err(|e| query_error("create_books", e))?;
                        for book in &created {
                            let pages = pages_param(book)?;
                            let affected = tx
                                .execute(
                                    &stmt,
                                    &[
                                        &book.header.id.as_str(),
                                        &book.header.title,
                                        &book.header.author,
                                        &book.description,
                                        &book.header.subject,
                                        &book.dewey_dec_class,
                                        &pages,
                                        &book.publisher,
                                        &book.publish_date,
                                        &book.added_date,
                                        &book.ean_isbn13,
                                        &book.upc_isbn10,
                                        &book.image_base64,
                                    ],
                                )
                                .await
                                .map_err(|e| query_error("create_books", e))?;
                            expect_one("create_books", book.id(), affected)?;
                        }
                        Ok::<(), Error>(())
                    }
                    .await;
                    finish(tx, "create_books", result).await
                })?;

                tracing::debug!(count = created.len(), "Created books");
                Ok(created)
            })
        }

        #[instrument(skip(self), fields(operation = "read_book_subjects", backend = "postgres"))]
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
                self.run(deadline, "read_book_subjects", async |client: &mut Object| {
                    let rows = client
                        .query(&DIALECT.select_subjects(), &[&limit, &offset])
                        .await
                        .map_err(|e| query_error("read_book_subjects", e))?;
                    rows.iter()
                        .map(|row| {
                            let name: String = row
                                .try_get(0)
                                .map_err(|e| query_error("read_book_subjects", e))?;
                            let count: i64 = row
                                .try_get(1)
                                .map_err(|e| query_error("read_book_subjects", e))?;
                            Ok(Subject::new(name, u64::try_from(count).unwrap_or_default()))
                        })
                        .collect()
                })
            })
        }

        #[instrument(skip(self), fields(operation = "read_book_headers", backend = "postgres"))]
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
                self.run(deadline, "read_book_headers", async |client: &mut Object| {
                    let rows = client
                        .query(
                            &DIALECT.select_headers(),
                            &[
                                &p.no_subject,
                                &p.subject,
                                &p.no_terms,
                                &p.pattern,
                                &limit,
                                &offset,
                            ],
                        )
                        .await
                        .map_err(|e| query_error("read_book_headers", e))?;
                    rows.iter().map(header_from_row).collect()
                })
            })
        }

        #[instrument(skip(self), fields(operation = "read_book", backend = "postgres", book.id = %id))]
        fn read_book(&self, deadline: Deadline, id: &BookId) -> Result<Book> {
            measured(BACKEND, "read_book", || {
                self.run(deadline, "read_book", async |client: &mut Object| {
                    let row = client
                        .query_opt(&DIALECT.select_book(), &[&id.as_str()])
                        .await
                        .map_err(|e| query_error("read_book", e))?
                        .ok_or_else(|| Error::NotFound(format!("book {id}")))?;
                    book_from_row(&row)
                })
            })
        }

        #[instrument(
            skip(self, book),
            fields(operation = "update_book", backend = "postgres", book.id = %book.id())
        )]
        fn update_book(&self, deadline: Deadline, book: &Book, update_image: bool) -> Result<()> {
            measured(BACKEND, "update_book", || {
                book.validate()?;
                let pages = pages_param(book)?;
                self.run(deadline, "update_book", async |client: &mut Object| {
                    let tx = client
                        .transaction()
                        .await
                        .map_err(|e| query_error("update_book", e))?;
                    let result = async {
                        let affected = tx
                            .execute(
                                &DIALECT.update_book(),
                                &[
                                    &book.header.id.as_str(),
                                    &book.header.title,
                                    &book.header.author,
                                    &book.description,
                                    &book.header.subject,
                                    &book.dewey_dec_class,
                                    &pages,
                                    &book.publisher,
                                    &book.publish_date,
                                    &book.added_date,
                                    &book.ean_isbn13,
                                    &book.upc_isbn10,
                                    &update_image,
                                    &book.image_base64,
                                ],
                            )
                            .await
                            .map_err(|e| query_error("update_book", e))?;
                        expect_one("update_book", book.id(), affected)
                    }
                    .await;
                    finish(tx, "update_book", result).await
                })
            })
        }

        #[instrument(skip(self), fields(operation = "delete_book", backend = "postgres", book.id = %id))]
        fn delete_book(&self, deadline: Deadline, id: &BookId) -> Result<()> {
            measured(BACKEND, "delete_book", || {
                self.run(deadline, "delete_book", async |client: &mut Object| {
                    let tx = client
                        .transaction()
                        .await
                        .map_err(|e| query_error("delete_book", e))?;
                    let result = async {
                        let affected = tx
                            .execute(&DIALECT.delete_book(), &[&id.as_str()])
                            .await
                            .map_err(|e| query_error("delete_book", e))?;
                        expect_one("delete_book", id, affected)
                    }
                    .await;
                    finish(tx, "delete_book", result).await
                })
            })
        }

        #[instrument(skip(self), fields(operation = "read_admin_password", backend = "postgres"))]
        fn read_admin_password(&self, deadline: Deadline) -> Result<Vec<u8>> {
            measured(BACKEND, "read_admin_password", || {
                self.run(deadline, "read_admin_password", async |client: &mut Object| {
                    let row = client
                        .query_opt(&DIALECT.select_password(), &[&ADMIN_USERNAME])
                        .await
                        .map_err(|e| query_error("read_admin_password", e))?;
                    let hash: Option<Vec<u8>> = match row {
                        Some(row) => row
                            .try_get(0)
                            .map_err(|e| query_error("read_admin_password", e))?,
                        None => None,
                    };
                    hash.ok_or_else(|| Error::NotFound("admin password".to_string()))
                })
            })
        }

        #[instrument(
            skip(self, hash),
            fields(operation = "update_admin_password", backend = "postgres")
        )]
        fn update_admin_password(&self, deadline: Deadline, hash: &[u8]) -> Result<()> {
            measured(BACKEND, "update_admin_password", || {
                self.run(deadline, "update_admin_password", async |client: &mut Object| {
                    let tx = client
                        .transaction()
                        .await
                        .map_err(|e| query_error("update_admin_password", e))?;
                    // an upsert: zero affected rows is not an error here
                    let result = tx
                        .execute(&DIALECT.upsert_password(), &[&ADMIN_USERNAME, &hash])
                        .await
                        .map(|_| ())
                        .map_err(|e| query_error("update_admin_password", e));
                    finish(tx, "update_admin_password", result).await
                })
            })
        }
    }
}

#[cfg(feature = "postgres")]
pub use implementation::PostgresBackend;

#[cfg(not(feature = "postgres"))]
mod stub {
    use crate::models::{Book, BookId, Filter, Header, Subject};
    use crate::storage::{BookStorage, Deadline};
    use crate::{Error, Result};

    fn disabled() -> Error {
        Error::FeatureNotEnabled("postgres".to_string())
    }

    /// Stub PostgreSQL backend when feature is not enabled.
    pub struct PostgresBackend {
        _private: (),
    }

    impl PostgresBackend {
        /// Always fails: the `postgres` feature is disabled.
        ///
        /// # Errors
        ///
        /// Always returns [`Error::FeatureNotEnabled`].
        pub fn new(_connection_url: &str) -> Result<Self> {
            Err(disabled())
        }

        /// Always fails: the `postgres` feature is disabled.
        ///
        /// # Errors
        ///
        /// Always returns [`Error::FeatureNotEnabled`].
        pub fn with_pool_size(_connection_url: &str, _pool_max_size: Option<usize>) -> Result<Self> {
            Err(disabled())
        }
    }

    impl BookStorage for PostgresBackend {
        fn backend_name(&self) -> &'static str {
            "postgres"
        }

        fn create_books(&self, _deadline: Deadline, _books: &[Book]) -> Result<Vec<Book>> {
            Err(disabled())
        }

        fn read_book_subjects(
            &self,
            _deadline: Deadline,
            _limit: i64,
            _offset: i64,
        ) -> Result<Vec<Subject>> {
            Err(disabled())
        }

        fn read_book_headers(
            &self,
            _deadline: Deadline,
            _filter: &Filter,
            _limit: i64,
            _offset: i64,
        ) -> Result<Vec<Header>> {
            Err(disabled())
        }

        fn read_book(&self, _deadline: Deadline, _id: &BookId) -> Result<Book> {
            Err(disabled())
        }

        fn update_book(&self, _deadline: Deadline, _book: &Book, _update_image: bool) -> Result<()> {
            Err(disabled())
        }

        fn delete_book(&self, _deadline: Deadline, _id: &BookId) -> Result<()> {
            Err(disabled())
        }

        fn read_admin_password(&self, _deadline: Deadline) -> Result<Vec<u8>> {
            Err(disabled())
        }

        fn update_admin_password(&self, _deadline: Deadline, _hash: &[u8]) -> Result<()> {
            Err(disabled())
        }
    }
}

#[cfg(not(feature = "postgres"))]
pub use stub::PostgresBackend;

#[cfg(all(test, not(feature = "postgres")))]
mod stub_tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_stub_reports_disabled_feature() {
        let result = PostgresBackend::new("postgres://localhost/bookcase");
        assert!(matches!(result, Err(Error::FeatureNotEnabled(ref f)) if f == "postgres"));
    }
}
