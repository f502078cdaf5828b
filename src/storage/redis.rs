//! Redis backend using `RediSearch`.
//!
//! Books are hashes under `book:{id}`; the administrator credential is the
//! hash `user:admin`. A `RediSearch` index over the book hashes serves
//! filtered listings and the subject aggregation.
//!
//! Each book also carries a `seq` number drawn from a counter at creation,
//! used as the last sort key so equal subject/title pairs keep insertion
//! order.
//!
//! Term search runs against lower-cased copies of title, author and subject
//! stored as single-valued tags with a suffix trie, so a term matches any
//! substring of the whole value. Word tokenization would lose stopwords and
//! words split by punctuation.

#[cfg(feature = "redis")]
mod implementation {
    use super::{TAG_SEPARATOR, build_query, parse_aggregate_rows, value_to_string};
    use crate::models::{Book, BookId, DEFAULT_DATE_LAYOUT, Filter, Header, StringBook, Subject};
    use crate::storage::metrics::measured;
    use crate::storage::traits::clamp_page;
    use crate::storage::{ADMIN_USERNAME, BookStorage, Deadline};
    use crate::{Error, Result};
    use redis::{Client, Connection};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing::instrument;

    const BACKEND: &str = "redis";

    /// Default index name.
    const INDEX_NAME: &str = "idx:books";

    /// Key prefix of book hashes.
    const BOOK_PREFIX: &str = "book:";

    /// Counter handing out insertion sequence numbers.
    const SEQ_KEY: &str = "books:seq";

    /// Response timeout when the caller gave no deadline.
    const REDIS_TIMEOUT: Duration = Duration::from_secs(5);

    /// Socket timeouts must be non-zero.
    const MIN_TIMEOUT: Duration = Duration::from_millis(1);

    /// Shortest term the search module must accept in a wildcard query.
    const REQUIRED_MIN_PREFIX: i64 = 1;

    /// Distinct tag values a single wildcard may expand to. A term matching
    /// more values than the server allows would silently lose results.
    const REQUIRED_MAX_EXPANSIONS: i64 = 1_000_000;

    /// Writes the given fields only if the hash already exists.
    ///
    /// Returns the number of hashes written (0 or 1).
    const UPDATE_IF_EXISTS: &str = r"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return 0
        end
        redis.call('HSET', KEYS[1], unpack(ARGV))
        return 1
    ";

    /// Redis-backed catalog.
    ///
    /// Maintains a reusable connection via `Mutex<Option<Connection>>`. A
    /// connection that failed or timed out is dropped rather than returned.
    pub struct RedisBackend {
        client: Client,
        connection: Mutex<Option<Connection>>,
        index_name: String,
        update_script: redis::Script,
    }

    fn redis_error(operation: &str, err: &redis::RedisError) -> Error {
        if err.is_timeout() {
            return Error::timeout(operation);
        }
        Error::operation(operation, err)
    }

    fn book_key(id: &BookId) -> String {
        format!("{BOOK_PREFIX}{id}")
    }

    fn user_key(username: &str) -> String {
        format!("user:{username}")
    }

    /// Hash fields of a book, excluding `seq`. The image is included only
    /// when `with_image` is set.
    fn book_fields(book: &Book, with_image: bool) -> Vec<(&'static str, String)> {
        let sb = StringBook::from_book(book, DEFAULT_DATE_LAYOUT);
        let mut fields = vec![
            ("id", sb.id),
            ("title", sb.title.clone()),
            ("author", sb.author.clone()),
            ("description", sb.description),
            ("title_lc", sb.title.to_lowercase()),
            ("author_lc", sb.author.to_lowercase()),
            ("subject_lc", sb.subject.to_lowercase()),
            ("subject", sb.subject),
            ("dewey_dec_class", sb.dewey_dec_class),
            ("pages", sb.pages),
            ("publisher", sb.publisher),
            ("publish_date", sb.publish_date),
            ("added_date", sb.added_date),
            ("ean_isbn13", sb.ean_isbn13),
            ("upc_isbn10", sb.upc_isbn10),
        ];
        if with_image {
            fields.push(("image_base64", sb.image_base64));
        }
        fields
    }

    fn book_from_fields(mut fields: HashMap<String, String>) -> Result<Book> {
        let mut take = |key: &str| fields.remove(key).unwrap_or_default();
        StringBook {
            id: take("id"),
            title: take("title"),
            author: take("author"),
            description: take("description"),
            subject: take("subject"),
            dewey_dec_class: take("dewey_dec_class"),
            pages: take("pages"),
            publisher: take("publisher"),
            publish_date: take("publish_date"),
            added_date: take("added_date"),
            ean_isbn13: take("ean_isbn13"),
            upc_isbn10: take("upc_isbn10"),
            image_base64: take("image_base64"),
        }
        .to_book(DEFAULT_DATE_LAYOUT)
    }

    impl RedisBackend {
        /// Connects and ensures the search index exists.
        ///
        /// # Errors
        ///
        /// Returns an error if the URL is invalid or the server is
        /// unreachable or lacks the search module.
        pub fn new(connection_url: &str) -> Result<Self> {
            Self::with_index(connection_url, INDEX_NAME)
        }

        /// Connects using a custom index name.
        ///
        /// # Errors
        ///
        /// Returns an error if the URL is invalid or the server is
        /// unreachable or lacks the search module.
        pub fn with_index(connection_url: &str, index_name: impl Into<String>) -> Result<Self> {
            let client = Client::open(connection_url)
                .map_err(|e| Error::InvalidInput(format!("redis url: {e}")))?;

            let backend = Self {
                client,
                connection: Mutex::new(None),
                index_name: index_name.into(),
                update_script: redis::Script::new(UPDATE_IF_EXISTS),
            };
            backend.ensure_search_limits()?;
            backend.ensure_index()?;
            tracing::debug!(index = %backend.index_name, "Opened Redis catalog");
            Ok(backend)
        }

        /// Gets a connection, reusing the cached one if available, with
        /// socket timeouts set to what is left of the deadline.
        fn get_connection(&self, deadline: Deadline, operation: &str) -> Result<Connection> {
            deadline.check(operation)?;
            let timeout = deadline.remaining_or(REDIS_TIMEOUT).max(MIN_TIMEOUT);

            let cached = self
                .connection
                .lock()
                .map_err(|e| Error::operation("redis_lock_connection", e))?
                .take();

            let conn = match cached {
                Some(conn) => conn,
                None => self
                    .client
                    .get_connection_with_timeout(timeout)
                    .map_err(|e| redis_error(operation, &e))?,
            };

            conn.set_read_timeout(Some(timeout))
                .map_err(|e| redis_error("redis_set_read_timeout", &e))?;
            conn.set_write_timeout(Some(timeout))
                .map_err(|e| redis_error("redis_set_write_timeout", &e))?;
            Ok(conn)
        }

        /// Returns a connection to the cache for reuse.
        fn return_connection(&self, conn: Connection) {
            if let Ok(mut guard) = self.connection.lock() {
                *guard = Some(conn);
            }
        }

        /// Runs `f` on a connection; the connection is only cached again on
        /// success.
        fn run<T>(
            &self,
            deadline: Deadline,
            operation: &str,
            f: impl FnOnce(&mut Connection) -> redis::RedisResult<T>,
        ) -> Result<T> {
            let mut conn = self.get_connection(deadline, operation)?;
            match f(&mut conn) {
                Ok(value) => {
                    self.return_connection(conn);
                    Ok(value)
                },
                Err(e) => {
                    tracing::debug!(error = %e, operation, "Discarding Redis connection");
                    Err(redis_error(operation, &e))
                },
            }
        }

        /// Ensures the `RediSearch` index exists.
        fn ensure_index(&self) -> Result<()> {
            let exists = self.run(Deadline::none(), "redis_list_indexes", |conn| {
                let indices: Vec<String> = redis::cmd("FT._LIST").query(conn)?;
                Ok(indices.iter().any(|i| i == &self.index_name))
            })?;
            if exists {
                return Ok(());
            }

            let result = self.run(Deadline::none(), "redis_create_index", |conn| {
                let mut cmd = redis::cmd("FT.CREATE");
                cmd.arg(&self.index_name)
                    .arg("ON")
                    .arg("HASH")
                    .arg("PREFIX")
                    .arg(1)
                    .arg(BOOK_PREFIX)
                    .arg("STOPWORDS")
                    .arg(0)
                    .arg("SCHEMA")
                    .arg("title")
                    .arg("TEXT")
                    .arg("NOSTEM")
                    .arg("SORTABLE")
                    .arg("UNF")
                    .arg("subject")
                    .arg("TAG")
                    .arg("SEPARATOR")
                    .arg(TAG_SEPARATOR)
                    .arg("CASESENSITIVE")
                    .arg("SORTABLE")
                    .arg("UNF");
                for field in ["title_lc", "author_lc", "subject_lc"] {
                    cmd.arg(field)
                        .arg("TAG")
                        .arg("SEPARATOR")
                        .arg(TAG_SEPARATOR)
                        .arg("WITHSUFFIXTRIE");
                }
                cmd.arg("seq")
                    .arg("NUMERIC")
                    .arg("SORTABLE")
                    .query::<()>(conn)
            });

            match result {
                Ok(()) => Ok(()),
                Err(e) if e.to_string().contains("Index already exists") => Ok(()),
                Err(e) => Err(e),
            }
        }

        /// Makes sure the search module honours one-character terms and
        /// lets a wildcard expand to every matching value.
        fn ensure_search_limits(&self) -> Result<()> {
            self.ensure_search_option(
                "MINPREFIX",
                |current| current <= REQUIRED_MIN_PREFIX,
                REQUIRED_MIN_PREFIX,
            )?;
            self.ensure_search_option(
                "MAXEXPANSIONS",
                |current| current >= REQUIRED_MAX_EXPANSIONS,
                REQUIRED_MAX_EXPANSIONS,
            )
        }

        fn ensure_search_option(
            &self,
            option: &str,
            sufficient: impl Fn(i64) -> bool,
            required: i64,
        ) -> Result<()> {
            let reply: redis::Value = self.run(Deadline::none(), "redis_get_search_config", |conn| {
                redis::cmd("FT.CONFIG").arg("GET").arg(option).query(conn)
            })?;
            if parse_config_value(&reply).is_some_and(sufficient) {
                return Ok(());
            }

            tracing::debug!(option, required, "Raising search module limit");
            self.run(Deadline::none(), "redis_set_search_config", |conn| {
                redis::cmd("FT.CONFIG")
                    .arg("SET")
                    .arg(option)
                    .arg(required)
                    .query::<()>(conn)
            })
            .map_err(|e| Error::operation(format!("redis_set_search_config {option}"), e))
        }
    }

    /// Reads the number out of an `FT.CONFIG GET` reply (`[[name, value]]`).
    fn parse_config_value(reply: &redis::Value) -> Option<i64> {
        let redis::Value::Array(entries) = reply else {
            return None;
        };
        let redis::Value::Array(pair) = entries.first()? else {
            return None;
        };
        value_to_string(pair.get(1)?)?.parse().ok()
    }

    impl BookStorage for RedisBackend {
        fn backend_name(&self) -> &'static str {
            BACKEND
        }

        #[instrument(
            skip(self, books),
            fields(operation = "create_books", backend = "redis", count = books.len())
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
                let count = i64::try_from(created.len()).unwrap_or(i64::MAX);

                self.run(deadline, "create_books", |conn| {
                    let last_seq: i64 = redis::cmd("INCRBY").arg(SEQ_KEY).arg(count).query(conn)?;
                    let first_seq = last_seq - count + 1;

                    let mut pipe = redis::pipe();
                    pipe.atomic();
                    for (seq, book) in (first_seq..).zip(&created) {
                        pipe.cmd("HSET").arg(book_key(book.id()));
                        for (field, value) in book_fields(book, true) {
                            pipe.arg(field).arg(value);
                        }
                        pipe.arg("seq").arg(seq).ignore();
                    }
                    pipe.query::<()>(conn)
                })?;

                tracing::debug!(count = created.len(), "Created books");
                Ok(created)
            })
        }

        #[instrument(skip(self), fields(operation = "read_book_subjects", backend = "redis"))]
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
                if limit == 0 {
                    return Ok(Vec::new());
                }
                let reply: redis::Value = self.run(deadline, "read_book_subjects", |conn| {
                    redis::cmd("FT.AGGREGATE")
                        .arg(&self.index_name)
                        .arg("*")
                        .arg("GROUPBY")
                        .arg(1)
                        .arg("@subject")
                        .arg("REDUCE")
                        .arg("COUNT")
                        .arg(0)
                        .arg("AS")
                        .arg("count")
                        .arg("SORTBY")
                        .arg(2)
                        .arg("@subject")
                        .arg("ASC")
                        .arg("LIMIT")
                        .arg(offset)
                        .arg(limit)
                        .query(conn)
                })?;

                Ok(parse_aggregate_rows(&reply)
                    .into_iter()
                    .map(|mut row| {
                        let name = row.remove("subject").unwrap_or_default();
                        let count = row
                            .get("count")
                            .and_then(|c| c.parse().ok())
                            .unwrap_or_default();
                        Subject::new(name, count)
                    })
                    .collect())
            })
        }

        #[instrument(skip(self), fields(operation = "read_book_headers", backend = "redis"))]
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
                if limit == 0 {
                    return Ok(Vec::new());
                }
                let query = build_query(filter);
                let reply: redis::Value = self.run(deadline, "read_book_headers", |conn| {
                    redis::cmd("FT.AGGREGATE")
                        .arg(&self.index_name)
                        .arg(&query)
                        .arg("LOAD")
                        .arg(4)
                        .arg("@id")
                        .arg("@title")
                        .arg("@author")
                        .arg("@subject")
                        .arg("SORTBY")
                        .arg(6)
                        .arg("@subject")
                        .arg("ASC")
                        .arg("@title")
                        .arg("ASC")
                        .arg("@seq")
                        .arg("ASC")
                        .arg("LIMIT")
                        .arg(offset)
                        .arg(limit)
                        .arg("DIALECT")
                        .arg(2)
                        .query(conn)
                })?;

                Ok(parse_aggregate_rows(&reply)
                    .into_iter()
                    .map(|mut row| {
                        let mut take = |key: &str| row.remove(key).unwrap_or_default();
                        Header {
                            id: BookId::new(take("id")),
                            title: take("title"),
                            author: take("author"),
                            subject: take("subject"),
                        }
                    })
                    .collect())
            })
        }

        #[instrument(skip(self), fields(operation = "read_book", backend = "redis", book.id = %id))]
        fn read_book(&self, deadline: Deadline, id: &BookId) -> Result<Book> {
            measured(BACKEND, "read_book", || {
                let fields: HashMap<String, String> = self.run(deadline, "read_book", |conn| {
                    redis::cmd("HGETALL").arg(book_key(id)).query(conn)
                })?;
                if fields.is_empty() {
                    return Err(Error::NotFound(format!("book {id}")));
                }
                book_from_fields(fields)
            })
        }

        #[instrument(
            skip(self, book),
            fields(operation = "update_book", backend = "redis", book.id = %book.id())
        )]
        fn update_book(&self, deadline: Deadline, book: &Book, update_image: bool) -> Result<()> {
            measured(BACKEND, "update_book", || {
                book.validate()?;
                let written: i64 = self.run(deadline, "update_book", |conn| {
                    let mut invocation = self.update_script.prepare_invoke();
                    invocation.key(book_key(book.id()));
                    for (field, value) in book_fields(book, update_image) {
                        invocation.arg(field).arg(value);
                    }
                    invocation.invoke(conn)
                })?;
                match written {
                    0 => Err(Error::NotFound(format!("book {}", book.id()))),
                    1 => Ok(()),
                    n => Err(Error::IntegrityViolation {
                        operation: "update_book".to_string(),
                        affected: u64::try_from(n).unwrap_or_default(),
                    }),
                }
            })
        }

        #[instrument(skip(self), fields(operation = "delete_book", backend = "redis", book.id = %id))]
        fn delete_book(&self, deadline: Deadline, id: &BookId) -> Result<()> {
            measured(BACKEND, "delete_book", || {
                let deleted: i64 = self.run(deadline, "delete_book", |conn| {
                    redis::cmd("DEL").arg(book_key(id)).query(conn)
                })?;
                match deleted {
                    0 => Err(Error::NotFound(format!("book {id}"))),
                    1 => Ok(()),
                    n => Err(Error::IntegrityViolation {
                        operation: "delete_book".to_string(),
                        affected: u64::try_from(n).unwrap_or_default(),
                    }),
                }
            })
        }

        #[instrument(skip(self), fields(operation = "read_admin_password", backend = "redis"))]
        fn read_admin_password(&self, deadline: Deadline) -> Result<Vec<u8>> {
            measured(BACKEND, "read_admin_password", || {
                let hash: Option<Vec<u8>> = self.run(deadline, "read_admin_password", |conn| {
                    redis::cmd("HGET")
                        .arg(user_key(ADMIN_USERNAME))
                        .arg("password")
                        .query(conn)
                })?;
                hash.ok_or_else(|| Error::NotFound("admin password".to_string()))
            })
        }

        #[instrument(skip(self, hash), fields(operation = "update_admin_password", backend = "redis"))]
        fn update_admin_password(&self, deadline: Deadline, hash: &[u8]) -> Result<()> {
            measured(BACKEND, "update_admin_password", || {
                self.run(deadline, "update_admin_password", |conn| {
                    redis::cmd("HSET")
                        .arg(user_key(ADMIN_USERNAME))
                        .arg("username")
                        .arg(ADMIN_USERNAME)
                        .arg("password")
                        .arg(hash)
                        .query::<()>(conn)
                })
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use chrono::NaiveDate;

        #[test]
        fn test_book_fields_round_trip() {
            let mut book = Book {
                pages: 42,
                publish_date: NaiveDate::from_ymd_opt(2001, 2, 3),
                image_base64: "aW1n".to_string(),
                ..Book::default()
            };
            book.header.id = BookId::new("abc");
            book.header.subject = "Animals".to_string();
            book.header.title = "Cats of the World".to_string();

            let fields: HashMap<String, String> = book_fields(&book, true)
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
            assert_eq!(fields.get("subject_lc").map(String::as_str), Some("animals"));
            assert_eq!(book_from_fields(fields).unwrap(), book);
        }

        #[test]
        fn test_book_fields_lower_case_copies() {
            let mut book = Book {
                pages: 1,
                ..Book::default()
            };
            book.header.title = "Catalog of Stars".to_string();
            book.header.author = "Ann LEE".to_string();
            book.header.subject = "Science, Technology".to_string();

            let fields: HashMap<&str, String> = book_fields(&book, false).into_iter().collect();
            assert_eq!(fields["title_lc"], "catalog of stars");
            assert_eq!(fields["author_lc"], "ann lee");
            assert_eq!(fields["subject_lc"], "science, technology");
            assert_eq!(fields["subject"], "Science, Technology");
        }

        #[test]
        fn test_parse_config_value() {
            use redis::Value;

            let bulk = |s: &str| Value::BulkString(s.as_bytes().to_vec());
            let reply = Value::Array(vec![Value::Array(vec![bulk("MAXEXPANSIONS"), bulk("200")])]);
            assert_eq!(parse_config_value(&reply), Some(200));

            let unset = Value::Array(vec![Value::Array(vec![bulk("MINPREFIX"), Value::Nil])]);
            assert_eq!(parse_config_value(&unset), None);
            assert_eq!(parse_config_value(&Value::Array(Vec::new())), None);
        }

        #[test]
        fn test_book_fields_without_image() {
            let book = Book {
                pages: 1,
                image_base64: "aW1n".to_string(),
                ..Book::default()
            };
            assert!(
                book_fields(&book, false)
                    .iter()
                    .all(|(field, _)| *field != "image_base64")
            );
        }
    }
}

#[cfg(feature = "redis")]
pub use implementation::RedisBackend;

/// Tag separator that never occurs in catalog text, so every tag field holds
/// exactly one value.
#[cfg_attr(not(feature = "redis"), allow(dead_code))]
const TAG_SEPARATOR: &str = "\x1f";

/// Escapes a value for use inside a `RediSearch` tag query (`@field:{...}`).
#[cfg_attr(not(feature = "redis"), allow(dead_code))]
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if !c.is_alphanumeric() && c != '_' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Translates a filter into a `RediSearch` query string.
///
/// Terms become lower-cased contains wildcards OR'd across the title,
/// author and subject tag copies; the subject becomes an exact tag match.
/// An empty filter matches all.
#[cfg_attr(not(feature = "redis"), allow(dead_code))]
fn build_query(filter: &crate::models::Filter) -> String {
    let mut parts = Vec::new();
    if let Some(subject) = filter.subject() {
        parts.push(format!("@subject:{{{}}}", escape_tag(subject)));
    }
    if !filter.terms().is_empty() {
        // terms are alphanumeric, so they need no escaping
        let alternatives = filter
            .terms()
            .iter()
            .map(|t| format!("*{}*", t.to_lowercase()))
            .collect::<Vec<_>>()
            .join("|");
        let clauses: Vec<String> = ["title_lc", "author_lc", "subject_lc"]
            .iter()
            .map(|field| format!("@{field}:{{{alternatives}}}"))
            .collect();
        parts.push(format!("({})", clauses.join("|")));
    }
    if parts.is_empty() {
        "*".to_string()
    } else {
        parts.join(" ")
    }
}

/// Flattens an `FT.AGGREGATE` reply into one field map per row.
///
/// The first element is the match count; each following element is a flat
/// array of alternating field names and values.
#[cfg(feature = "redis")]
fn parse_aggregate_rows(reply: &redis::Value) -> Vec<std::collections::HashMap<String, String>> {
    let redis::Value::Array(items) = reply else {
        return Vec::new();
    };
    items
        .iter()
        .skip(1)
        .filter_map(|row| match row {
            redis::Value::Array(fields) => Some(
                fields
                    .chunks(2)
                    .filter_map(|pair| match pair {
                        [key, value] => Some((value_to_string(key)?, value_to_string(value)?)),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        })
        .collect()
}

#[cfg(feature = "redis")]
fn value_to_string(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        redis::Value::SimpleString(s) => Some(s.clone()),
        redis::Value::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

#[cfg(not(feature = "redis"))]
mod stub {
    use crate::models::{Book, BookId, Filter, Header, Subject};
    use crate::storage::{BookStorage, Deadline};
    use crate::{Error, Result};

    fn disabled() -> Error {
        Error::FeatureNotEnabled("redis".to_string())
    }

    /// Stub Redis backend when feature is not enabled.
    pub struct RedisBackend;

    impl RedisBackend {
        /// Always fails: the `redis` feature is disabled.
        ///
        /// # Errors
        ///
        /// Always returns [`Error::FeatureNotEnabled`].
        pub fn new(_connection_url: &str) -> Result<Self> {
            Err(disabled())
        }
    }

    impl BookStorage for RedisBackend {
        fn backend_name(&self) -> &'static str {
            "redis"
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

#[cfg(not(feature = "redis"))]
pub use stub::RedisBackend;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Filter;
    use test_case::test_case;

    #[test_case("", "", "*" ; "empty filter matches all")]
    #[test_case("cat", "", "(@title_lc:{*cat*}|@author_lc:{*cat*}|@subject_lc:{*cat*})" ; "single term")]
    #[test_case("cat DOG", "", "(@title_lc:{*cat*|*dog*}|@author_lc:{*cat*|*dog*}|@subject_lc:{*cat*|*dog*})" ; "terms are lower-cased alternatives")]
    #[test_case("of", "", "(@title_lc:{*of*}|@author_lc:{*of*}|@subject_lc:{*of*})" ; "stopword term")]
    #[test_case("w", "", "(@title_lc:{*w*}|@author_lc:{*w*}|@subject_lc:{*w*})" ; "one letter term")]
    #[test_case("", "Animals", "@subject:{Animals}" ; "subject only")]
    #[test_case("", "Science, Technology", "@subject:{Science\\,\\ Technology}" ; "subject with comma")]
    #[test_case("cat", "Science Fiction", "@subject:{Science\\ Fiction} (@title_lc:{*cat*}|@author_lc:{*cat*}|@subject_lc:{*cat*})" ; "subject and terms")]
    fn test_build_query(query: &str, subject: &str, expected: &str) {
        let filter = Filter::new(query, subject).unwrap();
        assert_eq!(build_query(&filter), expected);
    }

    #[test]
    fn test_escape_tag_punctuation() {
        assert_eq!(escape_tag("Sci-Fi & Fantasy"), "Sci\\-Fi\\ \\&\\ Fantasy");
        assert_eq!(escape_tag("plain_name9"), "plain_name9");
    }

    #[cfg(feature = "redis")]
    #[test]
    fn test_parse_aggregate_rows() {
        use redis::Value;

        let bulk = |s: &str| Value::BulkString(s.as_bytes().to_vec());
        let reply = Value::Array(vec![
            Value::Int(2),
            Value::Array(vec![bulk("subject"), bulk("Animals"), bulk("count"), bulk("3")]),
            Value::Array(vec![bulk("subject"), bulk("Cooking"), bulk("count"), Value::Int(1)]),
        ]);
        let rows = parse_aggregate_rows(&reply);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("subject").map(String::as_str), Some("Animals"));
        assert_eq!(rows[1].get("count").map(String::as_str), Some("1"));

        assert!(parse_aggregate_rows(&Value::Nil).is_empty());
    }
}
