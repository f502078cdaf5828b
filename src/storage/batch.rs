//! Whole-collection traversal built on the storage contract.
//!
//! [`BatchIterator`] pages through headers with a look-ahead of one record:
//! it asks for `batch_size + 1` headers and keeps `batch_size`, so the extra
//! record tells it whether another page exists without a count query. Full
//! books are read one at a time as the caller pulls them.
//!
//! No lock is held between pages. A mutation that lands between two page
//! fetches may cause a book to be skipped or seen twice, which bulk jobs
//! accept.

use crate::models::{Book, Filter, Header};
use crate::storage::traits::clamp_page;
use crate::storage::{BookStorage, Deadline};
use crate::Result;
use std::collections::VecDeque;
use std::time::Duration;

/// Default number of headers fetched per page.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// One page of headers plus whether another page follows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderPage {
    /// Headers on this page, at most the requested limit.
    pub headers: Vec<Header>,
    /// True when at least one more matching header exists past this page.
    pub has_more: bool,
}

/// Reads one page of headers using the `limit + 1` look-ahead.
///
/// # Errors
///
/// Propagates the storage error.
pub fn read_header_page<S: BookStorage + ?Sized>(
    storage: &S,
    deadline: Deadline,
    filter: &Filter,
    limit: i64,
    offset: i64,
) -> Result<HeaderPage> {
    let Some((limit, offset)) = clamp_page(limit, offset) else {
        return Ok(HeaderPage::default());
    };
    let mut headers =
        storage.read_book_headers(deadline, filter, limit.saturating_add(1), offset)?;
    let keep = usize::try_from(limit).unwrap_or(usize::MAX);
    let has_more = headers.len() > keep;
    headers.truncate(keep);
    Ok(HeaderPage { headers, has_more })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Nothing fetched yet.
    Fresh,
    /// Draining the current page; `more` records whether another follows.
    Yielding { more: bool },
    /// Terminal; never queries again.
    Exhausted,
}

/// Lazily walks every book in a backend.
///
/// Yields `Result<Book>`. A failed read is yielded once, after which the
/// iterator is exhausted.
///
/// # Examples
///
/// ```ignore
/// use bookcase::storage::{BatchIterator, SqliteBackend};
///
/// let storage = SqliteBackend::in_memory()?;
/// for book in BatchIterator::new(&storage, 50) {
///     let book = book?;
///     println!("{}", book.header.title);
/// }
/// ```
pub struct BatchIterator<'a, S: BookStorage + ?Sized> {
    storage: &'a S,
    filter: Filter,
    batch_size: usize,
    timeout: Option<Duration>,
    state: State,
    offset: i64,
    pending: VecDeque<Header>,
    resident: Option<std::slice::Iter<'a, Book>>,
}

impl<'a, S: BookStorage + ?Sized> BatchIterator<'a, S> {
    /// Creates an iterator over every book, `batch_size` headers per page.
    ///
    /// A zero batch size is raised to one.
    pub fn new(storage: &'a S, batch_size: usize) -> Self {
        Self {
            storage,
            filter: Filter::all(),
            batch_size: batch_size.max(1),
            timeout: None,
            state: State::Fresh,
            offset: 0,
            pending: VecDeque::new(),
            resident: None,
        }
    }

    /// Restricts the walk to books matching `filter`.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Bounds each storage call by `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns true once the iterator will yield nothing more.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.state == State::Exhausted
    }

    fn deadline(&self) -> Deadline {
        self.timeout.map_or_else(Deadline::none, Deadline::after)
    }

    fn fetch_page(&mut self) -> Result<()> {
        let limit = i64::try_from(self.batch_size).unwrap_or(i64::MAX);
        let page = read_header_page(self.storage, self.deadline(), &self.filter, limit, self.offset)?;

        tracing::debug!(
            backend = self.storage.backend_name(),
            offset = self.offset,
            fetched = page.headers.len(),
            has_more = page.has_more,
            "Fetched header page"
        );
        self.offset = self.offset.saturating_add(limit);
        self.pending = page.headers.into();
        self.state = State::Yielding {
            more: page.has_more,
        };
        Ok(())
    }

    fn exhaust(&mut self) {
        self.state = State::Exhausted;
        self.pending.clear();
        self.resident = None;
    }

    fn next_resident(&mut self) -> Option<Result<Book>> {
        let resident = self.resident.as_mut()?;
        let filter = &self.filter;
        let next = resident.find(|book| filter.matches(book)).cloned();
        if next.is_none() {
            self.exhaust();
        }
        next.map(Ok)
    }
}

impl<'a, S: BookStorage + ?Sized> Iterator for BatchIterator<'a, S> {
    type Item = Result<Book>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.state {
                State::Exhausted => return None,
                State::Fresh => {
                    let storage: &'a S = self.storage;
                    if let Some(books) = storage.all_books() {
                        self.resident = Some(books.iter());
                        self.state = State::Yielding { more: false };
                        continue;
                    }
                    if let Err(e) = self.fetch_page() {
                        self.exhaust();
                        return Some(Err(e));
                    }
                },
                State::Yielding { more } => {
                    if self.resident.is_some() {
                        return self.next_resident();
                    }
                    if let Some(header) = self.pending.pop_front() {
                        return match self.storage.read_book(self.deadline(), &header.id) {
                            Ok(book) => Some(Ok(book)),
                            Err(e) => {
                                self.exhaust();
                                Some(Err(e))
                            },
                        };
                    }
                    if !more {
                        self.exhaust();
                        return None;
                    }
                    if let Err(e) = self.fetch_page() {
                        self.exhaust();
                        return Some(Err(e));
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookId, Subject};
    use crate::storage::CsvBackend;
    use crate::{Error, Result};
    use std::sync::Mutex;

    /// In-memory storage that counts header reads and can fail on demand.
    struct PagedStorage {
        books: Vec<Book>,
        header_calls: Mutex<usize>,
        fail_read_of: Option<BookId>,
    }

    impl PagedStorage {
        fn with_books(n: usize) -> Self {
            let books = (0..n)
                .map(|i| Book {
                    header: Header {
                        id: BookId::new(format!("{i:04}")),
                        title: format!("Title {i:04}"),
                        author: "Author".to_string(),
                        subject: "Subject".to_string(),
                    },
                    pages: 1,
                    ..Book::default()
                })
                .collect();
            Self {
                books,
                header_calls: Mutex::new(0),
                fail_read_of: None,
            }
        }

        fn header_calls(&self) -> usize {
            *self.header_calls.lock().unwrap()
        }
    }

    impl BookStorage for PagedStorage {
        fn backend_name(&self) -> &'static str {
            "paged"
        }

        fn create_books(&self, _deadline: Deadline, _books: &[Book]) -> Result<Vec<Book>> {
            Err(Error::Unsupported("create_books".to_string()))
        }

        fn read_book_subjects(
            &self,
            _deadline: Deadline,
            _limit: i64,
            _offset: i64,
        ) -> Result<Vec<Subject>> {
            Ok(Vec::new())
        }

        fn read_book_headers(
            &self,
            _deadline: Deadline,
            filter: &Filter,
            limit: i64,
            offset: i64,
        ) -> Result<Vec<Header>> {
            *self.header_calls.lock().unwrap() += 1;
            Ok(self
                .books
                .iter()
                .filter(|b| filter.matches(b))
                .skip(usize::try_from(offset).unwrap())
                .take(usize::try_from(limit).unwrap())
                .map(|b| b.header.clone())
                .collect())
        }

        fn read_book(&self, _deadline: Deadline, id: &BookId) -> Result<Book> {
            if self.fail_read_of.as_ref() == Some(id) {
                return Err(Error::operation("read_book", "injected failure"));
            }
            self.books
                .iter()
                .find(|b| b.id() == id)
                .cloned()
                .ok_or_else(|| Error::NotFound(id.to_string()))
        }

        fn update_book(&self, _deadline: Deadline, _book: &Book, _update_image: bool) -> Result<()> {
            Err(Error::Unsupported("update_book".to_string()))
        }

        fn delete_book(&self, _deadline: Deadline, _id: &BookId) -> Result<()> {
            Err(Error::Unsupported("delete_book".to_string()))
        }

        fn read_admin_password(&self, _deadline: Deadline) -> Result<Vec<u8>> {
            Err(Error::NotFound("admin password".to_string()))
        }

        fn update_admin_password(&self, _deadline: Deadline, _hash: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_walks_every_book_once() {
        let batch = 4;
        let storage = PagedStorage::with_books(3 * batch + 1);
        let mut iter = BatchIterator::new(&storage, batch);

        let ids: Vec<String> = iter
            .by_ref()
            .map(|b| b.unwrap().header.id.to_string())
            .collect();
        let expected: Vec<String> = (0..=3 * batch).map(|i| format!("{i:04}")).collect();
        assert_eq!(ids, expected);
        assert!(iter.is_exhausted());
        assert_eq!(storage.header_calls(), 4);
    }

    #[test]
    fn test_exhausted_is_sticky() {
        let storage = PagedStorage::with_books(2);
        let mut iter = BatchIterator::new(&storage, 5);
        assert_eq!(iter.by_ref().count(), 2);
        let calls = storage.header_calls();

        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
        assert_eq!(storage.header_calls(), calls);
    }

    #[test]
    fn test_exact_multiple_of_batch_size() {
        let storage = PagedStorage::with_books(8);
        let iter = BatchIterator::new(&storage, 4);
        assert_eq!(iter.map(Result::unwrap).count(), 8);
        assert_eq!(storage.header_calls(), 2);
    }

    #[test]
    fn test_empty_collection() {
        let storage = PagedStorage::with_books(0);
        let mut iter = BatchIterator::new(&storage, 3);
        assert!(iter.next().is_none());
        assert!(iter.is_exhausted());
    }

    #[test]
    fn test_error_is_yielded_once() {
        let mut storage = PagedStorage::with_books(10);
        storage.fail_read_of = Some(BookId::new("0005"));
        let mut iter = BatchIterator::new(&storage, 3);

        let mut ok = 0;
        let mut errors = 0;
        for item in iter.by_ref() {
            match item {
                Ok(_) => ok += 1,
                Err(_) => errors += 1,
            }
        }
        assert_eq!(ok, 5);
        assert_eq!(errors, 1);
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_filter_restricts_walk() {
        let storage = PagedStorage::with_books(12);
        let filter = Filter::new("0011", "").unwrap();
        let books: Vec<Book> = BatchIterator::new(&storage, 5)
            .with_filter(filter)
            .map(Result::unwrap)
            .collect();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].id().as_str(), "0011");
    }

    #[test]
    fn test_resident_shortcut_skips_paging() {
        let storage = CsvBackend::embedded().unwrap();
        let mut iter = BatchIterator::new(&storage, 2);
        let titles: Vec<String> = iter
            .by_ref()
            .map(|b| b.unwrap().header.title)
            .collect();
        assert_eq!(titles.len(), 8);
        assert_eq!(titles[0], "Cats of the World");
        assert!(iter.is_exhausted());
    }

    #[test]
    fn test_works_through_trait_object() {
        let storage: Box<dyn BookStorage> = Box::new(PagedStorage::with_books(7));
        assert_eq!(BatchIterator::new(storage.as_ref(), 3).count(), 7);
    }

    #[test]
    fn test_read_header_page_look_ahead() {
        let storage = PagedStorage::with_books(5);
        let page = read_header_page(&storage, Deadline::none(), &Filter::all(), 2, 0).unwrap();
        assert_eq!(page.headers.len(), 2);
        assert!(page.has_more);

        let page = read_header_page(&storage, Deadline::none(), &Filter::all(), 2, 3).unwrap();
        assert_eq!(page.headers.len(), 2);
        assert!(!page.has_more);

        let page = read_header_page(&storage, Deadline::none(), &Filter::all(), -1, 0).unwrap();
        assert_eq!(page, HeaderPage::default());
    }
}
