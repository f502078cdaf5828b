//! The storage contract shared by every backend.

use crate::Result;
use crate::models::{Book, BookId, Filter, Header, Subject};
use crate::storage::Deadline;

/// Username of the single administrator credential.
pub const ADMIN_USERNAME: &str = "admin";

/// Trait implemented by every catalog backend.
///
/// All operations are synchronous from the caller's side, bounded by the
/// supplied [`Deadline`], and safe to call from several threads at once.
///
/// Listing operations return records ordered by subject, then title, then
/// insertion order. `limit` and `offset` are signed so callers can pass raw
/// request values: a negative `limit` yields an empty result and a negative
/// `offset` is treated as zero.
pub trait BookStorage: Send + Sync {
    /// Short backend name used in logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Persists new books atomically, assigning each a fresh ID.
    ///
    /// Any caller-supplied ID is ignored. Empty input returns an empty result.
    fn create_books(&self, deadline: Deadline, books: &[Book]) -> Result<Vec<Book>>;

    /// Lists distinct subjects with book counts, ordered by name.
    fn read_book_subjects(&self, deadline: Deadline, limit: i64, offset: i64)
    -> Result<Vec<Subject>>;

    /// Lists headers of books matching the filter.
    fn read_book_headers(
        &self,
        deadline: Deadline,
        filter: &Filter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Header>>;

    /// Reads one complete book.
    ///
    /// Returns [`crate::Error::NotFound`] if no book has the ID.
    fn read_book(&self, deadline: Deadline, id: &BookId) -> Result<Book>;

    /// Replaces every field of a stored book except its ID.
    ///
    /// The image is only written when `update_image` is true; an empty image
    /// then clears the stored one.
    fn update_book(&self, deadline: Deadline, book: &Book, update_image: bool) -> Result<()>;

    /// Removes a book.
    fn delete_book(&self, deadline: Deadline, id: &BookId) -> Result<()>;

    /// Reads the administrator's password hash.
    ///
    /// Returns [`crate::Error::NotFound`] if no password has been set.
    fn read_admin_password(&self, deadline: Deadline) -> Result<Vec<u8>>;

    /// Sets the administrator's password hash, creating the record if needed.
    fn update_admin_password(&self, deadline: Deadline, hash: &[u8]) -> Result<()>;

    /// Every book at once, for backends that already hold the full catalog.
    ///
    /// [`crate::storage::BatchIterator`] uses this instead of paging when present.
    fn all_books(&self) -> Option<&[Book]> {
        None
    }
}

/// Clamps raw pagination values.
///
/// Returns `None` when the page is empty by construction (negative limit),
/// otherwise the limit and a non-negative offset.
#[must_use]
pub const fn clamp_page(limit: i64, offset: i64) -> Option<(i64, i64)> {
    if limit < 0 {
        return None;
    }
    let offset = if offset < 0 { 0 } else { offset };
    Some((limit, offset))
}
