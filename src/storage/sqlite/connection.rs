//! Connection handling for the `SQLite` backend.
//!
//! Mutex acquisition bounded by the caller's deadline, pragma configuration,
//! the `regexp` function behind the `REGEXP` operator, and statement
//! interruption once a deadline passes.

use crate::storage::Deadline;
use crate::{Error, Result};
use regex::{Regex, RegexBuilder};
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, ErrorCode};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Lock wait used when the caller gave no deadline.
pub const MUTEX_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of virtual machine instructions between deadline checks.
const PROGRESS_INTERVAL: i32 = 1_000;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Acquires the connection lock, waiting at most until the deadline.
///
/// `std::sync::Mutex` has no timed lock, so this spins with a short sleep.
/// A poisoned mutex is recovered: the connection itself stays usable after a
/// panic in another caller.
///
/// # Errors
///
/// Returns [`Error::Timeout`] if the lock is still held when the wait ends.
pub fn acquire_lock_with_timeout<'a, T>(
    mutex: &'a Mutex<T>,
    deadline: Deadline,
    operation: &str,
) -> Result<MutexGuard<'a, T>> {
    let timeout = deadline.remaining_or(MUTEX_LOCK_TIMEOUT);
    let start = Instant::now();
    let sleep_duration = Duration::from_millis(2);

    loop {
        match mutex.try_lock() {
            Ok(guard) => return Ok(guard),
            Err(std::sync::TryLockError::Poisoned(poisoned)) => {
                tracing::warn!("SQLite mutex was poisoned, recovering");
                metrics::counter!("sqlite_mutex_poison_recovery_total").increment(1);
                return Ok(poisoned.into_inner());
            },
            Err(std::sync::TryLockError::WouldBlock) => {
                if start.elapsed() >= timeout {
                    metrics::counter!("sqlite_mutex_timeout_total").increment(1);
                    return Err(Error::timeout(operation));
                }
                std::thread::sleep(sleep_duration);
            },
        }
    }
}

/// Applies pragmas and registers the `regexp` function.
///
/// WAL mode lets readers proceed alongside the single writer; in-memory
/// databases silently keep their `memory` journal.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the function cannot be registered.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode returns a row, so pragma_update may report an error here
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");

    register_regexp(conn)
}

/// Registers `regexp(pattern, text)`, which `SQLite` calls for
/// `text REGEXP pattern`. Matching is case-insensitive and the compiled
/// pattern is cached for the duration of the statement.
fn register_regexp(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: Arc<Regex> = ctx.get_or_create_aux(0, |value| -> std::result::Result<_, BoxError> {
                Ok(RegexBuilder::new(value.as_str()?)
                    .case_insensitive(true)
                    .build()?)
            })?;
            let text = ctx
                .get_raw(1)
                .as_str()
                .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
            Ok(pattern.is_match(text))
        },
    )
    .map_err(|e| Error::operation("register_regexp", e))
}

/// Interrupts statements on `conn` once the deadline passes.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the progress handler cannot be
/// installed; the deadline would otherwise go unenforced.
pub fn install_deadline(conn: &Connection, deadline: Deadline, operation: &str) -> Result<()> {
    let Some(at) = deadline.instant() else {
        return Ok(());
    };
    conn.progress_handler(PROGRESS_INTERVAL, Some(move || Instant::now() >= at))
        .map_err(|e| sqlite_error(operation, &e))
}

/// Removes the handler installed by [`install_deadline`].
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the handler cannot be removed.
pub fn clear_deadline(conn: &Connection, operation: &str) -> Result<()> {
    conn.progress_handler(0, None::<fn() -> bool>)
        .map_err(|e| sqlite_error(operation, &e))
}

/// Maps a driver error, turning deadline interrupts into [`Error::Timeout`].
pub fn sqlite_error(operation: &str, err: &rusqlite::Error) -> Error {
    if err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) {
        return Error::timeout(operation);
    }
    Error::operation(operation, err)
}
