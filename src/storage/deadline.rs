//! Caller-supplied deadlines for storage calls.

use crate::{Error, Result};
use std::time::{Duration, Instant};

/// Point in time after which a storage call must give up.
///
/// Backends that talk to another process (PostgreSQL, Redis) turn the
/// remaining time into driver timeouts and abort the in-flight request when it
/// runs out. The `SQLite` backend interrupts the running statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline that never expires.
    #[must_use]
    pub const fn none() -> Self {
        Self(None)
    }

    /// A deadline at the given instant.
    #[must_use]
    pub const fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// A deadline `timeout` from now.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    /// Returns the instant, if bounded.
    #[must_use]
    pub const fn instant(&self) -> Option<Instant> {
        self.0
    }

    /// Time left before expiry. `None` when unbounded; zero once expired.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Time left, or `fallback` when unbounded.
    #[must_use]
    pub fn remaining_or(&self, fallback: Duration) -> Duration {
        self.remaining().unwrap_or(fallback)
    }

    /// Returns true once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Fails with [`Error::Timeout`] if the deadline has passed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] naming `operation` when expired.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_expired() {
            return Err(Error::timeout(operation));
        }
        Ok(())
    }
}
