//! Best-effort release bookkeeping.
//!
//! Every release step is attempted even after an earlier one failed; the
//! failures are logged as they happen and handed back together.

use vdisk_common::error::{Result, VdiskError};

/// Collects the outcome of a sequence of release steps.
#[derive(Debug, Default)]
pub struct Teardown {
    failures: Vec<VdiskError>,
}

impl Teardown {
    /// Starts an empty teardown.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of one release step.
    ///
    /// An aggregated [`VdiskError::Teardown`] is flattened into its members.
    pub fn attempt(&mut self, step: &str, result: Result<()>) {
        if let Err(e) = result {
            tracing::warn!(step, error = %e, "release step failed");
            self.failures.extend(e.into_failures());
        }
    }

    /// Whether every step so far succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the recorded failures.
    #[must_use]
    pub fn into_failures(self) -> Vec<VdiskError> {
        self.failures
    }

    /// Converts the outcome into a single result.
    ///
    /// # Errors
    ///
    /// Returns [`VdiskError::Teardown`] holding every failure when any step
    /// failed.
    pub fn finish(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(VdiskError::Teardown {
                failures: self.failures,
            })
        }
    }
}

/// Acquires a resource, runs `body` with it, and always releases it.
///
/// An error from `body` wins over a release failure, which is then attached
/// as suppressed. A release failure after a successful body is returned as
/// the error.
///
/// # Errors
///
/// Returns the first of: acquisition error, body error, release error.
pub fn scoped<R, T>(
    acquire: impl FnOnce() -> Result<R>,
    release: impl FnOnce(R) -> Result<()>,
    body: impl FnOnce(&R) -> Result<T>,
) -> Result<T> {
    let resource = acquire()?;
    let outcome = body(&resource);
    let released = release(resource);
    match (outcome, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup)) => Err(e.with_suppressed(cleanup.into_failures())),
    }
}
