//! Bounded retry of a crawl around credential remediation
//!
//! A crawl that fails because of a credential gets the credential replaced by
//! a [`Remediator`] and is run again, up to a fixed number of attempts. Any
//! other failure ends the run immediately with the original error.

use std::future::Future;

use async_trait::async_trait;
use tracing::{info, warn};

use super::config::MAX_CREDENTIAL_ATTEMPTS;
use crate::fetcher::{CredentialKind, FetcherError};

/// Errors that may point at a credential
pub trait CredentialFailure {
    /// Credential at fault, or `None` for any other failure
    fn credential_kind(&self) -> Option<CredentialKind>;
}

impl CredentialFailure for FetcherError {
    fn credential_kind(&self) -> Option<CredentialKind> {
        FetcherError::credential_kind(self)
    }
}

/// Remediation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemediationError {
    /// The user chose not to provide a new value
    #[error("user chose not to update credentials")]
    Declined,

    /// A new value could not be obtained
    #[error("could not read new value: {0}")]
    Input(String),

    /// The new value was rejected
    #[error("invalid value: {0}")]
    Invalid(String),
}

/// Supplies a fresh value for a rejected credential
#[async_trait]
pub trait Remediator: Send + Sync {
    /// Replace the credential of `kind`
    async fn remediate(&self, kind: CredentialKind) -> Result<(), RemediationError>;
}

/// Terminal outcome of a retried operation
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Non-credential failure, returned unchanged
    #[error(transparent)]
    Aborted(E),

    /// Every attempt failed with a credential error
    #[error("maximum retries reached ({attempts} attempts), last error: {last}")]
    MaxRetriesReached {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        #[source]
        last: E,
    },

    /// The credential could not be replaced
    #[error("failed to update {kind}: {reason}")]
    RemediationFailed {
        /// Credential that was being replaced
        kind: CredentialKind,
        /// Why remediation failed
        #[source]
        reason: RemediationError,
    },
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Underlying operation error, when there is one
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            RetryError::Aborted(err) | RetryError::MaxRetriesReached { last: err, .. } => Some(err),
            RetryError::RemediationFailed { .. } => None,
        }
    }
}

/// Runs an operation, remediating credentials between attempts
#[derive(Debug, Clone, Copy)]
pub struct RetryOrchestrator {
    max_attempts: u32,
}

impl Default for RetryOrchestrator {
    fn default() -> Self {
        Self::new(MAX_CREDENTIAL_ATTEMPTS)
    }
}

impl RetryOrchestrator {
    /// Allow up to `max_attempts` attempts (at least one)
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Attempts allowed
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `operation` until it succeeds, fails with a non-credential error or
    /// runs out of attempts
    ///
    /// `remediator` is called once between consecutive attempts, so a run makes
    /// at most `max_attempts - 1` remediation calls.
    pub async fn run<T, E, F, Fut, R>(
        &self,
        mut operation: F,
        remediator: &R,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: CredentialFailure + std::error::Error + 'static,
        R: Remediator + ?Sized,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let Some(kind) = err.credential_kind() else {
                return Err(RetryError::Aborted(err));
            };

            warn!(
                attempt,
                max_attempts = self.max_attempts,
                credential = kind.as_str(),
                error = %err,
                "Attempt failed with credential error"
            );

            if attempt >= self.max_attempts {
                return Err(RetryError::MaxRetriesReached {
                    attempts: attempt,
                    last: err,
                });
            }

            remediator
                .remediate(kind)
                .await
                .map_err(|reason| RetryError::RemediationFailed { kind, reason })?;

            info!(next_attempt = attempt + 1, "Retrying with updated credentials");
        }
    }
}
