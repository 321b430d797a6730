//! Section fetcher capability: the only way the collection pipeline talks to a backend.

use std::{future::Future, io, sync::Arc, time::Duration};

use thiserror::Error;

/// Reason why fetching an INFO section failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FetchCause {
    /// Network or socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The request did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The backend answered with an error reply.
    #[error("backend error: {0}")]
    Backend(String),
    /// The backend answered with a reply of an unexpected type.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    /// The reply payload is not valid UTF-8.
    #[error("reply is not valid UTF-8")]
    InvalidUtf8,
}

/// Error fetching raw text for a single INFO section.
#[derive(Debug, Error)]
#[error("failed fetching INFO section `{section}`: {cause}")]
pub struct FetchError {
    /// Name of the requested section.
    pub section: String,
    /// What went wrong.
    #[source]
    pub cause: FetchCause,
}

impl FetchError {
    /// Creates an error for the specified section.
    pub fn new(section: impl Into<String>, cause: impl Into<FetchCause>) -> Self {
        Self {
            section: section.into(),
            cause: cause.into(),
        }
    }
}

/// Backend able to return the raw text of `INFO <section>`.
///
/// Sections unknown to the backend are not an error; the backend decides what to return for them
/// (Redis returns an empty string). Implementations must be cancel-safe in the sense that dropping
/// the returned future must not leave the source unusable for later requests.
pub trait InfoSource: Send + Sync {
    /// Fetches the raw text of a single section.
    fn info(&self, section: &str) -> impl Future<Output = Result<String, FetchError>> + Send;
}

impl<S: InfoSource> InfoSource for Arc<S> {
    fn info(&self, section: &str) -> impl Future<Output = Result<String, FetchError>> + Send {
        (**self).info(section)
    }
}

impl<S: InfoSource> InfoSource for &S {
    fn info(&self, section: &str) -> impl Future<Output = Result<String, FetchError>> + Send {
        (**self).info(section)
    }
}
