//! Origin access — where cache values come from.
//!
//! A [`Fetcher`] performs the I/O behind a cache miss or refresh. Any async
//! closure `Fn(K) -> impl Future<Output = Result<V, FetchError>>` is a
//! fetcher; [`HttpFetcher`] talks HTTP/1.1 to a remote origin and
//! [`JsonFetcher`] decodes another fetcher's bytes with `serde_json`.

use std::pin::Pin;

use thiserror::Error;

use crate::http::{ResponseError, StatusCode};

pub mod http;
pub mod json;

pub use self::http::HttpFetcher;
pub use self::json::JsonFetcher;

/// Boxed future returned by [`Fetcher::fetch`].
pub type FetchFuture<'a, V> = Pin<Box<dyn Future<Output = Result<V, FetchError>> + Send + 'a>>;

/// Why an origin could not produce a value.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The origin answered authoritatively that the key does not exist.
    #[error("not found at origin")]
    NotFound,

    #[error("origin responded with status {code}")]
    Status { code: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed origin response: {0}")]
    Malformed(String),

    #[error("failed to decode value: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Builds a [`FetchError::Status`] from a raw status code.
    pub fn status(code: u16) -> Self {
        Self::Status { code }
    }

    /// Whether the same fetch might succeed if tried again later.
    ///
    /// I/O failures, server errors (`5xx`), `408` and `429` are transient.
    /// Client errors, malformed responses and undecodable bodies are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) | Self::Other(_) => true,
            Self::Status { code } => *code >= 500 || *code == 408 || *code == 429,
            Self::NotFound | Self::Malformed(_) | Self::Decode(_) => false,
        }
    }

    /// Returns the known status code for [`FetchError::Status`], if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Status { code } => StatusCode::from_u16(*code),
            _ => None,
        }
    }
}

impl From<ResponseError> for FetchError {
    fn from(err: ResponseError) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Loads the value for a key from its origin.
///
/// # Contract
///
/// - `fetch` may perform network I/O and may take arbitrarily long; the
///   cache bounds it with its configured fetch timeout.
/// - Return [`FetchError::NotFound`] only when the origin is authoritative
///   about absence. Every other error is treated as transient.
/// - Implementations must be `Send + Sync`: the same fetcher is shared by
///   callers and by the background refresh workers.
///
/// # Examples
///
/// ```
/// use freshcache::fetch::{FetchError, Fetcher};
///
/// let fetcher = |key: u32| async move {
///     if key == 0 { Err(FetchError::NotFound) } else { Ok(key * 2) }
/// };
/// # fn assert_fetcher<F: Fetcher<u32, u32>>(_: &F) {}
/// assert_fetcher(&fetcher);
/// ```
pub trait Fetcher<K, V>: Send + Sync + 'static {
    fn fetch<'a>(&'a self, key: &'a K) -> FetchFuture<'a, V>;
}

impl<K, V, T, F> Fetcher<K, V> for T
where
    K: Clone + Send + Sync + 'static,
    T: Fn(K) -> F + Send + Sync + 'static,
    F: Future<Output = Result<V, FetchError>> + Send + 'static,
{
    fn fetch<'a>(&'a self, key: &'a K) -> FetchFuture<'a, V> {
        Box::pin((self)(key.clone()))
    }
}
