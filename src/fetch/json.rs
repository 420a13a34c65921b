//! Decoding adapter turning a byte fetcher into a typed one.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::{FetchFuture, Fetcher};

/// Wraps a `Fetcher<K, Bytes>` and decodes every body as JSON into `T`.
///
/// A body that fails to decode surfaces as [`FetchError::Decode`], which the
/// cache treats like any other transient origin failure.
///
/// [`FetchError::Decode`]: super::FetchError::Decode
///
/// # Examples
///
/// ```rust,no_run
/// use freshcache::fetch::{HttpFetcher, JsonFetcher};
///
/// #[derive(serde::Deserialize, Clone)]
/// struct Profile { name: String }
///
/// let fetcher: JsonFetcher<_, Profile> =
///     JsonFetcher::new(HttpFetcher::new("127.0.0.1:9000").path_prefix("/profiles"));
/// ```
pub struct JsonFetcher<F, T> {
    inner: F,
    _marker: PhantomData<fn() -> T>,
}

impl<F, T> JsonFetcher<F, T> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

impl<K, F, T> Fetcher<K, T> for JsonFetcher<F, T>
where
    K: Sync,
    F: Fetcher<K, Bytes>,
    T: DeserializeOwned + Send + 'static,
{
    fn fetch<'a>(&'a self, key: &'a K) -> FetchFuture<'a, T> {
        Box::pin(async move {
            let body = self.inner.fetch(key).await?;
            Ok(serde_json::from_slice(&body)?)
        })
    }
}
