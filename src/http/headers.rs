//! Case-insensitive header map shared by the request writer and response parser.

use bytes::{BufMut, BytesMut};

/// An order-preserving header map with case-insensitive lookup.
///
/// # Examples
///
/// ```
/// use freshcache::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Length", "12");
/// headers.set("content-length", "3");
///
/// assert_eq!(headers.len(), 1);
/// assert_eq!(headers.content_length(), Some(3));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Appends an entry, keeping any existing values for the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Replaces every value for `name` with a single `value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.inner.push((name, value.into()));
    }

    /// Returns the first value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Parses `Content-Length`, ignoring surrounding whitespace.
    pub fn content_length(&self) -> Option<usize> {
        self.get("content-length")?.trim().parse().ok()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Writes every entry as `Name: value\r\n`.
    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        for (name, value) in &self.inner {
            buf.put(name.as_bytes());
            buf.put(&b": "[..]);
            buf.put(value.as_bytes());
            buf.put(&b"\r\n"[..]);
        }
    }
}
