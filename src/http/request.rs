//! Outgoing HTTP/1.1 GET requests.

use bytes::{BufMut, BytesMut};

use super::Headers;

/// A GET request to an origin, serialized with [`Request::into_bytes`].
///
/// # Examples
///
/// ```
/// use freshcache::http::Request;
///
/// let bytes = Request::get("/users/42")
///     .header("Host", "origin.local")
///     .into_bytes();
///
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("GET /users/42 HTTP/1.1\r\n"));
/// assert!(text.contains("Connection: close\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    target: String,
    headers: Headers,
}

impl Request {
    /// Creates a GET for the given request target (path plus optional query).
    pub fn get(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            headers: Headers::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Serializes the request using HTTP/1.1 wire format.
    ///
    /// Every request is one-shot: `Connection: close` is always written so
    /// the origin delimits the response by closing the stream if it omits
    /// `Content-Length`.
    pub fn into_bytes(mut self) -> BytesMut {
        self.headers.set("Connection", "close");

        let mut buf = BytesMut::with_capacity(64 + self.target.len() + self.headers.len() * 48);
        buf.put(&b"GET "[..]);
        buf.put(self.target.as_bytes());
        buf.put(&b" HTTP/1.1\r\n"[..]);
        self.headers.write_to(&mut buf);
        buf.put(&b"\r\n"[..]);
        buf
    }
}
