//! HTTP/1.1 response parsing using the [`httparse`] crate.

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, StatusCode};

/// Errors that can occur while parsing an origin's response.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("response exceeds maximum allowed size of {max_bytes} bytes")]
    TooLarge { max_bytes: usize },
}

/// A parsed HTTP/1.1 response.
///
/// The body holds whatever followed the header block in the buffer handed to
/// [`Response::parse`]; callers that read incrementally compare it against
/// [`Response::content_length`].
///
/// # Examples
///
/// ```
/// use freshcache::http::Response;
///
/// let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
/// let (response, offset) = Response::parse(raw).unwrap();
///
/// assert_eq!(response.status(), 200);
/// assert_eq!(response.content_length(), Some(5));
/// assert_eq!(&response.body()[..], b"hello");
/// assert_eq!(&raw[offset..], b"hello");
/// ```
#[derive(Debug)]
pub struct Response {
    status: u16,
    reason: String,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Maximum number of headers accepted from an origin.
    const MAX_HEADERS: usize = 64;

    /// Parses a response from `buf`, returning it with the offset where the
    /// body starts. The body is a copy of everything after the header block.
    ///
    /// # Errors
    ///
    /// - [`ResponseError::Incomplete`] — the header block has not fully arrived.
    /// - [`ResponseError::Parse`] — the data is malformed.
    /// - [`ResponseError::MissingField`] — no status code was present.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), ResponseError> {
        let (response, body_offset) = Self::parse_head(buf)?;
        let body = Bytes::copy_from_slice(&buf[body_offset..]);
        Ok((response.with_body(body), body_offset))
    }

    /// Parses only the status line and headers, leaving the body empty.
    ///
    /// Incremental readers call this until the head is complete, then keep
    /// reading the body into the same buffer and attach it with
    /// [`Response::with_body`].
    ///
    /// # Errors
    ///
    /// Same as [`Response::parse`].
    pub fn parse_head(buf: &[u8]) -> Result<(Self, usize), ResponseError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Response::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(ResponseError::Incomplete),
        };

        let status = raw
            .code
            .ok_or(ResponseError::MissingField { field: "status" })?;
        let reason = raw.reason.unwrap_or_default().to_owned();

        let mut header_map = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        Ok((
            Self {
                status,
                reason,
                headers: header_map,
                body: Bytes::new(),
            },
            body_offset,
        ))
    }

    #[must_use]
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Returns the raw status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns the status as a known [`StatusCode`], if it is one.
    pub fn status_code(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.status)
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers.content_length()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consumes the response, returning the body truncated to
    /// `Content-Length` when the header is present.
    pub fn into_body(self) -> Bytes {
        match self.headers.content_length() {
            Some(len) if len < self.body.len() => self.body.slice(..len),
            _ => self.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_not_found() {
        let raw = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
        let (resp, offset) = Response::parse(raw).unwrap();
        assert_eq!(resp.status_code(), Some(StatusCode::NotFound));
        assert_eq!(resp.reason(), "Not Found");
        assert_eq!(offset, raw.len());
        assert!(resp.body().is_empty());
    }

    #[test]
    fn incomplete_headers() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Len";
        assert!(matches!(Response::parse(raw), Err(ResponseError::Incomplete)));
    }

    #[test]
    fn malformed_status_line() {
        let raw = b"HTTP/1.1 abc OK\r\n\r\n";
        assert!(matches!(Response::parse(raw), Err(ResponseError::Parse(_))));
    }

    #[test]
    fn body_truncated_to_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabcdef";
        let (resp, _) = Response::parse(raw).unwrap();
        assert_eq!(&resp.into_body()[..], b"abc");
    }

    #[test]
    fn head_only_leaves_body_empty() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhel";
        let (resp, offset) = Response::parse_head(raw).unwrap();
        assert_eq!(resp.content_length(), Some(5));
        assert!(resp.body().is_empty());
        assert_eq!(&raw[offset..], b"hel");

        let resp = resp.with_body(Bytes::from_static(b"hello"));
        assert_eq!(&resp.into_body()[..], b"hello");
    }

    #[test]
    fn body_without_content_length_is_kept_whole() {
        let raw = b"HTTP/1.1 200 OK\r\n\r\nstreamed";
        let (resp, _) = Response::parse(raw).unwrap();
        assert_eq!(resp.content_length(), None);
        assert_eq!(&resp.into_body()[..], b"streamed");
    }
}
