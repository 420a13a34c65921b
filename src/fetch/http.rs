//! HTTP/1.1 origin fetcher over plain Tokio TCP.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::{FetchError, FetchFuture, Fetcher};
use crate::http::{Request, Response, ResponseError, StatusCode};

/// Default cap on a single origin response (8 MiB).
const DEFAULT_MAX_RESPONSE_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per fetch.
const INITIAL_BUF_SIZE: usize = 4096;

/// Fetches `GET {path_prefix}/{key}` from an HTTP/1.1 origin.
///
/// Each fetch opens a fresh connection and sends `Connection: close`.
///
/// | Origin status | Result                      |
/// |---------------|-----------------------------|
/// | `200`         | `Ok(body)`                  |
/// | `404`, `410`  | `Err(FetchError::NotFound)` |
/// | anything else | `Err(FetchError::Status)`   |
///
/// # Examples
///
/// ```rust,no_run
/// use freshcache::{Cache, CacheConfig, fetch::HttpFetcher};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let fetcher = HttpFetcher::new("127.0.0.1:9000").path_prefix("/objects");
///     let cache = Cache::new(fetcher, CacheConfig::default())?;
///     let lookup = cache.get(&"logo.png".to_string()).await?;
///     println!("{} bytes", lookup.value().map_or(0, |b| b.len()));
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    authority: String,
    path_prefix: String,
    max_response_size: usize,
}

impl HttpFetcher {
    /// Creates a fetcher for the origin at `authority` (`host:port`).
    pub fn new(authority: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            path_prefix: String::new(),
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }

    /// Sets the path every key is appended to. A trailing slash is ignored.
    #[must_use]
    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.path_prefix = prefix.trim_end_matches('/').to_owned();
        self
    }

    #[must_use]
    pub fn max_response_size(mut self, bytes: usize) -> Self {
        self.max_response_size = bytes;
        self
    }

    /// Request target for a key. The key is percent-encoded as a single
    /// path segment, so `/`, spaces and control bytes never reach the
    /// request line raw.
    pub fn target_for(&self, key: &str) -> String {
        format!("{}/{}", self.path_prefix, urlencoding::encode(key))
    }

    async fn get(&self, key: &str) -> Result<Bytes, FetchError> {
        let target = self.target_for(key);
        debug!(origin = %self.authority, target = %target, "fetching from origin");

        let mut stream = TcpStream::connect(&self.authority).await?;
        let request = Request::get(&target)
            .header("Host", &self.authority)
            .header("Accept", "*/*");
        stream.write_all(&request.into_bytes()).await?;
        stream.flush().await?;

        let response = self.read_response(&mut stream).await?;
        match response.status_code() {
            Some(StatusCode::Ok) => Ok(response.into_body()),
            Some(StatusCode::NotFound | StatusCode::Gone) => Err(FetchError::NotFound),
            _ => {
                warn!(
                    origin = %self.authority,
                    target = %target,
                    status = response.status(),
                    "origin returned an unusable status"
                );
                Err(FetchError::status(response.status()))
            }
        }
    }

    /// Reads until the headers and, when `Content-Length` is present, the
    /// whole body have arrived. Without `Content-Length` the body runs to EOF.
    ///
    /// The head is parsed once; the body is then read into the same buffer
    /// and handed out as a slice of it.
    async fn read_response(&self, stream: &mut TcpStream) -> Result<Response, FetchError> {
        let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

        let (head, body_offset) = loop {
            let eof = stream.read_buf(&mut buf).await? == 0;
            self.check_size(buf.len())?;

            match Response::parse_head(&buf) {
                Ok(pair) => break pair,
                Err(ResponseError::Incomplete) if !eof => continue,
                Err(ResponseError::Incomplete) => {
                    return Err(FetchError::Malformed(
                        "connection closed before headers completed".into(),
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        };

        // Total bytes to buffer before the body is complete, if known.
        let expected = match head.content_length() {
            Some(len) => {
                let total = body_offset
                    .checked_add(len)
                    .filter(|&total| total <= self.max_response_size);
                match total {
                    Some(total) => Some(total),
                    None => {
                        return Err(ResponseError::TooLarge {
                            max_bytes: self.max_response_size,
                        }
                        .into());
                    }
                }
            }
            None => None,
        };

        loop {
            if expected.is_some_and(|total| buf.len() >= total) {
                break;
            }
            if stream.read_buf(&mut buf).await? == 0 {
                if expected.is_some() {
                    return Err(FetchError::Malformed(
                        "connection closed before body completed".into(),
                    ));
                }
                break;
            }
            self.check_size(buf.len())?;
        }

        Ok(head.with_body(buf.freeze().slice(body_offset..)))
    }

    fn check_size(&self, buffered: usize) -> Result<(), ResponseError> {
        if buffered > self.max_response_size {
            return Err(ResponseError::TooLarge {
                max_bytes: self.max_response_size,
            });
        }
        Ok(())
    }
}

impl Fetcher<String, Bytes> for HttpFetcher {
    fn fetch<'a>(&'a self, key: &'a String) -> FetchFuture<'a, Bytes> {
        Box::pin(self.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Serves `reply` to the first connection, returning the request it read.
    async fn one_shot_origin(reply: &'static [u8]) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let mut seen = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                seen.extend_from_slice(&buf[..n]);
                if n == 0 || seen.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            socket.write_all(reply).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8(seen).unwrap()
        });
        (addr, handle)
    }

    #[test]
    fn target_joins_prefix_and_key() {
        let fetcher = HttpFetcher::new("localhost:1").path_prefix("/v1/items/");
        assert_eq!(fetcher.target_for("abc"), "/v1/items/abc");
        assert_eq!(HttpFetcher::new("localhost:1").target_for("abc"), "/abc");
    }

    #[test]
    fn target_encodes_key_as_one_segment() {
        let fetcher = HttpFetcher::new("localhost:1").path_prefix("/kv");
        assert_eq!(fetcher.target_for("a b/c"), "/kv/a%20b%2Fc");
        assert_eq!(
            fetcher.target_for("a b\r\nX-Injected: 1"),
            "/kv/a%20b%0D%0AX-Injected%3A%201"
        );
    }

    #[tokio::test]
    async fn hostile_key_cannot_inject_headers() {
        let (addr, origin) =
            one_shot_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
        let key = "a b\r\nX-Injected: 1".to_string();
        HttpFetcher::new(addr).fetch(&key).await.unwrap();

        let request = origin.await.unwrap();
        let request_line = request.lines().next().unwrap();
        assert_eq!(request_line, "GET /a%20b%0D%0AX-Injected%3A%201 HTTP/1.1");
        assert!(!request.contains("\r\nX-Injected"));
    }

    #[tokio::test]
    async fn ok_returns_body() {
        let (addr, origin) =
            one_shot_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
        let fetcher = HttpFetcher::new(addr).path_prefix("/kv");
        let body = fetcher.fetch(&"greeting".to_string()).await.unwrap();
        assert_eq!(&body[..], b"hello");

        let request = origin.await.unwrap();
        assert!(request.starts_with("GET /kv/greeting HTTP/1.1\r\n"));
        assert!(request.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn body_until_eof_without_content_length() {
        let (addr, _origin) = one_shot_origin(b"HTTP/1.1 200 OK\r\n\r\nstreamed body").await;
        let body = HttpFetcher::new(addr).fetch(&"k".to_string()).await.unwrap();
        assert_eq!(&body[..], b"streamed body");
    }

    #[tokio::test]
    async fn not_found_maps_to_not_found() {
        let (addr, _origin) =
            one_shot_origin(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n").await;
        let err = HttpFetcher::new(addr).fetch(&"missing".to_string()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn server_error_maps_to_status() {
        let (addr, _origin) = one_shot_origin(
            b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n",
        )
        .await;
        let err = HttpFetcher::new(addr).fetch(&"k".to_string()).await.unwrap_err();
        assert_eq!(err.status_code(), Some(StatusCode::ServiceUnavailable));
    }

    #[tokio::test]
    async fn truncated_body_is_malformed() {
        let (addr, _origin) =
            one_shot_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort").await;
        let err = HttpFetcher::new(addr).fetch(&"k".to_string()).await.unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[tokio::test]
    async fn oversized_response_rejected() {
        let (addr, _origin) =
            one_shot_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 64\r\n\r\n0123456789").await;
        let err = HttpFetcher::new(addr)
            .max_response_size(16)
            .fetch(&"k".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Malformed(msg) if msg.contains("maximum")));
    }

    #[tokio::test]
    async fn huge_content_length_is_too_large() {
        let (addr, _origin) = one_shot_origin(
            b"HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\nx",
        )
        .await;
        let err = HttpFetcher::new(addr).fetch(&"k".to_string()).await.unwrap_err();
        assert!(matches!(err, FetchError::Malformed(msg) if msg.contains("maximum")));
    }

    #[tokio::test]
    async fn body_split_across_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhello")
                .await
                .unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            socket.write_all(b"world").await.unwrap();
            // Held open: the body must be delimited by Content-Length alone.
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        });

        let body = HttpFetcher::new(addr).fetch(&"k".to_string()).await.unwrap();
        assert_eq!(&body[..], b"helloworld");
    }

    #[tokio::test]
    async fn connection_refused_is_io() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let err = HttpFetcher::new(addr).fetch(&"k".to_string()).await.unwrap_err();
        assert!(matches!(err, FetchError::Io(_)));
    }
}
