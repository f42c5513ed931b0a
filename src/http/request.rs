//! HTTP/1.1 request parsing using the [`httparse`] crate.

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("request target must be origin-form (start with `/`): {0}")]
    TargetForm(String),
}

/// An HTTP/1.1 request, either parsed off the wire or built for forwarding.
///
/// The body is stored as a [`Bytes`] buffer so the request can be cloned
/// cheaply when an upstream call has to be retried.
///
/// # Examples
///
/// ```
/// use frontdoor::http::request::Request;
///
/// let raw = b"GET /wp-json/wp/v2/posts?page=2 HTTP/1.1\r\nHost: example.com\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/wp-json/wp/v2/posts");
/// assert_eq!(request.target(), "/wp-json/wp/v2/posts?page=2");
/// assert_eq!(request.headers().get("host"), Some("example.com"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    body: Bytes,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Builds an HTTP/1.1 request for `target` (path plus optional query string).
    ///
    /// ```
    /// use frontdoor::http::{Method, Request};
    ///
    /// let req = Request::new(Method::Get, "/api/posts?per_page=5")
    ///     .header("User-Agent", "test");
    /// assert_eq!(req.path(), "/api/posts");
    /// assert_eq!(req.query_string(), Some("per_page=5"));
    /// ```
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = split_target(target);
        Self {
            method,
            path,
            version: 1,
            headers: Headers::new(),
            query,
            body: Bytes::new(),
        }
    }

    /// Appends a header, builder style.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replaces the body, builder style.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body begins
    /// in `buf` (i.e. immediately after the `\r\n\r\n` header terminator). The
    /// body holds at most `Content-Length` bytes of whatever follows.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: more data is needed to complete the request headers.
    /// - [`RequestError::Parse`]: the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`]: a required field (method, path, version) is absent.
    /// - [`RequestError::TargetForm`]: the target is absolute-, authority- or
    ///   asterisk-form rather than a path.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw_req.method {
            Some(m) => m.parse::<Method>().unwrap_or_else(|never| match never {}),
            None => return Err(RequestError::MissingField { field: "method" }),
        };

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        if !raw_path.starts_with('/') {
            return Err(RequestError::TargetForm(raw_path.to_owned()));
        }
        let (path, query) = split_target(raw_path);

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let available = &buf[body_offset..];
        let declared = header_map
            .get("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let body = Bytes::copy_from_slice(&available[..declared.min(available.len())]);

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                query,
                body,
            },
            body_offset,
        ))
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the path and query string as sent on the request line.
    pub fn target(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{q}", self.path),
            None => self.path.clone(),
        }
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the request body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the trimmed `User-Agent`, treating a blank value as absent.
    pub fn user_agent(&self) -> Option<&str> {
        self.headers
            .get("user-agent")
            .map(str::trim)
            .filter(|ua| !ua.is_empty())
    }

    /// Returns the `Referer` header, if any.
    pub fn referer(&self) -> Option<&str> {
        self.headers.get("referer")
    }

    /// Returns `true` when the caller asked for uncached data.
    ///
    /// Recognizes `Cache-Control: no-cache`, `no-store`, `max-age=0` and the
    /// legacy `Pragma: no-cache`.
    pub fn wants_uncached(&self) -> bool {
        let cache_control = self
            .headers
            .get_all("cache-control")
            .flat_map(|v| v.split(','))
            .map(|d| d.trim().to_ascii_lowercase())
            .any(|d| d == "no-cache" || d == "no-store" || d == "max-age=0");
        let pragma = self
            .headers
            .get("pragma")
            .is_some_and(|p| p.trim().eq_ignore_ascii_case("no-cache"));
        cache_control || pragma
    }

    /// Returns `true` if the body is sent with chunked transfer coding.
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get("transfer-encoding")
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"))
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method().as_str(), "GET");
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), 1);
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert_eq!(offset, raw.len());
    }

    #[test]
    fn target_keeps_query_string() {
        let raw = b"GET /search?q=rust&page=2 HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=rust&page=2"));
        assert_eq!(req.target(), "/search?q=rust&page=2");
    }

    #[test]
    fn non_origin_form_targets_are_rejected() {
        for raw in [
            &b"GET @evil.example/steal HTTP/1.1\r\nHost: x\r\n\r\n"[..],
            &b"GET http://evil.example/ HTTP/1.1\r\nHost: x\r\n\r\n"[..],
            &b"OPTIONS * HTTP/1.1\r\nHost: x\r\n\r\n"[..],
        ] {
            assert!(matches!(Request::parse(raw), Err(RequestError::TargetForm(_))));
        }
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn body_is_bounded_by_content_length() {
        let raw = b"POST /wp-comments-post.php HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET / HTTP/1.1\r\n";
        let (req, body_offset) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length(), Some(5));
        assert_eq!(&req.body()[..], b"hello");
        assert_eq!(&raw[body_offset..body_offset + 5], b"hello");
    }

    #[test]
    fn connection_close() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn blank_user_agent_is_absent() {
        let req = Request::new(Method::Get, "/").header("User-Agent", "   ");
        assert_eq!(req.user_agent(), None);
    }

    #[test]
    fn uncached_directives_are_recognized() {
        let plain = Request::new(Method::Get, "/api/posts");
        assert!(!plain.wants_uncached());

        let no_cache =
            Request::new(Method::Get, "/api/posts").header("Cache-Control", "max-age=60, No-Cache");
        assert!(no_cache.wants_uncached());

        let no_store = Request::new(Method::Get, "/api/posts").header("cache-control", "no-store");
        assert!(no_store.wants_uncached());

        let pragma = Request::new(Method::Get, "/api/posts").header("Pragma", "no-cache");
        assert!(pragma.wants_uncached());
    }

    #[test]
    fn chunked_detection() {
        let req = Request::new(Method::Post, "/").header("Transfer-Encoding", "gzip, chunked");
        assert!(req.is_chunked());
    }
}
