use crate::{
    cookie,
    errors::ErrorKind,
    http::types::{self, Headers},
    limits::ReqLimits,
    FormFile, Method, Params, Parsed, Url, Value, Version,
};
use memchr::memchr;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const UNSPECIFIED: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

/// Transport metadata of a request: everything except the body.
///
/// # Input data requirements
///
/// The head (request line and headers) must be `UTF-8` and every line must
/// end in exactly `CRLF`.
///
/// ## First line
/// ```text
/// [METHOD] SP [TARGET] SP "HTTP/" ("1.0" | "1.1") CRLF
/// ```
///
/// ## Header
/// ```text
/// [NAME] ":" OWS [VALUE] OWS CRLF
/// ```
///
/// Two headers are interpreted while reading the head:
///
/// | Header           | Purpose              | Values                                            |
/// |------------------|----------------------|---------------------------------------------------|
/// | `Content-Length` | Body size            | Any `usize` not above [`ReqLimits::body_size`]    |
/// | `Connection`     | Keep-alive flag      | Token list containing `keep-alive` or `close`     |
///
/// Bodies must carry an explicit `Content-Length`. `Transfer-Encoding` is
/// answered with `501 Not Implemented`.
///
/// # Examples
/// ```
/// use relay_web::{Method, Parts};
///
/// let parts = Parts::new(Method::Get, "/users?page=2")
///     .with_header("Cookie", "session=abc")
///     .with_header("Authorization", "Basic dG9tOnB3");
///
/// assert_eq!(parts.url().path(), "/users");
/// assert_eq!(parts.cookie("session"), Some("abc"));
/// assert_eq!(parts.authorization(), Some("Basic dG9tOnB3"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Parts {
    method: Method,
    url: Url,
    version: Version,

    headers: Headers,
    content_length: Option<usize>,
    keep_alive: bool,

    client_addr: SocketAddr,
    server_addr: SocketAddr,
}

impl Parts {
    /// Creates an HTTP/1.1 request head without headers.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            url: Url::new(target),
            version: Version::Http11,
            headers: Headers::default(),
            content_length: None,
            keep_alive: true,
            client_addr: UNSPECIFIED,
            server_addr: UNSPECIFIED,
        }
    }

    /// Appends a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self.keep_alive = version.keep_alive_by_default();
        self
    }

    pub fn with_client_addr(mut self, addr: SocketAddr) -> Self {
        self.client_addr = addr;
        self
    }

    /// Parses a request head, everything before the blank line that ends it.
    pub(crate) fn parse_head(
        head: &[u8],
        limits: &ReqLimits,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<Self, ErrorKind> {
        let head = simdutf8::basic::from_utf8(head).map_err(|_| ErrorKind::InvalidEncoding)?;
        let mut lines = head.split("\r\n");

        let first = lines.next().unwrap_or_default();
        let mut words = first.splitn(3, ' ');
        let method = Method::from_bytes(words.next().unwrap_or_default().as_bytes())?;
        let target = words.next().ok_or(ErrorKind::InvalidUrl)?;
        let version =
            Version::from_bytes(words.next().ok_or(ErrorKind::InvalidVersion)?.as_bytes())?;

        if !target.starts_with('/') || target.len() > limits.url_size {
            return Err(ErrorKind::InvalidUrl);
        }
        let url = Url::new(target);
        if url.path_segments().len() > limits.url_parts {
            return Err(ErrorKind::InvalidUrl);
        }

        let mut parts = Self {
            method,
            url,
            version,
            headers: Headers::with_capacity(limits.header_count.min(32)),
            content_length: None,
            keep_alive: version.keep_alive_by_default(),
            client_addr,
            server_addr,
        };

        for line in lines {
            if parts.headers.len() >= limits.header_count {
                return Err(ErrorKind::TooManyHeaders);
            }
            parts.parse_header(line, limits)?;
        }

        Ok(parts)
    }

    fn parse_header(&mut self, line: &str, limits: &ReqLimits) -> Result<(), ErrorKind> {
        let colon = memchr(b':', line.as_bytes()).ok_or(ErrorKind::InvalidHeader)?;
        let name = &line[..colon];
        let value = line[colon + 1..].trim_matches([' ', '\t']);

        if name.is_empty()
            || name.len() > limits.header_name_size
            || value.len() > limits.header_value_size
            || name.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
        {
            return Err(ErrorKind::InvalidHeader);
        }

        if name.eq_ignore_ascii_case("content-length") {
            let length =
                types::slice_to_usize(value.as_bytes()).ok_or(ErrorKind::InvalidContentLength)?;
            match self.content_length {
                Some(seen) if seen != length => return Err(ErrorKind::InvalidContentLength),
                _ if length > limits.body_size => return Err(ErrorKind::BodyTooLarge),
                _ => self.content_length = Some(length),
            }
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            return Err(ErrorKind::UnsupportedTransferEncoding);
        } else if name.eq_ignore_ascii_case("connection") {
            for token in value.split(',').map(str::trim) {
                if token.eq_ignore_ascii_case("close") {
                    self.keep_alive = false;
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    self.keep_alive = true;
                }
            }
        }

        self.headers.append(name, value);
        Ok(())
    }
}

// Public API
impl Parts {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    #[inline(always)]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the first value of the header `name`, case-insensitively.
    #[inline(always)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Declared body length, `None` when the request carries no `Content-Length`.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    #[inline(always)]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Returns the raw `Authorization` header.
    #[inline(always)]
    pub fn authorization(&self) -> Option<&str> {
        self.header("authorization")
    }

    /// Iterates over the pairs of every `Cookie` header, in arrival order.
    pub fn cookies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.get_all("cookie").flat_map(cookie::pairs)
    }

    /// Returns the first cookie named `name`.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies().find(|&(n, _)| n == name).map(|(_, v)| v)
    }

    #[inline(always)]
    pub const fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    #[inline(always)]
    pub const fn client_addr(&self) -> &SocketAddr {
        &self.client_addr
    }

    #[inline(always)]
    pub const fn server_addr(&self) -> &SocketAddr {
        &self.server_addr
    }
}

/// A parsed request: transport metadata plus the unified parameters.
///
/// Built once per request by the transport and shared read-only with every
/// interceptor of the chain.
#[derive(Debug)]
pub struct Request {
    parts: Parts,
    params: Params,
    body: Option<Vec<u8>>,
    files: Vec<FormFile>,
}

impl Request {
    pub fn new(parts: Parts, parsed: Parsed) -> Self {
        Self {
            parts,
            params: parsed.params,
            body: parsed.body,
            files: parsed.files,
        }
    }

    /// Adds route variables resolved by a router.
    ///
    /// Keys are lower-cased and override parameters from every other source.
    ///
    /// # Examples
    /// ```
    /// use relay_web::{Method, Parsed, Parts, Request};
    ///
    /// let req = Request::new(Parts::new(Method::Get, "/users/42"), Parsed::default())
    ///     .with_path_params([("ID", "42")]);
    ///
    /// assert_eq!(req.params().int("id"), Ok(42));
    /// ```
    pub fn with_path_params<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            self.params
                .insert(key.as_ref().to_lowercase(), Value::Scalar(value.into()));
        }
        self
    }

    #[inline(always)]
    pub const fn parts(&self) -> &Parts {
        &self.parts
    }

    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.parts.method
    }

    #[inline(always)]
    pub const fn url(&self) -> &Url {
        &self.parts.url
    }

    #[inline(always)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.header(name)
    }

    #[inline(always)]
    pub fn authorization(&self) -> Option<&str> {
        self.parts.authorization()
    }

    #[inline(always)]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.parts.cookie(name)
    }

    /// The unified parameters of the request.
    #[inline(always)]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// The raw body, kept for text, JSON and unrecognized media types.
    ///
    /// Always `None` for url-encoded and multipart bodies.
    #[inline(always)]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Uploaded files of a multipart body.
    #[inline(always)]
    pub fn files(&self) -> &[FormFile] {
        &self.files
    }

    /// Returns the first uploaded file of the form field `name`.
    pub fn file(&self, name: &str) -> Option<&FormFile> {
        self.files.iter().find(|f| f.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(head: &str) -> Result<Parts, ErrorKind> {
        Parts::parse_head(head.as_bytes(), &ReqLimits::default(), UNSPECIFIED, UNSPECIFIED)
    }

    #[test]
    fn request_line() {
        let parts = parse("POST /api/users?x=1 HTTP/1.1").unwrap();

        assert_eq!(parts.method(), Method::Post);
        assert_eq!(parts.url().path(), "/api/users");
        assert_eq!(parts.url().query(), Some("x=1"));
        assert_eq!(parts.version(), Version::Http11);
        assert!(parts.is_keep_alive());
        assert!(parts.headers().is_empty());
    }

    #[test]
    fn bad_request_lines() {
        let cases = [
            ("FETCH / HTTP/1.1", ErrorKind::InvalidMethod),
            ("GET", ErrorKind::InvalidUrl),
            ("GET api HTTP/1.1", ErrorKind::InvalidUrl),
            ("GET /", ErrorKind::InvalidVersion),
            ("GET / HTTP/2", ErrorKind::UnsupportedVersion),
            ("GET / HTTP/1.1 extra", ErrorKind::UnsupportedVersion),
        ];

        for (head, err) in cases {
            assert_eq!(parse(head), Err(err), "{head}");
        }
    }

    #[test]
    fn interpreted_headers() {
        let parts = parse(
            "POST / HTTP/1.1\r\n\
             Content-Length: 12\r\n\
             Connection: close\r\n\
             X-Request-Id:  abc \r\n\
             Cookie: a=1; b=\"2\"\r\n\
             Cookie: c=3",
        )
        .unwrap();

        assert_eq!(parts.content_length(), Some(12));
        assert!(!parts.is_keep_alive());
        assert_eq!(parts.header("x-request-id"), Some("abc"));
        assert_eq!(
            parts.cookies().collect::<Vec<_>>(),
            [("a", "1"), ("b", "2"), ("c", "3")]
        );
        assert_eq!(parts.headers().len(), 5);
    }

    #[test]
    fn http10_keep_alive() {
        assert!(!parse("GET / HTTP/1.0").unwrap().is_keep_alive());
        assert!(parse("GET / HTTP/1.0\r\nConnection: Keep-Alive")
            .unwrap()
            .is_keep_alive());
        assert!(parse("GET / HTTP/1.1\r\nConnection: upgrade")
            .unwrap()
            .is_keep_alive());
    }

    #[test]
    fn bad_headers() {
        let cases = [
            ("GET / HTTP/1.1\r\nNoColon", ErrorKind::InvalidHeader),
            ("GET / HTTP/1.1\r\n: empty", ErrorKind::InvalidHeader),
            ("GET / HTTP/1.1\r\nBad Name: x", ErrorKind::InvalidHeader),
            (
                "GET / HTTP/1.1\r\nContent-Length: ten",
                ErrorKind::InvalidContentLength,
            ),
            (
                "GET / HTTP/1.1\r\nContent-Length: 1\r\nContent-Length: 2",
                ErrorKind::InvalidContentLength,
            ),
            (
                "GET / HTTP/1.1\r\nContent-Length: 999999999999",
                ErrorKind::BodyTooLarge,
            ),
            (
                "GET / HTTP/1.1\r\nTransfer-Encoding: chunked",
                ErrorKind::UnsupportedTransferEncoding,
            ),
        ];

        for (head, err) in cases {
            assert_eq!(parse(head), Err(err), "{head}");
        }
    }

    #[test]
    fn header_count_limit() {
        let limits = ReqLimits {
            header_count: 2,
            ..ReqLimits::default()
        };
        let head = b"GET / HTTP/1.1\r\na: 1\r\nb: 2\r\nc: 3";

        assert_eq!(
            Parts::parse_head(head, &limits, UNSPECIFIED, UNSPECIFIED),
            Err(ErrorKind::TooManyHeaders)
        );
    }

    #[test]
    fn invalid_utf8_head() {
        assert_eq!(
            Parts::parse_head(b"GET /\xff HTTP/1.1", &ReqLimits::default(), UNSPECIFIED, UNSPECIFIED),
            Err(ErrorKind::InvalidEncoding)
        );
    }

    #[test]
    fn path_params_override() {
        let mut parsed = Parsed::default();
        parsed.params.insert("id".into(), Value::Scalar("query".into()));

        let req = Request::new(Parts::new(Method::Get, "/users/7"), parsed)
            .with_path_params([("Id", "7"), ("slug", "tom")]);

        assert_eq!(req.params().str("id"), Ok("7"));
        assert_eq!(req.params().str("slug"), Ok("tom"));
        assert_eq!(req.body(), None);
        assert!(req.files().is_empty());
    }
}
