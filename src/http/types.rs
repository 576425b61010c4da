#![allow(rustdoc::bare_urls)]

//! Core HTTP protocol types

use crate::errors::ErrorKind;
use std::fmt;

#[inline(always)]
pub(crate) fn slice_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: usize = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }

    Some(result)
}

// METHOD

/// HTTP request methods
///
/// # References
///
/// - [RFC 9110, Section 9](https://datatracker.ietf.org/doc/html/rfc9110#section-9)
/// - [RFC 5789](https://datatracker.ietf.org/doc/html/rfc5789) (PATCH method)
///
/// `TRACE` and `CONNECT` are not accepted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
    /// Same as GET, the response body is not sent.
    Head,
    Patch,
    Delete,
    Options,
}

impl Method {
    #[inline(always)]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<Self, ErrorKind> {
        match src {
            b"GET" => Ok(Method::Get),
            b"PUT" => Ok(Method::Put),
            b"POST" => Ok(Method::Post),
            b"HEAD" => Ok(Method::Head),
            b"PATCH" => Ok(Method::Patch),
            b"DELETE" => Ok(Method::Delete),
            b"OPTIONS" => Ok(Method::Options),
            _ => Err(ErrorKind::InvalidMethod),
        }
    }

    /// Returns the method token as it appears on the request line.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// VERSION

/// HTTP protocol version
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// HTTP/1.0 [RFC 1945](https://tools.ietf.org/html/rfc1945), closes after each
    /// response unless `Connection: keep-alive` is sent.
    Http10,
    /// HTTP/1.1 [RFC 9112](https://tools.ietf.org/html/rfc9112), keep-alive by default.
    Http11,
}

impl Version {
    #[inline(always)]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<Self, ErrorKind> {
        match src {
            b"HTTP/1.1" => Ok(Self::Http11),
            b"HTTP/1.0" => Ok(Self::Http10),
            [b'H', b'T', b'T', b'P', b'/', ..] => Err(ErrorKind::UnsupportedVersion),
            _ => Err(ErrorKind::InvalidVersion),
        }
    }

    /// Whether connections stay open when the client sends no `Connection` header.
    pub const fn keep_alive_by_default(&self) -> bool {
        matches!(self, Self::Http11)
    }
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($(
        $name:ident = ($num:expr, $str:expr);
    )+) => {
        /// HTTP status codes
        ///
        /// The subset of [RFC 9110](https://tools.ietf.org/html/rfc9110#section-15)
        /// codes a request-handling service is expected to emit.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $name = $num,
        )+ }

        impl StatusCode {
            /// Returns the HTTP status line (e.g., `b"HTTP/1.1 200 OK\r\n"`).
            #[inline]
            pub(crate) const fn first_line(&self, version: Version) -> &'static [u8] {
                match (self, version) { $(
                    (StatusCode::$name, Version::Http11) => {
                        concat!("HTTP/1.1 ", $num, " ", $str, "\r\n").as_bytes()
                    },
                    (StatusCode::$name, Version::Http10) => {
                        concat!("HTTP/1.0 ", $num, " ", $str, "\r\n").as_bytes()
                    },
                )+ }
            }

            /// Returns the canonical reason phrase (e.g., `"Not Found"`).
            pub const fn reason(&self) -> &'static str {
                match self { $(
                    StatusCode::$name => $str,
                )+ }
            }
        }
    }
}

set_status_codes! {
    Continue = (100, "Continue");
    SwitchingProtocols = (101, "Switching Protocols");

    Ok = (200, "OK");
    Created = (201, "Created");
    Accepted = (202, "Accepted");
    NoContent = (204, "No Content");
    PartialContent = (206, "Partial Content");

    MovedPermanently = (301, "Moved Permanently");
    Found = (302, "Found");
    SeeOther = (303, "See Other");
    NotModified = (304, "Not Modified");
    TemporaryRedirect = (307, "Temporary Redirect");
    PermanentRedirect = (308, "Permanent Redirect");

    BadRequest = (400, "Bad Request");
    Unauthorized = (401, "Unauthorized");
    Forbidden = (403, "Forbidden");
    NotFound = (404, "Not Found");
    MethodNotAllowed = (405, "Method Not Allowed");
    NotAcceptable = (406, "Not Acceptable");
    RequestTimeout = (408, "Request Timeout");
    Conflict = (409, "Conflict");
    Gone = (410, "Gone");
    LengthRequired = (411, "Length Required");
    PreconditionFailed = (412, "Precondition Failed");
    PayloadTooLarge = (413, "Payload Too Large");
    UriTooLong = (414, "URI Too Long");
    UnsupportedMediaType = (415, "Unsupported Media Type");
    UnprocessableEntity = (422, "Unprocessable Entity");
    TooManyRequests = (429, "Too Many Requests");
    RequestHeaderFieldsTooLarge = (431, "Request Header Fields Too Large");

    InternalServerError = (500, "Internal Server Error");
    NotImplemented = (501, "Not Implemented");
    BadGateway = (502, "Bad Gateway");
    ServiceUnavailable = (503, "Service Unavailable");
    GatewayTimeout = (504, "Gateway Timeout");
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
}

impl StatusCode {
    /// Returns the numeric code.
    pub const fn as_u16(&self) -> u16 {
        *self as u16
    }
}

// URL

/// The request target split into its path and query.
///
/// # Examples
///
/// ```
/// use relay_web::Url;
///
/// let url = Url::new("/api/users/123?sort=name&debug");
///
/// assert_eq!(url.path(), "/api/users/123");
/// assert_eq!(url.path_segments(), ["api", "users", "123"]);
/// assert_eq!(url.query(), Some("sort=name&debug"));
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Url {
    target: String,
    path_end: usize,
    parts: Vec<String>,
}

impl Url {
    /// Splits a request target (`/path?query`) into its components.
    pub fn new(target: impl Into<String>) -> Self {
        let target = target.into();
        let path_end = memchr::memchr(b'?', target.as_bytes()).unwrap_or(target.len());
        let parts = target[..path_end]
            .split('/')
            .filter(|part| !part.is_empty())
            .map(str::to_owned)
            .collect();

        Self {
            target,
            path_end,
            parts,
        }
    }

    /// Returns the raw request target, path and query string.
    #[inline(always)]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the path without the query string.
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.target[..self.path_end]
    }

    /// Returns the non-empty segments between `/` characters.
    #[inline(always)]
    pub fn path_segments(&self) -> &[String] {
        &self.parts
    }

    /// Returns the path segment at `index`, the first one after the leading `/` being `0`.
    #[inline(always)]
    pub fn path_segment(&self, index: usize) -> Option<&str> {
        self.parts.get(index).map(String::as_str)
    }

    /// Returns the query string without the leading `?`.
    ///
    /// `None` when the target has no `?`.
    #[inline(always)]
    pub fn query(&self) -> Option<&str> {
        self.target.get(self.path_end + 1..)
    }
}

// HEADERS

/// A single request header, name as sent by the client.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Request headers in arrival order.
///
/// Lookups are case-insensitive. Repeated headers are kept as separate entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Appends a header, keeping earlier ones with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Returns the first value of the header `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Returns every value of the header `name`, in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
