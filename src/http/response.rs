//! Responses produced by interceptors and the sink they are written into.

use crate::{
    http::types::{StatusCode, Version},
    limits::RespLimits,
    mime, BodyWriter, WriteBuffer,
};
use serde::Serialize;
use std::io::Write;

/// A value that can write itself into a [`ResponseWriter`].
///
/// Every interceptor and terminal handler returns a `Box<dyn Responsible>`.
/// The transport hands it a writer once the chain has finished.
///
/// Implemented for [`Response`], [`StatusCode`] and any
/// `FnOnce(&mut ResponseWriter) + Send` closure.
///
/// # Examples
/// ```
/// use relay_web::{Responsible, ResponseWriter, StatusCode};
///
/// struct Teapot;
///
/// impl Responsible for Teapot {
///     fn respond(self: Box<Self>, writer: &mut ResponseWriter) {
///         writer
///             .status(StatusCode::Forbidden)
///             .header("x-reason", "teapot")
///             .body("short and stout");
///     }
/// }
///
/// let writer = ResponseWriter::record(Teapot.boxed());
/// assert_eq!(writer.status_code(), StatusCode::Forbidden);
/// assert_eq!(writer.body_bytes(), b"short and stout");
/// ```
pub trait Responsible: Send {
    /// Writes status, headers and body.
    fn respond(self: Box<Self>, writer: &mut ResponseWriter);

    fn boxed(self) -> Box<dyn Responsible>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }
}

impl Responsible for StatusCode {
    fn respond(self: Box<Self>, writer: &mut ResponseWriter) {
        writer.status(*self).finish();
    }
}

impl<F> Responsible for F
where
    F: FnOnce(&mut ResponseWriter) + Send,
{
    fn respond(self: Box<Self>, writer: &mut ResponseWriter) {
        (*self)(writer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum WriterState {
    Clean,
    Headers,
    Complete,
}

/// Sink a [`Responsible`] writes into.
///
/// Build responses by chaining methods in order: [`status()`](Self::status),
/// then headers, then one body method. A writer that is never given a status
/// answers `200 OK`, one that is never given a body sends an empty one.
///
/// `content-length` and `connection` are managed by the transport, headers
/// with those names are dropped.
///
/// # Panics
/// Methods check their ordering in `debug` mode and panic on violations.
#[derive(Debug)]
pub struct ResponseWriter {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    keep_alive: bool,
    state: WriterState,
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new(&RespLimits::default())
    }
}

impl ResponseWriter {
    #[inline(always)]
    pub(crate) fn new(limits: &RespLimits) -> Self {
        Self {
            status: StatusCode::Ok,
            headers: Vec::new(),
            body: Vec::with_capacity(limits.default_capacity),
            keep_alive: true,
            state: WriterState::Clean,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self, limits: &RespLimits) {
        if self.body.capacity() > limits.max_capacity {
            self.body = Vec::with_capacity(limits.default_capacity);
        } else {
            self.body.clear();
        }

        self.status = StatusCode::Ok;
        self.headers.clear();
        self.keep_alive = true;
        self.state = WriterState::Clean;
    }

    /// Runs `responsible` against a fresh writer and returns it for inspection.
    pub fn record(responsible: Box<dyn Responsible>) -> Self {
        let mut writer = Self::default();
        responsible.respond(&mut writer);
        writer
    }

    /// Serializes the response. `head_only` omits the body, as for `HEAD` requests.
    pub(crate) fn write_to(
        &self,
        out: &mut Vec<u8>,
        version: Version,
        keep_alive: bool,
        head_only: bool,
    ) {
        out.extend_from_slice(self.status.first_line(version));
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        match (version, keep_alive) {
            (Version::Http11, false) => out.extend_from_slice(b"connection: close\r\n"),
            (Version::Http10, true) => out.extend_from_slice(b"connection: keep-alive\r\n"),
            _ => {}
        }

        // Writing into a Vec cannot fail.
        let _ = write!(out, "content-length: {}\r\n\r\n", self.body.len());
        if !head_only {
            out.extend_from_slice(&self.body);
        }
    }
}

// Building
impl ResponseWriter {
    /// Sets the status code.
    ///
    /// # Panics
    /// In `debug` mode, when called after a header or body method.
    #[inline]
    #[track_caller]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        debug_assert!(
            self.state == WriterState::Clean,
            "Must be called before any header or body method"
        );

        self.status = status;
        self.state = WriterState::Headers;
        self
    }

    /// Adds a response header.
    ///
    /// # Panics
    /// In `debug` mode, when called after a body method.
    #[inline]
    #[track_caller]
    pub fn header<N: WriteBuffer, V: WriteBuffer>(&mut self, name: N, value: V) -> &mut Self {
        debug_assert!(
            self.state != WriterState::Complete,
            "Must be called before any body method"
        );

        let name = to_string(name);
        if !name.eq_ignore_ascii_case("content-length") && !name.eq_ignore_ascii_case("connection")
        {
            self.headers.push((name, to_string(value)));
        }
        self.state = WriterState::Headers;
        self
    }

    /// Forces the connection to close after this response.
    #[inline]
    pub fn close(&mut self) -> &mut Self {
        self.keep_alive = false;
        self
    }

    /// Writes the body and completes the response.
    ///
    /// # Panics
    /// In `debug` mode, when a body was already written.
    #[inline]
    #[track_caller]
    pub fn body<T: WriteBuffer>(&mut self, data: T) {
        debug_assert!(
            self.state != WriterState::Complete,
            "Body was already written"
        );

        data.write_to(&mut self.body);
        self.state = WriterState::Complete;
    }

    /// Writes the body through a closure and completes the response.
    ///
    /// ```
    /// use relay_web::{ResponseWriter, StatusCode};
    /// use std::io::Write;
    ///
    /// let writer = ResponseWriter::record(Box::new(|w: &mut ResponseWriter| {
    ///     w.status(StatusCode::Ok).body_with(|body| {
    ///         body.write("total: ");
    ///         let _ = write!(body, "{}", 6 * 7);
    ///     });
    /// }));
    ///
    /// assert_eq!(writer.body_bytes(), b"total: 42");
    /// ```
    #[inline]
    #[track_caller]
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) {
        debug_assert!(
            self.state != WriterState::Complete,
            "Body was already written"
        );

        f(&mut BodyWriter(&mut self.body));
        self.state = WriterState::Complete;
    }

    /// Completes the response with an empty body.
    #[inline]
    pub fn finish(&mut self) {
        self.state = WriterState::Complete;
    }
}

// Inspection
impl ResponseWriter {
    #[inline(always)]
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// Returns the first value of the header `name`, case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[inline(always)]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    #[inline(always)]
    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Whether the connection may be reused after this response.
    #[inline(always)]
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }
}

fn to_string<T: WriteBuffer>(value: T) -> String {
    let mut buffer = Vec::new();
    value.write_to(&mut buffer);
    String::from_utf8_lossy(&buffer).into_owned()
}

/// An owned response value.
///
/// # Examples
/// ```
/// use relay_web::{Response, StatusCode};
///
/// let resp = Response::json(StatusCode::Created, &serde_json::json!({"id": 7}))
///     .with_header("location", "/users/7");
///
/// assert_eq!(resp.status_code(), StatusCode::Created);
/// assert_eq!(resp.header("content-type"), Some("application/json"));
/// assert_eq!(resp.body(), br#"{"id":7}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    /// A response with no headers and an empty body.
    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// A `text/plain` response.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self::status(status)
            .with_header("content-type", mime::PLAIN)
            .with_body(body.into())
    }

    /// A `text/html` response.
    pub fn html(status: StatusCode, body: impl Into<String>) -> Self {
        Self::status(status)
            .with_header("content-type", mime::HTML)
            .with_body(body.into())
    }

    /// An `application/json` response.
    ///
    /// A value that fails to serialize yields `500 Internal Server Error`.
    pub fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::status(status)
                .with_header("content-type", mime::JSON)
                .with_body(body),
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize json response");
                Self::status(StatusCode::InternalServerError)
            }
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    #[inline(always)]
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl Responsible for Response {
    fn respond(self: Box<Self>, writer: &mut ResponseWriter) {
        let Response {
            status,
            headers,
            body,
        } = *self;

        writer.status(status);
        for (name, value) in headers {
            writer.header(name, value);
        }
        writer.body(body);
    }
}

impl From<Response> for Box<dyn Responsible> {
    fn from(resp: Response) -> Self {
        Box::new(resp)
    }
}

pub mod write {
    use std::{borrow::Cow, sync::Arc};

    /// Writer for the response body, used in
    /// [`body_with`](super::ResponseWriter::body_with).
    ///
    /// Accepts [`WriteBuffer`] values and implements [`std::io::Write`].
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends content to the response body.
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Values that can be written into response headers and bodies.
    ///
    /// Implemented for strings, bytes, booleans, chars and integers.
    /// Floating-point numbers are left out so that their formatting is
    /// always an explicit choice.
    ///
    /// # Example
    /// ```
    /// use relay_web::WriteBuffer;
    ///
    /// struct UserId(u64);
    ///
    /// impl WriteBuffer for UserId {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         buffer.extend_from_slice(b"user-");
    ///         self.0.write_to(buffer);
    ///     }
    /// }
    /// ```
    pub trait WriteBuffer {
        /// Writes the value's representation to the buffer.
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (str => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let value: &str = self.as_ref();
                    buffer.extend_from_slice(value.as_bytes());
                }
            })*
        };
        (bytes => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let value: &[u8] = self.as_ref();
                    buffer.extend_from_slice(value);
                }
            })*
        };
        (display => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    use std::io::Write;
                    // Writing into a Vec cannot fail.
                    let _ = write!(buffer, "{}", self);
                }
            })*
        };
    }

    impl<T: WriteBuffer + ?Sized> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl_write_buffer! { str => str, String, Box<str>, Cow<'_, str>, Arc<str> }
    impl_write_buffer! { bytes => [u8], Vec<u8>, Box<[u8]>, Cow<'_, [u8]>, Arc<[u8]> }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        display => u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, bool, char
    }
}
