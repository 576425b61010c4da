use crate::{query, MultipartError, StatusCode};
use std::{fmt, io};
use thiserror::Error;

/// Failure while turning a request into its unified parameter set.
///
/// Errors are never partially applied: when parsing fails, no parameters
/// from any source reach the caller.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The body reader failed. `context` names the body kind being read,
    /// for example `read json body`.
    #[error("{context}: {source}")]
    Read {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// The body is longer than the caller-supplied bound.
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// The body is not valid JSON at all. The raw body is kept for diagnostics.
    #[error("decode json failed {}: {source}", String::from_utf8_lossy(.body))]
    Json {
        body: Vec<u8>,
        #[source]
        source: serde_json::Error,
    },

    /// The url-encoded body could not be decoded or holds too many pairs.
    #[error("parse form: {0}")]
    InvalidForm(#[from] query::Error),

    /// The multipart body could not be parsed.
    #[error("parse multipart form: {0}")]
    Multipart(#[from] MultipartError),
}

/// Rejected configuration, reported when a component is constructed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("basic auth requires at least one credential")]
    EmptyCredentials,
    #[error("basic auth user and password must not be empty")]
    EmptyCredential,
}

/// Transport failures, answered with a canned response before any interceptor runs.
#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    InvalidMethod,
    InvalidUrl,
    InvalidVersion,
    UnsupportedVersion,

    InvalidEncoding,
    InvalidHeader,
    TooManyHeaders,
    HeadTooLarge,
    InvalidContentLength,
    UnsupportedTransferEncoding,

    BodyTooLarge,
    InvalidJson,
    InvalidForm,
    InvalidMultipart,

    Timeout,
    ServiceUnavailable,
    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status:ident => $message:literal, $code:literal; )*) => {
        pub(crate) const fn status(&self) -> StatusCode {
            match self { $(
                Self::$name { .. } => StatusCode::$status,
            )* }
        }

        pub(crate) const fn json(&self) -> &'static str {
            match self { $(
                Self::$name { .. } => concat!(
                    r#"{"error":""#, $message, r#"","code":""#, $code, r#""}"#
                ),
            )* }
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: BadRequest => "Invalid HTTP method", "INVALID_METHOD";
        InvalidUrl: BadRequest => "Invalid URL format", "INVALID_URL";
        InvalidVersion: BadRequest => "Invalid HTTP version", "INVALID_VERSION";
        UnsupportedVersion: HttpVersionNotSupported
            => "HTTP version not supported", "UNSUPPORTED_VERSION";

        InvalidEncoding: BadRequest => "Request head is not valid UTF-8", "INVALID_ENCODING";
        InvalidHeader: BadRequest => "Invalid header format", "INVALID_HEADER";
        TooManyHeaders: RequestHeaderFieldsTooLarge => "Too many headers", "TOO_MANY_HEADERS";
        HeadTooLarge: RequestHeaderFieldsTooLarge => "Request head too large", "HEAD_TOO_LARGE";
        InvalidContentLength: BadRequest => "Invalid Content-Length", "INVALID_CONTENT_LENGTH";
        UnsupportedTransferEncoding: NotImplemented
            => "Transfer-Encoding is not supported", "UNSUPPORTED_TRANSFER_ENCODING";

        BodyTooLarge: PayloadTooLarge => "Request body too large", "BODY_TOO_LARGE";
        InvalidJson: BadRequest => "Invalid JSON body", "INVALID_JSON";
        InvalidForm: BadRequest => "Invalid form body", "INVALID_FORM";
        InvalidMultipart: BadRequest => "Invalid multipart body", "INVALID_MULTIPART";

        Timeout: RequestTimeout => "Request timed out", "TIMEOUT";
        ServiceUnavailable: ServiceUnavailable
            => "Service temporarily unavailable", "SERVICE_UNAVAILABLE";
        Io: ServiceUnavailable => "I/O error occurred", "IO_ERROR";
    }
}

impl std::error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            _ => ErrorKind::Io(IoError(err)),
        }
    }
}

impl From<ParseError> for ErrorKind {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Read { source, .. } => source.into(),
            ParseError::BodyTooLarge { .. } => ErrorKind::BodyTooLarge,
            ParseError::Json { .. } => ErrorKind::InvalidJson,
            ParseError::InvalidForm(_) => ErrorKind::InvalidForm,
            ParseError::Multipart(MultipartError::TooLarge { .. }) => ErrorKind::BodyTooLarge,
            ParseError::Multipart(_) => ErrorKind::InvalidMultipart,
        }
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}
