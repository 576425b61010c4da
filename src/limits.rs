//! Server, connection, request and parser limits
//!
//! # Security-First Defaults
//!
//! Default limits are conservative to prevent:
//! - Resource exhaustion attacks
//! - Slowloris attacks
//! - Header flooding
//! - Unbounded in-memory multipart uploads
//!
//! # Examples
//!
//! ```no_run
//! use relay_web::{
//!     handler_fn,
//!     limits::{ConnLimits, ParserLimits, ReqLimits, ServerLimits},
//!     Chain, Response, Server, StatusCode,
//! };
//! use tokio::net::TcpListener;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let chain = Chain::new().with(handler_fn(|_, _| Response::status(StatusCode::NoContent)));
//!
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .chain(chain)
//!         .server_limits(ServerLimits {
//!             max_connections: 5000,
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             body_size: 64 * 1024 * 1024, // uploads
//!             ..ReqLimits::default()
//!         })
//!         .parser_limits(ParserLimits {
//!             max_memory: 16 * 1024 * 1024,
//!             ..ParserLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

use std::time::Duration;

/// Smallest in-memory budget a [`ParserLimits`] may carry (1 MiB).
///
/// Smaller configured values are raised to this floor.
pub const MIN_MAX_MEMORY: usize = 1 << 20;

/// Controls server-level concurrency, queueing, and overload behavior.
///
/// # Connection management
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  \/
/// [--------------]   Yes   /----------------\   No   [-------------]
/// [ Add to queue ] <====== | Queue if full? | =====> [ Sending 503 ]
/// [--------------]         \----------------/        [-------------]
///        ||
///        \/
/// [--------]   Yes   /--------------------------\   No   [------]
/// [ Worker ] <====== | Is there a free worker?  | =====> [ Wait ]
/// [--------]         \--------------------------/        [------]
/// ```
///
/// Workers are long-lived tasks spawned once at startup. Each one pulls
/// connections from the shared queue and runs them through the chain.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of worker tasks, and so of connections served at once (default: `100`).
    pub max_connections: usize,

    /// Maximum number of accepted connections waiting for a worker (default: `250`).
    ///
    /// When the queue is full, new connections receive an immediate `503`.
    pub max_pending_connections: usize,

    /// How idle workers wait for the queue to refill (default: `Sleep(50µs)`).
    pub wait_strategy: WaitStrategy,

    /// Tasks dedicated to answering overflow connections with `503` (default: `1`).
    ///
    /// Set to 0 to silently drop overflow connections.
    pub count_503_handlers: usize,

    /// Format for transport error responses (default: `true`)
    ///
    /// If `true`, error responses carry a JSON body:
    /// ```text
    /// HTTP/1.1 400 Bad Request\r
    /// connection: close\r
    /// content-type: application/json\r
    /// content-length: 55\r
    /// \r
    /// {"error":"Invalid HTTP method","code":"INVALID_METHOD"}
    /// ```
    /// If `false`, the body is empty.
    pub json_errors: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            count_503_handlers: 1,
            json_errors: true,

            _priv: (),
        }
    }
}

/// Strategy for worker tasks waiting on an empty queue.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// Waits with [`tokio::task::yield_now()`]. Keeps latency low at the cost of a busy CPU.
    Yield,
    /// Waits with [`tokio::time::sleep()`].
    Sleep(Duration),
}

/// Connection-level limits and timeouts
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum time to wait for data from the socket (default: `2 seconds`)
    ///
    /// Applies to every read, including body reads performed while parsing.
    pub socket_read_timeout: Duration,

    /// Maximum time for writing a response (default: `3 seconds`)
    pub socket_write_timeout: Duration,

    /// Requests served on one keep-alive connection before it is closed (default: `100`)
    pub max_requests_per_connection: usize,

    /// Maximum lifetime of a connection (default: `2 minutes`)
    pub connection_lifetime: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),
            connection_lifetime: Duration::from_secs(120),
            max_requests_per_connection: 100,

            _priv: (),
        }
    }
}

/// Limits applied while reading the request head and body from the socket.
///
/// You MAY need to increase these if you see:
/// - `413 Payload Too Large` for legitimate uploads
/// - `431 Request Header Fields Too Large`
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum request target length including the query string (default: `2048 B`)
    pub url_size: usize,
    /// Maximum number of path segments (default: `16`)
    pub url_parts: usize,

    /// Maximum number of headers per request (default: `32`)
    pub header_count: usize,
    /// Maximum header name length (default: `64 B`)
    pub header_name_size: usize,
    /// Maximum header value length (default: `4096 B`)
    ///
    /// Cookies and `Authorization` values are the usual reason to raise it.
    pub header_value_size: usize,

    /// Maximum request body size (default: `4 MiB`)
    ///
    /// Passed to the parameter parser as the body bound. Larger declared
    /// `Content-Length` values are rejected before the body is read.
    pub body_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            url_size: 2048,
            url_parts: 16,

            header_count: 32,
            header_name_size: 64,
            header_value_size: 4096,

            body_size: 4 * 1024 * 1024,

            _priv: (),
        }
    }
}

impl ReqLimits {
    /// Largest request head (request line, headers and the blank line) that is accepted.
    pub fn max_head_size(&self) -> usize {
        self.first_line() + self.header_count * self.header_line() + 2
    }

    // CONNECT /url/test HTTP/1.1\r\n
    // Method(7) + " " + url + " " + Version(8) + "\r\n"
    fn first_line(&self) -> usize {
        19 + self.url_size
    }

    // Name + ": " + Value + "\r\n"
    fn header_line(&self) -> usize {
        self.header_name_size + self.header_value_size + 4
    }
}

/// Response buffer management.
///
/// ```rust
/// # use relay_web::limits::RespLimits;
/// # let limits = RespLimits::default();
/// # let mut buffer: Vec<u8> = Vec::with_capacity(limits.default_capacity);
/// if buffer.capacity() > limits.max_capacity {
///     buffer = Vec::with_capacity(limits.default_capacity);
/// } else {
///     buffer.clear();
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Initial buffer capacity allocated for responses (default: `1024 B`)
    pub default_capacity: usize,
    /// Capacity above which the buffer is reallocated between requests (default: `8192 B`)
    pub max_capacity: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 1024,
            max_capacity: 8 * 1024,

            _priv: (),
        }
    }
}

/// Limits used by [`ParamsParser`](crate::ParamsParser).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserLimits {
    /// In-memory budget for multipart bodies (default: `8 MiB`, floor: [`MIN_MAX_MEMORY`])
    ///
    /// Text fields count against it and fail the request once exhausted.
    /// File parts that no longer fit are spilled to a temporary file.
    pub max_memory: usize,

    /// Maximum number of `key=value` pairs in the query string or a
    /// url-encoded body (default: `1000`)
    pub max_form_pairs: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_memory: 8 * 1024 * 1024,
            max_form_pairs: 1000,

            _priv: (),
        }
    }
}

impl ParserLimits {
    /// Returns limits with `max_memory` raised to at least [`MIN_MAX_MEMORY`].
    pub fn normalized(mut self) -> Self {
        self.max_memory = self.max_memory.max(MIN_MAX_MEMORY);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_memory_floor() {
        let cases = [
            (0, MIN_MAX_MEMORY),
            (1024, MIN_MAX_MEMORY),
            (MIN_MAX_MEMORY, MIN_MAX_MEMORY),
            (32 << 20, 32 << 20),
        ];

        for (configured, expected) in cases {
            let limits = ParserLimits {
                max_memory: configured,
                ..ParserLimits::default()
            };
            assert_eq!(limits.normalized().max_memory, expected);
        }
    }

    #[test]
    fn head_size_covers_every_header() {
        let limits = ReqLimits {
            url_size: 10,
            header_count: 2,
            header_name_size: 5,
            header_value_size: 7,
            ..ReqLimits::default()
        };

        assert_eq!(limits.max_head_size(), 29 + 2 * 16 + 2);
    }
}
