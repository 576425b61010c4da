use crate::{
    chain::{context::Context, interceptor::Chain},
    errors::ErrorKind,
    http::{
        request::{Parts, Request},
        response::ResponseWriter,
        types::{Method, Version},
    },
    limits::{ConnLimits, ReqLimits, RespLimits},
    params::parser::ParamsParser,
    server::server_impl::AllLimits,
};
use memchr::memmem;
use std::{
    future::Future,
    io,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context as TaskContext, Poll},
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf},
    time::{sleep, timeout, Sleep},
};

const HEAD_END: &[u8] = b"\r\n\r\n";
const READ_CHUNK: usize = 4096;

/// Serves the requests of one connection at a time.
///
/// A worker owns one `HttpConnection` for its whole life and reuses its
/// buffers from connection to connection.
pub(crate) struct HttpConnection {
    chain: Arc<Chain>,
    parser: ParamsParser,

    connection: Connection,
    buffer: Vec<u8>,
    output: Vec<u8>,
    response: ResponseWriter,
    version: Version,

    json_errors: bool,
    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,
}

impl HttpConnection {
    #[inline]
    pub(crate) fn new(chain: Arc<Chain>, limits: AllLimits) -> Self {
        let (server_limits, conn_limits, req_limits, resp_limits, parser_limits) = limits;

        Self {
            chain,
            parser: ParamsParser::new(parser_limits),

            connection: Connection::new(),
            buffer: Vec::with_capacity(READ_CHUNK),
            output: Vec::with_capacity(resp_limits.default_capacity),
            response: ResponseWriter::new(&resp_limits),
            version: Version::Http11,

            json_errors: server_limits.json_errors,
            conn_limits,
            req_limits,
            resp_limits,
        }
    }

    /// Serves `stream` until it closes, expires or fails.
    ///
    /// Malformed requests are answered with a canned error response before
    /// the connection is closed. I/O errors are returned as is.
    #[inline]
    pub(crate) async fn run<S>(
        &mut self,
        stream: &mut S,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<(), io::Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.impl_run(stream, client_addr, server_addr).await {
            Ok(()) => Ok(()),
            Err(ErrorKind::Io(e)) => Err(e.0),
            Err(err) => {
                tracing::debug!(error = %err, client = %client_addr, "rejecting request");
                writer::send_error(
                    stream,
                    err,
                    self.version,
                    self.json_errors,
                    &self.conn_limits,
                )
                .await
            }
        }
    }

    async fn impl_run<S>(
        &mut self,
        stream: &mut S,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<(), ErrorKind>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.connection.reset();
        self.buffer.clear();
        self.version = Version::Http11;

        loop {
            self.response.reset(&self.resp_limits);

            let Some(head_end) = self.read_head(stream).await? else {
                break;
            };

            let parts = Parts::parse_head(
                &self.buffer[..head_end],
                &self.req_limits,
                client_addr,
                server_addr,
            )?;
            self.version = parts.version();

            // The body is read by the parser, starting with the bytes that
            // arrived together with the head.
            let body_start = head_end + HEAD_END.len();
            let content_length = parts.content_length().unwrap_or(0);
            let buffered = content_length.min(self.buffer.len() - body_start);

            let mut body = ReadTimeout::new(
                (&self.buffer[body_start..body_start + buffered])
                    .chain((&mut *stream).take((content_length - buffered) as u64)),
                self.conn_limits.socket_read_timeout,
            );
            let parsed = self
                .parser
                .parse(&parts, &mut body, self.req_limits.body_size)
                .await?;
            tokio::io::copy(&mut body, &mut tokio::io::sink()).await?;
            if body.get_ref().get_ref().1.limit() != 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            // Pipelined requests stay in the buffer.
            self.buffer.drain(..body_start + buffered);

            let keep_alive = parts.is_keep_alive() && !self.is_last_request();
            let head_only = parts.method() == Method::Head;
            let request = Request::new(parts, parsed);

            let responsible = self.chain.dispatch(Context::new(), &request).await;
            responsible.respond(&mut self.response);
            let keep_alive = keep_alive && self.response.is_keep_alive();

            self.output.clear();
            self.response
                .write_to(&mut self.output, self.version, keep_alive, head_only);
            writer::write_bytes(stream, &self.output, &self.conn_limits).await?;
            self.release_buffers();

            tracing::trace!(
                method = %request.method(),
                path = request.url().path(),
                status = self.response.status_code().as_u16(),
                "request served"
            );

            self.connection.request_count += 1;
            if !keep_alive {
                break;
            }
        }

        Ok(())
    }

    /// Reads until the buffer holds a complete request head and returns its
    /// length, without the blank line.
    ///
    /// Returns `None` when the client closes or stays silent between requests.
    async fn read_head<S>(&mut self, stream: &mut S) -> Result<Option<usize>, ErrorKind>
    where
        S: AsyncRead + Unpin,
    {
        let max_head = self.req_limits.max_head_size();
        let mut searched: usize = 0;

        loop {
            let from = searched.saturating_sub(HEAD_END.len() - 1);
            if let Some(index) = memmem::find(&self.buffer[from..], HEAD_END) {
                let head_end = from + index;
                return match head_end > max_head {
                    true => Err(ErrorKind::HeadTooLarge),
                    false => Ok(Some(head_end)),
                };
            }
            if self.buffer.len() > max_head {
                return Err(ErrorKind::HeadTooLarge);
            }
            searched = self.buffer.len();

            match self.read_more(stream).await {
                Ok(0) if self.buffer.is_empty() => return Ok(None),
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
                Ok(_) => {}
                Err(ErrorKind::Timeout) if self.buffer.is_empty() => return Ok(None),
                Err(err) => return Err(err),
            }
        }
    }

    async fn read_more<S>(&mut self, stream: &mut S) -> Result<usize, ErrorKind>
    where
        S: AsyncRead + Unpin,
    {
        self.buffer.reserve(READ_CHUNK);
        let read = stream.read_buf(&mut self.buffer);

        match timeout(self.conn_limits.socket_read_timeout, read).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ErrorKind::Timeout),
        }
    }

    /// Drops buffers that grew past their usual size.
    fn release_buffers(&mut self) {
        if self.output.capacity() > self.resp_limits.max_capacity {
            self.output = Vec::with_capacity(self.resp_limits.default_capacity);
        }

        let max_input = self.req_limits.max_head_size() + READ_CHUNK;
        if self.buffer.capacity() > max_input {
            self.buffer.shrink_to(max_input);
        }
    }

    #[inline(always)]
    fn is_last_request(&self) -> bool {
        self.connection.request_count + 1 >= self.conn_limits.max_requests_per_connection
            || self.connection.created.elapsed() > self.conn_limits.connection_lifetime
    }
}

/// Fails a read that makes no progress within the socket read timeout.
struct ReadTimeout<R> {
    inner: R,
    limit: Duration,
    sleep: Pin<Box<Sleep>>,
}

impl<R> ReadTimeout<R> {
    fn new(inner: R, limit: Duration) -> Self {
        Self {
            inner,
            limit,
            sleep: Box::pin(sleep(limit)),
        }
    }

    #[inline(always)]
    fn get_ref(&self) -> &R {
        &self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ReadTimeout<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                let deadline = tokio::time::Instant::now() + this.limit;
                this.sleep.as_mut().reset(deadline);
                Poll::Ready(result)
            }
            Poll::Pending => match this.sleep.as_mut().poll(cx) {
                Poll::Ready(()) => Poll::Ready(Err(io::ErrorKind::TimedOut.into())),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

pub(crate) mod writer {
    use crate::{errors::ErrorKind, http::types::Version, limits::ConnLimits, mime};
    use std::io::{self, Write};
    use tokio::{
        io::{AsyncWrite, AsyncWriteExt},
        time::timeout,
    };

    /// Answers with the canned response of `error` and asks the client to close.
    #[inline]
    pub(crate) async fn send_error<S>(
        stream: &mut S,
        error: ErrorKind,
        version: Version,
        json: bool,
        limits: &ConnLimits,
    ) -> Result<(), io::Error>
    where
        S: AsyncWrite + Unpin,
    {
        let body = match json {
            true => error.json(),
            false => "",
        };

        let mut response = Vec::with_capacity(128 + body.len());
        response.extend_from_slice(error.status().first_line(version));
        response.extend_from_slice(b"connection: close\r\n");
        if json {
            write!(response, "content-type: {}\r\n", mime::JSON)?;
        }
        write!(response, "content-length: {}\r\n\r\n{body}", body.len())?;

        write_bytes(stream, &response, limits).await
    }

    #[inline]
    pub(crate) async fn write_bytes<S>(
        stream: &mut S,
        bytes: &[u8],
        limits: &ConnLimits,
    ) -> Result<(), io::Error>
    where
        S: AsyncWrite + Unpin,
    {
        let write = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        };

        match timeout(limits.socket_write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(io::ErrorKind::TimedOut.into()),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    request_count: usize,
}

impl Connection {
    #[inline(always)]
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        basic_auth::{BasicAuth, BASIC_AUTH_USER},
        chain::interceptor::handler_fn,
        http::response::Response,
        limits::{ParserLimits, ServerLimits},
        StatusCode,
    };
    use std::{net::Ipv4Addr, time::Duration};
    use tokio::io::{duplex, AsyncWriteExt};

    const ADDR: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);

    fn limits() -> AllLimits {
        (
            ServerLimits::default(),
            ConnLimits {
                socket_read_timeout: Duration::from_millis(200),
                ..ConnLimits::default()
            },
            ReqLimits::default(),
            RespLimits::default(),
            ParserLimits::default(),
        )
    }

    fn echo_chain() -> Chain {
        Chain::new().with(handler_fn(|_, req| {
            Response::json(StatusCode::Ok, req.params())
        }))
    }

    async fn exchange(chain: Chain, limits: AllLimits, input: &[u8]) -> String {
        let (mut client, mut server) = duplex(1 << 16);

        let task = tokio::spawn(async move {
            let mut conn = HttpConnection::new(Arc::new(chain), limits);
            conn.run(&mut server, ADDR, ADDR).await
        });

        client.write_all(input).await.unwrap();
        client.shutdown().await.unwrap();

        let mut output = Vec::new();
        client.read_to_end(&mut output).await.unwrap();
        task.await.unwrap().unwrap();

        String::from_utf8(output).unwrap()
    }

    fn body_of(response: &str) -> &str {
        response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
    }

    #[tokio::test]
    async fn json_body_and_query_are_unified() {
        let body = r#"{"name":"tom","age":19}"#;
        let request = format!(
            "POST /users?tag[]=a,b HTTP/1.1\r\nX-Request-Id: abc\r\nCookie: name=cookie\r\n\
             Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );

        let response = exchange(echo_chain(), limits(), request.as_bytes()).await;

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.contains("connection: close\r\n"));

        let json: serde_json::Value = serde_json::from_str(body_of(&response)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "tom",
                "age": 19,
                "tag": ["a", "b"],
                "request_id": "abc",
            })
        );
    }

    #[tokio::test]
    async fn keep_alive_serves_pipelined_requests() {
        let request = "GET /?n=1 HTTP/1.1\r\n\r\nGET /?n=2 HTTP/1.1\r\n\r\n";

        let response = exchange(echo_chain(), limits(), request.as_bytes()).await;

        assert_eq!(response.matches("HTTP/1.1 200 OK\r\n").count(), 2);
        assert!(response.contains(r#"{"n":"1"}"#));
        assert!(response.contains(r#"{"n":"2"}"#));
        assert!(!response.contains("connection: close"));
    }

    #[tokio::test]
    async fn request_limit_closes_the_connection() {
        let mut limits = limits();
        limits.1.max_requests_per_connection = 1;
        let request = "GET / HTTP/1.1\r\n\r\nGET / HTTP/1.1\r\n\r\n";

        let response = exchange(echo_chain(), limits, request.as_bytes()).await;

        assert_eq!(response.matches("HTTP/1.1 200 OK\r\n").count(), 1);
        assert!(response.contains("connection: close\r\n"));
    }

    #[tokio::test]
    async fn head_requests_have_no_body() {
        let chain = Chain::new().with(handler_fn(|_, _| Response::text(StatusCode::Ok, "hello")));
        let request = "HEAD / HTTP/1.1\r\nConnection: close\r\n\r\n";

        let response = exchange(chain, limits(), request.as_bytes()).await;

        assert!(response.contains("content-length: 5\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn basic_auth_end_to_end() {
        let chain = Chain::new()
            .with(BasicAuth::new([("admin", "secret")], "internal").unwrap())
            .with(handler_fn(|ctx, _| {
                let user = ctx.value(BASIC_AUTH_USER).cloned().unwrap_or_default();
                Response::text(StatusCode::Ok, user)
            }));

        let accepted = exchange(
            chain.clone(),
            limits(),
            b"GET / HTTP/1.1\r\nAuthorization: Basic YWRtaW46c2VjcmV0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(accepted.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(body_of(&accepted), "admin");

        let denied = exchange(
            chain,
            limits(),
            b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(denied.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(denied.contains("WWW-Authenticate: Basic realm=\"internal\"\r\n"));
        assert!(denied.contains("content-length: 0\r\n"));
    }

    #[tokio::test]
    async fn malformed_requests_get_canned_errors() {
        let cases: [(&[u8], &str, &str); 5] = [
            (b"BREW / HTTP/1.1\r\n\r\n", "400 Bad Request", "INVALID_METHOD"),
            (b"GET / HTTP/2.0\r\n\r\n", "505 HTTP Version Not Supported", "UNSUPPORTED_VERSION"),
            (
                b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n",
                "501 Not Implemented",
                "UNSUPPORTED_TRANSFER_ENCODING",
            ),
            (
                b"POST / HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 5\r\n\r\n{oops",
                "400 Bad Request",
                "INVALID_JSON",
            ),
            (
                b"POST / HTTP/1.1\r\nContent-Length: 999999999\r\n\r\n",
                "413 Payload Too Large",
                "BODY_TOO_LARGE",
            ),
        ];

        for (request, status, code) in cases {
            let response = exchange(echo_chain(), limits(), request).await;

            assert!(response.starts_with(&format!("HTTP/1.1 {status}\r\n")), "{response}");
            assert!(response.contains("connection: close\r\n"));
            assert!(body_of(&response).contains(code), "{response}");
        }
    }

    #[tokio::test]
    async fn plain_errors_without_json() {
        let mut limits = limits();
        limits.0.json_errors = false;

        let response = exchange(echo_chain(), limits, b"GET nope HTTP/1.1\r\n\r\n").await;

        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.ends_with("content-length: 0\r\n\r\n"));
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let mut limits = limits();
        limits.2.url_size = 16;
        limits.2.header_count = 1;
        let request = format!("GET / HTTP/1.1\r\nX-Big: {}\r\n\r\n", "a".repeat(8192));

        let response = exchange(echo_chain(), limits, request.as_bytes()).await;

        assert!(
            response.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"),
            "{response}"
        );
    }

    #[tokio::test]
    async fn uploads_stream_past_the_connection_buffer() {
        let content = "z".repeat(2 * 1024 * 1024);
        let body = format!(
            "--b1\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhi\r\n\
             --b1\r\nContent-Disposition: form-data; name=\"upload\"; filename=\"z.bin\"\r\n\r\n\
             {content}\r\n--b1--\r\n"
        );
        let request = format!(
            "POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=b1\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );

        let chain = Chain::new().with(handler_fn(|_, req| {
            let summary = req.file("upload").map(|file| {
                let note = req.params().str("note").unwrap_or("");
                format!("{note} {} {}", file.size(), file.is_spilled())
            });
            Response::text(StatusCode::Ok, summary.unwrap_or_default())
        }));
        let mut limits = limits();
        limits.4.max_memory = 1024 * 1024;

        let (mut client, mut server) = duplex(1 << 16);
        let task = tokio::spawn(async move {
            let mut conn = HttpConnection::new(Arc::new(chain), limits);
            conn.run(&mut server, ADDR, ADDR)
                .await
                .map(|()| conn.buffer.capacity())
        });

        client.write_all(request.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();
        let mut output = Vec::new();
        client.read_to_end(&mut output).await.unwrap();
        let capacity = task.await.unwrap().unwrap();

        let response = String::from_utf8(output).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert_eq!(body_of(&response), format!("hi {} true", content.len()));
        assert!(capacity < 64 * 1024, "{capacity}");
    }

    #[tokio::test]
    async fn unread_body_bytes_are_skipped() {
        let chain = Chain::new().with(handler_fn(|_, req| {
            Response::text(StatusCode::Ok, req.url().path().to_owned())
        }));
        let body = "--b1--\r\nepilogue the parser never reads";
        let request = format!(
            "POST /a HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=b1\r\n\
             Content-Length: {}\r\n\r\n{body}GET /b HTTP/1.1\r\nConnection: close\r\n\r\n",
            body.len()
        );

        let response = exchange(chain, limits(), request.as_bytes()).await;

        assert_eq!(response.matches("HTTP/1.1 200 OK\r\n").count(), 2, "{response}");
        assert!(response.ends_with("/b"));
    }

    #[tokio::test]
    async fn stalled_body_times_out() {
        let (mut client, mut server) = duplex(1024);

        let task = tokio::spawn(async move {
            let mut conn = HttpConnection::new(Arc::new(echo_chain()), limits());
            conn.run(&mut server, ADDR, ADDR).await
        });

        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: 10\r\n\r\nabc")
            .await
            .unwrap();
        let mut output = Vec::new();
        client.read_to_end(&mut output).await.unwrap();

        assert!(task.await.unwrap().is_ok());
        let response = String::from_utf8(output).unwrap();
        assert!(
            response.starts_with("HTTP/1.1 408 Request Timeout\r\n"),
            "{response}"
        );
    }

    #[tokio::test]
    async fn silent_client_is_dropped() {
        let (mut client, mut server) = duplex(1024);

        let task = tokio::spawn(async move {
            let mut conn = HttpConnection::new(Arc::new(echo_chain()), limits());
            conn.run(&mut server, ADDR, ADDR).await
        });

        let mut output = Vec::new();
        client.read_to_end(&mut output).await.unwrap();

        assert!(task.await.unwrap().is_ok());
        assert!(output.is_empty());
    }
}
