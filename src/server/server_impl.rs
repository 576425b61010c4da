use crate::{
    chain::interceptor::Chain,
    errors::ErrorKind,
    http::types::Version,
    limits::{ConnLimits, ParserLimits, ReqLimits, RespLimits, ServerLimits, WaitStrategy},
    server::connection::{writer, HttpConnection},
};
use crossbeam::queue::SegQueue;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    task::yield_now,
    time::sleep as tokio_sleep,
};

/// An HTTP/1.x server running every request through a [`Chain`].
///
/// Accepted connections are queued and served by a fixed pool of worker
/// tasks spawned by [`ServerBuilder::build`]. When the queue is full, new
/// connections are answered with `503 Service Unavailable`.
///
/// # Examples
///
/// ```no_run
/// use relay_web::{handler_fn, Chain, Response, Server, StatusCode};
/// use tokio::net::TcpListener;
///
/// #[tokio::main]
/// async fn main() {
///     let chain = Chain::new().with(handler_fn(|_, req| {
///         Response::json(StatusCode::Ok, req.params())
///     }));
///
///     Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
///         .chain(chain)
///         .build()
///         .launch()
///         .await
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    stream_queue: TcpQueue,
    error_queue: TcpQueue,
    server_limits: ServerLimits,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Accepts connections forever, handing them to the workers.
    #[inline]
    pub async fn launch(self) {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(%addr, workers = self.server_limits.max_connections, "server listening");
        }

        loop {
            let value = match self.listener.accept().await {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    continue;
                }
            };

            match self.stream_queue.len() < self.server_limits.max_pending_connections {
                true => self.stream_queue.push(value),
                false => {
                    tracing::warn!(client = %value.1, "connection queue full");
                    self.error_queue.push(value)
                }
            }
        }
    }

    #[inline]
    async fn get_stream(queue: &TcpQueue, wait: &WaitStrategy) -> (TcpStream, SocketAddr) {
        loop {
            if let Some(value) = queue.pop() {
                return value;
            }

            match wait {
                WaitStrategy::Yield => yield_now().await,
                WaitStrategy::Sleep(time) => tokio_sleep(*time).await,
            }
        }
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
///
/// [`listener`](Self::listener) and [`chain`](Self::chain) are required,
/// every limit falls back to its `Default`.
#[derive(Default)]
pub struct ServerBuilder {
    listener: Option<TcpListener>,
    chain: Option<Arc<Chain>>,

    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
    parser_limits: Option<ParserLimits>,
}

impl ServerBuilder {
    /// Sets the TCP listener that the server will use to accept connections.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the interceptor chain every request runs through.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn chain(mut self, chain: Chain) -> Self {
        self.chain = Some(Arc::new(chain));
        self
    }

    /// Configures worker and queue sizes.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # #[tokio::main]
    /// # async fn main() {
    /// use relay_web::{limits::ServerLimits, Chain, Server};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .chain(Chain::new())
    ///     .server_limits(ServerLimits {
    ///         max_connections: 2500,
    ///         max_pending_connections: 10000,
    ///         ..ServerLimits::default()
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures socket timeouts and keep-alive limits.
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures request head and body size limits.
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Configures response buffer sizes.
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Configures form and multipart parsing.
    #[inline(always)]
    pub fn parser_limits(mut self, limits: ParserLimits) -> Self {
        self.parser_limits = Some(limits);
        self
    }

    /// Finalizes the builder, spawning the worker tasks.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Panics
    ///
    /// Error messages:
    /// - ``The `listener` method must be called to create``
    /// - ``The `chain` method must be called to create``
    ///
    /// Panics when:
    /// - The `listener` method was not called.
    /// - The `chain` method was not called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let (listener, chain, limits) = self.get_all_parts();

        let stream_queue = Arc::new(SegQueue::new());
        let error_queue = Arc::new(SegQueue::new());

        for _ in 0..limits.0.max_connections {
            Self::spawn_worker(&stream_queue, &limits, &chain);
        }
        if limits.0.count_503_handlers != 0 {
            for _ in 0..limits.0.count_503_handlers {
                Self::spawn_alarmist(&error_queue, &limits);
            }
        } else {
            Self::spawn_quiet_alarmist(&error_queue, &limits);
        }

        Server {
            listener,
            stream_queue,
            error_queue,
            server_limits: limits.0,
        }
    }

    #[inline]
    fn spawn_worker(queue: &TcpQueue, limits: &AllLimits, chain: &Arc<Chain>) {
        let queue = queue.clone();
        let wait = limits.0.wait_strategy.clone();
        let mut conn = HttpConnection::new(chain.clone(), limits.clone());

        tokio::spawn(async move {
            loop {
                let (mut stream, addr) = Server::get_stream(&queue, &wait).await;

                let Ok(local_addr) = stream.local_addr() else {
                    continue;
                };

                if let Err(err) = conn.run(&mut stream, addr, local_addr).await {
                    tracing::debug!(error = %err, client = %addr, "connection closed with error");
                }
            }
        });
    }

    #[inline]
    fn spawn_alarmist(queue: &TcpQueue, limits: &AllLimits) {
        let queue = queue.clone();
        let (server_limits, conn_limits, ..) = limits.clone();

        tokio::spawn(async move {
            loop {
                let (mut stream, _) =
                    Server::get_stream(&queue, &server_limits.wait_strategy).await;

                let _ = writer::send_error(
                    &mut stream,
                    ErrorKind::ServiceUnavailable,
                    Version::Http11,
                    server_limits.json_errors,
                    &conn_limits,
                )
                .await;
            }
        });
    }

    #[inline]
    fn spawn_quiet_alarmist(queue: &TcpQueue, limits: &AllLimits) {
        let queue = queue.clone();
        let wait = limits.0.wait_strategy.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = Server::get_stream(&queue, &wait).await;

                drop(stream);
            }
        });
    }

    #[inline]
    #[track_caller]
    fn get_all_parts(self) -> (TcpListener, Arc<Chain>, AllLimits) {
        (
            self.listener
                .expect("The `listener` method must be called to create"),
            self.chain
                .expect("The `chain` method must be called to create"),
            (
                self.server_limits.unwrap_or_default(),
                self.connection_limits.unwrap_or_default(),
                self.request_limits.unwrap_or_default(),
                self.response_limits.unwrap_or_default(),
                self.parser_limits.unwrap_or_default(),
            ),
        )
    }
}

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;
pub(crate) type AllLimits = (ServerLimits, ConnLimits, ReqLimits, RespLimits, ParserLimits);
