//! relay_web - request ingestion and interceptor chains for HTTP microservices
//!
//! The crate turns a raw HTTP request into a single, uniform parameter space and
//! runs it through a chain of interceptors that may authenticate, short-circuit
//! or delegate to the rest of the chain.
//!
//! # Pipeline
//!
//! ```text
//! raw request -> Parts -> ParamsParser -> Request -> Chain -> Responsible -> transport
//!                          (cookies, x- headers,      (interceptors,
//!                           query, body)               terminal handler)
//! ```
//!
//! - **Parameter unification** - cookies, `x-` headers, the query string and the
//!   body (JSON, url-encoded and multipart forms) merge into one [`Params`] map,
//!   later sources overriding earlier ones.
//! - **Interceptors** - every handler has the shape `(context, request, next)`.
//!   [`Next`] can be run at most once, returning without running it ends the chain.
//! - **Request-scoped context** - [`Context`] is append-only and passed by value,
//!   so values injected by one interceptor never leak into other requests.
//!
//! # Examples
//!
//! Protecting a handler with basic authentication:
//! ```no_run
//! use relay_web::{
//!     basic_auth::{BasicAuth, BASIC_AUTH_USER},
//!     handler_fn, Chain, Response, Server, StatusCode,
//! };
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let auth = BasicAuth::new([("admin", "secret")], "internal").unwrap();
//!
//!     let chain = Chain::new().with(auth).with(handler_fn(|ctx, req| {
//!         let user = ctx.value(BASIC_AUTH_USER).cloned().unwrap_or_default();
//!         let name = req.params().str("name").unwrap_or("stranger");
//!
//!         Response::text(StatusCode::Ok, format!("{user} greets {name}"))
//!     }));
//!
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .chain(chain)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//!
//! Parsing without the bundled transport:
//! ```
//! use relay_web::{limits::ParserLimits, Method, ParamsParser, Parts};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let parser = ParamsParser::new(ParserLimits::default());
//! let parts = Parts::new(Method::Post, "/users?tag[]=a,b")
//!     .with_header("Content-Type", "application/json")
//!     .with_header("X-Request-Id", "abc");
//!
//! let body: &[u8] = br#"{"name":"tom","age":19}"#;
//! let parsed = parser.parse(&parts, body, 1024).await.unwrap();
//!
//! assert_eq!(parsed.params.str("request_id"), Ok("abc"));
//! assert_eq!(parsed.params.array("tag"), Ok(vec!["a", "b"]));
//! assert_eq!(parsed.params.int("age"), Ok(19));
//! # }
//! ```

#![forbid(unsafe_code)]

pub(crate) mod http {
    pub mod cookie;
    pub mod mime;
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod params {
    pub(crate) mod multipart;
    pub(crate) mod parser;
    pub(crate) mod value;

    pub use self::value::{Params, Value, ValueError};
}
pub(crate) mod chain {
    pub mod basic_auth;
    pub(crate) mod context;
    pub(crate) mod interceptor;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
}
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    chain::{
        basic_auth,
        context::{Context, ContextKey},
        interceptor::{
            handler_fn, interceptor_fn, BoxFuture, Chain, HandlerFn, Interceptor, InterceptorFn,
            Next,
        },
    },
    errors::{ConfigError, ParseError},
    http::{
        cookie, mime, query,
        request::{Parts, Request},
        response::{
            write::{BodyWriter, WriteBuffer},
            Responsible, Response, ResponseWriter,
        },
        types::{Header, Headers, Method, StatusCode, Url, Version},
    },
    params::{
        multipart::{FormFile, MultipartError},
        parser::{Parsed, ParamsParser},
        Params, Value, ValueError,
    },
    server::server_impl::{Server, ServerBuilder},
};
