use crate::{
    chain::context::Context,
    http::{
        request::Request,
        response::{Responsible, Response},
        types::StatusCode,
    },
};
use std::{fmt, future::Future, marker::PhantomData, pin::Pin, sync::Arc};

/// An owned, boxed future, as returned by [`Interceptor::intercept`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One link of a [`Chain`].
///
/// An interceptor either delegates to the rest of the chain by running
/// `next`, possibly with a derived [`Context`], or answers by itself and
/// never touches `next`, which ends the chain. [`Next::run`] takes `next`
/// by value, so the rest of the chain runs at most once per call.
///
/// # Examples
/// ```
/// use relay_web::{
///     BoxFuture, Context, ContextKey, Interceptor, Next, Request, Responsible, Response,
///     StatusCode,
/// };
///
/// const TENANT: ContextKey<String> = ContextKey::new("tenant");
///
/// struct Tenant;
///
/// impl Interceptor for Tenant {
///     fn intercept<'a>(
///         &'a self,
///         ctx: Context,
///         req: &'a Request,
///         next: Next<'a>,
///     ) -> BoxFuture<'a, Box<dyn Responsible>> {
///         Box::pin(async move {
///             match req.header("x-tenant") {
///                 Some(tenant) => next.run(ctx.with_value(TENANT, tenant.to_owned()), req).await,
///                 None => Response::status(StatusCode::BadRequest).boxed(),
///             }
///         })
///     }
/// }
/// ```
pub trait Interceptor: Send + Sync + 'static {
    fn intercept<'a>(
        &'a self,
        ctx: Context,
        req: &'a Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Box<dyn Responsible>>;
}

/// The rest of a chain, handed to each interceptor.
///
/// Running past the last interceptor answers `404 Not Found`.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Interceptor>],
}

impl<'a> Next<'a> {
    /// Runs the remaining interceptors with `ctx`.
    pub fn run(self, ctx: Context, req: &'a Request) -> BoxFuture<'a, Box<dyn Responsible>> {
        match self.rest.split_first() {
            Some((head, rest)) => head.intercept(ctx, req, Next { rest }),
            None => Box::pin(async { Response::status(StatusCode::NotFound).boxed() }),
        }
    }

    /// Number of interceptors left to run.
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.rest.len())
            .finish()
    }
}

/// An ordered list of interceptors, the last usually being a terminal handler.
///
/// Interceptors run in the order they were added. Cloning a chain shares its
/// interceptors.
///
/// # Examples
/// ```
/// use relay_web::{handler_fn, Chain, Context, Method, Parsed, Parts, Request, Response,
///     ResponseWriter, StatusCode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let chain = Chain::new().with(handler_fn(|_, req| {
///     Response::text(StatusCode::Ok, req.url().path().to_owned())
/// }));
///
/// let req = Request::new(Parts::new(Method::Get, "/ping"), Parsed::default());
/// let writer = ResponseWriter::record(chain.dispatch(Context::new(), &req).await);
///
/// assert_eq!(writer.body_bytes(), b"/ping");
/// # }
/// ```
#[derive(Clone, Default)]
pub struct Chain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an interceptor.
    pub fn with<I: Interceptor>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Appends an interceptor shared with other chains.
    pub fn with_shared(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Runs `req` through the chain from the first interceptor.
    pub fn dispatch<'a>(&'a self, ctx: Context, req: &'a Request) -> BoxFuture<'a, Box<dyn Responsible>> {
        tracing::trace!(
            method = %req.method(),
            path = req.url().path(),
            interceptors = self.interceptors.len(),
            "dispatching request"
        );

        Next {
            rest: &self.interceptors,
        }
        .run(ctx, req)
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}

/// Interceptor built from a closure, see [`interceptor_fn`].
pub struct InterceptorFn<F>(F);

/// Wraps an async closure of shape `(context, request, next)` into an [`Interceptor`].
///
/// # Examples
/// ```
/// use relay_web::{interceptor_fn, Chain, Method, Responsible, Response, StatusCode};
///
/// let deny_delete = interceptor_fn(|ctx, req, next| {
///     Box::pin(async move {
///         if req.method() == Method::Delete {
///             return Response::status(StatusCode::MethodNotAllowed).boxed();
///         }
///         next.run(ctx, req).await
///     })
/// });
/// let chain = Chain::new().with(deny_delete);
/// assert_eq!(chain.len(), 1);
/// ```
pub fn interceptor_fn<F>(f: F) -> InterceptorFn<F>
where
    F: for<'a> Fn(Context, &'a Request, Next<'a>) -> BoxFuture<'a, Box<dyn Responsible>>
        + Send
        + Sync
        + 'static,
{
    InterceptorFn(f)
}

impl<F> Interceptor for InterceptorFn<F>
where
    F: for<'a> Fn(Context, &'a Request, Next<'a>) -> BoxFuture<'a, Box<dyn Responsible>>
        + Send
        + Sync
        + 'static,
{
    fn intercept<'a>(
        &'a self,
        ctx: Context,
        req: &'a Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Box<dyn Responsible>> {
        (self.0)(ctx, req, next)
    }
}

/// Terminal handler built from a closure, see [`handler_fn`].
pub struct HandlerFn<F, R> {
    f: F,
    _marker: PhantomData<fn() -> R>,
}

/// Wraps a synchronous closure into a terminal [`Interceptor`] that never
/// runs `next`.
pub fn handler_fn<F, R>(f: F) -> HandlerFn<F, R>
where
    F: Fn(Context, &Request) -> R + Send + Sync + 'static,
    R: Responsible + 'static,
{
    HandlerFn {
        f,
        _marker: PhantomData,
    }
}

impl<F, R> Interceptor for HandlerFn<F, R>
where
    F: Fn(Context, &Request) -> R + Send + Sync + 'static,
    R: Responsible + 'static,
{
    fn intercept<'a>(
        &'a self,
        ctx: Context,
        req: &'a Request,
        _next: Next<'a>,
    ) -> BoxFuture<'a, Box<dyn Responsible>> {
        let resp: Box<dyn Responsible> = Box::new((self.f)(ctx, req));
        Box::pin(std::future::ready(resp))
    }
}
