use std::{any::Any, fmt, marker::PhantomData, sync::Arc};

/// Typed key for values stored in a [`Context`].
///
/// Two keys are the same key when their names are equal.
///
/// # Examples
/// ```
/// use relay_web::{Context, ContextKey};
///
/// const TENANT: ContextKey<u32> = ContextKey::new("tenant");
///
/// let ctx = Context::new().with_value(TENANT, 7);
/// assert_eq!(ctx.value(TENANT), Some(&7));
/// ```
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.name).finish()
    }
}

struct Entry {
    name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<Entry>>,
}

/// Request-scoped values passed along the interceptor chain.
///
/// A context is never mutated: [`with_value`](Self::with_value) returns a new
/// context that shares its parent's entries, so a value added by one
/// interceptor is seen by those it calls and by nobody else. Cloning is cheap.
#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Entry>>,
}

impl Context {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a context holding `value` under `key`, shadowing any value
    /// the parent holds under the same key.
    pub fn with_value<T>(&self, key: ContextKey<T>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            head: Some(Arc::new(Entry {
                name: key.name,
                value: Arc::new(value),
                parent: self.head.clone(),
            })),
        }
    }

    /// Returns the most recent value stored under `key`.
    pub fn value<T>(&self, key: ContextKey<T>) -> Option<&T>
    where
        T: Any + Send + Sync,
    {
        self.entries()
            .find(|entry| entry.name == key.name)
            .and_then(|entry| entry.value.downcast_ref::<T>())
    }

    fn entries(&self) -> impl Iterator<Item = &Entry> {
        std::iter::successors(self.head.as_deref(), |entry| entry.parent.as_deref())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries().map(|entry| entry.name))
            .finish()
    }
}
