//! Key/value context propagated through a call chain.
//!
//! A [`LogContext`] is an immutable list of attributes. Deriving a child
//! with [`LogContext::with`] copies the parent and appends, so later values
//! win. [`LogContext::enter`] makes a context current for the calling
//! thread until the returned guard is dropped; the `log` and `tracing`
//! front-ends merge the current context into every record they build.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Key used for a trailing argument that has no value.
pub const BAD_KEY: &str = "!BADKEY";

thread_local! {
    static CURRENT: RefCell<Vec<LogContext>> = const { RefCell::new(Vec::new()) };
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogContext {
    attrs: Arc<Vec<(String, String)>>,
}

impl LogContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a child context with one more attribute.
    pub fn with(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut attrs = Vec::clone(&self.attrs);
        attrs.push((key.into(), value.into()));
        Self {
            attrs: Arc::new(attrs),
        }
    }

    /// Derive a child context from alternating keys and values. A dangling
    /// final element is stored under [`BAD_KEY`].
    pub fn with_args<I, S>(&self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut attrs = Vec::clone(&self.attrs);
        let mut args = args.into_iter().map(Into::into);
        while let Some(key) = args.next() {
            match args.next() {
                Some(value) => attrs.push((key, value)),
                None => attrs.push((BAD_KEY.to_owned(), key)),
            }
        }
        Self {
            attrs: Arc::new(attrs),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub(crate) fn insert_into(&self, attrs: &mut BTreeMap<String, String>) {
        for (k, v) in self.attrs.iter() {
            attrs.insert(k.clone(), v.clone());
        }
    }

    /// Make this context current for the calling thread.
    pub fn enter(&self) -> ContextGuard {
        CURRENT.with(|stack| stack.borrow_mut().push(self.clone()));
        ContextGuard {
            _not_send: PhantomData,
        }
    }

    /// The innermost context entered on this thread, if any.
    pub fn current() -> Option<LogContext> {
        CURRENT.with(|stack| stack.borrow().last().cloned())
    }
}

/// Restores the previous context when dropped.
#[must_use = "the context is only current while the guard is alive"]
pub struct ContextGuard {
    // The guard pops a thread-local stack and must stay on its thread.
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
