//! Request-scoped context
//!
//! Carries the logging span and the session's cancellation token down the
//! dispatcher → handler → backend call chain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::Span;

/// Session-wide cancellation signal, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Context handed to every backend call
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: i64,
    cancel: CancelToken,
    span: Span,
}

impl RequestContext {
    pub fn new(request_id: i64, cancel: CancelToken) -> Self {
        let span = tracing::info_span!("request", id = request_id);
        Self {
            request_id,
            cancel,
            span,
        }
    }

    /// A detached context, for calling a backend outside of a session
    pub fn background() -> Self {
        Self {
            request_id: 0,
            cancel: CancelToken::new(),
            span: Span::none(),
        }
    }

    pub fn request_id(&self) -> i64 {
        self.request_id
    }

    /// Span that log lines for this request belong to
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Whether the session has stopped accepting requests
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `f` with this request's span entered
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        self.span.in_scope(f)
    }
}
