//! Server Module
//!
//! Protocol session engine: turns a pair of byte streams into cache calls.
//!
//! ## Architecture
//! - One reader (the caller of [`Server::run`]) decodes requests in order
//! - A bounded set of scoped worker threads executes them concurrently
//! - One mutex-guarded writer emits responses as workers finish
//! - Cache operations routed through a [`CacheService`]

mod dispatcher;
mod handlers;
mod session;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::service::{CacheService, CancelToken};

pub use dispatcher::{Dispatcher, Slot};

use session::Session;

/// Cache helper server for one session
pub struct Server {
    config: Config,
    service: Arc<dyn CacheService>,
    metrics: Arc<Metrics>,
    cancel: CancelToken,
}

impl Server {
    /// Create a server for `service`
    ///
    /// The service's `set_metrics` hook is called here, once.
    pub fn new(config: Config, service: Arc<dyn CacheService>) -> Self {
        let metrics = Arc::new(Metrics::new());
        service.set_metrics(&metrics.host);
        Self {
            config,
            service,
            metrics,
            cancel: CancelToken::new(),
        }
    }

    /// Counters maintained by this server and its service
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Stop accepting requests
    ///
    /// Checked before and after each request is read: a request decoded after
    /// this call is dropped unanswered. Requests already accepted still
    /// complete.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Token cancelled when the session stops accepting requests
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Serve the session on `input`/`output` (blocking)
    ///
    /// Returns `Ok(())` when `input` ends cleanly, or the error that ended
    /// the session. Every accepted request has been answered by the time this
    /// returns.
    pub fn run<R: BufRead, W: Write + Send>(&self, input: R, output: W) -> Result<()> {
        Session::new(self, output).run(input)
    }

    /// Serve the session on the process's standard input and output
    pub fn run_stdio(&self) -> Result<()> {
        self.run(io::stdin().lock(), io::stdout())
    }
}
