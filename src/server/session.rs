//! Session Loop
//!
//! Drives one conversation with the build tool: banner, sequential decode,
//! bounded concurrent execution, serialized response writes.

use std::io::{BufRead, BufWriter, Write};
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;

use super::dispatcher::Dispatcher;
use super::handlers::Handler;
use super::Server;
use crate::error::{CacheError, Result};
use crate::protocol::{read_body, read_request, write_response, Request, Response};
use crate::service::RequestContext;

/// Output half of the session; one response at a time
struct ResponseWriter<W: Write> {
    inner: Mutex<BufWriter<W>>,
}

impl<W: Write> ResponseWriter<W> {
    fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(BufWriter::new(writer)),
        }
    }

    /// Write and flush one response
    fn send(&self, response: &Response) -> Result<()> {
        let mut writer = self.inner.lock();
        write_response(&mut *writer, response)
    }
}

/// State shared by the decode loop and every worker of one session
pub(crate) struct Session<'a, W: Write> {
    server: &'a Server,
    handler: Handler<'a>,
    writer: ResponseWriter<W>,

    /// First response write failure, if any
    write_error: Mutex<Option<CacheError>>,
}

impl<'a, W: Write + Send> Session<'a, W> {
    pub(crate) fn new(server: &'a Server, output: W) -> Self {
        Self {
            handler: Handler::new(
                server.service.as_ref(),
                &server.metrics,
                server.config.log_requests,
            ),
            server,
            writer: ResponseWriter::new(output),
            write_error: Mutex::new(None),
        }
    }

    /// Serve requests from `input` until it ends, decoding fails, or the
    /// server is shut down
    pub(crate) fn run<R: BufRead>(&self, mut input: R) -> Result<()> {
        let banner = Response::banner(self.handler_commands());
        self.writer
            .send(&banner)
            .map_err(|e| CacheError::context("write server init", e))?;

        tracing::info!("cache server started");
        let start = Instant::now();

        let dispatcher = Dispatcher::new(self.server.config.effective_max_requests());
        let decoded = crossbeam::thread::scope(|scope| -> Result<()> {
            let outcome = loop {
                if self.server.cancel.is_cancelled() {
                    tracing::info!("shutdown requested, no longer accepting requests");
                    break Ok(());
                }
                let (request, body) = match self.next_request(&mut input) {
                    Ok(Some(next)) => next,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                };
                // Shutdown may have arrived while the read was blocked
                if self.server.cancel.is_cancelled() {
                    tracing::info!(id = request.id, "shutdown requested, dropping request");
                    break Ok(());
                }

                let slot = dispatcher.acquire();
                scope.spawn(move |_| {
                    let _slot = slot;
                    self.serve(request, body);
                });
            };
            // Nothing new is accepted; workers already spawned still finish
            // before the scope returns.
            self.server.cancel.cancel();
            outcome
        })
        .map_err(|_| CacheError::WorkerPanicked)?;

        let result = decoded.and_then(|()| match self.write_error.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        });

        match &result {
            Ok(()) => tracing::info!(elapsed = ?start.elapsed(), "cache server exiting"),
            Err(e) => {
                tracing::warn!(elapsed = ?start.elapsed(), error = %e, "cache server exiting")
            }
        }
        result
    }

    fn handler_commands(&self) -> Vec<String> {
        self.server.service.capabilities().command_names()
    }

    /// Decode the next request and, for a sized put, its body
    fn next_request<R: BufRead>(&self, input: &mut R) -> Result<Option<(Request, Bytes)>> {
        let Some(request) = read_request(input)? else {
            return Ok(None);
        };
        let body = if request.has_body() {
            read_body(input, &request)?
        } else {
            Bytes::new()
        };
        Ok(Some((request, body)))
    }

    /// Execute one request and write its response
    fn serve(&self, request: Request, body: Bytes) {
        let ctx = RequestContext::new(request.id, self.server.cancel.clone());
        let response = match self.handler.handle(&ctx, &request, body) {
            Ok(mut response) => {
                response.id = request.id;
                response
            }
            Err(e) => {
                ctx.in_scope(|| tracing::warn!("request {} failed: {}", request.id, e));
                Response::error(request.id, e.to_string())
            }
        };

        if let Err(e) = self.writer.send(&response) {
            ctx.in_scope(|| tracing::warn!("write response {}: {}", request.id, e));
            self.write_error.lock().get_or_insert(e);
        }
    }
}
