//! Command Handlers
//!
//! Execute one decoded request against the cache service and build its
//! response. Every failure here is scoped to the request: the caller turns
//! an `Err` into an error response and the session carries on.

use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use bytes::{Buf, Bytes};
use chrono::{DateTime, Utc};

use crate::error::{CacheError, Result};
use crate::metrics::Metrics;
use crate::protocol::{Command, Request, Response};
use crate::service::{CacheService, Capabilities, Object, RequestContext};

/// Per-session command executor
pub struct Handler<'a> {
    service: &'a dyn CacheService,
    capabilities: Capabilities,
    metrics: &'a Metrics,
    log_requests: bool,

    /// The close hook has already run
    closed: AtomicBool,
}

impl<'a> Handler<'a> {
    pub fn new(service: &'a dyn CacheService, metrics: &'a Metrics, log_requests: bool) -> Self {
        Self {
            capabilities: service.capabilities(),
            service,
            metrics,
            log_requests,
            closed: AtomicBool::new(false),
        }
    }

    /// Execute `request`; `body` is empty unless a put carried one
    pub fn handle(&self, ctx: &RequestContext, request: &Request, body: Bytes) -> Result<Response> {
        let start = Instant::now();
        if self.log_requests {
            ctx.in_scope(|| {
                tracing::debug!(
                    command = %request.command,
                    action = %request.action_hex(),
                    object = %request.object_hex(),
                    size = request.body_size,
                    "B"
                )
            });
        }

        let result = match request.command {
            Command::Get => self.get(ctx, request),
            Command::Put => self.put(ctx, request, body),
            Command::Close => self.close(ctx, request),
            Command::Unknown(ref name) => Err(CacheError::UnknownCommand(name.clone())),
        };

        if self.log_requests {
            let (miss, disk_path, err) = match &result {
                Ok(rsp) => (rsp.miss, rsp.disk_path.clone(), None),
                Err(e) => (false, None, Some(e.to_string())),
            };
            ctx.in_scope(|| {
                tracing::debug!(
                    command = %request.command,
                    miss,
                    disk_path = ?disk_path,
                    err = ?err,
                    elapsed = ?start.elapsed(),
                    "E"
                )
            });
        }
        result
    }

    // =========================================================================
    // get
    // =========================================================================

    fn get(&self, ctx: &RequestContext, request: &Request) -> Result<Response> {
        self.metrics.get_requests.incr();
        let result = self.lookup(ctx, request);
        match &result {
            Ok(rsp) if rsp.miss => self.metrics.get_misses.incr(),
            Err(_) => self.metrics.get_errors.incr(),
            Ok(_) => {}
        }
        result
    }

    fn lookup(&self, ctx: &RequestContext, request: &Request) -> Result<Response> {
        if !self.capabilities.get {
            return Ok(Response::miss(request.id));
        }

        let action = request.action_hex();
        let entry = match ctx.in_scope(|| self.service.get(ctx, &action)) {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(Response::miss(request.id)),
            Err(e) => return Err(CacheError::context(format!("get {}", action), e)),
        };

        if entry.object_id.is_empty() {
            return Err(CacheError::Backend("get: empty object ID".to_string()));
        }
        let object_id = hex::decode(&entry.object_id)
            .map_err(|e| CacheError::Backend(format!("get: invalid object ID: {}", e)))?;

        let meta = match fs::metadata(&entry.disk_path) {
            Ok(meta) => meta,
            // Pruning or a concurrent put got there first
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Response::miss(request.id))
            }
            Err(e) => return Err(CacheError::context("get: verify path", e)),
        };
        if !meta.is_file() {
            return Err(CacheError::Backend(format!(
                "get: verify path: not a regular file: {:?}",
                entry.disk_path
            )));
        }
        let modified = meta
            .modified()
            .map_err(|e| CacheError::context("get: verify path", e))?;

        let size = meta.len() as i64;
        self.metrics.get_hits.incr();
        self.metrics.get_hit_bytes.add(size);

        Ok(Response {
            id: request.id,
            object_id,
            size,
            time: Some(DateTime::<Utc>::from(modified)),
            disk_path: Some(entry.disk_path),
            ..Response::default()
        })
    }

    // =========================================================================
    // put
    // =========================================================================

    fn put(&self, ctx: &RequestContext, request: &Request, body: Bytes) -> Result<Response> {
        self.metrics.put_requests.incr();
        let result = self.store(ctx, request, body);
        if result.is_err() {
            self.metrics.put_errors.incr();
        }
        result
    }

    fn store(&self, ctx: &RequestContext, request: &Request, body: Bytes) -> Result<Response> {
        if !self.capabilities.put {
            return Err(CacheError::ReadOnly);
        }

        let action = request.action_hex();
        let mut object = Object {
            action_id: action.clone(),
            object_id: request.object_hex(),
            size: request.body_size,
            body: Box::new(body.reader()),
            mod_time: None,
        };
        let stored = ctx.in_scope(|| self.service.put(ctx, &mut object));
        // Whatever the backend left unread is discarded.
        let _ = io::copy(&mut object.body, &mut io::sink());
        let disk_path = stored.map_err(|e| CacheError::context(format!("put {}", action), e))?;

        let meta = fs::metadata(&disk_path)
            .map_err(|e| CacheError::context(format!("put action {} verify", action), e))?;
        if meta.len() as i64 != request.body_size {
            return Err(CacheError::Backend(format!(
                "put action {} verify {:?}: got {} bytes, want {}",
                action,
                disk_path,
                meta.len(),
                request.body_size
            )));
        }

        self.metrics.put_bytes.add(meta.len() as i64);
        Ok(Response {
            disk_path: Some(disk_path),
            ..Response::ok(request.id)
        })
    }

    // =========================================================================
    // close
    // =========================================================================

    fn close(&self, ctx: &RequestContext, request: &Request) -> Result<Response> {
        if !self.capabilities.close {
            return Ok(Response::ok(request.id));
        }
        if self.closed.swap(true, Ordering::SeqCst) {
            ctx.in_scope(|| tracing::debug!("close hook already ran, skipping"));
            return Ok(Response::ok(request.id));
        }
        ctx.in_scope(|| self.service.close(ctx))?;
        Ok(Response::ok(request.id))
    }
}
