//! Cache Service Interface
//!
//! The contract between the protocol engine and a storage backend. The disk
//! store is one implementation; anything else that can map action ids to
//! local object files (a remote store with a local spool, an in-memory store
//! for tests) can be injected in its place.

mod context;

use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::error::Result;
use crate::metrics::MetricsScope;

pub use context::{CancelToken, RequestContext};

/// An object to be stored into the cache
pub struct Object {
    /// Non-empty, lower-case hex
    pub action_id: String,

    /// Non-empty, lower-case hex
    pub object_id: String,

    /// Declared size of `body` in bytes
    pub size: i64,

    /// Exactly `size` bytes of content
    pub body: Box<dyn Read + Send>,

    /// If set, the object file's modification time is set to this
    pub mod_time: Option<SystemTime>,
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("action_id", &self.action_id)
            .field("object_id", &self.object_id)
            .field("size", &self.size)
            .field("mod_time", &self.mod_time)
            .finish_non_exhaustive()
    }
}

/// A cache hit as reported by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Lower-case hex id of the object currently satisfying the action
    pub object_id: String,

    /// Local file holding the object's contents
    pub disk_path: PathBuf,
}

/// Which commands a backend implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub get: bool,
    pub put: bool,
    pub close: bool,
}

impl Capabilities {
    pub const ALL: Capabilities = Capabilities {
        get: true,
        put: true,
        close: true,
    };

    /// Command names for the session banner, in protocol order
    pub fn command_names(&self) -> Vec<String> {
        [("get", self.get), ("put", self.put), ("close", self.close)]
            .into_iter()
            .filter(|(_, enabled)| *enabled)
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

/// Storage backend driven by the protocol engine
///
/// Methods are only called for commands advertised by [`capabilities`];
/// the defaults make a backend that misses every lookup and rejects writes.
///
/// [`capabilities`]: CacheService::capabilities
pub trait CacheService: Send + Sync {
    /// Commands this backend implements
    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    /// Look up the object for `action_id`; `Ok(None)` is a cache miss
    fn get(&self, _ctx: &RequestContext, _action_id: &str) -> Result<Option<CacheEntry>> {
        Ok(None)
    }

    /// Store `object` and return the path of the local file holding it
    ///
    /// The caller drains whatever is left of `object.body` afterwards.
    fn put(&self, _ctx: &RequestContext, _object: &mut Object) -> Result<PathBuf> {
        Err(crate::error::CacheError::ReadOnly)
    }

    /// Called once when the build tool closes the session
    fn close(&self, _ctx: &RequestContext) -> Result<()> {
        Ok(())
    }

    /// Called once at startup so the backend can register its own counters
    fn set_metrics(&self, _scope: &MetricsScope) {}
}
