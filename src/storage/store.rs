//! Disk Store
//!
//! Content-addressed cache backend over a local directory.
//!
//! ## Responsibilities
//! - Map action ids to (object id, size) records
//! - Hold object bytes, one file per object id
//! - Write every file atomically (temp file + rename)
//! - Treat records whose object is missing or resized as misses
//! - Prune expired records and orphaned objects at session close

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::metrics::{Counter, MetricsScope};
use crate::service::{CacheEntry, CacheService, Capabilities, Object, RequestContext};

use super::gc::{GarbageCollector, PruneStats};
use super::layout::{self, ActionRecord, ACTION_DIR, OBJECT_DIR, TEMP_PREFIX};

/// Host-scope counters maintained by the store
#[derive(Debug)]
struct PruneCounters {
    runs: Arc<Counter>,
    actions_pruned: Arc<Counter>,
    objects_pruned: Arc<Counter>,
    bytes_pruned: Arc<Counter>,
}

impl PruneCounters {
    fn register(scope: &MetricsScope) -> Self {
        Self {
            runs: scope.counter("prune_runs"),
            actions_pruned: scope.counter("actions_pruned"),
            objects_pruned: scope.counter("objects_pruned"),
            bytes_pruned: scope.counter("bytes_pruned"),
        }
    }

    fn record(&self, stats: &PruneStats) {
        self.runs.incr();
        self.actions_pruned.add(stats.actions_pruned as i64);
        self.objects_pruned.add(stats.objects_pruned as i64);
        self.bytes_pruned.add(stats.bytes_pruned as i64);
    }
}

/// File-backed cache store
///
/// ## Concurrency:
/// - No in-process locks; all methods take `&self`
/// - Each file write is atomic (rename), so readers never see partial data
/// - Concurrent get/put on the same id are not serialized with each other
pub struct DiskStore {
    /// Root directory holding `action/` and `object/`
    root: PathBuf,

    /// Expiry age applied at close; `None` disables pruning
    max_age: Option<Duration>,

    /// Set once by `set_metrics`
    counters: OnceLock<PruneCounters>,
}

impl DiskStore {
    /// Open or create a store rooted at `path`
    ///
    /// A relative `path` is resolved against the current directory, so every
    /// path the store hands out is absolute.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(CacheError::Config("cache directory is empty".to_string()));
        }
        let root = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            max_age: None,
            counters: OnceLock::new(),
        })
    }

    /// Open the store described by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::open(&config.cache_dir)?.with_max_age(config.max_age))
    }

    /// Set the age after which records expire at close
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age.filter(|age| !age.is_zero());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    /// File holding the record for action `id`
    pub fn action_path(&self, id: &str) -> Result<PathBuf> {
        layout::validate_id(id)?;
        Ok(self.action_file(id))
    }

    /// File holding the bytes of object `id`
    pub fn object_path(&self, id: &str) -> Result<PathBuf> {
        layout::validate_id(id)?;
        Ok(self.object_file(id))
    }

    // Callers have validated `id`.
    fn action_file(&self, id: &str) -> PathBuf {
        layout::shard_path(&self.root, ACTION_DIR, id)
    }

    fn object_file(&self, id: &str) -> PathBuf {
        layout::shard_path(&self.root, OBJECT_DIR, id)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Resolve `action_id` to a live object
    ///
    /// Returns:
    /// - `Ok(Some(entry))`: record present, object present with recorded size
    /// - `Ok(None)`: no record, or the record is stale
    /// - `Err(_)`: malformed record or I/O failure
    pub fn lookup(&self, action_id: &str) -> Result<Option<CacheEntry>> {
        layout::validate_id(action_id)?;

        let record = match self.read_action(action_id) {
            Ok(record) => record,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        if layout::validate_id(&record.object_id).is_err() {
            return Err(CacheError::InvalidRecord(action_id.to_string()));
        }

        let disk_path = self.object_file(&record.object_id);
        match fs::metadata(&disk_path) {
            Ok(meta) if meta.is_file() && meta.len() as i64 == record.size => {}
            Ok(_) => {
                tracing::debug!(
                    action = action_id,
                    object = %record.object_id,
                    "object does not match its action record, reporting miss"
                );
                return Ok(None);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        Ok(Some(CacheEntry {
            object_id: record.object_id,
            disk_path,
        }))
    }

    fn read_action(&self, id: &str) -> Result<ActionRecord> {
        let data = fs::read_to_string(self.action_file(id))?;
        ActionRecord::parse(id, &data)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store an object and point its action at it
    ///
    /// The action file is rewritten even when the object is already present,
    /// so its modification time tracks the most recent put.
    pub fn store(&self, object: &mut Object) -> Result<PathBuf> {
        layout::validate_id(&object.action_id)?;
        layout::validate_id(&object.object_id)?;

        let (path, size) = self.write_object(object)?;
        let record = ActionRecord::new(object.object_id.clone(), size);
        self.write_action(&object.action_id, &record)?;
        Ok(path)
    }

    /// Write the object file unless an identical-size copy is already there
    fn write_object(&self, object: &mut Object) -> Result<(PathBuf, i64)> {
        let path = self.object_file(&object.object_id);

        if let Ok(meta) = fs::metadata(&path) {
            if meta.is_file() && meta.len() as i64 == object.size {
                return Ok((path, object.size));
            }
        }

        let written = write_atomic(&path, |file| {
            let n = io::copy(&mut object.body, file)?;
            if let Some(mod_time) = object.mod_time {
                file.set_modified(mod_time)?;
            }
            Ok(n)
        })?;
        Ok((path, written as i64))
    }

    fn write_action(&self, id: &str, record: &ActionRecord) -> Result<()> {
        let path = self.action_file(id);
        write_atomic(&path, |file| file.write_all(record.to_line().as_bytes()))
    }

    // =========================================================================
    // Pruning
    // =========================================================================

    /// Remove records older than `max_age` and every object no surviving
    /// record refers to
    pub fn prune(&self, max_age: Duration) -> Result<PruneStats> {
        let stats = GarbageCollector::new(&self.root, max_age).run()?;
        if let Some(counters) = self.counters.get() {
            counters.record(&stats);
        }
        Ok(stats)
    }
}

/// Write `path` through a temporary file in the same directory, creating the
/// shard directory on first use
fn write_atomic<T>(
    path: &Path,
    fill: impl FnOnce(&mut fs::File) -> io::Result<T>,
) -> Result<T> {
    let dir = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no parent directory: {}", path.display()),
        )
    })?;
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)?;
    let value = fill(tmp.as_file_mut())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(value)
}

impl CacheService for DiskStore {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            get: true,
            put: true,
            close: self.max_age.is_some(),
        }
    }

    fn get(&self, _ctx: &RequestContext, action_id: &str) -> Result<Option<CacheEntry>> {
        self.lookup(action_id)
    }

    fn put(&self, _ctx: &RequestContext, object: &mut Object) -> Result<PathBuf> {
        self.store(object)
    }

    fn close(&self, ctx: &RequestContext) -> Result<()> {
        let Some(max_age) = self.max_age else {
            return Ok(());
        };
        ctx.in_scope(|| {
            tracing::info!("begin cache cleanup ({})", humantime::format_duration(max_age));
            let stats = self.prune(max_age)?;
            tracing::info!(
                actions = stats.actions,
                actions_pruned = stats.actions_pruned,
                objects = stats.objects,
                objects_pruned = stats.objects_pruned,
                bytes_pruned = stats.bytes_pruned,
                elapsed = ?stats.elapsed,
                "cache cleanup done"
            );
            Ok(())
        })
    }

    fn set_metrics(&self, scope: &MetricsScope) {
        let _ = self.counters.set(PruneCounters::register(scope));
    }
}
