//! Cache garbage collection
//!
//! Mark-and-sweep pruning of a disk store:
//! - Mark: walk `action/`, drop records whose object is gone or whose age
//!   exceeds the limit, and remember the objects of the records that stay
//! - Sweep: walk `object/` and delete every object nobody remembered
//!
//! The pass runs once per session from the close hook and is not meant to
//! run concurrently with itself. It may overlap with puts still in flight:
//! an object written after the mark phase finished, for an action the mark
//! phase never saw, can be swept before its record is read back. The next
//! get then reports a miss and the build tool recomputes the action.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use walkdir::WalkDir;

use crate::error::Result;

use super::layout::{self, ActionRecord, ACTION_DIR, OBJECT_DIR};

/// Result of a pruning pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Action records examined
    pub actions: usize,
    /// Action records deleted (expired or stale)
    pub actions_pruned: usize,
    /// Object files examined
    pub objects: usize,
    /// Object files deleted
    pub objects_pruned: usize,
    /// Bytes held by deleted objects
    pub bytes_pruned: u64,
    /// Wall-clock duration of the pass
    pub elapsed: Duration,
}

/// Mark-and-sweep collector over one cache root.
pub struct GarbageCollector {
    root: PathBuf,
    max_age: Duration,
}

impl GarbageCollector {
    pub fn new(root: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            root: root.into(),
            max_age,
        }
    }

    /// Run both phases.
    ///
    /// Unreadable or malformed action records abort the pass; failures to
    /// delete an object are logged and skipped.
    pub fn run(&self) -> Result<PruneStats> {
        let started = Instant::now();
        let now = SystemTime::now();
        let mut stats = PruneStats::default();

        let keep = self.mark(now, &mut stats)?;
        self.sweep(&keep, &mut stats)?;

        stats.elapsed = started.elapsed();
        Ok(stats)
    }

    /// Delete expired or stale action records; return the objects to keep.
    fn mark(&self, now: SystemTime, stats: &mut PruneStats) -> Result<HashSet<String>> {
        let mut keep = HashSet::new();

        for path in self.files_under(ACTION_DIR)? {
            let Some(id) = layout::id_from_path(&self.root, ACTION_DIR, &path) else {
                continue;
            };

            let meta = match fs::metadata(&path) {
                Ok(meta) => meta,
                // Rewritten or removed since the walk listed it
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let record = ActionRecord::parse(&id, &fs::read_to_string(&path)?)?;
            stats.actions += 1;

            let object_present = layout::validate_id(&record.object_id).is_ok()
                && layout::shard_path(&self.root, OBJECT_DIR, &record.object_id).is_file();
            if !object_present {
                tracing::debug!(action = %id, object = %record.object_id, "prune stale action");
                remove_file(&path)?;
                stats.actions_pruned += 1;
                continue;
            }

            let age = now
                .duration_since(meta.modified()?)
                .unwrap_or(Duration::ZERO);
            if age > self.max_age {
                tracing::debug!(action = %id, age = ?age, "expire action");
                remove_file(&path)?;
                stats.actions_pruned += 1;
                continue;
            }

            keep.insert(record.object_id);
        }

        Ok(keep)
    }

    /// Delete every object not in `keep`.
    fn sweep(&self, keep: &HashSet<String>, stats: &mut PruneStats) -> Result<()> {
        for path in self.files_under(OBJECT_DIR)? {
            let Some(id) = layout::id_from_path(&self.root, OBJECT_DIR, &path) else {
                continue;
            };
            stats.objects += 1;
            if keep.contains(&id) {
                continue;
            }

            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!(object = %id, bytes = size, "remove object");
                    stats.objects_pruned += 1;
                    stats.bytes_pruned += size;
                }
                Err(e) => {
                    tracing::warn!(object = %id, error = %e, "remove object failed (ignored)");
                }
            }
        }
        Ok(())
    }

    /// Regular files below `root/<kind>`; a missing directory is empty
    fn files_under(&self, kind: &str) -> Result<Vec<PathBuf>> {
        let dir = self.root.join(kind);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir) {
            let entry = entry?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

/// Remove a file, tolerating a concurrent removal
fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
