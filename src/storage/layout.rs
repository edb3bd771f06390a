//! On-disk layout
//!
//! Path derivation, id validation and the action record format.

use std::path::{Component, Path, PathBuf};

use crate::error::{CacheError, Result};

/// Subdirectory holding action records
pub const ACTION_DIR: &str = "action";

/// Subdirectory holding object files
pub const OBJECT_DIR: &str = "object";

/// Number of leading hex digits used as the shard directory name
pub const SHARD_PREFIX_LEN: usize = 2;

/// Prefix of in-flight temporary files; never a valid id
pub(crate) const TEMP_PREFIX: &str = ".tmp-";

/// Check that `id` is lower-case hex and long enough to shard
pub fn validate_id(id: &str) -> Result<()> {
    let valid = id.len() >= SHARD_PREFIX_LEN
        && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidId(id.to_string()))
    }
}

/// `root/<kind>/<first two digits>/<id>`; `id` must already be validated
pub fn shard_path(root: &Path, kind: &str, id: &str) -> PathBuf {
    root.join(kind).join(&id[..SHARD_PREFIX_LEN]).join(id)
}

/// Recover the id from a path of the shape `root/<kind>/<xx>/<id>`
///
/// Returns `None` for anything else, including temporary files and ids that
/// sit in the wrong shard.
pub fn id_from_path(root: &Path, kind: &str, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;

    match parts.as_slice() {
        [k, shard, id] if *k == kind => {
            validate_id(id).ok()?;
            (id.get(..SHARD_PREFIX_LEN)? == *shard).then(|| id.to_string())
        }
        _ => None,
    }
}

/// Contents of an action file: the object that currently satisfies it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    pub object_id: String,
    pub size: i64,
}

impl ActionRecord {
    pub fn new(object_id: impl Into<String>, size: i64) -> Self {
        Self {
            object_id: object_id.into(),
            size,
        }
    }

    /// Parse `"<objectID> <size>"`; `action_id` only names the record in errors
    pub fn parse(action_id: &str, data: &str) -> Result<Self> {
        let fields: Vec<&str> = data.split_whitespace().collect();
        let [object_id, size] = fields.as_slice() else {
            return Err(CacheError::InvalidRecord(action_id.to_string()));
        };
        let size = size
            .parse::<i64>()
            .map_err(|_| CacheError::InvalidRecord(action_id.to_string()))?;
        Ok(Self::new(*object_id, size))
    }

    /// Serialized form, newline-terminated
    pub fn to_line(&self) -> String {
        format!("{} {}\n", self.object_id, self.size)
    }
}
