//! Response definitions
//!
//! Represents responses to the build tool.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::codec::base64_bytes;

/// A response to send to the build tool
///
/// Empty, false and zero fields are left off the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Response {
    /// Echoes the request id; 0 for the banner
    #[serde(rename = "ID", alias = "id")]
    pub id: i64,

    /// Set iff the request failed
    #[serde(rename = "Err", alias = "err", skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,

    /// Banner only: commands this session accepts
    #[serde(
        rename = "KnownCommands",
        alias = "knownCommands",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub known_commands: Vec<String>,

    /// A get found no live entry
    #[serde(rename = "Miss", alias = "miss", skip_serializing_if = "is_false")]
    pub miss: bool,

    /// Object resolved by a get hit
    #[serde(
        rename = "ObjectID",
        alias = "OutputID",
        alias = "objectID",
        with = "base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub object_id: Vec<u8>,

    /// Object size in bytes
    #[serde(rename = "Size", alias = "size", skip_serializing_if = "is_zero")]
    pub size: i64,

    /// Last write of the object file, in UTC
    #[serde(rename = "Time", alias = "time", skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,

    /// Absolute path of the object file
    #[serde(rename = "DiskPath", alias = "diskPath", skip_serializing_if = "Option::is_none")]
    pub disk_path: Option<PathBuf>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

impl Response {
    /// The unsolicited first message of a session
    pub fn banner(known_commands: Vec<String>) -> Self {
        Self {
            id: 0,
            known_commands,
            ..Self::default()
        }
    }

    /// An empty success response
    pub fn ok(id: i64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// A get that found nothing
    pub fn miss(id: i64) -> Self {
        Self {
            id,
            miss: true,
            ..Self::default()
        }
    }

    /// A failed request
    pub fn error(id: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            err: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.err.is_some()
    }
}
