//! Request definitions
//!
//! Represents requests from the build tool.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::codec::base64_bytes;

/// Command named by a request
///
/// Anything the server does not recognize is kept verbatim so the error
/// response can name it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Command {
    Get,
    Put,
    Close,
    Unknown(String),
}

impl Command {
    /// Wire name of the command
    pub fn as_str(&self) -> &str {
        match self {
            Command::Get => "get",
            Command::Put => "put",
            Command::Close => "close",
            Command::Unknown(name) => name,
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Command::Unknown(String::new())
    }
}

impl From<String> for Command {
    fn from(name: String) -> Self {
        match name.as_str() {
            "get" => Command::Get,
            "put" => Command::Put,
            "close" => Command::Close,
            _ => Command::Unknown(name),
        }
    }
}

impl From<Command> for String {
    fn from(command: Command) -> Self {
        match command {
            Command::Unknown(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded request
///
/// Byte fields travel as base64 strings. The body of a `put` is not part of
/// this record: it follows on the next line when `body_size > 0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    /// Unique per process; echoed in the response
    #[serde(rename = "ID", alias = "id")]
    pub id: i64,

    #[serde(rename = "Command", alias = "command")]
    pub command: Command,

    /// Set for get and put
    #[serde(
        rename = "ActionID",
        alias = "actionID",
        with = "base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub action_id: Vec<u8>,

    /// Set for put
    #[serde(
        rename = "ObjectID",
        alias = "objectID",
        alias = "OutputID",
        with = "base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub object_id: Vec<u8>,

    /// Size of the body that follows; zero means no body line
    #[serde(rename = "BodySize", alias = "bodySize", skip_serializing_if = "is_zero")]
    pub body_size: i64,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

impl Request {
    pub fn get(id: i64, action_id: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            command: Command::Get,
            action_id: action_id.into(),
            ..Self::default()
        }
    }

    pub fn put(
        id: i64,
        action_id: impl Into<Vec<u8>>,
        object_id: impl Into<Vec<u8>>,
        body_size: i64,
    ) -> Self {
        Self {
            id,
            command: Command::Put,
            action_id: action_id.into(),
            object_id: object_id.into(),
            body_size,
        }
    }

    pub fn close(id: i64) -> Self {
        Self {
            id,
            command: Command::Close,
            ..Self::default()
        }
    }

    /// Whether a body line follows this request on the wire
    pub fn has_body(&self) -> bool {
        self.command == Command::Put && self.body_size > 0
    }

    /// Lower-case hex form of the action id
    pub fn action_hex(&self) -> String {
        hex::encode(&self.action_id)
    }

    /// Lower-case hex form of the object id
    pub fn object_hex(&self) -> String {
        hex::encode(&self.object_id)
    }
}
