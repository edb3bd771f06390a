//! Protocol Module
//!
//! Defines the wire protocol between the build tool and the cache helper.
//!
//! ## Protocol Format (newline-delimited JSON)
//!
//! ### Session
//! ```text
//!  helper ──► {"ID":0,"KnownCommands":["get","put","close"]}   banner
//!  tool   ──► {"ID":1,"Command":"get","ActionID":"AQ=="}
//!  tool   ──► {"ID":2,"Command":"put",...,"BodySize":5}
//!  tool   ──► "eHl6enk="                                       put body
//!  helper ──► {"ID":2,"DiskPath":"/cache/object/0b/0b1ec7"}    any order
//!  helper ──► {"ID":1,"Miss":true}
//! ```
//!
//! ### Commands
//! - get:   ActionID
//! - put:   ActionID, ObjectID, BodySize (+ body record)
//! - close: no fields
//!
//! ### Response Fields
//! - Err:      request failed (the session continues)
//! - Miss:     get found no entry
//! - ObjectID, Size, Time, DiskPath: get hit
//! - DiskPath: put success

mod codec;
mod command;
mod response;

pub use codec::{
    decode_request, decode_response, encode_body, encode_request, encode_response, read_body,
    read_request, read_response, write_request, write_response,
};
pub use command::{Command, Request};
pub use response::Response;
