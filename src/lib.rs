//! # cacheprog
//!
//! A cache helper for build toolchains:
//! - Line-oriented JSON protocol over stdin/stdout
//! - Concurrent, bounded request handling with out-of-order responses
//! - Content-addressed disk store with atomic writes
//! - Mark-and-sweep pruning when the build tool closes the session
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Build Tool                               │
//! │              (requests on stdin, responses on stdout)        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                  Session / Dispatcher                        │
//! │        (sequential decode, bounded worker threads)           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────┐
//!   │  Handlers   │─────────►│ CacheService │
//!   │ (get/put/   │          │   (trait)    │
//!   │   close)    │          └──────┬───────┘
//!   └─────────────┘                 │
//!                                   ▼
//!                           ┌──────────────┐
//!                           │  DiskStore   │
//!                           │  + GC        │
//!                           └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod metrics;

pub mod protocol;
pub mod server;
pub mod service;
pub mod storage;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::Config;
pub use error::{CacheError, Result};
pub use metrics::{Metrics, MetricsSnapshot};
pub use server::Server;
pub use service::{CacheEntry, CacheService, Capabilities, Object, RequestContext};
pub use storage::DiskStore;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of cacheprog
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
