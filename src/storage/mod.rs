//! Storage Module
//!
//! Content-addressed disk store and its garbage collector.
//!
//! ## Responsibilities
//! - Persist action → object mappings and object bytes
//! - Atomic writes via temp file + rename
//! - Shard files by id prefix to bound directory fan-out
//! - Mark-and-sweep pruning at session close
//!
//! ## Directory Layout
//! ```text
//! <root>/
//! ├── action/
//! │   └── 03/
//! │       └── 03            "0b1ec7 5\n"   (mtime = last put)
//! └── object/
//!     └── 0b/
//!         └── 0b1ec7        raw object bytes
//! ```

mod gc;
mod layout;
mod store;

pub use gc::{GarbageCollector, PruneStats};
pub use layout::{validate_id, ActionRecord, ACTION_DIR, OBJECT_DIR, SHARD_PREFIX_LEN};
pub use store::DiskStore;
