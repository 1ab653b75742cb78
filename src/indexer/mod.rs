//! Source tree walking, AST-aware chunking, and filesystem watching for the
//! semantic code index.

pub mod chunker;
pub mod engine;
pub mod walker;
pub mod watcher;

pub use chunker::{chunk_file, ChunkerError};
pub use engine::{index_project, rebuild_from_store, reindex_file, remove_file_from_index, IndexStats};
pub use walker::{walk_project, WalkedFile};
pub use watcher::{spawn_watcher, FileChangeEvent, FileChangeKind};
