//! Indexers feeding the symbol store.
//!
//! The document indexer keeps open buffers fresh with per-URI debouncing;
//! the workspace indexer bulk-loads folder trees through a streamed,
//! request-id-scoped response channel.

pub mod document;
pub mod workspace;

pub use document::DocumentIndexer;
pub use workspace::WorkspaceIndexer;
