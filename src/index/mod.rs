//! In-memory symbol index.
//!
//! Per-file code data keyed by URI, with per-class aggregates owned in a
//! separate process-wide table so that all files of a class folder
//! contribute to one [`model::ClassInfo`]. The index is ephemeral: it is
//! rebuilt from scratch on every server start.

pub mod model;
pub mod store;

pub use model::{
    ClassInfo, FileCodeData, FunctionInfo, FunctionTable, IndexOrigin, MemberInfo, VariableInfo,
    Visibility,
};
pub use store::SymbolIndex;
