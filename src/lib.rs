//! matls: language server for MATLAB code.
//!
//! Editors speak LSP to this server; semantic queries that need live
//! interpreter state (linting, completion, formatting, folding) are delegated
//! over a message bus to a subordinate MATLAB session, while navigation is
//! answered from an in-memory symbol index kept fresh by debounced document
//! indexing and bulk workspace indexing.

// Infrastructure
pub mod config;
pub mod error;

// Message bus to the MATLAB helper
pub mod bus;

// Interpreter lifecycle
pub mod matlab;

// Symbol index and indexers
pub mod index;
pub mod indexer;

// Navigation
pub mod nav;

// Thin feature providers over the bus
pub mod providers;

// LSP front door
pub mod server;
