//! MATLAB interpreter lifecycle.
//!
//! Two flavors of connection, chosen by configuration: an owned process the
//! server spawns with a one-shot bootstrap script, and an attached process
//! reached through a configured URL. Either way the result is a live
//! [`crate::bus::MessageBus`] managed by [`session::MatlabSession`].

pub mod launcher;
pub mod session;

pub use session::{ConnectionState, MatlabSession};
