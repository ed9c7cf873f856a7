//! Wire protocol shared between the matls server and the MATLAB-side helper.
//!
//! This crate defines the pieces both ends of the message bus must agree on:
//! - Channel names and the namespace prefix applied on the wire
//! - The JSON envelope that carries a payload on a channel
//! - Typed payload structs for every request/response pair
//! - Source ranges and the raw code-data structure produced by the analyzer

pub mod channels;
pub mod envelope;
pub mod types;

pub use envelope::{Envelope, EnvelopeError, Headers};
pub use types::{RawClassInfo, RawCodeData, RawFunctionInfo, RawMemberInfo, Range};
