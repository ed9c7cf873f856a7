//! Channel names used on the message bus.
//!
//! Server-side code addresses channels by their bare name (`/indexDocument/request`).
//! Before a message hits the wire the name is prefixed with [`CHANNEL_PREFIX`];
//! the MATLAB-side helper strips the prefix when routing. Response channels for
//! correlated request/response pairs are formed by appending a process-unique
//! id with [`with_id`].

/// Namespace prefix applied to every channel on the wire.
pub const CHANNEL_PREFIX: &str = "/matls";

/// Published once after attaching to an already-running MATLAB to kickstart
/// status callbacks on the helper side.
pub const STARTUP: &str = "/startup";

pub const INDEX_DOCUMENT_REQUEST: &str = "/indexDocument/request";
pub const INDEX_DOCUMENT_RESPONSE: &str = "/indexDocument/response";

pub const INDEX_WORKSPACE_REQUEST: &str = "/indexWorkspace/request";
pub const INDEX_WORKSPACE_RESPONSE: &str = "/indexWorkspace/response";

pub const IDENTIFIER_DEFINITION_REQUEST: &str = "/findIdentifierDefinition/request";
pub const IDENTIFIER_DEFINITION_RESPONSE: &str = "/findIdentifierDefinition/response";

pub const FORMAT_REQUEST: &str = "/formatDocument/request";
pub const FORMAT_RESPONSE: &str = "/formatDocument/response";

pub const LINT_REQUEST: &str = "/linting/request";
pub const LINT_RESPONSE: &str = "/linting/response";

pub const LINT_END_STATEMENT_REQUEST: &str = "/linting/endstatement/request";
pub const LINT_END_STATEMENT_RESPONSE: &str = "/linting/endstatement/response";

pub const COMPLETIONS_REQUEST: &str = "/completions/request";
pub const COMPLETIONS_RESPONSE: &str = "/completions/response";

pub const FOLD_REQUEST: &str = "/foldDocument/request";
pub const FOLD_RESPONSE: &str = "/foldDocument/response";

/// Prefix a bare channel name for the wire.
pub fn to_wire(channel: &str) -> String {
    format!("{}{}", CHANNEL_PREFIX, channel)
}

/// Strip the wire prefix from an incoming channel name.
///
/// Returns `None` for channels outside the matls namespace; those are not
/// addressed to us and are dropped by the dispatcher.
pub fn from_wire(channel: &str) -> Option<&str> {
    channel.strip_prefix(CHANNEL_PREFIX)
}

/// Form a correlated response channel from a base channel and an id.
pub fn with_id(base: &str, id: &str) -> String {
    format!("{}/{}", base, id)
}
