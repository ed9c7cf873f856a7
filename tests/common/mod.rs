//! Shared test harness: an in-process stand-in for the MATLAB helper.
//!
//! Tests adopt one side of a loopback transport into the session and drive
//! the other side with a responder function, so every bus round-trip runs
//! for real without an interpreter.
#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Value;

use matls::bus::{loopback, BusTransport, MessageBus};
use matls::config::{ConnectionTiming, Settings, SettingsHandle};
use matls::index::SymbolIndex;
use matls::matlab::MatlabSession;
use matls::nav::{NavigationResolver, PathResolver};
use matls_protocol::channels;
use matls_protocol::envelope::Envelope;
use matls_protocol::types::{RawClassInfo, RawCodeData, RawFunctionInfo, RawMemberInfo, Range};
use tower_lsp::lsp_types::Url;

/// Replies produced by the fake helper for one incoming message: a list of
/// `(bare channel, payload)` pairs sent back to the server.
pub type Replies = Vec<(String, Value)>;

/// Everything a bus-backed test needs.
pub struct Harness {
    pub session: Arc<MatlabSession>,
    pub index: Arc<SymbolIndex>,
    pub paths: Arc<PathResolver>,
}

impl Harness {
    /// A connected session whose peer answers with `respond`.
    pub async fn connected<F>(respond: F) -> Self
    where
        F: Fn(&str, &Value) -> Replies + Send + 'static,
    {
        let settings = Arc::new(SettingsHandle::new(Settings::default()));
        let session = MatlabSession::new(settings);
        let (ours, theirs) = loopback();
        session.adopt_bus(MessageBus::new(ours, None)).await;
        spawn_helper(theirs, respond);
        Self::from_session(session)
    }

    /// A session that will never reach an interpreter.
    pub fn offline() -> Self {
        let settings = Arc::new(SettingsHandle::new(Settings {
            connection_timing: ConnectionTiming::Never,
            ..Settings::default()
        }));
        Self::from_session(MatlabSession::new(settings))
    }

    fn from_session(session: Arc<MatlabSession>) -> Self {
        let index = Arc::new(SymbolIndex::new());
        let paths = Arc::new(PathResolver::new(Arc::clone(&session)));
        Harness {
            session,
            index,
            paths,
        }
    }

    pub fn resolver(&self) -> NavigationResolver {
        NavigationResolver::new(Arc::clone(&self.index), Arc::clone(&self.paths))
    }
}

/// Run the fake helper over the peer transport.
pub fn spawn_helper<F>(mut transport: BusTransport, respond: F)
where
    F: Fn(&str, &Value) -> Replies + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(envelope) = transport.incoming.recv().await {
            let Some(channel) = channels::from_wire(&envelope.channel) else {
                continue;
            };
            for (reply_channel, payload) in respond(channel, &envelope.payload) {
                let reply = Envelope::new(channels::to_wire(&reply_channel), payload);
                if transport.outgoing.send(reply).is_err() {
                    return;
                }
            }
        }
    });
}

/// Build the correlated reply for a request payload carrying a `channelId`.
pub fn correlated_reply(response_base: &str, request_payload: &Value, body: Value) -> Replies {
    let id = request_payload["channelId"].as_str().unwrap_or_default();
    vec![(format!("{response_base}/{id}"), body)]
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn uri(path: &str) -> Url {
    Url::from_file_path(path).expect("absolute fixture path")
}

pub fn range(line_start: u32, char_start: u32, line_end: u32, char_end: u32) -> Range {
    Range::new(line_start, char_start, line_end, char_end)
}

pub fn function_raw(name: &str, body: Range, declaration: Range) -> RawFunctionInfo {
    RawFunctionInfo {
        name: name.to_string(),
        range: body,
        declaration: Some(declaration),
        is_public: true,
        ..RawFunctionInfo::default()
    }
}

pub fn method_raw(
    name: &str,
    class: &str,
    body: Range,
    declaration: Range,
    is_prototype: bool,
) -> RawFunctionInfo {
    RawFunctionInfo {
        parent_class: class.to_string(),
        is_prototype,
        ..function_raw(name, body, declaration)
    }
}

pub fn property_raw(name: &str, class: &str, at: Range) -> RawMemberInfo {
    RawMemberInfo {
        name: name.to_string(),
        range: at,
        parent_class: class.to_string(),
        is_public: true,
    }
}

pub fn classdef_raw(
    name: &str,
    folder: &str,
    properties: Vec<RawMemberInfo>,
    methods: Vec<RawFunctionInfo>,
) -> RawCodeData {
    RawCodeData {
        class_info: RawClassInfo {
            is_class_def: true,
            has_class_info: true,
            name: name.to_string(),
            range: range(1, 0, 40, 3),
            declaration: Some(range(1, 0, 1, 10 + name.len() as u32)),
            class_def_folder: folder.to_string(),
            properties,
            ..RawClassInfo::default()
        },
        function_info: methods,
        ..RawCodeData::default()
    }
}

/// Code data for a non-classdef file contributing to a class folder.
pub fn class_sibling_raw(class: &str, folder: &str, methods: Vec<RawFunctionInfo>) -> RawCodeData {
    RawCodeData {
        class_info: RawClassInfo {
            has_class_info: true,
            name: class.to_string(),
            class_def_folder: folder.to_string(),
            ..RawClassInfo::default()
        },
        function_info: methods,
        ..RawCodeData::default()
    }
}

pub fn script_with_references(references: Vec<(&str, Range)>) -> RawCodeData {
    RawCodeData {
        references: references
            .into_iter()
            .map(|(name, at)| (name.to_string(), at))
            .collect(),
        ..RawCodeData::default()
    }
}
