//! Bulk indexing of workspace folder trees.
//!
//! One request indexes any number of folders: the server subscribes to a
//! response channel scoped by a fresh request id, publishes the folder list,
//! and the helper streams back one message per file, yielding between files
//! so other requests stay responsive. The final message carries a done flag,
//! at which point the subscription is released.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use matls_protocol::channels;
use matls_protocol::types::{IndexWorkspaceRequest, IndexWorkspaceResponse};
use tower_lsp::lsp_types::{ClientCapabilities, Url};
use tracing::{debug, warn};

use crate::bus::Subscription;
use crate::index::{IndexOrigin, SymbolIndex};
use crate::matlab::MatlabSession;

/// Streams folder trees into the symbol index.
pub struct WorkspaceIndexer {
    session: Arc<MatlabSession>,
    index: Arc<SymbolIndex>,
    enabled: AtomicBool,
    next_request: AtomicU64,
}

impl WorkspaceIndexer {
    pub fn new(session: Arc<MatlabSession>, index: Arc<SymbolIndex>) -> Self {
        WorkspaceIndexer {
            session,
            index,
            enabled: AtomicBool::new(false),
            next_request: AtomicU64::new(1),
        }
    }

    /// Enable the component only if the client advertises workspace-folder
    /// support.
    pub fn setup(&self, capabilities: &ClientCapabilities) {
        let supported = capabilities
            .workspace
            .as_ref()
            .and_then(|workspace| workspace.workspace_folders)
            .unwrap_or(false);
        self.enabled.store(supported, Ordering::SeqCst);
        debug!(supported, "workspace indexing");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Index the client's workspace folders. No-op when the component is
    /// disabled or the interpreter is disconnected.
    pub async fn index_workspace(&self, folders: Vec<Url>) {
        if !self.is_enabled() || folders.is_empty() {
            return;
        }
        let paths: Vec<String> = folders
            .iter()
            .filter_map(|uri| uri.to_file_path().ok())
            .map(|path| path.display().to_string())
            .collect();
        self.index_folders(paths).await;
    }

    /// Index the given folders through one streamed request.
    pub async fn index_folders(&self, folders: Vec<String>) {
        if folders.is_empty() {
            return;
        }
        let Some(bus) = self.session.bus().await else {
            debug!("skipping workspace indexing while disconnected");
            return;
        };

        let request_id = self.next_request.fetch_add(1, Ordering::SeqCst);
        let response_channel =
            channels::with_id(channels::INDEX_WORKSPACE_RESPONSE, &request_id.to_string());

        // The handler releases its own subscription on the final message;
        // the slot hands it the handle after subscribing.
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let handler_slot = Arc::clone(&slot);
        let handler_bus = bus.clone();
        let index = Arc::clone(&self.index);

        let subscription = bus.subscribe(&response_channel, move |value| {
            let response: IndexWorkspaceResponse = match serde_json::from_value(value) {
                Ok(response) => response,
                Err(err) => {
                    warn!(error = %err, "malformed workspace-index response");
                    return;
                }
            };
            if !response.file_path.is_empty() {
                match Url::from_file_path(&response.file_path) {
                    Ok(uri) => {
                        index.parse_and_store(uri, response.code_data, IndexOrigin::Workspace);
                    }
                    Err(()) => warn!(path = %response.file_path, "unusable file path"),
                }
            }
            if response.is_done {
                if let Some(subscription) =
                    handler_slot.lock().expect("slot lock poisoned").take()
                {
                    handler_bus.unsubscribe(subscription);
                }
            }
        });

        match subscription {
            Ok(subscription) => {
                *slot.lock().expect("slot lock poisoned") = Some(subscription);
            }
            Err(err) => {
                debug!(error = %err, "cannot subscribe for workspace indexing");
                return;
            }
        }

        debug!(request_id, count = folders.len(), "indexing folders");
        let request = IndexWorkspaceRequest {
            folders,
            request_id,
        };
        match serde_json::to_value(&request) {
            Ok(payload) => bus.publish(channels::INDEX_WORKSPACE_REQUEST, payload),
            Err(err) => warn!(error = %err, "cannot encode workspace-index request"),
        }
    }
}
