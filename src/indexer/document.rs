//! Debounced indexing of open buffers.
//!
//! Keystrokes call [`DocumentIndexer::queue_index`]; an armed timer for the
//! same URI is cancelled and re-armed, so a burst of edits produces exactly
//! one index request after the last one. Indexing does nothing while the
//! interpreter is disconnected — the server re-queues all open documents
//! when the connection comes back.
//!
//! A freshly indexed class triggers closure expansion: the class folder is
//! handed to the workspace indexer so sibling method files get indexed, and
//! base classes are resolved through the path resolver, whose replies carry
//! the base files' code data so no second round-trip is needed.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use matls_protocol::channels;
use matls_protocol::types::{IndexDocumentRequest, RawCodeData};
use tokio::task::JoinHandle;
use tower_lsp::lsp_types::Url;
use tracing::debug;

use crate::error::ServerError;
use crate::index::{FileCodeData, IndexOrigin, SymbolIndex};
use crate::indexer::workspace::WorkspaceIndexer;
use crate::matlab::MatlabSession;
use crate::nav::path_resolver::PathResolver;

/// Quiet period after the last keystroke before a buffer is re-indexed.
const DEBOUNCE: Duration = Duration::from_millis(500);

/// Upper bound on one document-index round-trip.
const INDEX_TIMEOUT: Duration = Duration::from_secs(30);

/// Debounced indexer for open documents.
pub struct DocumentIndexer {
    session: Arc<MatlabSession>,
    index: Arc<SymbolIndex>,
    workspace: Arc<WorkspaceIndexer>,
    paths: Arc<PathResolver>,
    pending: DashMap<Url, JoinHandle<()>>,
    debounce: Duration,
}

impl DocumentIndexer {
    pub fn new(
        session: Arc<MatlabSession>,
        index: Arc<SymbolIndex>,
        workspace: Arc<WorkspaceIndexer>,
        paths: Arc<PathResolver>,
    ) -> Arc<Self> {
        Self::with_debounce(session, index, workspace, paths, DEBOUNCE)
    }

    /// Same, with an explicit debounce interval.
    pub fn with_debounce(
        session: Arc<MatlabSession>,
        index: Arc<SymbolIndex>,
        workspace: Arc<WorkspaceIndexer>,
        paths: Arc<PathResolver>,
        debounce: Duration,
    ) -> Arc<Self> {
        Arc::new(DocumentIndexer {
            session,
            index,
            workspace,
            paths,
            pending: DashMap::new(),
            debounce,
        })
    }

    /// Debounce an index request for `uri`. An already-armed timer for the
    /// same URI is cancelled and re-armed.
    pub fn queue_index(self: &Arc<Self>, uri: Url, text: String) {
        if let Some((_, armed)) = self.pending.remove(&uri) {
            armed.abort();
        }
        let indexer = Arc::clone(self);
        let task_uri = uri.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(indexer.debounce).await;
            if let Err(err) = indexer.index_document(&task_uri, &text).await {
                debug!(uri = %task_uri, error = %err, "document indexing failed");
            }
            indexer.pending.remove(&task_uri);
        });
        self.pending.insert(uri, handle);
    }

    /// Index one document now. Does nothing while disconnected; a stale
    /// result is acceptable because the next keystroke re-queues.
    pub async fn index_document(&self, uri: &Url, text: &str) -> Result<(), ServerError> {
        let Some(bus) = self.session.bus().await else {
            debug!(uri = %uri, "skipping document indexing while disconnected");
            return Ok(());
        };

        let file_path = uri
            .to_file_path()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|_| uri.path().to_string());
        let payload = serde_json::to_value(IndexDocumentRequest {
            code: text.to_string(),
            file_path,
        })?;

        let reply = tokio::time::timeout(
            INDEX_TIMEOUT,
            bus.request(
                channels::INDEX_DOCUMENT_REQUEST,
                channels::INDEX_DOCUMENT_RESPONSE,
                payload,
            ),
        )
        .await
        .map_err(|_| ServerError::Timeout(INDEX_TIMEOUT))??;

        let raw: RawCodeData = serde_json::from_value(reply).map_err(|err| {
            ServerError::malformed(channels::INDEX_DOCUMENT_RESPONSE, err.to_string())
        })?;
        let data = self
            .index
            .parse_and_store(uri.clone(), raw, IndexOrigin::Document);
        self.expand_class_closure(uri, &data).await;
        Ok(())
    }

    /// Index the rest of a class's closure: sibling files of a class folder
    /// and the files defining its base classes.
    async fn expand_class_closure(&self, uri: &Url, data: &FileCodeData) {
        let Some(class_name) = &data.class_name else {
            return;
        };
        let Some(class) = self.index.class(class_name) else {
            return;
        };

        if !class.class_def_folder.is_empty() {
            self.workspace
                .index_folders(vec![class.class_def_folder.clone()])
                .await;
        }

        if class.base_classes.is_empty() {
            return;
        }
        match self.paths.resolve_paths(&class.base_classes, uri).await {
            Ok(resolved) => {
                for result in resolved {
                    if !result.is_found() {
                        continue;
                    }
                    let Some(base_uri) = result.uri else {
                        continue;
                    };
                    // The resolver reply already carries the base file's
                    // code data.
                    if let Some(raw) = result.code_data {
                        self.index
                            .parse_and_store(base_uri, raw, IndexOrigin::Workspace);
                    }
                }
            }
            Err(err) => {
                debug!(error = %err, "base-class resolution unavailable");
            }
        }
    }
}
