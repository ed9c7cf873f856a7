//! LSP front door.
//!
//! [`Backend`] owns every subsystem as an explicit handle — the interpreter
//! session, the symbol index, both indexers, the navigation resolver, and
//! the thin providers — and translates between LSP types and their inputs.
//! Connection lifecycle transitions are forwarded to the client as
//! `matls/connectionStatus` notifications; a feature that needed the
//! interpreter and could not get one sends `matls/interpreterRequired` and
//! returns an empty result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tower_lsp::jsonrpc::Result as LspResult;
use tower_lsp::lsp_types::notification::Notification;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};
use tracing::{debug, info, warn};

use crate::config::{ConnectionTiming, SettingsHandle};
use crate::error::ServerError;
use crate::index::{SymbolIndex, Visibility};
use crate::indexer::{DocumentIndexer, WorkspaceIndexer};
use crate::matlab::{ConnectionState, MatlabSession};
use crate::nav::resolver::range_to_lsp;
use crate::nav::{NavigationResolver, PathResolver};
use crate::providers::lint::{
    suppression_actions, COMMAND_SUPPRESS_FILE, COMMAND_SUPPRESS_LINE,
};
use crate::providers::{CompletionSupport, FoldingSupport, FormattingSupport, LintingSupport};

/// Quiet period after the last keystroke before a buffer is re-linted.
const LINT_DEBOUNCE: Duration = Duration::from_millis(500);

// ============================================================================
// Client Notifications
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatusParams {
    /// `connecting`, `connected`, or `disconnected`.
    pub status: String,
}

/// Emitted on every connection state transition.
pub enum ConnectionStatusNotification {}

impl Notification for ConnectionStatusNotification {
    type Params = ConnectionStatusParams;
    const METHOD: &'static str = "matls/connectionStatus";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterRequiredParams {
    /// Feature that could not be served.
    pub feature: String,
}

/// Emitted when a feature needs MATLAB but none is available, so the editor
/// may prompt the user.
pub enum InterpreterRequiredNotification {}

impl Notification for InterpreterRequiredNotification {
    type Params = InterpreterRequiredParams;
    const METHOD: &'static str = "matls/interpreterRequired";
}

// ============================================================================
// Backend
// ============================================================================

/// The language server.
pub struct Backend {
    client: Client,
    settings: Arc<SettingsHandle>,
    session: Arc<MatlabSession>,
    index: Arc<SymbolIndex>,
    /// Open buffer text, full-sync.
    documents: Arc<DashMap<Url, String>>,
    document_indexer: Arc<DocumentIndexer>,
    workspace_indexer: Arc<WorkspaceIndexer>,
    navigation: NavigationResolver,
    formatting: FormattingSupport,
    linting: Arc<LintingSupport>,
    completion: CompletionSupport,
    folding: FoldingSupport,
    lint_timers: Arc<DashMap<Url, JoinHandle<()>>>,
}

impl Backend {
    pub fn new(client: Client, settings: Arc<SettingsHandle>) -> Self {
        let session = MatlabSession::new(Arc::clone(&settings));
        let index = Arc::new(SymbolIndex::new());
        let workspace_indexer = Arc::new(WorkspaceIndexer::new(
            Arc::clone(&session),
            Arc::clone(&index),
        ));
        let paths = Arc::new(PathResolver::new(Arc::clone(&session)));
        let document_indexer = DocumentIndexer::new(
            Arc::clone(&session),
            Arc::clone(&index),
            Arc::clone(&workspace_indexer),
            Arc::clone(&paths),
        );
        let navigation = NavigationResolver::new(Arc::clone(&index), paths);

        Backend {
            client,
            settings,
            formatting: FormattingSupport::new(Arc::clone(&session)),
            linting: Arc::new(LintingSupport::new(Arc::clone(&session))),
            completion: CompletionSupport::new(Arc::clone(&session)),
            folding: FoldingSupport::new(Arc::clone(&session)),
            navigation,
            document_indexer,
            workspace_indexer,
            documents: Arc::new(DashMap::new()),
            lint_timers: Arc::new(DashMap::new()),
            index,
            session,
        }
    }

    // ========================================================================
    // Lifecycle plumbing
    // ========================================================================

    /// Forward connection transitions to the client; on `connected`,
    /// re-index every open buffer.
    fn spawn_status_watcher(&self) {
        let client = self.client.clone();
        let mut state_rx = self.session.state();
        let documents = Arc::clone(&self.documents);
        let document_indexer = Arc::clone(&self.document_indexer);
        tokio::spawn(async move {
            let mut last = *state_rx.borrow();
            while state_rx.changed().await.is_ok() {
                let state = *state_rx.borrow_and_update();
                if state == last {
                    continue;
                }
                last = state;
                client
                    .send_notification::<ConnectionStatusNotification>(ConnectionStatusParams {
                        status: state.as_str().to_string(),
                    })
                    .await;
                if state == ConnectionState::Connected {
                    for entry in documents.iter() {
                        document_indexer.queue_index(entry.key().clone(), entry.value().clone());
                    }
                }
            }
        });
    }

    async fn notify_interpreter_required(&self, feature: &str) {
        self.client
            .send_notification::<InterpreterRequiredNotification>(InterpreterRequiredParams {
                feature: feature.to_string(),
            })
            .await;
    }

    /// Collapse a provider error to an empty result, telling the client when
    /// the cause was a missing interpreter.
    async fn or_empty<T>(&self, feature: &str, result: Result<T, ServerError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) if err.needs_interpreter() => {
                self.notify_interpreter_required(feature).await;
                None
            }
            Err(err) => {
                debug!(feature, error = %err, "feature unavailable");
                None
            }
        }
    }

    // ========================================================================
    // Documents
    // ========================================================================

    fn on_document_change(&self, uri: Url, text: String) {
        self.documents.insert(uri.clone(), text.clone());
        self.document_indexer.queue_index(uri.clone(), text.clone());
        self.schedule_lint(uri, text);
    }

    /// Debounced lint-and-publish for one buffer.
    fn schedule_lint(&self, uri: Url, text: String) {
        if let Some((_, armed)) = self.lint_timers.remove(&uri) {
            armed.abort();
        }
        let client = self.client.clone();
        let linting = Arc::clone(&self.linting);
        let timers = Arc::clone(&self.lint_timers);
        let task_uri = uri.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(LINT_DEBOUNCE).await;
            let file_path = file_path_of(&task_uri);
            match linting.lint_document(&text, &file_path).await {
                Ok(diagnostics) => {
                    client
                        .publish_diagnostics(task_uri.clone(), diagnostics, None)
                        .await;
                }
                Err(err) => debug!(uri = %task_uri, error = %err, "linting unavailable"),
            }
            timers.remove(&task_uri);
        });
        self.lint_timers.insert(uri, handle);
    }

    fn document_text(&self, uri: &Url) -> Option<String> {
        self.documents.get(uri).map(|entry| entry.clone())
    }

    fn line_text(&self, uri: &Url, line: u32) -> Option<String> {
        let text = self.documents.get(uri)?;
        text.lines().nth(line as usize).map(str::to_string)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// `[uri, line, id]` → apply a suppression pragma workspace edit.
    async fn run_suppression(&self, arguments: &[Value], file_wide: bool) {
        let Some(uri) = arguments
            .first()
            .and_then(Value::as_str)
            .and_then(|s| Url::parse(s).ok())
        else {
            warn!("suppression command missing document URI");
            return;
        };
        let Some(line) = arguments.get(1).and_then(Value::as_u64) else {
            warn!("suppression command missing line");
            return;
        };
        let Some(id) = arguments.get(2).and_then(Value::as_str) else {
            warn!("suppression command missing lint id");
            return;
        };
        let Some(text) = self.document_text(&uri) else {
            return;
        };

        let edit = self
            .linting
            .suppression_edit(&text, line as u32, id, file_wide)
            .await;
        match edit {
            Ok(Some(edit)) => {
                let mut changes = HashMap::new();
                changes.insert(uri, vec![edit]);
                let _ = self
                    .client
                    .apply_edit(WorkspaceEdit {
                        changes: Some(changes),
                        ..WorkspaceEdit::default()
                    })
                    .await;
            }
            Ok(None) => {}
            Err(err) if err.needs_interpreter() => {
                self.notify_interpreter_required("diagnostic suppression").await;
            }
            Err(err) => debug!(error = %err, "suppression edit failed"),
        }
    }

    /// Document symbols derived from the index, no interpreter round-trip.
    #[allow(deprecated)]
    fn collect_document_symbols(&self, uri: &Url) -> Option<Vec<DocumentSymbol>> {
        let data = self.index.get(uri)?;
        let mut symbols = Vec::new();

        if let Some(class) = data
            .class_name
            .as_deref()
            .filter(|_| data.is_class_def)
            .and_then(|name| self.index.class(name))
        {
            let mut children = Vec::new();
            for member in class.properties.values() {
                children.push(DocumentSymbol {
                    name: member.name.clone(),
                    detail: None,
                    kind: SymbolKind::PROPERTY,
                    tags: None,
                    deprecated: None,
                    range: range_to_lsp(member.range),
                    selection_range: range_to_lsp(member.range),
                    children: None,
                });
            }
            for member in class.enumerations.values() {
                children.push(DocumentSymbol {
                    name: member.name.clone(),
                    detail: None,
                    kind: SymbolKind::ENUM_MEMBER,
                    tags: None,
                    deprecated: None,
                    range: range_to_lsp(member.range),
                    selection_range: range_to_lsp(member.range),
                    children: None,
                });
            }
            for method in class.methods.iter() {
                if method.file_uri.as_ref() != Some(uri) {
                    continue;
                }
                children.push(DocumentSymbol {
                    name: method.name.clone(),
                    detail: None,
                    kind: SymbolKind::METHOD,
                    tags: None,
                    deprecated: None,
                    range: range_to_lsp(method.range),
                    selection_range: range_to_lsp(method.definition_range()),
                    children: None,
                });
            }
            symbols.push(DocumentSymbol {
                name: class.name.clone(),
                detail: None,
                kind: SymbolKind::CLASS,
                tags: None,
                deprecated: None,
                range: range_to_lsp(class.range),
                selection_range: range_to_lsp(class.declaration.unwrap_or(class.range)),
                children: Some(children),
            });
        } else {
            for function in data.functions.iter() {
                let kind = if function.visibility == Visibility::Private {
                    SymbolKind::FUNCTION
                } else if function.parent_class.is_empty() {
                    SymbolKind::FUNCTION
                } else {
                    SymbolKind::METHOD
                };
                symbols.push(DocumentSymbol {
                    name: function.name.clone(),
                    detail: None,
                    kind,
                    tags: None,
                    deprecated: None,
                    range: range_to_lsp(function.range),
                    selection_range: range_to_lsp(function.definition_range()),
                    children: None,
                });
            }
        }
        Some(symbols)
    }
}

fn file_path_of(uri: &Url) -> String {
    uri.to_file_path()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|_| uri.path().to_string())
}

// ============================================================================
// LanguageServer
// ============================================================================

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> LspResult<InitializeResult> {
        if let Some(options) = params.initialization_options {
            self.settings.apply_configuration(options);
        }
        self.workspace_indexer.setup(&params.capabilities);

        Ok(InitializeResult {
            server_info: Some(ServerInfo {
                name: "matls".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(
                    TextDocumentSyncOptions {
                        open_close: Some(true),
                        change: Some(TextDocumentSyncKind::FULL),
                        ..TextDocumentSyncOptions::default()
                    },
                )),
                document_formatting_provider: Some(OneOf::Left(true)),
                code_action_provider: Some(CodeActionProviderCapability::Simple(true)),
                completion_provider: Some(CompletionOptions {
                    resolve_provider: Some(false),
                    trigger_characters: Some(
                        [".", "(", ",", "/", "\\", " "]
                            .iter()
                            .map(|s| s.to_string())
                            .collect(),
                    ),
                    ..CompletionOptions::default()
                }),
                signature_help_provider: Some(SignatureHelpOptions {
                    trigger_characters: Some(vec!["(".to_string(), ",".to_string()]),
                    retrigger_characters: None,
                    work_done_progress_options: WorkDoneProgressOptions::default(),
                }),
                definition_provider: Some(OneOf::Left(true)),
                references_provider: Some(OneOf::Left(true)),
                document_symbol_provider: Some(OneOf::Left(true)),
                folding_range_provider: Some(FoldingRangeProviderCapability::Simple(true)),
                execute_command_provider: Some(ExecuteCommandOptions {
                    commands: vec![
                        COMMAND_SUPPRESS_LINE.to_string(),
                        COMMAND_SUPPRESS_FILE.to_string(),
                    ],
                    work_done_progress_options: WorkDoneProgressOptions::default(),
                }),
                workspace: Some(WorkspaceServerCapabilities {
                    workspace_folders: Some(WorkspaceFoldersServerCapabilities {
                        supported: Some(true),
                        change_notifications: Some(OneOf::Left(true)),
                    }),
                    file_operations: None,
                }),
                ..ServerCapabilities::default()
            },
            ..InitializeResult::default()
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        info!("client initialized");
        self.spawn_status_watcher();

        // Client-pushed configuration wins over launch flags.
        if let Ok(mut values) = self
            .client
            .configuration(vec![ConfigurationItem {
                scope_uri: None,
                section: Some("matlab".to_string()),
            }])
            .await
        {
            if let Some(value) = values.pop() {
                if !value.is_null() {
                    self.settings.apply_configuration(value);
                }
            }
        }

        let settings = self.settings.get();
        let session = Arc::clone(&self.session);
        let workspace_indexer = Arc::clone(&self.workspace_indexer);
        let client = self.client.clone();
        tokio::spawn(async move {
            if settings.connection_timing == ConnectionTiming::OnStart {
                if let Err(err) = session.ensure_connection().await {
                    warn!(error = %err, "MATLAB connection failed at startup");
                }
            }
            if settings.index_workspace {
                if let Ok(Some(folders)) = client.workspace_folders().await {
                    workspace_indexer
                        .index_workspace(folders.into_iter().map(|f| f.uri).collect())
                        .await;
                }
            }
        });
    }

    async fn shutdown(&self) -> LspResult<()> {
        self.session.shutdown().await;
        Ok(())
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        let section = params
            .settings
            .get("matlab")
            .cloned()
            .unwrap_or(params.settings);
        if !section.is_null() {
            self.settings.apply_configuration(section);
        }
    }

    async fn did_change_workspace_folders(&self, params: DidChangeWorkspaceFoldersParams) {
        if !self.settings.get().index_workspace {
            return;
        }
        let added: Vec<Url> = params.event.added.into_iter().map(|f| f.uri).collect();
        self.workspace_indexer.index_workspace(added).await;
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        self.on_document_change(params.text_document.uri, params.text_document.text);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let Some(change) = params.content_changes.into_iter().next_back() else {
            return;
        };
        self.on_document_change(params.text_document.uri, change.text);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.documents.remove(&uri);
        if let Some((_, armed)) = self.lint_timers.remove(&uri) {
            armed.abort();
        }
        self.index.clear(&uri);
        self.client.publish_diagnostics(uri, Vec::new(), None).await;
    }

    async fn formatting(
        &self,
        params: DocumentFormattingParams,
    ) -> LspResult<Option<Vec<TextEdit>>> {
        let uri = params.text_document.uri;
        let Some(text) = self.document_text(&uri) else {
            return Ok(None);
        };

        let result = self.formatting.format_document(&text, &params.options).await;
        let Some(formatted) = self.or_empty("formatting", result).await.flatten() else {
            return Ok(None);
        };
        let end_line = text.lines().count() as u32 + 1;
        Ok(Some(vec![TextEdit {
            range: Range {
                start: Position::new(0, 0),
                end: Position::new(end_line, 0),
            },
            new_text: formatted,
        }]))
    }

    async fn completion(&self, params: CompletionParams) -> LspResult<Option<CompletionResponse>> {
        let position = params.text_document_position.position;
        let uri = params.text_document_position.text_document.uri;
        let Some(text) = self.document_text(&uri) else {
            return Ok(None);
        };

        let result = self
            .completion
            .completion_items(&text, &file_path_of(&uri), position)
            .await;
        Ok(self
            .or_empty("completion", result)
            .await
            .map(CompletionResponse::Array))
    }

    async fn signature_help(
        &self,
        params: SignatureHelpParams,
    ) -> LspResult<Option<SignatureHelp>> {
        let position = params.text_document_position_params.position;
        let uri = params.text_document_position_params.text_document.uri;
        let Some(text) = self.document_text(&uri) else {
            return Ok(None);
        };

        let result = self
            .completion
            .signature_help(&text, &file_path_of(&uri), position)
            .await;
        Ok(self.or_empty("signature help", result).await.flatten())
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> LspResult<Option<GotoDefinitionResponse>> {
        let position = params.text_document_position_params.position;
        let uri = params.text_document_position_params.text_document.uri;
        let Some(line_text) = self.line_text(&uri, position.line) else {
            return Ok(None);
        };

        let locations = self
            .navigation
            .find_definition(&uri, position.line + 1, position.character, &line_text)
            .await;
        if locations.is_empty() {
            return Ok(None);
        }
        Ok(Some(GotoDefinitionResponse::Array(
            locations.iter().map(|location| location.to_lsp()).collect(),
        )))
    }

    async fn references(&self, params: ReferenceParams) -> LspResult<Option<Vec<Location>>> {
        let position = params.text_document_position.position;
        let uri = params.text_document_position.text_document.uri;
        let Some(line_text) = self.line_text(&uri, position.line) else {
            return Ok(None);
        };

        let locations = self.navigation.find_references(
            &uri,
            position.line + 1,
            position.character,
            &line_text,
        );
        if locations.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            locations.iter().map(|location| location.to_lsp()).collect(),
        ))
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> LspResult<Option<DocumentSymbolResponse>> {
        Ok(self
            .collect_document_symbols(&params.text_document.uri)
            .map(DocumentSymbolResponse::Nested))
    }

    async fn folding_range(
        &self,
        params: FoldingRangeParams,
    ) -> LspResult<Option<Vec<FoldingRange>>> {
        let uri = params.text_document.uri;
        let Some(text) = self.document_text(&uri) else {
            return Ok(None);
        };
        let result = self.folding.folding_ranges(&text).await;
        Ok(self.or_empty("folding", result).await)
    }

    async fn code_action(&self, params: CodeActionParams) -> LspResult<Option<CodeActionResponse>> {
        let actions = suppression_actions(&params.text_document.uri, &params.context.diagnostics);
        if actions.is_empty() {
            return Ok(None);
        }
        Ok(Some(actions))
    }

    async fn execute_command(
        &self,
        params: ExecuteCommandParams,
    ) -> LspResult<Option<Value>> {
        let arguments = params.arguments;
        match params.command.as_str() {
            COMMAND_SUPPRESS_LINE => self.run_suppression(&arguments, false).await,
            COMMAND_SUPPRESS_FILE => self.run_suppression(&arguments, true).await,
            other => warn!(command = other, "unknown command"),
        }
        Ok(None)
    }
}
