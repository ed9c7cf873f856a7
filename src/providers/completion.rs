//! Completions and signature help via the interpreter.
//!
//! Both features ride the same channel pair: the helper returns a filtered
//! completion struct that also carries callable signatures, so signature
//! help is the same request with a different projection.

use std::sync::Arc;
use std::time::Duration;

use matls_protocol::channels;
use matls_protocol::types::{CompletionsRequest, CompletionsResponse};
use tower_lsp::lsp_types::{
    CompletionItem, CompletionItemKind, Documentation, ParameterInformation, ParameterLabel,
    Position, SignatureHelp, SignatureInformation,
};

use crate::error::ServerError;
use crate::matlab::MatlabSession;

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CompletionSupport {
    session: Arc<MatlabSession>,
}

impl CompletionSupport {
    pub fn new(session: Arc<MatlabSession>) -> Self {
        CompletionSupport { session }
    }

    /// Raw completion data for the cursor position.
    async fn query(
        &self,
        code: &str,
        file_path: &str,
        position: Position,
    ) -> Result<CompletionsResponse, ServerError> {
        let bus = self.session.require_connection().await?;

        let payload = serde_json::to_value(CompletionsRequest {
            code: code.to_string(),
            file_name: file_path.to_string(),
            cursor_position: offset_at(code, position),
        })?;
        let reply = tokio::time::timeout(
            COMPLETION_TIMEOUT,
            bus.request(
                channels::COMPLETIONS_REQUEST,
                channels::COMPLETIONS_RESPONSE,
                payload,
            ),
        )
        .await
        .map_err(|_| ServerError::Timeout(COMPLETION_TIMEOUT))??;

        serde_json::from_value(reply)
            .map_err(|err| ServerError::malformed(channels::COMPLETIONS_RESPONSE, err.to_string()))
    }

    /// Completion items for the cursor position.
    pub async fn completion_items(
        &self,
        code: &str,
        file_path: &str,
        position: Position,
    ) -> Result<Vec<CompletionItem>, ServerError> {
        let response = self.query(code, file_path, position).await?;
        Ok(response
            .completions
            .into_iter()
            .map(|entry| CompletionItem {
                label: entry.name,
                kind: Some(kind_for(&entry.kind)),
                detail: (!entry.doc.is_empty()).then_some(entry.doc),
                ..CompletionItem::default()
            })
            .collect())
    }

    /// Signature help for the innermost call at the cursor position.
    pub async fn signature_help(
        &self,
        code: &str,
        file_path: &str,
        position: Position,
    ) -> Result<Option<SignatureHelp>, ServerError> {
        let response = self.query(code, file_path, position).await?;
        if response.signatures.is_empty() {
            return Ok(None);
        }
        let active_parameter = Some(response.active_parameter);
        let signatures = response
            .signatures
            .into_iter()
            .map(|signature| {
                let label = format!(
                    "{}({})",
                    signature.name,
                    signature
                        .parameters
                        .iter()
                        .map(|p| p.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                SignatureInformation {
                    label,
                    documentation: (!signature.doc.is_empty())
                        .then(|| Documentation::String(signature.doc)),
                    parameters: Some(
                        signature
                            .parameters
                            .into_iter()
                            .map(|parameter| ParameterInformation {
                                label: ParameterLabel::Simple(parameter.name),
                                documentation: (!parameter.doc.is_empty())
                                    .then(|| Documentation::String(parameter.doc)),
                            })
                            .collect(),
                    ),
                    active_parameter,
                }
            })
            .collect();
        Ok(Some(SignatureHelp {
            signatures,
            active_signature: Some(0),
            active_parameter,
        }))
    }
}

/// Byte offset of an LSP position within `code`.
fn offset_at(code: &str, position: Position) -> u32 {
    let mut offset = 0u32;
    for (index, line) in code.split('\n').enumerate() {
        if index as u32 == position.line {
            return offset + position.character.min(line.len() as u32);
        }
        offset += line.len() as u32 + 1;
    }
    offset
}

fn kind_for(kind: &str) -> CompletionItemKind {
    match kind {
        "function" => CompletionItemKind::FUNCTION,
        "method" => CompletionItemKind::METHOD,
        "variable" => CompletionItemKind::VARIABLE,
        "property" => CompletionItemKind::PROPERTY,
        "field" => CompletionItemKind::FIELD,
        "classdef" => CompletionItemKind::CLASS,
        "package" => CompletionItemKind::MODULE,
        "keyword" => CompletionItemKind::KEYWORD,
        "pathItem" => CompletionItemKind::FILE,
        _ => CompletionItemKind::TEXT,
    }
}
