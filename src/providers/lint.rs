//! Linting and lint-suppression support.
//!
//! Lint findings come back as diagnostics with the checker id in
//! `Diagnostic::code`. Each diagnostic with an id also gets two code
//! actions: suppress on this line, and suppress in this file. Both are
//! backed by the execute-command provider, which asks the interpreter where
//! the offending statement ends and appends a `%#ok` pragma there.

use std::sync::Arc;
use std::time::Duration;

use matls_protocol::channels;
use matls_protocol::types::{
    LintEndStatementRequest, LintEndStatementResponse, LintRequest, LintResponse,
};
use serde_json::json;
use tower_lsp::lsp_types::{
    CodeAction, CodeActionKind, CodeActionOrCommand, Command, Diagnostic, DiagnosticSeverity,
    NumberOrString, Position, Range as LspRange, TextEdit, Url,
};

use crate::error::ServerError;
use crate::matlab::MatlabSession;
use crate::nav::resolver::range_to_lsp;

const LINT_TIMEOUT: Duration = Duration::from_secs(30);

/// Command filtering a lint diagnostic on one line.
pub const COMMAND_SUPPRESS_LINE: &str = "matls.filterDiagnostic.line";
/// Command filtering a lint diagnostic across the whole file.
pub const COMMAND_SUPPRESS_FILE: &str = "matls.filterDiagnostic.file";

/// Diagnostic source tag.
const SOURCE: &str = "matls";

pub struct LintingSupport {
    session: Arc<MatlabSession>,
}

impl LintingSupport {
    pub fn new(session: Arc<MatlabSession>) -> Self {
        LintingSupport { session }
    }

    /// Lint a document and convert the findings to LSP diagnostics.
    pub async fn lint_document(
        &self,
        code: &str,
        file_path: &str,
    ) -> Result<Vec<Diagnostic>, ServerError> {
        let bus = self.session.require_connection().await?;

        let payload = serde_json::to_value(LintRequest {
            code: code.to_string(),
            file_name: file_path.to_string(),
        })?;
        let reply = tokio::time::timeout(
            LINT_TIMEOUT,
            bus.request(channels::LINT_REQUEST, channels::LINT_RESPONSE, payload),
        )
        .await
        .map_err(|_| ServerError::Timeout(LINT_TIMEOUT))??;

        let response: LintResponse = serde_json::from_value(reply)
            .map_err(|err| ServerError::malformed(channels::LINT_RESPONSE, err.to_string()))?;

        Ok(response
            .lint_data
            .into_iter()
            .map(|record| Diagnostic {
                range: range_to_lsp(record.range),
                severity: Some(severity_for(record.severity)),
                code: (!record.id.is_empty()).then(|| NumberOrString::String(record.id)),
                source: Some(SOURCE.to_string()),
                message: record.message,
                ..Diagnostic::default()
            })
            .collect())
    }

    /// Build the text edit that appends a suppression pragma for `lint_id`
    /// after the statement starting on `line` (1-based). File-wide
    /// suppression uses the starred pragma form.
    pub async fn suppression_edit(
        &self,
        code: &str,
        line: u32,
        lint_id: &str,
        file_wide: bool,
    ) -> Result<Option<TextEdit>, ServerError> {
        let bus = self.session.require_connection().await?;

        let payload = serde_json::to_value(LintEndStatementRequest {
            code: code.to_string(),
            line_number: line,
        })?;
        let reply = tokio::time::timeout(
            LINT_TIMEOUT,
            bus.request(
                channels::LINT_END_STATEMENT_REQUEST,
                channels::LINT_END_STATEMENT_RESPONSE,
                payload,
            ),
        )
        .await
        .map_err(|_| ServerError::Timeout(LINT_TIMEOUT))??;

        let response: LintEndStatementResponse = serde_json::from_value(reply).map_err(|err| {
            ServerError::malformed(channels::LINT_END_STATEMENT_RESPONSE, err.to_string())
        })?;

        let target_line = response.line_number.max(1);
        let Some(line_text) = code.lines().nth(target_line as usize - 1) else {
            return Ok(None);
        };

        let marker = if file_wide {
            format!(" %#ok<*{lint_id}>")
        } else {
            format!(" %#ok<{lint_id}>")
        };
        let column = line_text.len() as u32;
        let position = Position {
            line: target_line - 1,
            character: column,
        };
        Ok(Some(TextEdit {
            range: LspRange {
                start: position,
                end: position,
            },
            new_text: marker,
        }))
    }
}

fn severity_for(severity: u8) -> DiagnosticSeverity {
    match severity {
        2 => DiagnosticSeverity::ERROR,
        1 => DiagnosticSeverity::WARNING,
        _ => DiagnosticSeverity::INFORMATION,
    }
}

/// Code actions offered for the diagnostics overlapping a request range:
/// one line-scoped and one file-scoped suppression per identified finding.
pub fn suppression_actions(uri: &Url, diagnostics: &[Diagnostic]) -> Vec<CodeActionOrCommand> {
    let mut actions = Vec::new();
    for diagnostic in diagnostics {
        let Some(NumberOrString::String(id)) = &diagnostic.code else {
            continue;
        };
        let line = diagnostic.range.start.line + 1;
        let arguments = vec![json!(uri.to_string()), json!(line), json!(id)];

        actions.push(CodeActionOrCommand::CodeAction(CodeAction {
            title: format!("Suppress {id} on this line"),
            kind: Some(CodeActionKind::QUICKFIX),
            diagnostics: Some(vec![diagnostic.clone()]),
            command: Some(Command {
                title: format!("Suppress {id} on this line"),
                command: COMMAND_SUPPRESS_LINE.to_string(),
                arguments: Some(arguments.clone()),
            }),
            ..CodeAction::default()
        }));
        actions.push(CodeActionOrCommand::CodeAction(CodeAction {
            title: format!("Suppress {id} in this file"),
            kind: Some(CodeActionKind::QUICKFIX),
            diagnostics: Some(vec![diagnostic.clone()]),
            command: Some(Command {
                title: format!("Suppress {id} in this file"),
                command: COMMAND_SUPPRESS_FILE.to_string(),
                arguments: Some(arguments),
            }),
            ..CodeAction::default()
        }));
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severities_map_onto_lsp() {
        assert_eq!(severity_for(2), DiagnosticSeverity::ERROR);
        assert_eq!(severity_for(1), DiagnosticSeverity::WARNING);
        assert_eq!(severity_for(0), DiagnosticSeverity::INFORMATION);
        assert_eq!(severity_for(9), DiagnosticSeverity::INFORMATION);
    }

    #[test]
    fn actions_only_for_identified_findings() {
        let uri = Url::parse("file:///w/a.m").unwrap();
        let identified = Diagnostic {
            code: Some(NumberOrString::String("NASGU".into())),
            message: "value assigned but unused".into(),
            ..Diagnostic::default()
        };
        let anonymous = Diagnostic {
            message: "something odd".into(),
            ..Diagnostic::default()
        };
        let actions = suppression_actions(&uri, &[identified, anonymous]);
        assert_eq!(actions.len(), 2);
        let CodeActionOrCommand::CodeAction(line_action) = &actions[0] else {
            panic!("expected code action");
        };
        assert_eq!(
            line_action.command.as_ref().unwrap().command,
            COMMAND_SUPPRESS_LINE
        );
    }

    #[test]
    fn action_arguments_carry_uri_line_and_id() {
        let uri = Url::parse("file:///w/a.m").unwrap();
        let diagnostic = Diagnostic {
            range: LspRange {
                start: Position {
                    line: 4,
                    character: 0,
                },
                end: Position {
                    line: 4,
                    character: 5,
                },
            },
            code: Some(NumberOrString::String("AGROW".into())),
            ..Diagnostic::default()
        };
        let actions = suppression_actions(&uri, &[diagnostic]);
        let CodeActionOrCommand::CodeAction(action) = &actions[0] else {
            panic!("expected code action");
        };
        let args = action.command.as_ref().unwrap().arguments.as_ref().unwrap();
        assert_eq!(args[0], json!("file:///w/a.m"));
        assert_eq!(args[1], json!(5)); // 1-based statement line
        assert_eq!(args[2], json!("AGROW"));
    }
}
