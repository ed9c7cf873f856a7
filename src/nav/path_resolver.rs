//! Client side of identifier path resolution.
//!
//! Given a context file and a list of identifiers, the interpreter decides
//! which file most likely defines each one: it checks the context file's
//! `private` folder, class-folder siblings, the search path, plain ancestor
//! folders, and finally retries with trailing dotted components dropped —
//! in that case the reply is flagged so the caller verifies the last
//! component inside the returned file. Byte-compiled hits are substituted
//! with their source files before being returned.
//!
//! This module only packages the request and interprets the reply; the
//! search itself runs in the helper.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use matls_protocol::channels;
use matls_protocol::types::{IdentifierDefinitionRequest, IdentifierDefinitionResult, RawCodeData};
use tower_lsp::lsp_types::Url;

use crate::error::ServerError;
use crate::matlab::MatlabSession;

/// How long a navigation request may wait on the interpreter.
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(15);

/// One resolved identifier, normalized from the wire reply.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    pub identifier: String,
    pub uri: Option<Url>,
    /// 1-based line of the inner symbol when symbol search was required.
    pub line: u32,
    pub char: u32,
    /// Code data the helper already computed for the resolved file, saving
    /// the caller a second round-trip.
    pub code_data: Option<RawCodeData>,
    /// The reply came from the dotted-prefix retry; the last component must
    /// be verified inside the returned file.
    pub requires_symbol_search: bool,
}

impl ResolvedPath {
    /// Whether the reply names a usable file. A flagged result that puts the
    /// inner symbol on line 1 or earlier means the component was not
    /// actually found.
    pub fn is_found(&self) -> bool {
        self.uri.is_some() && !(self.requires_symbol_search && self.line <= 1)
    }
}

/// Asks the interpreter which files define a set of identifiers.
pub struct PathResolver {
    session: Arc<MatlabSession>,
}

impl PathResolver {
    pub fn new(session: Arc<MatlabSession>) -> Self {
        PathResolver { session }
    }

    /// Resolve `identifiers` as seen from `context` and normalize the reply.
    pub async fn resolve_paths(
        &self,
        identifiers: &[String],
        context: &Url,
    ) -> Result<Vec<ResolvedPath>, ServerError> {
        let bus = self.session.require_connection().await?;

        let containing_file = context
            .to_file_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| context.path().to_string());
        let payload = serde_json::to_value(IdentifierDefinitionRequest {
            containing_file,
            identifiers: identifiers.to_vec(),
        })?;

        let reply = tokio::time::timeout(
            RESOLVE_TIMEOUT,
            bus.request(
                channels::IDENTIFIER_DEFINITION_REQUEST,
                channels::IDENTIFIER_DEFINITION_RESPONSE,
                payload,
            ),
        )
        .await
        .map_err(|_| ServerError::Timeout(RESOLVE_TIMEOUT))??;

        let results: Vec<IdentifierDefinitionResult> = serde_json::from_value(reply)
            .map_err(|err| {
                ServerError::malformed(channels::IDENTIFIER_DEFINITION_RESPONSE, err.to_string())
            })?;
        Ok(results.into_iter().map(normalize).collect())
    }
}

fn normalize(result: IdentifierDefinitionResult) -> ResolvedPath {
    let (uri, line, char, code_data) = match result.file_info {
        Some(info) => {
            let uri = (!info.file_name.is_empty())
                .then(|| Url::from_file_path(PathBuf::from(&info.file_name)).ok())
                .flatten();
            (uri, info.line, info.char, info.code_data)
        }
        None => (None, 0, 0, None),
    };
    ResolvedPath {
        identifier: result.identifier,
        uri,
        line,
        char,
        code_data,
        requires_symbol_search: result.requires_symbol_search,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matls_protocol::types::ResolvedFileInfo;

    fn result_with(line: u32, requires: bool) -> IdentifierDefinitionResult {
        IdentifierDefinitionResult {
            identifier: "pkg.Cls".to_string(),
            file_info: Some(ResolvedFileInfo {
                file_name: "/w/+pkg/Cls.m".to_string(),
                line,
                char: 0,
                code_data: None,
            }),
            requires_symbol_search: requires,
        }
    }

    #[test]
    fn symbol_search_hit_on_line_one_is_not_found() {
        let resolved = normalize(result_with(1, true));
        assert!(!resolved.is_found());
        let resolved = normalize(result_with(0, true));
        assert!(!resolved.is_found());
    }

    #[test]
    fn symbol_search_hit_below_line_one_is_found() {
        let resolved = normalize(result_with(4, true));
        assert!(resolved.is_found());
    }

    #[test]
    fn direct_hit_ignores_the_line_rule() {
        let resolved = normalize(result_with(0, false));
        assert!(resolved.is_found());
    }

    #[test]
    fn missing_file_info_is_not_found() {
        let resolved = normalize(IdentifierDefinitionResult {
            identifier: "nope".to_string(),
            file_info: None,
            requires_symbol_search: false,
        });
        assert!(resolved.uri.is_none());
        assert!(!resolved.is_found());
    }

    #[test]
    fn file_name_becomes_a_file_uri() {
        let resolved = normalize(result_with(4, false));
        let uri = resolved.uri.unwrap();
        assert_eq!(uri.scheme(), "file");
        assert!(uri.path().ends_with("/Cls.m"));
    }
}
