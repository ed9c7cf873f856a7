//! Whole-document formatting via the interpreter.

use std::sync::Arc;
use std::time::Duration;

use matls_protocol::channels;
use matls_protocol::types::{FormatRequest, FormatResponse};
use tower_lsp::lsp_types::FormattingOptions;

use crate::error::ServerError;
use crate::matlab::MatlabSession;

/// Formatting is user-facing; reject locally rather than hang forever.
const FORMAT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct FormattingSupport {
    session: Arc<MatlabSession>,
}

impl FormattingSupport {
    pub fn new(session: Arc<MatlabSession>) -> Self {
        FormattingSupport { session }
    }

    /// Format the whole document, returning the replacement text. `None`
    /// when the formatter left the text unchanged.
    pub async fn format_document(
        &self,
        code: &str,
        options: &FormattingOptions,
    ) -> Result<Option<String>, ServerError> {
        let bus = self.session.require_connection().await?;

        let payload = serde_json::to_value(FormatRequest {
            data: code.to_string(),
            insert_spaces: options.insert_spaces,
            tab_size: options.tab_size,
            indent_size: options.tab_size,
        })?;

        let reply = tokio::time::timeout(
            FORMAT_TIMEOUT,
            bus.request(channels::FORMAT_REQUEST, channels::FORMAT_RESPONSE, payload),
        )
        .await
        .map_err(|_| ServerError::Timeout(FORMAT_TIMEOUT))??;

        let response: FormatResponse = serde_json::from_value(reply)
            .map_err(|err| ServerError::malformed(channels::FORMAT_RESPONSE, err.to_string()))?;

        if response.data == code {
            return Ok(None);
        }
        Ok(Some(response.data))
    }
}
