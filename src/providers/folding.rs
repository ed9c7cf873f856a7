//! Folding ranges via the interpreter.
//!
//! The helper replies with a flat array of 1-based `[startLine, endLine]`
//! pairs on an id-scoped response channel.

use std::sync::Arc;
use std::time::Duration;

use matls_protocol::channels;
use matls_protocol::types::FoldRequest;
use tower_lsp::lsp_types::FoldingRange;

use crate::error::ServerError;
use crate::matlab::MatlabSession;

const FOLD_TIMEOUT: Duration = Duration::from_secs(10);

pub struct FoldingSupport {
    session: Arc<MatlabSession>,
}

impl FoldingSupport {
    pub fn new(session: Arc<MatlabSession>) -> Self {
        FoldingSupport { session }
    }

    pub async fn folding_ranges(&self, code: &str) -> Result<Vec<FoldingRange>, ServerError> {
        let bus = self.session.require_connection().await?;

        let payload = serde_json::to_value(FoldRequest {
            code: code.to_string(),
        })?;
        let reply = tokio::time::timeout(
            FOLD_TIMEOUT,
            bus.request(channels::FOLD_REQUEST, channels::FOLD_RESPONSE, payload),
        )
        .await
        .map_err(|_| ServerError::Timeout(FOLD_TIMEOUT))??;

        let pairs: Vec<u32> = serde_json::from_value(reply)
            .map_err(|err| ServerError::malformed(channels::FOLD_RESPONSE, err.to_string()))?;
        Ok(ranges_from_pairs(&pairs))
    }
}

/// Turn the flat pair list into folding ranges, dropping a trailing odd
/// element and degenerate pairs.
fn ranges_from_pairs(pairs: &[u32]) -> Vec<FoldingRange> {
    pairs
        .chunks_exact(2)
        .filter(|pair| pair[0] < pair[1] && pair[0] >= 1)
        .map(|pair| FoldingRange {
            start_line: pair[0] - 1,
            end_line: pair[1] - 1,
            ..FoldingRange::default()
        })
        .collect()
}
