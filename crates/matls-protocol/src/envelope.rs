//! JSON envelope carried on the message bus.
//!
//! Every bus message is one WebSocket text frame holding an [`Envelope`]:
//! the wire channel name, a headers object (the API key for locally launched
//! sessions rides here on every frame), and the payload.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum accepted frame size in bytes (8 MB).
///
/// Workspace indexing streams one file per frame, so a single frame is
/// bounded by the largest source file plus its code data.
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Per-frame headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Headers {
    /// API key proving the sender is the peer that performed the handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// One message on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Wire channel name (already namespace-prefixed).
    pub channel: String,
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Headers {
    fn is_empty(&self) -> bool {
        self.api_key.is_none()
    }
}

/// Errors that can occur while encoding or decoding an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Frame exceeds [`MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Frame is not valid envelope JSON.
    #[error("invalid envelope: {0}")]
    Invalid(#[from] serde_json::Error),
}

impl Envelope {
    /// Create an envelope for a wire channel with no headers.
    pub fn new(channel: impl Into<String>, payload: serde_json::Value) -> Self {
        Envelope {
            channel: channel.into(),
            headers: Headers::default(),
            payload,
        }
    }

    /// Attach an API key header.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.headers.api_key = Some(api_key.into());
        self
    }

    /// Encode to a single text frame.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        let text = serde_json::to_string(self)?;
        if text.len() > MAX_FRAME_SIZE {
            return Err(EnvelopeError::FrameTooLarge {
                size: text.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(text)
    }

    /// Decode from a received text frame.
    pub fn decode(text: &str) -> Result<Envelope, EnvelopeError> {
        if text.len() > MAX_FRAME_SIZE {
            return Err(EnvelopeError::FrameTooLarge {
                size: text.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(serde_json::from_str(text)?)
    }
}
