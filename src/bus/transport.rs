//! WebSocket wire for the message bus.
//!
//! Bridges a [`BusTransport`] channel pair onto a WebSocket connection. For
//! locally launched MATLAB sessions the connection is TLS, trusting the
//! self-signed certificate the interpreter wrote at startup; attached
//! sessions connect to whatever scheme their URL names.

use futures::{SinkExt, StreamExt};
use matls_protocol::envelope::Envelope;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::Connector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{BusTransport, TransportError};

/// TLS material emitted by a locally launched interpreter: the self-signed
/// certificate to trust for this one connection.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub certificate_pem: Vec<u8>,
}

/// Open a WebSocket to `url` and return the channel pair bridged onto it.
///
/// The returned transport reports disconnection by closing its `incoming`
/// side; cancelling its token sends a close frame and tears both tasks down.
pub async fn connect(
    url: &str,
    tls: Option<&TlsMaterial>,
) -> Result<BusTransport, TransportError> {
    let ws = match tls {
        Some(material) => {
            let certificate = native_tls::Certificate::from_pem(&material.certificate_pem)?;
            // The certificate is self-signed for the loopback interface;
            // trust exactly it and nothing else.
            let connector = native_tls::TlsConnector::builder()
                .add_root_certificate(certificate)
                .danger_accept_invalid_hostnames(true)
                .build()?;
            let (ws, _) = tokio_tungstenite::connect_async_tls_with_config(
                url,
                None,
                false,
                Some(Connector::NativeTls(connector)),
            )
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
            ws
        }
        None => {
            let (ws, _) = tokio_tungstenite::connect_async(url)
                .await
                .map_err(|err| TransportError::Connect(err.to_string()))?;
            ws
        }
    };
    debug!(url, "bus transport connected");

    let (mut sink, mut stream) = ws.split();
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Envelope>();
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<Envelope>();
    let cancel = CancellationToken::new();

    let writer_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                envelope = outgoing_rx.recv() => match envelope {
                    Some(envelope) => match envelope.encode() {
                        Ok(text) => {
                            if sink.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "dropping unencodable frame");
                        }
                    },
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
            }
        }
    });

    let reader_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = reader_cancel.cancelled() => break,
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => match Envelope::decode(&text) {
                        Ok(envelope) => {
                            if incoming_tx.send(envelope).is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(error = %err, "dropping malformed frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong/binary are not bus traffic
                    Some(Err(err)) => {
                        warn!(error = %err, "bus socket error");
                        break;
                    }
                },
            }
        }
        // Dropping incoming_tx is the disconnect signal for the dispatcher.
    });

    Ok(BusTransport {
        outgoing: outgoing_tx,
        incoming: incoming_rx,
        cancel,
    })
}
