//! Interpreter session supervisor.
//!
//! Drives the `Disconnected → Connecting → Connected → Disconnected` state
//! machine for the single MATLAB instance this server talks to. The flavor
//! is chosen by configuration: with `matlabUrl` set the server attaches to
//! an already-running interpreter and retries every second after a drop;
//! otherwise it owns the process it launched and reports loss upward.
//!
//! All lifecycle timers are explicit tasks scoped to a cancellation token,
//! so `shutdown` reliably stops reconnect loops and process watchers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tokio::sync::{oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{transport, BusState, MessageBus};
use crate::config::{ConnectionTiming, SettingsHandle};
use crate::matlab::launcher::{self, LaunchError};

/// Delay between reconnect attempts for attached sessions.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

// ============================================================================
// Types
// ============================================================================

/// Connection lifecycle, broadcast to listeners on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Wire string used in the client notification.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

/// Errors that can occur while establishing a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Transport(#[from] crate::bus::TransportError),
}

/// Handle to the watcher task owning the spawned child process.
struct ProcessHandle {
    kill: oneshot::Sender<()>,
}

// ============================================================================
// Session
// ============================================================================

/// Supervisor for the server's one MATLAB connection.
pub struct MatlabSession {
    settings: Arc<SettingsHandle>,
    bus: Mutex<Option<MessageBus>>,
    process: Mutex<Option<ProcessHandle>>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl MatlabSession {
    pub fn new(settings: Arc<SettingsHandle>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(MatlabSession {
            settings,
            bus: Mutex::new(None),
            process: Mutex::new(None),
            state_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Watch lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.state_tx.borrow() == ConnectionState::Connected
    }

    /// The live bus, if any, without driving the state machine.
    pub async fn bus(&self) -> Option<MessageBus> {
        let guard = self.bus.lock().await;
        guard.as_ref().filter(|bus| bus.is_connected()).cloned()
    }

    /// Idempotent: returns the live connection if present, otherwise drives
    /// the state machine to Connected. `Ok(None)` only under policy `never`.
    pub async fn ensure_connection(
        self: &Arc<Self>,
    ) -> Result<Option<MessageBus>, SessionError> {
        let settings = self.settings.get();
        if settings.connection_timing == ConnectionTiming::Never {
            return Ok(None);
        }

        let mut guard = self.bus.lock().await;
        if let Some(bus) = guard.as_ref() {
            if bus.is_connected() {
                return Ok(Some(bus.clone()));
            }
        }

        self.set_state(ConnectionState::Connecting);
        let result = match settings.url.as_deref() {
            Some(url) => self.connect_existing(url).await,
            None => self.launch_owned().await,
        };

        match result {
            Ok(bus) => {
                *guard = Some(bus.clone());
                drop(guard);
                self.set_state(ConnectionState::Connected);
                self.spawn_disconnect_monitor(&bus);
                Ok(Some(bus))
            }
            Err(err) => {
                *guard = None;
                drop(guard);
                self.set_state(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    /// Like [`ensure_connection`](Self::ensure_connection), but collapses
    /// "policy is never" and "failed to launch" into
    /// [`crate::error::ServerError::InterpreterUnavailable`] for feature
    /// providers that cannot proceed without the interpreter.
    pub async fn require_connection(
        self: &Arc<Self>,
    ) -> Result<MessageBus, crate::error::ServerError> {
        match self.ensure_connection().await {
            Ok(Some(bus)) => Ok(bus),
            Ok(None) => Err(crate::error::ServerError::InterpreterUnavailable),
            Err(err) => {
                warn!(error = %err, "could not reach MATLAB");
                Err(crate::error::ServerError::InterpreterUnavailable)
            }
        }
    }

    /// Install an externally created connection (used by embedders and
    /// tests that provide their own transport).
    pub async fn adopt_bus(self: &Arc<Self>, bus: MessageBus) {
        *self.bus.lock().await = Some(bus.clone());
        self.set_state(ConnectionState::Connected);
        self.spawn_disconnect_monitor(&bus);
    }

    /// Close the transport and kill any owned child, then notify listeners.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(bus) = self.bus.lock().await.take() {
            bus.close();
        }
        if let Some(process) = self.process.lock().await.take() {
            let _ = process.kill.send(());
        }
        self.set_state(ConnectionState::Disconnected);
    }

    // ========================================================================
    // Connection flavors
    // ========================================================================

    /// Attach to an interpreter that is already running at `url`.
    async fn connect_existing(&self, url: &str) -> Result<MessageBus, SessionError> {
        let transport = transport::connect(url, None).await?;
        let bus = MessageBus::new(transport, None);
        // Kickstart status callbacks on the helper side.
        bus.publish(matls_protocol::channels::STARTUP, json!({}));
        info!(url, "attached to running MATLAB");
        Ok(bus)
    }

    /// Launch our own interpreter and connect over TLS.
    async fn launch_owned(self: &Arc<Self>) -> Result<MessageBus, SessionError> {
        let settings = self.settings.get();
        let mut launched = launcher::launch(&settings).await?;

        let tls = launched.read_tls_material()?;
        let transport = transport::connect(&launched.url(), Some(&tls)).await?;
        let bus = MessageBus::new(transport, Some(launched.api_key.clone()));
        launched.discard_tls_material();

        let mut child = launched.child;
        let matlab_pid = launched.handshake.pid;
        let _session_dir = launched.session_dir;
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        *self.process.lock().await = Some(ProcessHandle { kill: kill_tx });

        let session = Arc::clone(self);
        tokio::spawn(async move {
            // Keep the session directory alive as long as the process runs.
            let _session_dir = _session_dir;
            tokio::select! {
                status = child.wait() => {
                    warn!(?status, "MATLAB process exited");
                    session.handle_process_lost().await;
                }
                _ = kill_rx => {
                    // On Windows the spawned executable is a launcher shim;
                    // the interpreter reported its real PID in the
                    // handshake, so that one goes first.
                    #[cfg(windows)]
                    {
                        let _ = tokio::process::Command::new("taskkill")
                            .args(["/F", "/T", "/PID", &matlab_pid.to_string()])
                            .output()
                            .await;
                    }
                    #[cfg(not(windows))]
                    let _ = matlab_pid;
                    let _ = child.kill().await;
                    debug!("MATLAB process terminated");
                }
            }
        });

        Ok(bus)
    }

    // ========================================================================
    // Supervision
    // ========================================================================

    /// Watch one bus until it drops, then run the disconnect policy.
    fn spawn_disconnect_monitor(self: &Arc<Self>, bus: &MessageBus) {
        let mut bus_state = bus.state();
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let disconnected = bus_state.wait_for(|s| *s == BusState::Disconnected).await;
            // A dropped sender also means the connection is gone.
            drop(disconnected);
            if session.cancel.is_cancelled() {
                return;
            }
            session.handle_bus_disconnected().await;
        });
    }

    /// Owned child exited: invalidate everything and report upward.
    async fn handle_process_lost(&self) {
        if let Some(bus) = self.bus.lock().await.take() {
            bus.close();
        }
        self.process.lock().await.take();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Bus dropped. Attached sessions retry every second until the peer is
    /// back; owned sessions report the loss upward.
    async fn handle_bus_disconnected(self: Arc<Self>) {
        self.bus.lock().await.take();

        let settings = self.settings.get();
        let Some(url) = settings.url else {
            self.set_state(ConnectionState::Disconnected);
            return;
        };
        if settings.connection_timing == ConnectionTiming::Never {
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        self.set_state(ConnectionState::Connecting);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
            match self.connect_existing(&url).await {
                Ok(bus) => {
                    *self.bus.lock().await = Some(bus.clone());
                    self.set_state(ConnectionState::Connected);
                    self.spawn_disconnect_monitor(&bus);
                    return;
                }
                Err(err) => {
                    debug!(error = %err, "reconnect attempt failed");
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = *self.state_tx.borrow() != state;
        if changed {
            debug!(state = state.as_str(), "connection state");
        }
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::loopback;
    use crate::config::Settings;
    use tokio::time::timeout;

    const TICK: Duration = Duration::from_secs(2);

    fn session_with(settings: Settings) -> Arc<MatlabSession> {
        MatlabSession::new(Arc::new(SettingsHandle::new(settings)))
    }

    #[tokio::test]
    async fn never_policy_yields_no_connection() {
        let session = session_with(Settings {
            connection_timing: ConnectionTiming::Never,
            ..Settings::default()
        });
        let bus = session.ensure_connection().await.unwrap();
        assert!(bus.is_none());
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn adopted_bus_reports_connected() {
        let session = session_with(Settings::default());
        let (ours, _theirs) = loopback();
        session.adopt_bus(MessageBus::new(ours, None)).await;
        assert!(session.is_connected());
        assert!(session.bus().await.is_some());
    }

    #[tokio::test]
    async fn owned_disconnect_reports_loss_upward() {
        let session = session_with(Settings::default());
        let (ours, theirs) = loopback();
        session.adopt_bus(MessageBus::new(ours, None)).await;

        let mut state = session.state();
        drop(theirs);

        timeout(TICK, state.wait_for(|s| *s == ConnectionState::Disconnected))
            .await
            .unwrap()
            .unwrap();
        assert!(session.bus().await.is_none());
    }

    #[tokio::test]
    async fn attached_disconnect_enters_reconnect_loop() {
        let session = session_with(Settings {
            url: Some("ws://127.0.0.1:9/".to_string()),
            ..Settings::default()
        });
        let (ours, theirs) = loopback();
        session.adopt_bus(MessageBus::new(ours, None)).await;

        let mut state = session.state();
        drop(theirs);

        // The loop keeps retrying the dead URL, so the observable state is
        // Connecting rather than Disconnected.
        timeout(TICK, state.wait_for(|s| *s == ConnectionState::Connecting))
            .await
            .unwrap()
            .unwrap();

        session.shutdown().await;
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn shutdown_closes_the_bus() {
        let session = session_with(Settings::default());
        let (ours, _theirs) = loopback();
        let bus = MessageBus::new(ours, None);
        session.adopt_bus(bus.clone()).await;

        session.shutdown().await;
        assert!(!bus.is_connected());
        assert!(!session.is_connected());
    }
}
