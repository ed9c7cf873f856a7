//! MATLAB process launching and handshake.
//!
//! The server spawns MATLAB with a one-shot bootstrap instruction that makes
//! the interpreter add the helper code to its search path, start the bus
//! connector, and write a small handshake JSON file `{pid, release, port}`
//! to a server-designated path. The bootstrap script is embedded in the
//! binary and materialized into a per-session temporary directory.
//!
//! Readiness is detected by watching for creation of the handshake file,
//! never by polling it. The interpreter also emits a TLS certificate and
//! private key into the session directory; the certificate is read once to
//! build the transport's trust anchor, and both files are deleted right
//! after the first successful connection.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::TlsMaterial;
use crate::config::Settings;

// ============================================================================
// Constants
// ============================================================================

/// Embedded bootstrap script, materialized next to the handshake file.
const BOOTSTRAP_SCRIPT: &str = include_str!("bootstrap.m");

const BOOTSTRAP_FILE: &str = "matls_bootstrap.m";
const HANDSHAKE_FILE: &str = "handshake.json";
const CERT_DIR: &str = "certs";
const CERT_FILE: &str = "cert.pem";
const KEY_FILE: &str = "key.pem";

/// How long MATLAB gets to start up and write the handshake file.
const HANDSHAKE_TIMEOUT_SECS: u64 = 120;

/// Fixed noise string on MATLAB's stderr that is never worth logging.
const STDERR_NOISE: &str = "MEMORY MANAGEMENT";

/// Size of the generated API key in bytes (hex-encoded to 64 characters).
const API_KEY_BYTES: usize = 32;

#[cfg(windows)]
const MATLAB_EXECUTABLE: &str = "matlab.exe";
#[cfg(not(windows))]
const MATLAB_EXECUTABLE: &str = "matlab";

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while launching MATLAB.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// No MATLAB executable could be located.
    #[error("MATLAB executable not found; set matlabInstallPath or put 'matlab' on PATH")]
    MatlabNotFound,

    /// The process failed to start.
    #[error("failed to spawn MATLAB: {reason}")]
    SpawnFailed { reason: String },

    /// The handshake file never appeared.
    #[error("MATLAB did not write its handshake within {timeout_secs}s")]
    HandshakeTimeout { timeout_secs: u64 },

    /// The file-system watcher could not be set up.
    #[error("failed to watch for the handshake file: {reason}")]
    Watcher { reason: String },

    /// The interpreter did not emit the expected certificate.
    #[error("TLS certificate missing at {path}")]
    CertificateMissing { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Handshake
// ============================================================================

/// Contents of the handshake file written by the interpreter on bootstrap.
/// The file is not rewritten on reconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handshake {
    /// PID of the interpreter itself (not the launcher shim).
    pub pid: u32,
    /// Release string, e.g. `R2024a`.
    pub release: String,
    /// Port of the bus listener started by the connector.
    #[serde(default)]
    pub port: u16,
}

/// A spawned MATLAB with a completed handshake.
pub struct LaunchedMatlab {
    pub child: Child,
    pub handshake: Handshake,
    /// Key the transport attaches to every outgoing frame.
    pub api_key: String,
    /// Holds the bootstrap script, handshake file, and TLS material; removed
    /// from disk when the session ends.
    pub session_dir: TempDir,
}

impl LaunchedMatlab {
    /// Bus URL for this instance.
    pub fn url(&self) -> String {
        format!("wss://127.0.0.1:{}", self.handshake.port)
    }

    /// Read the certificate the interpreter wrote for this session. The
    /// private key stays on disk for the interpreter's listener; the server
    /// never loads it.
    pub fn read_tls_material(&self) -> Result<TlsMaterial, LaunchError> {
        let cert_path = self.session_dir.path().join(CERT_DIR).join(CERT_FILE);
        if !cert_path.exists() {
            return Err(LaunchError::CertificateMissing { path: cert_path });
        }
        let certificate_pem = std::fs::read(&cert_path)?;
        Ok(TlsMaterial { certificate_pem })
    }

    /// Delete the certificate and private key files. Called once the first
    /// connection has been established.
    pub fn discard_tls_material(&self) {
        let cert_dir = self.session_dir.path().join(CERT_DIR);
        for name in [CERT_FILE, KEY_FILE] {
            let path = cert_dir.join(name);
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %err, "failed to delete TLS file");
                }
            }
        }
    }
}

// ============================================================================
// Launch
// ============================================================================

/// Spawn MATLAB and wait for its handshake.
pub async fn launch(settings: &Settings) -> Result<LaunchedMatlab, LaunchError> {
    let executable = matlab_executable(settings)?;

    let session_dir = tempfile::Builder::new().prefix("matls-").tempdir()?;
    let bootstrap_path = materialize_bootstrap(session_dir.path())?;
    let handshake_path = session_dir.path().join(HANDSHAKE_FILE);
    let cert_dir = session_dir.path().join(CERT_DIR);
    std::fs::create_dir_all(&cert_dir)?;

    let api_key = generate_api_key();

    let mut command = Command::new(&executable);
    command
        .args(["-nosplash", "-nodesktop"])
        .args(&settings.launch_args)
        .arg("-r")
        .arg(format!("run('{}')", bootstrap_path.display()))
        .env("MATLS_HANDSHAKE_FILE", &handshake_path)
        .env("MATLS_CERT_DIR", &cert_dir)
        .env("MATLS_API_KEY", &api_key)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    info!(executable = %executable.display(), "launching MATLAB");
    let mut child = command.spawn().map_err(|err| LaunchError::SpawnFailed {
        reason: err.to_string(),
    })?;

    if let Some(stderr) = child.stderr.take() {
        drain_stderr(stderr);
    }

    let handshake = wait_for_handshake(
        session_dir.path(),
        &handshake_path,
        Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
    )
    .await?;
    info!(pid = handshake.pid, release = %handshake.release, "MATLAB ready");

    Ok(LaunchedMatlab {
        child,
        handshake,
        api_key,
        session_dir,
    })
}

/// Resolve the MATLAB executable: derived from the configured install path,
/// otherwise searched on PATH.
fn matlab_executable(settings: &Settings) -> Result<PathBuf, LaunchError> {
    if let Some(install) = &settings.install_path {
        let executable = install.join("bin").join(MATLAB_EXECUTABLE);
        if executable.exists() {
            return Ok(executable);
        }
        return Err(LaunchError::MatlabNotFound);
    }
    which::which(MATLAB_EXECUTABLE).map_err(|_| LaunchError::MatlabNotFound)
}

/// Write the embedded bootstrap script into the session directory.
fn materialize_bootstrap(session_dir: &Path) -> Result<PathBuf, LaunchError> {
    let path = session_dir.join(BOOTSTRAP_FILE);
    std::fs::write(&path, BOOTSTRAP_SCRIPT)?;
    Ok(path)
}

fn generate_api_key() -> String {
    let mut buf = [0u8; API_KEY_BYTES];
    rand::fill(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

/// Forward MATLAB's stderr into the log, skipping the fixed noise string.
fn drain_stderr(stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.contains(STDERR_NOISE) {
                continue;
            }
            if !line.trim().is_empty() {
                warn!(target: "matlab", "{line}");
            }
        }
    })
}

/// Wait for creation of the handshake file by watching its directory for
/// file-system events.
async fn wait_for_handshake(
    watch_dir: &Path,
    handshake_path: &Path,
    timeout: Duration,
) -> Result<Handshake, LaunchError> {
    let (event_tx, mut event_rx) = mpsc::channel::<notify::Event>(16);
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        if let Ok(event) = result {
            let _ = event_tx.blocking_send(event);
        }
    })
    .map_err(|err| LaunchError::Watcher {
        reason: err.to_string(),
    })?;
    watcher
        .watch(watch_dir, RecursiveMode::NonRecursive)
        .map_err(|err| LaunchError::Watcher {
            reason: err.to_string(),
        })?;

    // The interpreter may have won the race before the watcher armed.
    if let Some(handshake) = read_handshake(handshake_path) {
        return Ok(handshake);
    }

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                return Err(LaunchError::HandshakeTimeout {
                    timeout_secs: timeout.as_secs(),
                });
            }
            event = event_rx.recv() => {
                if event.is_none() {
                    return Err(LaunchError::Watcher {
                        reason: "watcher channel closed".to_string(),
                    });
                }
                if let Some(handshake) = read_handshake(handshake_path) {
                    return Ok(handshake);
                }
            }
        }
    }
}

/// Attempt to read and parse the handshake. `None` when the file is missing
/// or not yet completely written; the next event retries.
fn read_handshake(path: &Path) -> Option<Handshake> {
    let text = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(handshake) => Some(handshake),
        Err(err) => {
            debug!(error = %err, "handshake not parseable yet");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn bootstrap_materializes_embedded_script() {
        let dir = TempDir::new().unwrap();
        let path = materialize_bootstrap(dir.path()).unwrap();
        assert!(path.exists());
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("MATLS_HANDSHAKE_FILE"));
        assert!(content.contains("jsonencode"));
    }

    #[test]
    fn api_keys_are_long_and_unique() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_eq!(a.len(), API_KEY_BYTES * 2);
        assert_ne!(a, b);
    }

    #[test]
    fn executable_from_install_path_must_exist() {
        let settings = Settings {
            install_path: Some(PathBuf::from("/definitely/not/matlab")),
            ..Settings::default()
        };
        assert!(matches!(
            matlab_executable(&settings),
            Err(LaunchError::MatlabNotFound)
        ));
    }

    #[test]
    fn handshake_parses_and_rejects_partial_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(HANDSHAKE_FILE);

        assert!(read_handshake(&path).is_none());

        std::fs::write(&path, r#"{"pid": 4242, "rel"#).unwrap();
        assert!(read_handshake(&path).is_none());

        std::fs::write(&path, r#"{"pid": 4242, "release": "R2024a", "port": 27000}"#).unwrap();
        let handshake = read_handshake(&path).unwrap();
        assert_eq!(handshake.pid, 4242);
        assert_eq!(handshake.release, "R2024a");
        assert_eq!(handshake.port, 27000);
    }

    #[tokio::test]
    async fn handshake_watch_sees_late_creation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(HANDSHAKE_FILE);

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            std::fs::write(
                &writer_path,
                r#"{"pid": 7, "release": "R2023b", "port": 31000}"#,
            )
            .unwrap();
        });

        let handshake = wait_for_handshake(dir.path(), &path, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(handshake.pid, 7);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_watch_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(HANDSHAKE_FILE);
        let result = wait_for_handshake(dir.path(), &path, Duration::from_millis(200)).await;
        assert!(matches!(result, Err(LaunchError::HandshakeTimeout { .. })));
    }
}
