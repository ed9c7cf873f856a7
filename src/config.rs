//! Server settings.
//!
//! The same [`Settings`] struct is populated from two sources: command-line
//! flags at launch, and the client's `workspace/configuration` payload
//! (section `matlab`), which takes precedence whenever the client pushes an
//! update. A shared [`SettingsHandle`] hangs off the server root and is read
//! by the session, the indexers, and the providers.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// When the server establishes the MATLAB connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionTiming {
    /// Connect right after the client's `initialized` notification.
    #[default]
    #[serde(rename = "on-start")]
    OnStart,
    /// Connect the first time a feature needs the interpreter.
    #[serde(rename = "on-demand")]
    OnDemand,
    /// Never connect; interpreter-backed features return empty results.
    #[serde(rename = "never")]
    Never,
}

impl FromStr for ConnectionTiming {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on-start" => Ok(ConnectionTiming::OnStart),
            "on-demand" => Ok(ConnectionTiming::OnDemand),
            "never" => Ok(ConnectionTiming::Never),
            other => Err(format!(
                "invalid connection timing '{other}' (expected on-start, on-demand, or never)"
            )),
        }
    }
}

/// Recognized configuration options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Extra argv passed to the MATLAB executable.
    #[serde(rename = "matlabLaunchCommandArgs", default)]
    pub launch_args: Vec<String>,

    /// Base install directory; the executable is derived as `<path>/bin/matlab`.
    /// When unset the executable is searched on `PATH`.
    #[serde(rename = "matlabInstallPath", default)]
    pub install_path: Option<PathBuf>,

    #[serde(rename = "matlabConnectionTiming", default)]
    pub connection_timing: ConnectionTiming,

    /// Whether to bulk-index workspace folders on open/change.
    #[serde(rename = "indexWorkspace", default)]
    pub index_workspace: bool,

    /// Attach to an already-running MATLAB at this URL instead of launching.
    #[serde(rename = "matlabUrl", default)]
    pub url: Option<String>,
}

/// Shared, updatable settings.
#[derive(Debug, Default)]
pub struct SettingsHandle {
    inner: RwLock<Settings>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        SettingsHandle {
            inner: RwLock::new(settings),
        }
    }

    /// Snapshot of the current settings.
    pub fn get(&self) -> Settings {
        self.inner.read().expect("settings lock poisoned").clone()
    }

    /// Replace the settings wholesale (configuration push from the client).
    pub fn replace(&self, settings: Settings) {
        *self.inner.write().expect("settings lock poisoned") = settings;
    }

    /// Apply a `workspace/configuration` value for the `matlab` section.
    /// Unknown fields are ignored; a malformed section leaves the current
    /// settings untouched.
    pub fn apply_configuration(&self, value: serde_json::Value) -> bool {
        match serde_json::from_value::<Settings>(value) {
            Ok(settings) => {
                self.replace(settings);
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed configuration section");
                false
            }
        }
    }
}
