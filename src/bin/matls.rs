//! matls binary entry point.
//!
//! Speaks LSP on stdio; all logging goes to stderr so the protocol stream
//! stays clean.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tower_lsp::{LspService, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use matls::config::{ConnectionTiming, Settings, SettingsHandle};
use matls::server::Backend;

/// Language server for MATLAB code.
#[derive(Parser, Debug)]
#[command(name = "matls")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Extra arguments passed to the MATLAB executable.
    #[arg(long = "matlab-launch-command-arg")]
    matlab_launch_command_args: Vec<String>,

    /// MATLAB install directory (the executable is <path>/bin/matlab).
    #[arg(long)]
    matlab_install_path: Option<PathBuf>,

    /// When to connect: on-start, on-demand, or never.
    #[arg(long, default_value = "on-start")]
    matlab_connection_timing: ConnectionTiming,

    /// Bulk-index workspace folders on open.
    #[arg(long, default_value_t = false)]
    index_workspace: bool,

    /// Attach to a running MATLAB at this URL instead of launching one.
    #[arg(long)]
    matlab_url: Option<String>,

    /// Accepted for editor-launcher compatibility; stdio is the only
    /// transport.
    #[arg(long, default_value_t = true, hide = true)]
    #[allow(dead_code)]
    stdio: bool,
}

impl From<Cli> for Settings {
    fn from(cli: Cli) -> Self {
        Settings {
            launch_args: cli.matlab_launch_command_args,
            install_path: cli.matlab_install_path,
            connection_timing: cli.matlab_connection_timing,
            index_workspace: cli.index_workspace,
            url: cli.matlab_url,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = Arc::new(SettingsHandle::new(Settings::from(cli)));

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    let (service, socket) = LspService::new(move |client| Backend::new(client, settings));
    Server::new(stdin, stdout, socket).serve(service).await;
}
