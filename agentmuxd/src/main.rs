use std::path::PathBuf;
use std::sync::Arc;

use agentmux_core::config::ConfigStore;
use anyhow::Result;
use tokio_util::sync::CancellationToken;

use agentmuxd::backend::PipeConnector;
use agentmuxd::process::SystemProcessControl;
use agentmuxd::router::Router;
use agentmuxd::install;
use agentmuxd::ui::{NoHints, NoSelection};
#[cfg(windows)]
use agentmuxd::server;

enum Command {
    Run,
    Uninstall,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (command, config_path) = parse_args();

    if let Command::Uninstall = command {
        install::uninstall().await?;
        return Ok(());
    }

    let config = ConfigStore::load(&config_path);
    tracing::info!(
        config = %config.path().display(),
        proxy_pipe = %config.config().proxy_pipe_name,
        backend_pipe = %config.config().backend_pipe_name,
        agents = config.config().agents.len(),
        "agentmuxd starting"
    );

    let proxy_pipe_name = config.config().proxy_pipe_name.clone();
    let backend_pipe_name = config.config().backend_pipe_name.clone();

    let cancel = CancellationToken::new();
    let router = Arc::new(
        Router::start(
            config,
            Arc::new(PipeConnector::new(&backend_pipe_name)),
            Arc::new(SystemProcessControl::new()),
            Arc::new(NoSelection),
            Arc::new(NoHints),
            cancel.clone(),
        )
        .await,
    );

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received shutdown signal");
                cancel.cancel();
            }
        });
    }

    run_server(&proxy_pipe_name, router, cancel).await
}

#[cfg(windows)]
async fn run_server(
    pipe_name: &str,
    router: Arc<Router>,
    cancel: CancellationToken,
) -> Result<()> {
    use anyhow::Context as _;

    server::serve(pipe_name, router, cancel)
        .await
        .with_context(|| {
            format!("failed to serve on pipe '{pipe_name}' (is another instance running?)")
        })
}

#[cfg(not(windows))]
async fn run_server(
    pipe_name: &str,
    _router: Arc<Router>,
    _cancel: CancellationToken,
) -> Result<()> {
    anyhow::bail!("agentmuxd serves Windows named pipes only (wanted pipe '{pipe_name}')")
}

fn parse_args() -> (Command, PathBuf) {
    let args: Vec<String> = std::env::args().collect();
    let mut command = Command::Run;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--uninstall" | "--reset" => command = Command::Uninstall,
            "--config" | "-c" => {
                if let Some(path) = args.get(i + 1) {
                    config_path = Some(PathBuf::from(path));
                    i += 1;
                } else {
                    eprintln!("error: --config requires a path argument");
                    std::process::exit(2);
                }
            }
            arg if arg.starts_with("--config=") => {
                config_path = Some(PathBuf::from(&arg["--config=".len()..]));
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("error: unknown argument '{other}'");
                print_usage();
                std::process::exit(2);
            }
        }
        i += 1;
    }

    (command, config_path.unwrap_or_else(default_config_path))
}

fn print_usage() {
    eprintln!("Usage: agentmuxd [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <path>  Path to config file (default: %APPDATA%\\agentmux\\config.json)");
    eprintln!("      --uninstall      Remove the persisted environment configuration");
    eprintln!("      --reset          Alias for --uninstall");
    eprintln!("  -h, --help           Show this help message");
}

fn default_config_path() -> PathBuf {
    let mut base = std::env::var_os("APPDATA")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from))
        .unwrap_or_else(|| {
            let home = std::env::var_os("HOME").unwrap_or_default();
            PathBuf::from(home).join(".config")
        });
    base.push("agentmux");
    base.push("config.json");
    base
}
