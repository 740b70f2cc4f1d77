//! Adapter entry point: binds the DBGp listening socket and feeds every
//! accepted engine connection through [`SessionManager::accept`]. DAP
//! transport (stdio framing, request dispatch) is a separate concern the
//! [`dispatcher`] module exists to be driven by; this binary only proves
//! out the DBGp-facing half end to end by logging session events to stderr.

use std::io;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use xdebug_dap::configuration::Configuration;
use xdebug_dap::external::{CloudClient, ProxyClient};
use xdebug_dap::{Dispatcher, SessionManager};

/// Xdebug DBGp debug adapter.
#[derive(Parser, Debug)]
#[command(name = "xdebug-dap", version, about, long_about = None)]
struct Args {
    /// Path to a JSON configuration file (see `Configuration`). Falls back
    /// to built-in defaults (0.0.0.0:9003, no path mappings) when absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listening host from the configuration file.
    #[arg(long)]
    host: Option<String>,

    /// Override the listening port from the configuration file.
    #[arg(long)]
    port: Option<u16>,

    /// Logging level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn load_configuration(args: &Args) -> anyhow::Result<Configuration> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text)?
        }
        None => Configuration::default(),
    };
    if let Some(host) = &args.host {
        config.hostname = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    Ok(config)
}

/// Register with a proxy or Xdebug Cloud relay if configured, per §6.
async fn register_externally(config: &Configuration, ide_port: u16) {
    if let Some(proxy) = &config.proxy {
        if proxy.enable {
            match ProxyClient::connect(&proxy.host, proxy.port).await {
                Ok(mut client) => match client.init(&proxy.key, ide_port, proxy.allow_multiple_sessions).await {
                    Ok(reply) if reply.success => info!(host = %proxy.host, "registered with DBGp proxy"),
                    Ok(reply) => warn!(message = ?reply.error_message, "proxy registration refused"),
                    Err(e) => error!(error = %e, "proxy registration failed"),
                },
                Err(e) => error!(error = %e, "could not connect to proxy"),
            }
        }
    }

    if let Some(token) = &config.xdebug_cloud_token {
        match CloudClient::connect_for_token(token).await {
            Ok(mut client) => match client.init(token).await {
                Ok(reply) if reply.success => info!("registered with Xdebug Cloud"),
                Ok(reply) => warn!(message = ?reply.error_message, "cloud registration refused"),
                Err(e) => error!(error = %e, "cloud registration failed"),
            },
            Err(e) => error!(error = %e, "could not connect to Xdebug Cloud relay"),
        }
    }
}

/// Accept loop: runs until the listening socket errors. Shutdown on
/// `Ctrl-C` is handled by the caller, which holds its own reference to
/// `session` for that purpose.
async fn accept_loop(listener: TcpListener, session: std::sync::Arc<SessionManager>) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "engine connected");
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = session.accept(stream).await {
                warn!(error = %e, "connection bootstrap failed");
            }
        });
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = load_configuration(&args)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let addr = format!("{}:{}", config.hostname, config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(%addr, "listening for DBGp engine connections");

        register_externally(&config, config.port).await;

        let (dispatcher, mut events) = Dispatcher::new(config);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                info!(?event, "session event");
            }
        });

        let session = dispatcher.session().clone();
        let shutdown_session = session.clone();
        tokio::select! {
            result = accept_loop(listener, session) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                shutdown_session.shutdown().await;
                Ok(())
            }
        }
    })
}
