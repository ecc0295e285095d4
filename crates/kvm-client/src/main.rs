//! KVM client entry point.
//!
//! Loads the configuration, connects to the server and runs the event loop
//! until the session ends.  The client does not reconnect on its own; a
//! service manager or the user restarts it.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load config             -- file + command line → ClientSettings
//!  └─ EventLoop::new()        -- reactor + dispatcher
//!  └─ connect_to_server()     -- ConnectJob towards the server
//!  └─ run until the session ends
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kvm_client::application::client::{Client, ClientEvent};
use kvm_client::infrastructure::network::connect_to_server;
use kvm_client::infrastructure::storage::config::{self, ClientFileConfig};
use kvm_core::screen::HeadlessScreen;
use kvm_core::status::LoggingStatus;
use kvm_core::{EventLoop, StatusEvent, StatusSink};

/// Lets a KVM server control this machine's keyboard and mouse.
#[derive(Debug, Parser)]
#[command(name = "kvm-client", version, about)]
struct Args {
    /// Configuration file.  Defaults to the platform config directory.
    #[arg(short, long, env = "KVM_CONFIG")]
    config: Option<PathBuf>,

    /// Server address, overriding the configured host and port.
    #[arg(short, long, env = "KVM_SERVER_ADDR")]
    server: Option<SocketAddr>,

    /// Screen name, overriding the configured one.
    #[arg(short, long, env = "KVM_SCREEN_NAME")]
    name: Option<String>,
}

fn load(args: &Args) -> anyhow::Result<ClientFileConfig> {
    let mut file = match &args.config {
        Some(path) => config::load_config_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => config::load_config().context("loading the default configuration")?,
    };
    if let Some(addr) = args.server {
        file.client.server_host = addr.ip().to_string();
        file.client.server_port = addr.port();
    }
    if let Some(name) = &args.name {
        file.client.screen_name = name.clone();
    }
    Ok(file)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let file = load(&args)?;

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&file.client.log_level)),
        )
        .init();

    info!("KVM client starting");
    let settings = file.to_settings().context("invalid configuration")?;
    let addr = file.client.server_addr()?;
    let mut status = LoggingStatus;
    status.publish(StatusEvent::Starting);

    let mut event_loop = EventLoop::<ClientEvent>::new().context("creating the socket poller")?;
    let token = connect_to_server(&mut event_loop.reactor, addr)?;

    let screen = HeadlessScreen::new(file.client.screen_shape());
    let mut client = Client::new(settings, screen, status);
    client.begin(token, addr);
    event_loop.run(&mut client).context("event loop failed")?;

    match client.end_reason() {
        Some(reason) => info!(%reason, "KVM client stopped"),
        None => info!("KVM client stopped"),
    }
    Ok(())
}
