//! KVM server entry point.
//!
//! Loads the configuration, opens the listener and runs the single-threaded
//! event loop until the server stops.  A `restart_server` rule action stops
//! the loop with a restart request; the configuration is then read again and
//! a fresh loop starts.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load config            -- file → ServerSettings
//!  └─ loop
//!       ├─ EventLoop::new()  -- reactor + dispatcher
//!       ├─ start_listener()  -- AcceptJob on the configured port
//!       └─ Server::start()   -- keep-alive timer, then run until stopped
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kvm_core::screen::HeadlessScreen;
use kvm_core::status::LoggingStatus;
use kvm_core::{EventLoop, StatusEvent, StatusSink};
use kvm_server::application::server::{Server, ServerEvent};
use kvm_server::infrastructure::network::start_listener;
use kvm_server::infrastructure::storage::config::{self, ServerFileConfig};

/// Shares this machine's keyboard and mouse with client screens.
#[derive(Debug, Parser)]
#[command(name = "kvm-server", version, about)]
struct Args {
    /// Configuration file.  Defaults to the platform config directory.
    #[arg(short, long, env = "KVM_CONFIG")]
    config: Option<PathBuf>,
}

fn load(args: &Args) -> anyhow::Result<ServerFileConfig> {
    let file = match &args.config {
        Some(path) => config::load_config_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => config::load_config().context("loading the default configuration")?,
    };
    Ok(file)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let file = load(&args)?;

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&file.server.log_level)),
        )
        .init();

    info!("KVM server starting");
    let mut file = file;
    loop {
        let settings = file.to_settings().context("invalid configuration")?;
        let mut status = LoggingStatus;
        status.publish(StatusEvent::Starting);

        let mut event_loop =
            EventLoop::<ServerEvent>::new().context("creating the socket poller")?;
        let (_, bound) = start_listener(&mut event_loop.reactor, file.server.listen_addr())?;
        status.publish(StatusEvent::Listening { addr: bound });

        let screen = HeadlessScreen::new(file.server.screen_shape());
        let mut server = Server::new(settings, screen, status);
        server.start(&mut event_loop.dispatcher);
        event_loop.run(&mut server).context("event loop failed")?;

        if !server.restart_requested() {
            break;
        }
        info!("restarting with a fresh configuration");
        file = load(&args)?;
    }
    info!("KVM server stopped");
    Ok(())
}
