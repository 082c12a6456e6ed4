//! connkit - line-oriented TCP echo server and client
//!
//! `connkit serve` runs an echo server on the acceptor pipeline, with an
//! optional auto-disconnect grace period and heartbeat task per session.
//! `connkit send` connects, writes lines and prints the replies.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use connkit::{
    AcceptorBuilder, AutoDisconnect, Config, ConfigManager, ConnectHelper, ConnectorBuilder,
    IoHandler, ScopedTask, Session, ShutdownCoordinator, TaskScheduler,
};

/// CLI arguments for connkit
#[derive(Parser, Debug)]
#[command(name = "connkit")]
#[command(about = "Line-oriented TCP echo server and client")]
#[command(version)]
#[command(long_about = "
connkit - line-oriented TCP echo server and client

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  CONNKIT_BIND_ADDR         - Bind address (e.g., 127.0.0.1:9123)
  CONNKIT_CONNECT_TIMEOUT   - Connect timeout (e.g., 1s, 500ms)
  CONNKIT_IDLE_TIMEOUT      - Reader idle timeout (e.g., 30s)
  CONNKIT_LOG_WIDTH         - Maximum logged message width (0 = unlimited)
  CONNKIT_ORDERED_DISPATCH  - Serialize writes through one lane (true/false)
  CONNKIT_LOG_LEVEL         - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "connkit.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Connect timeout in seconds
    #[arg(long, help = "Connect timeout in seconds")]
    pub timeout: Option<u64>,

    /// Maximum logged message width
    #[arg(long, help = "Maximum logged message width (0 = unlimited)")]
    pub log_width: Option<i64>,

    /// Deliver writes without the ordered dispatch lane
    #[arg(long, help = "Deliver writes without the ordered dispatch lane")]
    pub unordered: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the echo server
    Serve {
        /// Bind address (overrides config file)
        #[arg(short, long, help = "Bind address (e.g., 127.0.0.1:9123)")]
        bind: Option<String>,

        /// Port to bind to (overrides config file)
        #[arg(short, long, help = "Port to bind to")]
        port: Option<u16>,

        /// Close sessions that stay silent this many seconds
        #[arg(long, help = "Auto-disconnect grace period in seconds")]
        auto_disconnect: Option<u64>,

        /// Send a heartbeat line every this many seconds
        #[arg(long, help = "Heartbeat interval in seconds")]
        heartbeat: Option<u64>,
    },
    /// Connect to a server, send lines and print the replies
    Send {
        #[arg(long, default_value = "127.0.0.1", help = "Server address")]
        host: IpAddr,

        #[arg(short, long, default_value_t = 9123, help = "Server port")]
        port: u16,

        /// How long to wait for replies, in seconds
        #[arg(short, long, default_value_t = 2, help = "Seconds to wait for replies")]
        wait: u64,

        /// Lines to send
        lines: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    init_tracing(&args)?;

    info!("Starting connkit v{}", env!("CARGO_PKG_VERSION"));

    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    let (bind, port) = match &args.command {
        Some(Command::Serve { bind, port, .. }) => (bind.as_deref(), *port),
        _ => (None, None),
    };
    config.merge_with_cli_args(bind, port, args.timeout, args.log_width, args.unordered);

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        for line in config.to_string().lines() {
            info!("  {}", line);
        }
        return Ok(());
    }

    match args.command {
        Some(Command::Send {
            host,
            port,
            wait,
            lines,
        }) => send(config, host, port, wait, lines).await,
        Some(Command::Serve {
            auto_disconnect,
            heartbeat,
            ..
        }) => serve(config, auto_disconnect, heartbeat).await,
        None => serve(config, None, None).await,
    }
}

/// Echoes every line back; `quit` ends the session.
struct EchoHandler {
    scheduler: Arc<TaskScheduler>,
    auto_disconnect: Option<u64>,
    heartbeat: Option<u64>,
}

impl EchoHandler {
    fn arm(&self, session: &Arc<Session>) {
        if let Some(seconds) = self.auto_disconnect {
            if let Err(e) = AutoDisconnect::arm(&self.scheduler, session, seconds) {
                warn!("{} failed to arm auto-disconnect: {}", session.peer_label(), e);
            }
        }
    }
}

impl IoHandler for EchoHandler {
    fn session_opened(&self, session: &Arc<Session>) {
        self.arm(session);

        if let Some(seconds) = self.heartbeat {
            let interval = Duration::from_secs(seconds);
            let task = ScopedTask::new("heartbeat", |ctx| async move {
                if let Some(session) = ctx.session() {
                    session.write(format!("HEARTBEAT {}", ctx.handle().fire_count()));
                }
            });
            if let Err(e) = self.scheduler.bind(session, task, interval, interval) {
                warn!("{} failed to bind heartbeat: {}", session.peer_label(), e);
            }
        }
    }

    fn message_received(&self, session: &Arc<Session>, message: &str) {
        if AutoDisconnect::disarm(session) {
            self.arm(session);
        }

        if message.trim().eq_ignore_ascii_case("quit") {
            session.write("BYE");
            session.close();
        } else {
            session.write(message);
        }
    }
}

async fn serve(config: Config, auto_disconnect: Option<u64>, heartbeat: Option<u64>) -> Result<()> {
    let bind_addr = config.server.bind_addr;
    let shutdown_coordinator = ShutdownCoordinator::new(config.server.shutdown_timeout);

    let scheduler = TaskScheduler::start()?;
    let handler = Arc::new(EchoHandler {
        scheduler: Arc::clone(&scheduler),
        auto_disconnect,
        heartbeat,
    });

    let builder = AcceptorBuilder::new(config);
    let acceptor = builder.build()?;
    let listener = acceptor
        .bind(bind_addr, handler)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    info!("connkit listening on {}", listener.local_addr());
    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
    }

    info!("Initiating graceful shutdown...");
    shutdown_coordinator
        .shutdown_acceptor(&listener, builder.pipeline_builder())
        .await;
    scheduler.shutdown();

    info!("Server shutdown complete");
    Ok(())
}

/// Prints every line received from the server.
struct PrintHandler;

impl IoHandler for PrintHandler {
    fn message_received(&self, _session: &Arc<Session>, message: &str) {
        println!("{message}");
    }
}

async fn send(config: Config, host: IpAddr, port: u16, wait: u64, lines: Vec<String>) -> Result<()> {
    let builder = ConnectorBuilder::new(config);
    let connector = builder.build()?;
    let helper = ConnectHelper::new(connector, Arc::new(PrintHandler));

    let session = helper
        .connect_to("server", host, port)
        .await
        .with_context(|| format!("Could not connect to {}:{}", host, port))?;

    for line in lines {
        session.write(line);
    }

    // Stop early if the server hangs up.
    let _ = tokio::time::timeout(Duration::from_secs(wait), session.closed()).await;
    session.close();
    session.closed().await;

    builder.pipeline_builder().shutdown_dispatch();
    builder.pipeline_builder().dispatch_terminated().await;
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
