use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deskcast::config::Config;
use deskcast::desktop::{self, IngestPorts, AUDIO_ENCODER, VIDEO_ENCODER};
use deskcast::input::{InputBackend, NoopBackend, X11Backend};
use deskcast::state::AppState;
use deskcast::supervisor::{ProcessControl, Supervisor};
use deskcast::utils::bind_tcp_listener;
use deskcast::viewers::{EncoderGate, ViewerCount};
use deskcast::web;
use deskcast::webrtc::{MediaKind, MediaRelay, RelayConfig};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// deskcast command line arguments
#[derive(Parser, Debug)]
#[command(name = "deskcast")]
#[command(version, about = "Stream a virtual Linux desktop to the browser over WebRTC", long_about = None)]
struct CliArgs {
    #[command(flatten)]
    config: Config,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    let config = args.config;
    config.validate()?;

    tracing::info!("Starting deskcast v{}", env!("CARGO_PKG_VERSION"));
    if !config.in_container {
        tracing::warn!("Not in a container, using test sources and no input injection");
    }

    let relay = Arc::new(MediaRelay::new(&RelayConfig::from_config(&config)?).await?);
    let ports = IngestPorts {
        video: relay.ingest_port(MediaKind::Video),
        audio: relay.ingest_port(MediaKind::Audio),
    };

    let supervisor = Arc::new(Supervisor::new(config.supervisor_logs));
    desktop::register_fleet(&supervisor, &config, ports)?;

    let input: Arc<dyn InputBackend> = if config.in_container {
        Arc::new(X11Backend::default())
    } else {
        Arc::new(NoopBackend)
    };

    let viewers = Arc::new(ViewerCount::new());
    let web_port = config.web_port;
    let state = AppState::new(config, supervisor.clone(), relay, viewers.clone(), input);

    let http_state = state.clone();
    supervisor.add_simple("http", move |token| {
        let state = http_state.clone();
        async move {
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, web_port));
            let listener = tokio::net::TcpListener::from_std(bind_tcp_listener(addr)?)?;
            web::serve(listener, state, token).await
        }
    })?;

    EncoderGate::new(
        supervisor.clone() as Arc<dyn ProcessControl>,
        [VIDEO_ENCODER, AUDIO_ENCODER],
    )
    .spawn(viewers);

    tokio::select! {
        _ = supervisor.run() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("Shutdown signal received");
        }
    }

    state.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "deskcast=error,tower_http=error",
        LogLevel::Warn => "deskcast=warn,tower_http=warn",
        LogLevel::Info => "deskcast=info,tower_http=info",
        LogLevel::Verbose => "deskcast=debug,tower_http=info",
        LogLevel::Debug => "deskcast=debug,tower_http=debug",
        LogLevel::Trace => "deskcast=trace,tower_http=debug,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
