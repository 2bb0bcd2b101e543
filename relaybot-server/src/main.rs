use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use relaybot_ai::OpenAiProvider;
use relaybot_common::models::Platform;
use relaybot_core::http::{start_admin_server, AdminServer, AdminState};
use relaybot_core::persona::load_persona;
use relaybot_core::platforms::telegram::TelegramPlatform;
use relaybot_core::platforms::twitch_irc::TwitchIrcPlatform;
use relaybot_core::platforms::PlatformIntegration;
use relaybot_core::services::{DispatchMode, MessageDispatcher, ResponseGenerator};
use relaybot_core::state::BotState;
use relaybot_core::tasks::maintenance::spawn_maintenance_task;
use relaybot_core::BotConfig;

const INBOUND_QUEUE: usize = 256;

#[derive(Parser, Debug, Clone)]
#[command(name = "relaybot")]
#[command(author, version, about = "RelayBot - relays chat messages to an LLM and posts the replies")]
struct Args {
    /// Chat platform to connect to: "twitch" or "telegram"
    #[arg(long, default_value = "twitch")]
    platform: Platform,

    /// Address for the admin HTTP server. Defaults to 0.0.0.0:$PORT.
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Persona file, overrides CONTEXT_FILE
    #[arg(long)]
    context_file: Option<PathBuf>,

    /// Handle one message at a time instead of spawning a task per message
    #[arg(long, default_value = "false")]
    serial: bool,

    /// Don't start the admin HTTP server
    #[arg(long, default_value = "false")]
    no_http: bool,
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("relaybot=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(sub) {
        eprintln!("Failed to set global subscriber: {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // a missing .env is fine, the environment may already be populated
    dotenv::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    info!("RelayBot starting. platform={}, serial={}", args.platform, args.serial);

    if let Err(e) = run(args).await {
        error!("Fatal: {:#}", e);
        return Err(e);
    }
    info!("Main finished. Goodbye!");
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = BotConfig::from_env().context("reading configuration")?;
    if let Some(path) = &args.context_file {
        config.context_file = path.clone();
    }
    config.validate(args.platform).context("invalid configuration")?;

    match args.platform {
        Platform::TwitchIRC => {
            let platform = Arc::new(TwitchIrcPlatform::new(config.twitch.clone()));
            serve(platform, config, &args).await
        }
        Platform::Telegram => {
            // telegram threads replies onto the question instead of @-mentioning
            config.dispatch.mention_user = false;
            let platform = Arc::new(TelegramPlatform::new(config.telegram.clone())?);
            serve(platform, config, &args).await
        }
    }
}

async fn serve<P>(platform: Arc<P>, config: BotConfig, args: &Args) -> anyhow::Result<()>
where
    P: PlatformIntegration + 'static,
{
    let persona = load_persona(&config.context_file);
    let state = Arc::new(BotState::new(
        persona,
        config.history_length,
        config.cache.clone(),
        config.limits.clone(),
    ));

    let provider = OpenAiProvider::new(config.provider.clone())?;
    info!("Using model {} at {}", config.generator.model, provider.config().api_base());
    let generator = Arc::new(ResponseGenerator::new(
        Arc::new(provider),
        Arc::clone(&state),
        config.generator.clone(),
    ));

    let dispatcher = Arc::new(MessageDispatcher::new(
        Arc::clone(&state),
        Arc::clone(&generator),
        platform.clone(),
        config.dispatch.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintenance = spawn_maintenance_task(
        Arc::clone(&state),
        config.maintenance_interval,
        shutdown_rx.clone(),
    );

    let admin: Option<AdminServer> = if args.no_http {
        None
    } else {
        let addr = args
            .http_addr
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], config.http_port)));
        let admin_state = AdminState {
            name: "relaybot".to_string(),
            state: Arc::clone(&state),
            generator: Arc::clone(&generator),
        };
        Some(start_admin_server(addr, admin_state).await?)
    };

    let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
    platform.connect(tx).await.context("connecting to chat platform")?;

    let mode = if args.serial { DispatchMode::Serial } else { DispatchMode::Concurrent };
    let dispatch_task = tokio::spawn(Arc::clone(&dispatcher).run(rx, mode, shutdown_rx));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {:?}", e);
    }
    info!("Ctrl-C detected; shutting down...");
    let _ = shutdown_tx.send(true);

    if let Err(e) = platform.disconnect().await {
        warn!("Error disconnecting from {}: {}", platform.platform(), e);
    }
    if let Err(e) = dispatch_task.await {
        warn!("Dispatcher task ended abnormally: {:?}", e);
    }
    if let Err(e) = maintenance.await {
        warn!("Maintenance task ended abnormally: {:?}", e);
    }
    if let Some(server) = admin {
        server.stop().await;
    }

    let snapshot = state.metrics_snapshot();
    info!(
        "Shutdown complete. processed={} replied={} errors={}",
        snapshot.processed, snapshot.replied, snapshot.errors
    );
    Ok(())
}
