//! WeChat agent
//!
//! Supervises native WeChat engine processes on behalf of bridge users and
//! relays their messages to the bridge service.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wechat_agent::{
    command::CommandExecutor,
    config::AgentConfig,
    inbound::InboundListener,
    native::{dirs, LauncherDriver, SystemProcesses},
    panic::install_panic_hook,
    pipeline::{DedupCache, MediaResolver, Translator},
    session::SessionManager,
    transport::{run_pinger, run_reconnect_loop, GatewayConfig, ReconnectBackoff, TransportGateway},
};

/// Upper bound for the reconnect loop to notice a stop
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "wechat-agent")]
#[command(version)]
#[command(about = "Supervises WeChat engines and relays their events to a bridge")]
struct Cli {
    /// Configuration file path (TOML, or YAML by extension)
    #[arg(short, long, env = "WECHAT_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Bridge websocket URL
    #[arg(long)]
    addr: Option<String>,

    /// Bridge credential
    #[arg(long)]
    secret: Option<String>,

    /// Client version the engine should report
    #[arg(long)]
    wechat_version: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent (default)
    Run,

    /// Check the launcher and well-known directories
    Doctor,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AgentConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => AgentConfig::default(),
    };
    if let Some(addr) = cli.addr {
        config.service.addr = addr;
    }
    if let Some(secret) = cli.secret {
        config.service.secret = secret;
    }
    if let Some(version) = cli.wechat_version {
        config.wechat.version = version;
    }

    init_logging(&config, cli.verbose);
    install_panic_hook();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Doctor => run_doctor(&config),
        Commands::Config { default } => show_config(if default { None } else { Some(&config) }),
    }
}

fn init_logging(config: &AgentConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.log.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("wechat_agent={}", level).into());
    let json = config.log.format.eq_ignore_ascii_case("json");

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

async fn run(config: AgentConfig) -> Result<()> {
    config.validate()?;
    tracing::info!(addr = %config.service.addr, "Starting WeChat agent");

    let workdir = config.wechat.workdir.clone().unwrap_or_else(dirs::default_workdir);
    std::fs::create_dir_all(&workdir)
        .with_context(|| format!("Failed to create workdir {}", workdir.display()))?;
    let docdir = config
        .wechat
        .docdir
        .clone()
        .unwrap_or_else(dirs::engine_document_dir);
    tracing::info!(workdir = %workdir.display(), docdir = %docdir.display(), "Directories");

    let shutdown = CancellationToken::new();

    let manager = Arc::new(SessionManager::new(
        config.wechat.clone(),
        Arc::new(LauncherDriver::new(&config.wechat.launcher)),
        Arc::new(SystemProcesses::new()),
    )?);

    let executor = Arc::new(CommandExecutor::new(manager.clone(), workdir.clone()));
    let gateway = Arc::new(TransportGateway::new(
        GatewayConfig {
            addr: config.service.addr.clone(),
            secret: config.service.secret.clone(),
        },
        executor,
    ));

    let media = MediaResolver::new(
        workdir,
        docdir,
        config.wechat.poll_interval(),
        config.wechat.request_timeout(),
        shutdown.clone(),
    )?;
    let translator = Arc::new(Translator::new(
        DedupCache::new(config.wechat.dedup_capacity),
        media,
        manager.clone(),
        gateway.clone(),
    ));

    let listener = InboundListener::bind(config.wechat.listen_port).await?;
    let inbound = Arc::new(InboundListener::new(manager.clone(), translator));
    let listen_task = tokio::spawn(inbound.serve(listener, shutdown.clone()));

    let reconnect_task = tokio::spawn(run_reconnect_loop(
        gateway.clone(),
        ReconnectBackoff::from_config(&config.service),
        shutdown.clone(),
    ));
    let ping_task = tokio::spawn(run_pinger(
        gateway.clone(),
        config.service.ping_interval(),
        shutdown.clone(),
    ));

    tracing::info!("WeChat agent is running. Press Ctrl+C to stop.");
    wait_for_signal().await?;

    tracing::info!("Shutting down...");
    shutdown.cancel();
    gateway.stop().await;

    if tokio::time::timeout(STOP_TIMEOUT, reconnect_task).await.is_err() {
        tracing::warn!("Bridge connection did not close in time");
    }
    if let Err(e) = manager.dispose().await {
        tracing::warn!("Failed to dispose sessions: {}", e);
    }
    let _ = listen_task.await;
    let _ = ping_task.await;

    tracing::info!("WeChat agent stopped");
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

fn run_doctor(config: &AgentConfig) -> Result<()> {
    println!("WeChat agent doctor");
    println!();

    let launcher = &config.wechat.launcher.program;
    println!("Checking launcher...");
    if launcher.components().count() > 1 && !dirs::path_exists(launcher) {
        println!("  ✗ Launcher not found: {}", launcher.display());
    } else {
        println!("  ✓ Launcher: {}", launcher.display());
    }

    println!();
    println!("Checking directories...");
    let workdir = config.wechat.workdir.clone().unwrap_or_else(dirs::default_workdir);
    let docdir = config
        .wechat
        .docdir
        .clone()
        .unwrap_or_else(dirs::engine_document_dir);
    for (label, path) in [("Workdir", workdir), ("WeChat Files", docdir)] {
        if dirs::path_exists(&path) {
            println!("  ✓ {}: {}", label, path.display());
        } else {
            println!("  ℹ {} missing: {}", label, path.display());
        }
    }

    println!();
    println!("Checking configuration...");
    match config.validate() {
        Ok(()) => println!("  ✓ Bridge: {}", config.service.addr),
        Err(e) => println!("  ✗ {}", e),
    }

    Ok(())
}

fn show_config(config: Option<&AgentConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
