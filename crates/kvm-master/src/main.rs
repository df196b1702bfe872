//! KVM-Over-IP Master entry point.
//!
//! Loads configuration, starts the command dispatch thread and the
//! named-pipe plugin bridge, then waits for Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config / Cli overrides
//!  └─ start services
//!       ├─ CommandDispatcher::run   ("kvm-dispatch" thread)
//!       └─ PluginBridge             ("kvm-pipe-bridge" thread)
//!  └─ ctrl_c ──► bridge.cleanup() ──► ServerEvent::Shutdown ──► join
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kvm_core::domain::clipboard::MemoryClipboard;
use kvm_core::domain::clipboard_registry::ClipboardRegistry;
use kvm_core::domain::feedback::PluginFeedback;
use kvm_master::application::dispatch_command::{
    spawn_dispatch_thread, CommandDispatcher, CommandSubmitter,
};
use kvm_master::infrastructure::plugin_bridge::{plugin_version, PluginBridge};
use kvm_master::infrastructure::screen_control::LoggingScreenController;
use kvm_master::infrastructure::storage::config::{self, AppConfig, ConfigError};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// KVM-Over-IP master with a named-pipe plugin control channel.
#[derive(Debug, Parser)]
#[command(name = "kvm-master", about = "KVM-Over-IP master", version)]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, env = "KVM_MASTER_CONFIG")]
    config: Option<PathBuf>,

    /// FIFO the plugin bridge reads commands from.
    #[arg(long, env = "KVM_PLUGIN_PIPE")]
    input_pipe: Option<PathBuf>,

    /// Log level used when `RUST_LOG` is unset; overrides the config file.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<AppConfig> {
        let result = match &self.config {
            Some(path) => config::load_config_from(path),
            None => config::load_config(),
        };
        match result {
            // Headless environments may have neither HOME nor APPDATA.
            Err(ConfigError::NoPlatformConfigDir) => Ok(AppConfig::default()),
            other => other.context("failed to load configuration"),
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = cli.load_config()?;
    if let Some(pipe) = &cli.input_pipe {
        cfg.plugin.input_pipe = pipe.clone();
    }

    // `RUST_LOG` wins over --log-level, which wins over the config file.
    let level = cli.log_level.as_deref().unwrap_or(&cfg.master.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    info!("KVM-Over-IP Master starting");

    let feedback = Arc::new(PluginFeedback::new());
    let clipboards = Arc::new(ClipboardRegistry::new());
    let master_clipboard = MemoryClipboard::registered(&clipboards);

    // ── Dispatch thread ───────────────────────────────────────────────────────
    let screens = cfg.screen_registry();
    info!(
        "{} screens configured; active screen is {}",
        screens.len(),
        screens.master_name()
    );
    let dispatcher = CommandDispatcher::new(
        screens,
        Arc::new(LoggingScreenController::new()),
        Arc::clone(&feedback),
        Arc::clone(&clipboards),
    );
    let (submitter, events) = CommandSubmitter::channel();
    let dispatch_thread =
        spawn_dispatch_thread(dispatcher, events).context("failed to spawn dispatch thread")?;

    // ── Plugin bridge ─────────────────────────────────────────────────────────
    let mut bridge = if cfg.plugin.enabled {
        let mut bridge = PluginBridge::init(cfg.plugin.bridge_config());
        bridge
            .init_event(submitter.clone(), Arc::clone(&feedback))
            .context("failed to start plugin bridge")?;
        info!("plugin bridge {} ready", plugin_version());
        Some(bridge)
    } else {
        warn!("plugin bridge disabled in configuration");
        None
    };

    info!("KVM-Over-IP Master ready.  Press Ctrl-C to exit.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown signal received");

    // ── Shutdown ──────────────────────────────────────────────────────────────
    if let Some(bridge) = bridge.as_mut() {
        bridge.cleanup();
    }
    submitter.shutdown();
    let executed = dispatch_thread
        .join()
        .map_err(|_| anyhow!("dispatch thread panicked"))?;
    drop(master_clipboard);

    info!("KVM-Over-IP Master stopped after {executed} plugin commands");
    Ok(())
}
