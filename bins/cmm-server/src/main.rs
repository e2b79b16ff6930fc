use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use cmm_config::{Config, ConfigManager};
use cmm_dlm::LocalLockManager;
use cmm_memtarget::{MemConnector, MemDataObjectStore};
use cmm_proto::ConfigEvent;
use cmm_service::{Collaborators, NamespaceManager, ServerConfig};
use cmm_types::{NodeOrdinal, TargetIndex};
use tokio::signal::unix::{signal, SignalKind};

/// Clustered metadata namespace server over in-memory targets
#[derive(Parser, Debug)]
#[command(name = "cmm-server", version, about)]
struct Args {
    /// Path to configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dump default configuration and exit
    #[arg(long)]
    dump_default_config: bool,

    /// Seconds between retries of undestroyed data objects
    #[arg(long, default_value_t = 60)]
    orphan_retry_secs: u64,
}

enum Signal {
    Shutdown,
    Reload,
}

async fn wait_for_signal() -> anyhow::Result<Signal> {
    let mut sigterm = signal(SignalKind::terminate()).context("register SIGTERM handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("register SIGHUP handler")?;
    let sig = tokio::select! {
        _ = tokio::signal::ctrl_c() => { tracing::info!("Received CTRL+C"); Signal::Shutdown }
        _ = sigterm.recv() => { tracing::info!("Received SIGTERM"); Signal::Shutdown }
        _ = sighup.recv() => { tracing::info!("Received SIGHUP"); Signal::Reload }
    };
    Ok(sig)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.dump_default_config {
        print!("{}", ServerConfig::default().render()?);
        return Ok(());
    }

    let configs = match &args.config {
        Some(path) => ConfigManager::<ServerConfig>::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => {
            let config = ServerConfig::default();
            config.validate()?;
            ConfigManager::new(config)
        }
    };
    let config = configs.get();
    let _log_guard = cmm_logging::init_logging(&config.log)?;

    tracing::info!(
        ordinal = config.cluster.local_ordinal,
        targets = config.cluster.targets.len(),
        "Starting metadata namespace server"
    );

    let connector = Arc::new(MemConnector::new(config.cluster.stripe_count));
    let manager = Arc::new(NamespaceManager::new(
        config.namespace.clone(),
        Collaborators {
            connector,
            lock_manager: Arc::new(LocalLockManager::new()),
            fids: None,
            data: Arc::new(MemDataObjectStore::new()),
        },
    ));

    manager
        .process_config(ConfigEvent::Setup {
            local_ordinal: NodeOrdinal(config.cluster.local_ordinal),
        })
        .await?;
    for target in &config.cluster.targets {
        let event = ConfigEvent::AddTarget {
            index: TargetIndex(target.index),
            connection_info: target.connection_info.clone(),
        };
        if let Err(e) = manager.process_config(event).await {
            tracing::error!(target_index = target.index, error = %e, "failed to add target");
        }
    }

    let ops = manager.ops()?;
    if config.cluster.local_ordinal == 0 {
        let root = ops.root_get().await?;
        tracing::info!(%root, "namespace root located");
    }
    let statfs = ops.statfs().await?;
    tracing::info!(files = statfs.files, namelen = statfs.namelen, "Metadata server initialization complete");

    let reclaimer = {
        let manager = manager.clone();
        let period = Duration::from_secs(args.orphan_retry_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Ok(ops) = manager.ops() else { break };
                if !ops.orphans().is_empty() {
                    ops.retry_orphans().await;
                }
            }
        })
    };

    loop {
        match wait_for_signal().await? {
            Signal::Shutdown => break,
            Signal::Reload => match configs.reload() {
                Ok(()) => {
                    manager.update_config(&configs.get().namespace);
                    tracing::info!("namespace config reloaded");
                }
                Err(e) => tracing::warn!(error = %e, "config reload failed, keeping current"),
            },
        }
    }

    tracing::info!("Metadata server shutting down");
    reclaimer.abort();
    manager.process_config(ConfigEvent::Cleanup).await?;
    Ok(())
}
