//! `praktor serve`: assembles every component and runs the
//! gateway until Ctrl-C or SIGHUP-driven reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use praktor_bus::{BusClient, NatsBusClient, NatsBusConfig};
use praktor_config::ConfigFile;
use praktor_container::{BollardContainerAdapter, ContainerAdapter};
use praktor_core::{registry, Orchestrator, ReadyConfig, Registry, Scheduler, SwarmCoordinator, Vault};
use praktor_persistence::{AgentFileMount, AgentRow, Store};
use praktor_telegram::{TelegramIngress, TelegramIngressConfig};
use tracing::{info, warn};

const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_SCHEDULER_POLL: Duration = Duration::from_secs(30);

pub struct ServeArgs {
    pub config_path: PathBuf,
    pub db_path: PathBuf,
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let (snapshot, cfg) = praktor_config::load_registry_snapshot(&args.config_path)?;
    info!(agents = snapshot.agents.len(), default_agent = %snapshot.default_agent, "loaded config");

    let store = Store::new(&args.db_path)?;
    sync_agents_table(&store, &snapshot).await;

    let vault = Arc::new(Vault::new(store.clone(), cfg.vault.passphrase.as_deref())?);

    let bus_url = std::env::var("PRAKTOR_BUS_URL").unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string());
    let monitor_url = std::env::var("PRAKTOR_NATS_MONITOR_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:8222".to_string());
    let bus: Arc<dyn BusClient> =
        Arc::new(NatsBusClient::connect(NatsBusConfig::new(bus_url.clone(), monitor_url)).await?);

    let container: Arc<dyn ContainerAdapter> = Arc::new(BollardContainerAdapter::connect()?);
    let registry = Arc::new(Registry::new(snapshot));

    let orchestrator = Orchestrator::new(
        registry.clone(),
        store.clone(),
        bus.clone(),
        container,
        vault.clone(),
        bus_url,
        ReadyConfig::default(),
    );
    orchestrator.spawn_output_listener();
    orchestrator.spawn_ipc_listener();
    orchestrator.spawn_idle_reaper();

    let _swarm = SwarmCoordinator::new(store.clone(), bus.clone(), orchestrator.clone(), registry.clone());

    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        orchestrator.clone() as Arc<dyn praktor_core::TaskDispatcher>,
        cfg.telegram.main_chat_id,
        cfg.scheduler
            .poll_interval
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SCHEDULER_POLL),
    ));

    let mut telegram_handle = None;
    if let Some(token) = cfg.telegram.token.clone() {
        let ingress = TelegramIngress::new(
            TelegramIngressConfig {
                token,
                allow_from: cfg.telegram.allow_from.clone(),
            },
            registry.clone(),
            orchestrator.clone(),
        );
        orchestrator.register_output_listener(ingress.clone() as Arc<dyn praktor_core::OutputListener>);
        orchestrator.register_file_listener(ingress.clone() as Arc<dyn praktor_core::FileListener>);
        telegram_handle = Some(tokio::spawn(ingress.run()));
    } else {
        warn!("telegram.token not configured; chat ingress disabled");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let scheduler_task = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(async { let _ = shutdown_rx.await; }).await })
    };

    let reload_task = tokio::spawn(reload_loop(
        args.config_path.clone(),
        cfg.clone(),
        registry.clone(),
        orchestrator.clone(),
        scheduler.clone(),
        store.clone(),
    ));

    let _ = telegram_handle;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());
    reload_task.abort();
    scheduler_task.abort();
    orchestrator.shutdown().await;
    Ok(())
}

/// Mirrors the registry's agent definitions into the `agents` table so
/// persistence stays consistent with the live config on startup and reload.
async fn sync_agents_table(store: &Store, snapshot: &registry::RegistrySnapshot) {
    for def in snapshot.agents.values() {
        let row = AgentRow {
            id: def.id.clone(),
            display_name: def.display_name.clone(),
            description: def.description.clone(),
            model: def.model.clone(),
            image: def.image.clone(),
            workspace: def.workspace.clone(),
            env: def.env.clone(),
            allowed_tools: def.allowed_tools.clone(),
            files: def
                .files
                .iter()
                .map(|f| AgentFileMount {
                    secret_name: f.secret_name.clone(),
                    target_path: f.target_path.clone(),
                    mode: f.mode,
                })
                .collect(),
            nix_enabled: def.nix_enabled,
        };
        if let Err(e) = store.upsert_agent(&row).await {
            warn!(agent_id = %def.id, error = %e, "failed to sync agent row");
        }
    }
}

/// Config hot-reload loop: polls the file every [`CONFIG_POLL_INTERVAL`],
/// confirms a real content change, validates, diffs against the live
/// registry, stops containers for removed/mutated agents, swaps the
/// registry, pushes live-apply fields into the scheduler, and warns on any
/// restart-required field change.
async fn reload_loop(
    path: PathBuf,
    mut last_cfg: ConfigFile,
    registry: Arc<Registry>,
    orchestrator: Arc<Orchestrator>,
    scheduler: Arc<Scheduler>,
    store: Store,
) {
    let mut watcher = match praktor_config::ChangeWatcher::new(&path) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "failed to start config watcher");
            return;
        }
    };
    let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install SIGHUP handler; file-watch reload still active");
            return reload_loop_no_sighup(path, last_cfg, registry, orchestrator, scheduler, store, watcher).await;
        }
    };
    loop {
        tokio::select! {
            _ = tokio::time::sleep(CONFIG_POLL_INTERVAL) => {
                match watcher.poll() {
                    Ok(Some(_)) => {}
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(error = %e, "config watch poll failed");
                        continue;
                    }
                }
            }
            _ = sighup.recv() => {
                info!("SIGHUP received, forcing config reload");
                // Re-sync the watcher's baseline so the next mtime-poll tick
                // doesn't see a stale hash and skip a reload we just forced.
                let _ = watcher.poll();
            }
        }
        if let Err(e) = apply_reload(&path, &mut last_cfg, &registry, &orchestrator, &scheduler, &store).await {
            warn!(error = %e, "config reload failed, keeping previous configuration");
        }
    }
}

/// Fallback used only if installing the SIGHUP handler itself fails.
async fn reload_loop_no_sighup(
    path: PathBuf,
    mut last_cfg: ConfigFile,
    registry: Arc<Registry>,
    orchestrator: Arc<Orchestrator>,
    scheduler: Arc<Scheduler>,
    store: Store,
    mut watcher: praktor_config::ChangeWatcher,
) {
    loop {
        tokio::time::sleep(CONFIG_POLL_INTERVAL).await;
        match watcher.poll() {
            Ok(Some(_)) => {}
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "config watch poll failed");
                continue;
            }
        }
        if let Err(e) = apply_reload(&path, &mut last_cfg, &registry, &orchestrator, &scheduler, &store).await {
            warn!(error = %e, "config reload failed, keeping previous configuration");
        }
    }
}

async fn apply_reload(
    path: &Path,
    last_cfg: &mut ConfigFile,
    registry: &Arc<Registry>,
    orchestrator: &Arc<Orchestrator>,
    scheduler: &Arc<Scheduler>,
    store: &Store,
) -> Result<()> {
    let (new_snapshot, new_cfg) = praktor_config::load_registry_snapshot(path)?;
    let old_snapshot = registry.load();
    let diff = registry::diff(&old_snapshot, &new_snapshot);

    for agent_id in diff.removed.iter().chain(diff.mutated.iter()) {
        orchestrator.stop_if_running(agent_id).await;
    }
    for agent_id in &diff.removed {
        let _ = store.delete_agent(agent_id).await;
    }

    sync_agents_table(store, &new_snapshot).await;
    let main_chat_id = new_snapshot.main_chat_id;
    registry.swap(new_snapshot);

    scheduler.set_main_chat_id(main_chat_id);
    if let Some(secs) = new_cfg.scheduler.poll_interval {
        scheduler.set_poll_interval(Duration::from_secs(secs));
    }

    for field in praktor_config::restart_required_changes(last_cfg, &new_cfg) {
        warn!(field = %field, "config field changed but requires a process restart to take effect");
    }

    info!(
        added = diff.added.len(),
        removed = diff.removed.len(),
        mutated = diff.mutated.len(),
        "config reload applied"
    );
    *last_cfg = new_cfg;
    Ok(())
}
