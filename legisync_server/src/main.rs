use anyhow::Context;
use clap::Parser;
use legisync_core::config::SyncConfig;
use legisync_core::registry::{EnvCredentialResolver, PluginRegistry, RegistryConfig};
use legisync_core::store::SyncStateStore;
use legisync_core::sync::{SyncOrchestrator, TaskStatus};
use legisync_integrations::{builtin_catalog, default_registry_config};
use legisync_server::cli::{build_request, Cli, Commands};
use legisync_server::dev_backends::{build_dev_stores, DevSyncStateStore};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
#[tracing::instrument(level = "info")]
async fn main() -> anyhow::Result<()> {
    legisync_core::o11y::init_global_from_env()?;
    let cli = Cli::parse();

    match cli.command.unwrap_or_default() {
        Commands::Sync {
            jurisdictions,
            entity_types,
            full,
            registry,
            data_dir,
        } => {
            let config = SyncConfig::from_env()?;
            let registry_cfg = match registry {
                Some(path) => RegistryConfig::load(&path)
                    .await
                    .with_context(|| format!("loading registry {}", path.display()))?,
                None => default_registry_config(),
            };
            let registry = PluginRegistry::from_config(
                &registry_cfg,
                &builtin_catalog(),
                Arc::new(EnvCredentialResolver),
                config,
            )?;
            let (store, state) = build_dev_stores(&data_dir).await?;
            let orchestrator = SyncOrchestrator::new(registry, store, state);

            let request = build_request(&jurisdictions, &entity_types, full)?;

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("ctrl-c received; stopping sync");
                    let _ = shutdown_tx.send(true);
                }
            });

            let report = orchestrator.synchronize_until(request, shutdown_rx).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            let failed_tasks = report
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Failed)
                .count();
            if failed_tasks > 0 || !report.config_errors.is_empty() {
                anyhow::bail!(
                    "sync finished with {failed_tasks} failed tasks and {} config errors",
                    report.config_errors.len()
                );
            }
            if report.has_failures() {
                tracing::warn!(failed = report.total_failed(), "some records will be retried next run");
            }
        }
        Commands::Watermarks { data_dir } => {
            let state = DevSyncStateStore::open(data_dir.join("sync_state.json")).await?;
            let watermarks = state.list_watermarks().await?;
            println!("{}", serde_json::to_string_pretty(&watermarks)?);
        }
        Commands::Plugins => {
            for name in builtin_catalog().names() {
                println!("{name}");
            }
        }
        Commands::Config => {
            let config = SyncConfig::from_env()?;
            config.validate()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
