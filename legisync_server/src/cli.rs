use clap::{Parser, Subcommand};
use legisync_core::models::{EntityType, JurisdictionId};
use legisync_core::sync::SyncRequest;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "legisync", version, about = "Legislative data synchronization engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one synchronization and print its report as JSON (default if no subcommand given).
    Sync {
        /// Only sync these jurisdictions (repeatable). Defaults to every registered one.
        #[arg(long = "jurisdiction", short = 'j')]
        jurisdictions: Vec<String>,

        /// Only sync these entity types (repeatable), e.g. `bill`, `legislator`.
        #[arg(long = "entity", short = 'e')]
        entity_types: Vec<String>,

        /// Ignore watermarks and refetch everything.
        #[arg(long)]
        full: bool,

        /// Registry document (JSON). Defaults to every built-in plugin with keys from env.
        #[arg(long, env = "LEGISYNC_REGISTRY")]
        registry: Option<PathBuf>,

        /// Local dev data directory (canonical documents + sync state).
        #[arg(long, env = "LEGISYNC_DATA_DIR", default_value = ".legisync_dev")]
        data_dir: PathBuf,
    },

    /// Print the stored watermarks.
    Watermarks {
        #[arg(long, env = "LEGISYNC_DATA_DIR", default_value = ".legisync_dev")]
        data_dir: PathBuf,
    },

    /// List the plugins compiled into this build.
    Plugins,

    /// Print the effective sync configuration.
    Config,
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Sync {
            jurisdictions: Vec::new(),
            entity_types: Vec::new(),
            full: false,
            registry: None,
            data_dir: ".legisync_dev".into(),
        }
    }
}

/// A bare `sync` is the scheduled run; any filter or `--full` makes it a manual one.
pub fn build_request(
    jurisdictions: &[String],
    entity_types: &[String],
    full: bool,
) -> anyhow::Result<SyncRequest> {
    if jurisdictions.is_empty() && entity_types.is_empty() && !full {
        return Ok(SyncRequest::scheduled());
    }
    let mut request = SyncRequest::manual();
    if !jurisdictions.is_empty() {
        let ids = jurisdictions
            .iter()
            .map(|j| j.parse::<JurisdictionId>())
            .collect::<Result<Vec<_>, _>>()?;
        request = request.with_jurisdictions(ids);
    }
    if !entity_types.is_empty() {
        let types = entity_types
            .iter()
            .map(|t| t.parse::<EntityType>())
            .collect::<Result<Vec<_>, _>>()?;
        request = request.with_entity_types(types);
    }
    if full {
        request = request.with_full_resync();
    }
    Ok(request)
}
