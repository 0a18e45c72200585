//! Plugin registry.
//!
//! An explicit list of jurisdiction entries is handed to the orchestrator at construction;
//! there is no global plugin table. Each entry pairs a factory with its credential
//! reference and base URL, and `get_initialized_plugins` turns the list into ready plugins.

pub mod credentials;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

pub use credentials::{
    CredentialRef, CredentialResolver, EnvCredentialResolver, StaticCredentialResolver,
};

use crate::config::SyncConfig;
use crate::models::JurisdictionId;
use crate::plugin::{JurisdictionPlugin, PluginConfig};
use crate::{Error, Result};

/// Builds an uninitialized plugin instance.
pub type PluginFactory =
    Arc<dyn Fn(&SyncConfig) -> Result<Arc<dyn JurisdictionPlugin>> + Send + Sync>;

#[derive(Clone)]
pub struct PluginEntry {
    pub name: String,
    pub factory: PluginFactory,
    /// `None` for APIs that need no key.
    pub credential_ref: Option<String>,
    pub base_url: String,
}

impl std::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("name", &self.name)
            .field("credential_ref", &self.credential_ref)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// A registry entry that could not be turned into a ready plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigError {
    pub plugin: String,
    pub message: String,
}

/// Result of `get_initialized_plugins`: the usable plugins plus every entry that was skipped.
pub struct InitializedPlugins {
    pub plugins: Vec<Arc<dyn JurisdictionPlugin>>,
    pub errors: Vec<ConfigError>,
}

/// Known plugin implementations by name, with their default base URLs.
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: BTreeMap<String, (PluginFactory, String)>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        name: impl Into<String>,
        default_base_url: impl Into<String>,
        factory: PluginFactory,
    ) -> Self {
        self.factories
            .insert(name.into(), (factory, default_base_url.into()));
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<(PluginFactory, String)> {
        self.factories.get(name).cloned()
    }
}

/// One jurisdiction line of the registry document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JurisdictionEntryConfig {
    pub plugin: String,
    #[serde(default)]
    pub credential_ref: Option<String>,
    /// Defaults to the plugin's own base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Registry document, e.g. `{"jurisdictions": [{"plugin": "ny_senate", ...}]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub jurisdictions: Vec<JurisdictionEntryConfig>,
}

impl RegistryConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid registry config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::backend(format!("read registry config {}", path.display()), e))?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.jurisdictions {
            if entry.plugin.trim().is_empty() {
                return Err(Error::Config("registry entry has an empty plugin".to_string()));
            }
            if let Some(url) = &entry.base_url {
                if url.trim().is_empty() {
                    return Err(Error::Config(format!(
                        "registry entry '{}' has an empty base_url",
                        entry.plugin
                    )));
                }
            }
            if !seen.insert(entry.plugin.as_str()) {
                return Err(Error::Config(format!(
                    "plugin '{}' is listed twice",
                    entry.plugin
                )));
            }
        }
        Ok(())
    }
}

pub struct PluginRegistry {
    entries: Vec<PluginEntry>,
    resolver: Arc<dyn CredentialResolver>,
    config: SyncConfig,
}

impl PluginRegistry {
    pub fn new(resolver: Arc<dyn CredentialResolver>, config: SyncConfig) -> Self {
        Self {
            entries: Vec::new(),
            resolver,
            config,
        }
    }

    /// Build from a registry document. Disabled entries are left out; unknown plugin
    /// names are a configuration error for the whole document.
    pub fn from_config(
        cfg: &RegistryConfig,
        catalog: &PluginCatalog,
        resolver: Arc<dyn CredentialResolver>,
        config: SyncConfig,
    ) -> Result<Self> {
        cfg.validate()?;
        let mut registry = Self::new(resolver, config);
        for entry in cfg.jurisdictions.iter().filter(|e| e.enabled) {
            let (factory, default_url) = catalog.get(&entry.plugin).ok_or_else(|| {
                Error::Config(format!(
                    "unknown plugin '{}' (known: {})",
                    entry.plugin,
                    catalog.names().join(", ")
                ))
            })?;
            registry.register(PluginEntry {
                name: entry.plugin.clone(),
                factory,
                credential_ref: entry.credential_ref.clone(),
                base_url: entry.base_url.clone().unwrap_or(default_url),
            })?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, entry: PluginEntry) -> Result<()> {
        if entry.name.trim().is_empty() {
            return Err(Error::InvalidInput("plugin entry name is empty".to_string()));
        }
        if self.entries.iter().any(|e| e.name == entry.name) {
            return Err(Error::Conflict(format!(
                "plugin '{}' already registered",
                entry.name
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[PluginEntry] {
        &self.entries
    }

    pub fn sync_config(&self) -> &SyncConfig {
        &self.config
    }

    /// Resolve credentials, construct and initialize every entry.
    ///
    /// A failing entry is skipped and reported; it never prevents the others.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn get_initialized_plugins(&self) -> InitializedPlugins {
        let mut plugins: Vec<Arc<dyn JurisdictionPlugin>> = Vec::new();
        let mut errors = Vec::new();
        let mut jurisdictions: HashSet<JurisdictionId> = HashSet::new();

        for entry in &self.entries {
            match self.initialize_entry(entry).await {
                Ok(plugin) => {
                    if !jurisdictions.insert(plugin.jurisdiction()) {
                        errors.push(ConfigError {
                            plugin: entry.name.clone(),
                            message: format!(
                                "jurisdiction '{}' is served by more than one entry",
                                plugin.jurisdiction()
                            ),
                        });
                        continue;
                    }
                    plugins.push(plugin);
                }
                Err(e) => {
                    tracing::warn!(plugin = %entry.name, error = %e, "skipping plugin entry");
                    errors.push(ConfigError {
                        plugin: entry.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            ready = plugins.len(),
            skipped = errors.len(),
            "plugins initialized"
        );
        InitializedPlugins { plugins, errors }
    }

    async fn initialize_entry(&self, entry: &PluginEntry) -> Result<Arc<dyn JurisdictionPlugin>> {
        let api_key = match &entry.credential_ref {
            Some(raw) => {
                let reference: CredentialRef = raw.parse()?;
                self.resolver.resolve(&reference).await?
            }
            None => String::new(),
        };
        let plugin = (entry.factory)(&self.config)?;
        plugin.initialize(PluginConfig::new(api_key, entry.base_url.clone())?)?;
        Ok(plugin)
    }
}
