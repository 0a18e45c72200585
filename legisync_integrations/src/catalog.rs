use legisync_core::registry::{JurisdictionEntryConfig, PluginCatalog, RegistryConfig};

/// Environment variable the default registry reads the NY Senate API key from.
pub const NY_SENATE_KEY_ENV: &str = "NYSENATE_API_KEY";

/// Every plugin compiled into this build, by name.
pub fn builtin_catalog() -> PluginCatalog {
    #[allow(unused_mut)]
    let mut catalog = PluginCatalog::new();

    #[cfg(feature = "ny_senate")]
    {
        use crate::jurisdictions::ny_senate::{NySenatePlugin, DEFAULT_BASE_URL, PLUGIN_NAME};
        use legisync_core::config::SyncConfig;
        use legisync_core::plugin::JurisdictionPlugin;
        use std::sync::Arc;

        catalog = catalog.with(
            PLUGIN_NAME,
            DEFAULT_BASE_URL,
            Arc::new(|cfg: &SyncConfig| {
                let plugin = NySenatePlugin::new(cfg)?;
                Ok(Arc::new(plugin) as Arc<dyn JurisdictionPlugin>)
            }),
        );
    }

    catalog
}

/// Registry used when no registry document is given: every built-in plugin, keys from env.
pub fn default_registry_config() -> RegistryConfig {
    #[allow(unused_mut)]
    let mut jurisdictions = Vec::new();

    #[cfg(feature = "ny_senate")]
    jurisdictions.push(JurisdictionEntryConfig {
        plugin: crate::jurisdictions::ny_senate::PLUGIN_NAME.to_string(),
        credential_ref: Some(format!("env:{NY_SENATE_KEY_ENV}")),
        base_url: None,
        enabled: true,
    });

    RegistryConfig { jurisdictions }
}

#[cfg(all(test, feature = "ny_senate"))]
mod tests {
    use super::*;
    use legisync_core::config::SyncConfig;

    #[test]
    fn default_registry_covers_the_catalog() {
        let catalog = builtin_catalog();
        let registry = default_registry_config();
        registry.validate().unwrap();
        for entry in &registry.jurisdictions {
            let (factory, base_url) = catalog.get(&entry.plugin).unwrap();
            assert!(base_url.starts_with("https://"));
            let plugin = factory(&SyncConfig::default()).unwrap();
            assert_eq!(plugin.jurisdiction().as_str(), entry.plugin);
        }
    }
}
