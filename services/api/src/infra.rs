use metrics_exporter_prometheus::PrometheusHandle;
use preload_registry::config::{AppConfig, StoreConfig};
use preload_registry::error::AppError;
use preload_registry::workflows::preload::{
    ChromiumPreloadList, HeaderScanner, PreloadRegistry, RegistrySettings, SqliteDomainStore,
    StoreError,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

pub(crate) type LiveRegistry = PreloadRegistry<SqliteDomainStore, HeaderScanner, ChromiumPreloadList>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) fn open_store(config: &StoreConfig) -> Result<SqliteDomainStore, StoreError> {
    if config.in_memory {
        info!("using in-memory domain store");
        SqliteDomainStore::open_in_memory()
    } else {
        info!(path = %config.database_path.display(), "opening domain store");
        SqliteDomainStore::open(&config.database_path)
    }
}

/// Wires the registry to its production collaborators.
pub(crate) fn build_registry(config: &AppConfig) -> Result<Arc<LiveRegistry>, AppError> {
    let store = open_store(&config.store)?;
    let scanner = HeaderScanner::new()?;
    let source = ChromiumPreloadList::new(config.registry.preload_list_url.clone())?;
    let settings = RegistrySettings {
        cache_duration: config.registry.cache_duration,
        debug_endpoints: config.registry.debug_endpoints,
    };

    Ok(Arc::new(PreloadRegistry::new(
        Arc::new(store),
        Arc::new(scanner),
        Arc::new(source),
        settings,
    )))
}
