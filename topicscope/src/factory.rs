use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::error::ConfigurationError;
use crate::model::{SourceMetadata, SourceType};
use crate::monitor::{Monitor, MonitorSettings, SourceMonitor};

/// Builds an adapter for one source. Receives the validated metadata.
pub type MonitorConstructor =
    Arc<dyn Fn(&SourceMetadata) -> anyhow::Result<Box<dyn SourceMonitor>> + Send + Sync>;

static GLOBAL_FACTORY: Lazy<RwLock<SourceMonitorFactory>> =
    Lazy::new(|| RwLock::new(SourceMonitorFactory::new()));

/// Registry from source type tag to adapter constructor.
///
/// Adapters register once at startup; new source types are added by
/// registering, without changing the factory or the monitor contract.
#[derive(Clone, Default)]
pub struct SourceMonitorFactory {
    constructors: HashMap<SourceType, MonitorConstructor>,
    settings: MonitorSettings,
}

impl SourceMonitorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: MonitorSettings) -> Self {
        Self {
            constructors: HashMap::new(),
            settings,
        }
    }

    /// Process-wide registry shared by adapters and the orchestrator.
    pub fn global() -> &'static RwLock<SourceMonitorFactory> {
        &GLOBAL_FACTORY
    }

    pub fn set_settings(&mut self, settings: MonitorSettings) {
        self.settings = settings;
    }

    /// Associate `source_type` with a constructor. Re-registering replaces the previous one.
    pub fn register_monitor<F>(&mut self, source_type: SourceType, constructor: F)
    where
        F: Fn(&SourceMetadata) -> anyhow::Result<Box<dyn SourceMonitor>> + Send + Sync + 'static,
    {
        info!(source_type = %source_type, "registered monitor");
        self.constructors.insert(source_type, Arc::new(constructor));
    }

    /// Build a monitor for `metadata`.
    ///
    /// Fails with a `ConfigurationError` for malformed metadata, an unregistered
    /// source type or a constructor error; nothing is returned in that case.
    pub fn create_monitor(&self, metadata: SourceMetadata) -> Result<Monitor, ConfigurationError> {
        metadata.validate()?;

        let constructor = self
            .constructors
            .get(&metadata.source_type)
            .ok_or_else(|| ConfigurationError::UnregisteredSourceType(metadata.source_type.clone()))?;

        let source = constructor(&metadata).map_err(|e| ConfigurationError::Construction {
            source_id: metadata.source_id.clone(),
            reason: format!("{:#}", e),
        })?;

        debug!(source_id = %metadata.source_id, source_type = %metadata.source_type, "monitor created");
        Ok(Monitor::with_settings(metadata, source, self.settings.clone()))
    }

    /// Build monitors for every source, failing on the first setup defect.
    pub fn create_monitors<I>(&self, sources: I) -> Result<Vec<Monitor>, ConfigurationError>
    where
        I: IntoIterator<Item = SourceMetadata>,
    {
        sources
            .into_iter()
            .map(|metadata| self.create_monitor(metadata))
            .collect()
    }

    pub fn is_supported(&self, source_type: &SourceType) -> bool {
        self.constructors.contains_key(source_type)
    }

    /// Currently registered source types, sorted.
    pub fn list_supported_types(&self) -> Vec<SourceType> {
        let mut types: Vec<SourceType> = self.constructors.keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for SourceMonitorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceMonitorFactory")
            .field("types", &self.list_supported_types())
            .field("settings", &self.settings)
            .finish()
    }
}
