//! Dynamic source registry.
//!
//! A registry is an external store of source definitions (typically a
//! database table maintained by operators). It hands back
//! [`RegisteredSource`] records, which convert into the same
//! [`SourceConfig`] the file loader produces.
//!
//! [`sync_sources`] copies definitions into a writable registry and
//! [`export_sources`] writes a registry's contents back out as definition
//! files. [`JsonFileRegistry`] is a registry kept in a local JSON file.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use event_scrape_source_models::{SelectorConfig, SourceConfig, SourceDefinition, ValidationErrors};
use serde::{Deserialize, Serialize};

use crate::loader::{ConfigError, write_source_configs};

/// The registry could not be queried.
#[derive(Debug, thiserror::Error)]
#[error("source registry unavailable: {message}")]
pub struct RegistryError {
    pub message: String,
}

impl RegistryError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Whether an upsert added a record or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// A source definition as stored in the registry.
///
/// Selectors are kept as an opaque JSON document so the registry does not
/// need to know their shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisteredSource {
    pub name: String,
    pub url: String,
    pub tier: i64,
    pub schedule: String,
    pub trust_level: i64,
    pub license: String,
    pub enabled: bool,
    pub event_url_pattern: Option<String>,
    pub max_pages: i64,
    pub notes: Option<String>,
    pub selectors: Option<serde_json::Value>,
}

/// Why a [`RegisteredSource`] could not be converted.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// The selectors document does not have the expected shape.
    #[error("source '{name}': invalid selectors: {source}")]
    Selectors {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// The definition failed validation.
    #[error("source '{name}': {source}")]
    Invalid {
        name: String,
        #[source]
        source: ValidationErrors,
    },
}

impl TryFrom<RegisteredSource> for SourceConfig {
    type Error = ConversionError;

    fn try_from(source: RegisteredSource) -> Result<Self, Self::Error> {
        let selectors = match source.selectors {
            None | Some(serde_json::Value::Null) => SelectorConfig::default(),
            Some(value) => serde_json::from_value(value).map_err(|e| {
                ConversionError::Selectors {
                    name: source.name.clone(),
                    source: e,
                }
            })?,
        };

        let name = source.name.clone();

        SourceDefinition {
            name: source.name,
            url: source.url,
            tier: source.tier,
            schedule: source.schedule,
            trust_level: source.trust_level,
            license: source.license,
            enabled: source.enabled,
            event_url_pattern: source.event_url_pattern,
            max_pages: source.max_pages,
            notes: source.notes,
            selectors,
        }
        .validate()
        .map_err(|e| ConversionError::Invalid { name, source: e })
    }
}

impl From<SourceConfig> for RegisteredSource {
    /// Selectors are only stored for Tier 1 sources.
    fn from(config: SourceConfig) -> Self {
        let selectors = if config.uses_selectors() {
            serde_json::to_value(&config.selectors).ok()
        } else {
            None
        };
        let definition = SourceDefinition::from(config);

        Self {
            name: definition.name,
            url: definition.url,
            tier: definition.tier,
            schedule: definition.schedule,
            trust_level: definition.trust_level,
            license: definition.license,
            enabled: definition.enabled,
            event_url_pattern: definition.event_url_pattern,
            max_pages: definition.max_pages,
            notes: definition.notes,
            selectors,
        }
    }
}

/// A store of source definitions consulted before the sources directory.
#[async_trait]
pub trait SourceRegistry: Send + Sync {
    /// Returns every enabled source.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the registry cannot be queried.
    async fn enabled_sources(&self) -> Result<Vec<RegisteredSource>, RegistryError>;

    /// Returns every source, enabled or not. Defaults to
    /// [`Self::enabled_sources`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the registry cannot be queried.
    async fn all_sources(&self) -> Result<Vec<RegisteredSource>, RegistryError> {
        self.enabled_sources().await
    }

    /// Stores `source`, replacing any record with the same name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the write fails. Registries are
    /// read-only unless they override this.
    async fn upsert_source(&self, source: RegisteredSource) -> Result<UpsertOutcome, RegistryError> {
        Err(RegistryError::new(format!(
            "registry is read-only, cannot store '{}'",
            source.name
        )))
    }
}

/// Fetches and converts the registry's sources.
///
/// Records that fail to convert are logged and skipped.
///
/// # Errors
///
/// Propagates [`RegistryError`] from the registry.
pub async fn registered_configs(
    registry: &dyn SourceRegistry,
) -> Result<Vec<SourceConfig>, RegistryError> {
    let records = registry.enabled_sources().await?;
    let total = records.len();

    let configs: Vec<SourceConfig> = records
        .into_iter()
        .filter_map(|record| match SourceConfig::try_from(record) {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("[registry] skipping {e}");
                None
            }
        })
        .collect();

    log::debug!(
        "[registry] {} of {total} registered source(s) usable",
        configs.len()
    );

    Ok(configs)
}

/// Counts from [`sync_sources`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Upserts every source in `configs` into `registry`.
///
/// A failed write is logged and counted; the remaining sources are still
/// written.
pub async fn sync_sources(registry: &dyn SourceRegistry, configs: Vec<SourceConfig>) -> SyncReport {
    let mut report = SyncReport::default();

    for config in configs {
        let name = config.name.clone();
        match registry.upsert_source(config.into()).await {
            Ok(UpsertOutcome::Created) => report.created += 1,
            Ok(UpsertOutcome::Updated) => report.updated += 1,
            Err(e) => {
                log::warn!("[registry] failed to store '{name}': {e}");
                report.failed += 1;
            }
        }
    }

    log::info!(
        "[registry] sync: {} created, {} updated, {} failed",
        report.created,
        report.updated,
        report.failed
    );

    report
}

/// Why [`export_sources`] failed.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Writes every registered source, enabled or not, into `dir` as
/// definition files. Records that fail to convert are logged and skipped.
///
/// # Errors
///
/// * [`ExportError::Registry`] if the registry cannot be queried
/// * [`ExportError::Config`] if `dir` cannot be created
pub async fn export_sources(
    registry: &dyn SourceRegistry,
    dir: &Path,
) -> Result<Vec<PathBuf>, ExportError> {
    let configs = registry
        .all_sources()
        .await?
        .into_iter()
        .filter_map(|record| match SourceConfig::try_from(record) {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("[registry] not exporting {e}");
                None
            }
        })
        .collect();

    Ok(write_source_configs(configs, dir)?)
}

/// A registry stored as a JSON array of [`RegisteredSource`] records.
///
/// A missing file is an empty registry. Writes rewrite the whole file.
#[derive(Debug)]
pub struct JsonFileRegistry {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileRegistry {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<RegisteredSource>, RegistryError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RegistryError::new(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_str(&content).map_err(|e| {
            RegistryError::new(format!("failed to parse {}: {e}", self.path.display()))
        })
    }

    fn write(&self, records: &[RegisteredSource]) -> Result<(), RegistryError> {
        let content = serde_json::to_string_pretty(records)
            .map_err(|e| RegistryError::new(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                RegistryError::new(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        fs::write(&self.path, content).map_err(|e| {
            RegistryError::new(format!("failed to write {}: {e}", self.path.display()))
        })
    }
}

#[async_trait]
impl SourceRegistry for JsonFileRegistry {
    async fn enabled_sources(&self) -> Result<Vec<RegisteredSource>, RegistryError> {
        let mut records = self.read()?;
        records.retain(|r| r.enabled);
        Ok(records)
    }

    async fn all_sources(&self) -> Result<Vec<RegisteredSource>, RegistryError> {
        self.read()
    }

    async fn upsert_source(&self, source: RegisteredSource) -> Result<UpsertOutcome, RegistryError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut records = self.read()?;
        let outcome = match records.iter_mut().find(|r| r.name == source.name) {
            Some(existing) => {
                *existing = source;
                UpsertOutcome::Updated
            }
            None => {
                records.push(source);
                UpsertOutcome::Created
            }
        };
        self.write(&records)?;

        Ok(outcome)
    }
}
