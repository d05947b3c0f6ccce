//! Picks a tracer backend from configuration.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use loomtrace_core::config::{Compression, StorageType, TracerMode, TracerSettings};
use loomtrace_core::error::{Result, TraceError};
use loomtrace_core::noop::NoopTracer;
use loomtrace_core::tracer::Tracer;
use loomtrace_export::{HttpExportConfig, HttpTracer, PrivacyConfig};
use loomtrace_store::{DEFAULT_MAX_RUNS, StorageConfig};
use tracing::info;

use crate::embedded::{EmbeddedConfig, EmbeddedTracer};

#[derive(Debug, Clone)]
pub struct AutoSelectConfig {
    pub mode: TracerMode,
    pub prefer_embedded: bool,
    pub hawk_url: Option<String>,
    pub hawk_api_key: Option<String>,
    pub embedded_storage: Option<StorageType>,
    pub embedded_path: Option<PathBuf>,
    pub embedded_max_runs: usize,
    /// Applied when the service backend is chosen.
    pub privacy: PrivacyConfig,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub headers: Vec<(String, String)>,
    pub compression: Compression,
}

impl Default for AutoSelectConfig {
    fn default() -> Self {
        Self::from_settings(&TracerSettings::default())
    }
}

impl AutoSelectConfig {
    pub fn from_settings(settings: &TracerSettings) -> Self {
        Self {
            mode: settings.mode,
            prefer_embedded: settings.prefer_embedded,
            hawk_url: settings.hawk_url.clone(),
            hawk_api_key: settings.hawk_api_key.clone(),
            embedded_storage: settings.embedded_storage,
            embedded_path: settings.embedded_path.clone(),
            embedded_max_runs: settings.embedded_max_runs,
            privacy: PrivacyConfig::strict(),
            batch_size: settings.batch_size,
            flush_interval: settings.flush_interval,
            headers: settings.headers.clone(),
            compression: settings.compression,
        }
    }

    fn service_url(&self) -> Option<&str> {
        self.hawk_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    fn has_path(&self) -> bool {
        self.embedded_path
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty())
    }

    fn embedded_available(&self) -> bool {
        match self.embedded_storage {
            Some(StorageType::Memory) => true,
            Some(StorageType::Sqlite) => self.has_path(),
            None => false,
        }
    }

    fn storage_config(&self) -> StorageConfig {
        let max_runs = if self.embedded_max_runs == 0 {
            DEFAULT_MAX_RUNS
        } else {
            self.embedded_max_runs
        };
        StorageConfig {
            storage_type: self.embedded_storage.unwrap_or(StorageType::Memory),
            path: self.embedded_path.clone(),
            max_runs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Noop,
    Embedded,
    Service,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Noop => "noop",
            Self::Embedded => "embedded",
            Self::Service => "service",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub backend: Backend,
    pub reason: String,
}

impl Selection {
    fn new(backend: Backend, reason: impl Into<String>) -> Self {
        Self {
            backend,
            reason: reason.into(),
        }
    }
}

/// Decides which backend `cfg` asks for without constructing it.
///
/// Explicit modes map directly and fail when their backend is not
/// configured. `auto` takes whichever side is available, and
/// `prefer_embedded` breaks the tie when both are.
pub fn resolve_backend(cfg: &AutoSelectConfig) -> Result<Selection> {
    match cfg.mode {
        TracerMode::None => Ok(Selection::new(Backend::Noop, "tracing disabled by mode")),
        TracerMode::Service => {
            if cfg.service_url().is_none() {
                return Err(TraceError::Config(
                    "service mode requires HAWK_URL".to_string(),
                ));
            }
            Ok(Selection::new(Backend::Service, "service mode requested"))
        }
        TracerMode::Embedded => {
            if cfg.embedded_storage == Some(StorageType::Sqlite) && !cfg.has_path() {
                return Err(TraceError::Config(
                    "sqlite storage requires LOOM_EMBEDDED_SQLITE_PATH".to_string(),
                ));
            }
            Ok(Selection::new(Backend::Embedded, "embedded mode requested"))
        }
        TracerMode::Auto => {
            let service = cfg.service_url().is_some();
            let embedded = cfg.embedded_available();
            Ok(match (service, embedded) {
                (false, false) => Selection::new(Backend::Noop, "no backend configured"),
                (true, false) => Selection::new(Backend::Service, "only service is configured"),
                (false, true) => {
                    Selection::new(Backend::Embedded, "only embedded storage is configured")
                }
                (true, true) if cfg.prefer_embedded => Selection::new(
                    Backend::Embedded,
                    "both available, embedded preferred",
                ),
                (true, true) => {
                    Selection::new(Backend::Service, "both available, service preferred")
                }
            })
        }
    }
}

/// Resolves and constructs the tracer. Service and embedded tracers must be
/// built inside a tokio runtime.
pub fn select_tracer(cfg: &AutoSelectConfig) -> Result<Arc<dyn Tracer>> {
    let selection = resolve_backend(cfg)?;
    info!(
        backend = %selection.backend,
        reason = %selection.reason,
        mode = %cfg.mode,
        "selected tracer backend"
    );

    Ok(match selection.backend {
        Backend::Noop => Arc::new(NoopTracer::new()),
        Backend::Embedded => Arc::new(EmbeddedTracer::new(EmbeddedConfig {
            storage: cfg.storage_config(),
            ..EmbeddedConfig::default()
        })?),
        Backend::Service => {
            let endpoint = cfg.service_url().unwrap_or_default().to_string();
            Arc::new(HttpTracer::new(HttpExportConfig {
                api_key: cfg.hawk_api_key.clone(),
                batch_size: cfg.batch_size,
                flush_interval: cfg.flush_interval,
                privacy: cfg.privacy.clone(),
                headers: cfg.headers.clone(),
                compression: cfg.compression,
                ..HttpExportConfig::new(endpoint)
            })?)
        }
    })
}

/// Loads [`TracerSettings`] from the config file and environment, then
/// selects. Returns the selection alongside the tracer for reporting.
pub fn select_from_env() -> Result<(Arc<dyn Tracer>, Selection)> {
    let cfg = AutoSelectConfig::from_settings(&TracerSettings::load()?);
    let selection = resolve_backend(&cfg)?;
    let tracer = select_tracer(&cfg)?;
    Ok((tracer, selection))
}
