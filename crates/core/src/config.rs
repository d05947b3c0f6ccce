use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceError};
use crate::time::parse_duration_str;

/// Which backend the process should trace into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracerMode {
    #[default]
    Auto,
    Service,
    Embedded,
    None,
}

impl FromStr for TracerMode {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "service" => Ok(Self::Service),
            "embedded" => Ok(Self::Embedded),
            "none" => Ok(Self::None),
            other => Err(TraceError::Config(format!(
                "unknown tracer mode '{other}' (expected auto, service, embedded or none)"
            ))),
        }
    }
}

impl fmt::Display for TracerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Service => "service",
            Self::Embedded => "embedded",
            Self::None => "none",
        })
    }
}

/// Embedded storage backend. `Sqlite` names the persisted file store; the
/// name is kept so existing deployments keep working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Memory,
    Sqlite,
}

impl FromStr for StorageType {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(TraceError::Config(format!(
                "unknown storage type '{other}' (expected memory or sqlite)"
            ))),
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl FromStr for Compression {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            other => Err(TraceError::Config(format!(
                "unknown compression '{other}' (expected none or gzip)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TracerSettings {
    pub mode: TracerMode,
    pub prefer_embedded: bool,
    pub hawk_url: Option<String>,
    pub hawk_api_key: Option<String>,
    pub embedded_storage: Option<StorageType>,
    pub embedded_path: Option<PathBuf>,
    pub embedded_max_runs: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub headers: Vec<(String, String)>,
    pub compression: Compression,
}

impl Default for TracerSettings {
    fn default() -> Self {
        Self {
            mode: TracerMode::Auto,
            prefer_embedded: true,
            hawk_url: None,
            hawk_api_key: None,
            embedded_storage: Some(StorageType::Memory),
            embedded_path: None,
            embedded_max_runs: 10_000,
            batch_size: 100,
            flush_interval: Duration::from_secs(10),
            headers: Vec::new(),
            compression: Compression::None,
        }
    }
}

impl TracerSettings {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = env_overrides_from(|key| env::var(key).ok());
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Applies environment-style overrides read through `lookup` on top of
    /// the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        apply_overrides(&mut cfg, env_overrides_from(lookup), "environment")?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(file_overrides) = load_file_overrides(path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        Ok(cfg)
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsOverrides {
    mode: Option<String>,
    prefer_embedded: Option<Scalar>,
    hawk_url: Option<String>,
    hawk_api_key: Option<String>,
    embedded_storage: Option<String>,
    embedded_path: Option<PathBuf>,
    embedded_max_runs: Option<Scalar>,
    batch_size: Option<Scalar>,
    flush_interval: Option<String>,
    headers: Option<String>,
    compression: Option<String>,
}

/// A TOML value that may be written bare (`true`, `500`) or quoted; the
/// environment always supplies text.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("LOOM_TRACER_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("loom/tracer.toml")
}

fn load_file_overrides(path: &Path) -> Result<Option<SettingsOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| TraceError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: SettingsOverrides = toml::from_str(&raw)
        .map_err(|e| TraceError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn env_overrides_from<F>(lookup: F) -> SettingsOverrides
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    SettingsOverrides {
        mode: get("LOOM_TRACER_MODE"),
        prefer_embedded: get("LOOM_TRACER_PREFER_EMBEDDED").map(Scalar::Text),
        hawk_url: get("HAWK_URL"),
        hawk_api_key: get("HAWK_API_KEY"),
        embedded_storage: get("LOOM_EMBEDDED_STORAGE"),
        embedded_path: get("LOOM_EMBEDDED_SQLITE_PATH").map(PathBuf::from),
        embedded_max_runs: get("LOOM_EMBEDDED_MAX_RUNS").map(Scalar::Text),
        batch_size: get("LOOM_TRACER_BATCH_SIZE").map(Scalar::Text),
        flush_interval: get("LOOM_TRACER_FLUSH_INTERVAL"),
        headers: get("LOOM_TRACER_HEADERS"),
        compression: get("LOOM_TRACER_COMPRESSION"),
    }
}

fn apply_overrides(
    cfg: &mut TracerSettings,
    overrides: SettingsOverrides,
    source: &str,
) -> Result<()> {
    if let Some(v) = overrides.mode {
        cfg.mode = v
            .parse()
            .map_err(|e| TraceError::Config(format!("bad mode in {source}: {e}")))?;
    }
    if let Some(v) = overrides.prefer_embedded.map(|v| v.to_string()) {
        cfg.prefer_embedded = parse_bool(&v).ok_or_else(|| {
            TraceError::Config(format!(
                "bad prefer_embedded in {source}: expected true or false (value={v})"
            ))
        })?;
    }
    if let Some(v) = overrides.hawk_url {
        cfg.hawk_url = Some(v);
    }
    if let Some(v) = overrides.hawk_api_key {
        cfg.hawk_api_key = Some(v);
    }
    if let Some(v) = overrides.embedded_storage {
        cfg.embedded_storage = Some(
            v.parse()
                .map_err(|e| TraceError::Config(format!("bad embedded_storage in {source}: {e}")))?,
        );
    }
    if let Some(v) = overrides.embedded_path {
        cfg.embedded_path = Some(v);
    }
    if let Some(v) = overrides.embedded_max_runs.map(|v| v.to_string()) {
        cfg.embedded_max_runs = v.trim().parse::<usize>().map_err(|e| {
            TraceError::Config(format!("bad embedded_max_runs in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.batch_size.map(|v| v.to_string()) {
        cfg.batch_size = v.trim().parse::<usize>().map_err(|e| {
            TraceError::Config(format!("bad batch_size in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.flush_interval {
        cfg.flush_interval = parse_duration_str(v.trim()).map_err(|e| {
            TraceError::Config(format!("bad flush_interval in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.headers {
        cfg.headers = parse_headers(&v).map_err(|e| {
            TraceError::Config(format!("bad headers in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.compression {
        cfg.compression = v
            .parse()
            .map_err(|e| TraceError::Config(format!("bad compression in {source}: {e}")))?;
    }
    Ok(())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parses `key=value,key2=value2` into header pairs.
pub fn parse_headers(raw: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for entry in raw.split(',') {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            return Err(TraceError::Config(
                "header entries must use key=value syntax".to_string(),
            ));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(TraceError::Config("header key cannot be empty".to_string()));
        }
        out.push((key.to_string(), value.trim().to_string()));
    }
    Ok(out)
}
