use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use synthctl_types::ControllerSpec;

use crate::osc::{BridgeConfig, DEFAULT_REGISTER_PATH};
use crate::paths;
use crate::process::{ProcessConfig, Prompt, DEFAULT_TIMEOUT};

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, source: std::io::Error },
    Parse(toml::de::Error),
    Prompt { engine: String, source: regex::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "could not read config {}: {}", path.display(), source)
            }
            ConfigError::Parse(e) => write!(f, "malformed config: {}", e),
            ConfigError::Prompt { engine, source } => {
                write!(f, "engine {}: bad prompt_regex: {}", engine, source)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    runtime: RuntimeConfig,
    #[serde(default)]
    engines: Vec<EngineConfig>,
}

#[derive(Deserialize, Default, Clone)]
struct RuntimeConfig {
    log_level: Option<String>,
    data_dir: Option<PathBuf>,
    my_data_dir: Option<PathBuf>,
}

/// One engine entry: how to launch it and its controller table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    pub name: String,
    #[serde(default)]
    pub nickname: Option<String>,
    pub command: String,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Literal prompt text.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Prompt as a regex; takes precedence over `prompt`.
    #[serde(default)]
    pub prompt_regex: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub start_delay_ms: Option<u64>,
    #[serde(default)]
    pub merge_stderr: Option<bool>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub osc_target_port: Option<u16>,
    #[serde(default)]
    pub osc_register_path: Option<String>,
    #[serde(default)]
    pub controllers: Vec<ControllerSpec>,
}

impl EngineConfig {
    pub fn nickname(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.name)
    }

    pub fn prompt(&self) -> Result<Option<Prompt>, ConfigError> {
        if let Some(pattern) = &self.prompt_regex {
            return Prompt::pattern(pattern)
                .map(Some)
                .map_err(|source| ConfigError::Prompt {
                    engine: self.name.clone(),
                    source,
                });
        }
        Ok(self.prompt.as_deref().map(Prompt::literal))
    }

    pub fn process_config(&self) -> Result<ProcessConfig, ConfigError> {
        let mut config = ProcessConfig::new(self.command.clone())
            .timeout(self.timeout_ms.map(Duration::from_millis).unwrap_or(DEFAULT_TIMEOUT))
            .merge_stderr(self.merge_stderr.unwrap_or(true));
        config.cwd = self.cwd.clone();
        config.prompt = self.prompt()?;
        config.start_delay = self.start_delay_ms.map(Duration::from_millis);
        config.env = self.env.clone();
        Ok(config)
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig::new(self.osc_target_port).register_path(Some(
            self.osc_register_path
                .clone()
                .unwrap_or_else(|| DEFAULT_REGISTER_PATH.to_string()),
        ))
    }
}

pub struct Config {
    runtime: RuntimeConfig,
    engines: Vec<EngineConfig>,
}

impl Config {
    /// Embedded defaults overlaid with the user's `config.toml`, if any.
    pub fn load() -> Self {
        let mut config = Self::embedded();
        let path = user_config_path();
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                    Ok(user) => config.merge(user),
                    Err(e) => {
                        log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                    }
                },
                Err(e) => {
                    log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                }
            }
        }
        config
    }

    /// Only the built-in defaults.
    pub fn embedded() -> Self {
        let base = toml::from_str::<ConfigFile>(DEFAULT_CONFIG).unwrap_or_else(|e| {
            log::error!(target: "config", "embedded config.toml is malformed: {}", e);
            ConfigFile::default()
        });
        Config {
            runtime: base.runtime,
            engines: base.engines,
        }
    }

    /// Parse a complete config from a string, without defaults.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(contents)?;
        Ok(Config {
            runtime: file.runtime,
            engines: file.engines,
        })
    }

    /// Embedded defaults overlaid with the file at `path`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: ConfigFile = toml::from_str(&contents)?;
        let mut config = Self::embedded();
        config.merge(user);
        Ok(config)
    }

    fn merge(&mut self, user: ConfigFile) {
        merge_runtime(&mut self.runtime, user.runtime);
        for engine in user.engines {
            match self.engines.iter_mut().find(|e| e.name == engine.name) {
                Some(existing) => *existing = engine,
                None => self.engines.push(engine),
            }
        }
    }

    pub fn engines(&self) -> &[EngineConfig] {
        &self.engines
    }

    /// Look an engine up by name or nickname, ignoring case.
    pub fn engine(&self, name: &str) -> Option<&EngineConfig> {
        self.engines.iter().find(|e| {
            e.name.eq_ignore_ascii_case(name)
                || e.nickname.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.runtime
            .log_level
            .as_deref()
            .and_then(parse_log_level)
            .unwrap_or(log::LevelFilter::Warn)
    }

    pub fn data_dir(&self) -> PathBuf {
        paths::data_dir(self.runtime.data_dir.as_deref())
    }

    pub fn my_data_dir(&self) -> PathBuf {
        paths::my_data_dir(self.runtime.my_data_dir.as_deref(), &self.data_dir())
    }
}

fn user_config_path() -> PathBuf {
    paths::config_dir().join("config.toml")
}

fn merge_runtime(base: &mut RuntimeConfig, user: RuntimeConfig) {
    if user.log_level.is_some() {
        base.log_level = user.log_level;
    }
    if user.data_dir.is_some() {
        base.data_dir = user.data_dir;
    }
    if user.my_data_dir.is_some() {
        base.my_data_dir = user.my_data_dir;
    }
}

fn parse_log_level(s: &str) -> Option<log::LevelFilter> {
    match s.to_lowercase().as_str() {
        "off" => Some(log::LevelFilter::Off),
        "error" => Some(log::LevelFilter::Error),
        "warn" | "warning" => Some(log::LevelFilter::Warn),
        "info" => Some(log::LevelFilter::Info),
        "debug" => Some(log::LevelFilter::Debug),
        "trace" => Some(log::LevelFilter::Trace),
        _ => None,
    }
}
