//! Configuration management.
//!
//! Configuration is read from TOML, then overridden from `DUPSTACK_*`
//! environment variables. Field rules are validated while loading, so a
//! [`DupstackConfig`] that exists is always usable.

mod fields;
mod scoring;

pub use fields::{
    DEFAULT_MINIMUM_LENGTH, FieldConfig, FieldConfigSet, IfDifferent, IfMatch, MatchingMethod,
    RawFieldConfig, default_company_fields, default_contact_fields, validate_rules,
};
pub use scoring::{FieldWeights, ScoringTable, TierWeights};

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the SQLite database inside the data directory.
pub const DATABASE_FILE: &str = "dupstack.db";

/// Main configuration for dupstack.
#[derive(Debug, Clone)]
pub struct DupstackConfig {
    /// Directory holding the SQLite database.
    pub data_dir: PathBuf,
    /// Similarity installer settings.
    pub installer: InstallerConfig,
    /// Dup stack resolver settings.
    pub resolver: ResolverConfig,
    /// Step runner settings.
    pub pipeline: PipelineConfig,
    /// Verdict scoring table.
    pub scoring: ScoringTable,
    /// Field rules per item type.
    pub fields: FieldConfigSet,
    /// Logging section as read from the file.
    pub logging: LoggingSettings,
    /// Metrics section as read from the file.
    pub metrics: MetricsSettings,
}

/// Similarity installer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallerConfig {
    /// Items per batch; bounds the pairs compared by one unit of work.
    pub batch_size: usize,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self { batch_size: 1000 }
    }
}

/// Dup stack resolver settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Maximum members visited in one pass before a partial commit.
    pub max_stack_size: usize,
    /// Maximum reference restarts in one pass.
    pub max_restarts: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_stack_size: 500,
            max_restarts: 32,
        }
    }
}

/// Step runner settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Workspaces processed in parallel.
    pub max_concurrent_workspaces: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workspaces: 15,
        }
    }
}

/// Logging section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive, e.g. `info` or `dupstack=debug`.
    pub level: Option<String>,
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Log file path; stderr when unset.
    pub file: Option<PathBuf>,
}

/// Metrics section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Whether the Prometheus exporter is installed.
    pub enabled: Option<bool>,
    /// Port of the Prometheus HTTP listener.
    pub port: Option<u16>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Installer section.
    pub installer: Option<ConfigFileInstaller>,
    /// Resolver section.
    pub resolver: Option<ConfigFileResolver>,
    /// Pipeline section.
    pub pipeline: Option<ConfigFilePipeline>,
    /// Scoring section.
    pub scoring: Option<ScoringTable>,
    /// Field rules.
    pub fields: Option<ConfigFileFields>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
    /// Metrics section.
    pub metrics: Option<MetricsSettings>,
}

/// Installer section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileInstaller {
    /// Batch size.
    pub batch_size: Option<usize>,
}

/// Resolver section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileResolver {
    /// Maximum visited members per pass.
    pub max_stack_size: Option<usize>,
    /// Maximum restarts per pass.
    pub max_restarts: Option<usize>,
}

/// Pipeline section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFilePipeline {
    /// Workspaces processed in parallel.
    pub max_concurrent_workspaces: Option<usize>,
}

/// Field rules section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileFields {
    /// Contact rules; replaces the defaults when present.
    pub contacts: Option<Vec<RawFieldConfig>>,
    /// Company rules; replaces the defaults when present.
    pub companies: Option<Vec<RawFieldConfig>>,
}

impl Default for DupstackConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".dupstack"),
            installer: InstallerConfig::default(),
            resolver: ResolverConfig::default(),
            pipeline: PipelineConfig::default(),
            scoring: ScoringTable::default(),
            fields: FieldConfigSet::default(),
            logging: LoggingSettings::default(),
            metrics: MetricsSettings::default(),
        }
    }
}

impl DupstackConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from `path`, or from the default location when
    /// `path` is `None`, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read, parsed
    /// or validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default()?,
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the text is not valid TOML or a
    /// field rule is malformed.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents)
            .map_err(|e| Error::InvalidInput(format!("config file: {e}")))?;
        Self::from_config_file(file)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the platform config dir (`dupstack/config.toml`), then
    /// `~/.config/dupstack/config.toml`. Returns defaults if neither exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but is invalid.
    pub fn load_default() -> Result<Self> {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Ok(Self::default());
        };

        let candidates = [
            base_dirs.config_dir().join("dupstack").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("dupstack")
                .join("config.toml"),
        ];
        match candidates.iter().find(|p| p.exists()) {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Converts a `ConfigFile` to `DupstackConfig`.
    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(installer) = file.installer
            && let Some(batch_size) = installer.batch_size
        {
            config.installer.batch_size = batch_size;
        }
        if let Some(resolver) = file.resolver {
            if let Some(v) = resolver.max_stack_size {
                config.resolver.max_stack_size = v;
            }
            if let Some(v) = resolver.max_restarts {
                config.resolver.max_restarts = v;
            }
        }
        if let Some(pipeline) = file.pipeline
            && let Some(v) = pipeline.max_concurrent_workspaces
        {
            config.pipeline.max_concurrent_workspaces = v;
        }
        if let Some(scoring) = file.scoring {
            config.scoring = scoring;
        }
        if let Some(fields) = file.fields {
            if let Some(contacts) = fields.contacts {
                config.fields.contacts = validate_rules(contacts)?;
            }
            if let Some(companies) = fields.companies {
                config.fields.companies = validate_rules(companies)?;
            }
        }
        if let Some(logging) = file.logging {
            config.logging = logging;
        }
        if let Some(metrics) = file.metrics {
            config.metrics = metrics;
        }

        config.validate()?;
        Ok(config)
    }

    /// Applies `DUPSTACK_*` environment overrides.
    ///
    /// Unparseable values are ignored. Logging and metrics variables are
    /// read by the observability module at init time.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("DUPSTACK_DATA_DIR")
            && !dir.trim().is_empty()
        {
            self.data_dir = PathBuf::from(dir.trim());
        }
        if let Some(v) = parse_usize_env("DUPSTACK_BATCH_SIZE") {
            self.installer.batch_size = v;
        }
        if let Some(v) = parse_usize_env("DUPSTACK_MAX_STACK_SIZE") {
            self.resolver.max_stack_size = v;
        }
        if let Some(v) = parse_usize_env("DUPSTACK_MAX_RESTARTS") {
            self.resolver.max_restarts = v;
        }
        if let Some(v) = parse_usize_env("DUPSTACK_MAX_CONCURRENT") {
            self.pipeline.max_concurrent_workspaces = v;
        }
    }

    /// Checks limits and the scoring table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a zero batch size, stack size or
    /// concurrency, or an invalid scoring table.
    pub fn validate(&self) -> Result<()> {
        if self.installer.batch_size == 0 {
            return Err(Error::InvalidInput(
                "installer.batch_size must be at least 1".to_string(),
            ));
        }
        if self.resolver.max_stack_size == 0 {
            return Err(Error::InvalidInput(
                "resolver.max_stack_size must be at least 1".to_string(),
            ));
        }
        if self.pipeline.max_concurrent_workspaces == 0 {
            return Err(Error::InvalidInput(
                "pipeline.max_concurrent_workspaces must be at least 1".to_string(),
            ));
        }
        self.scoring.validate()
    }

    /// Returns the path of the SQLite database.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Sets the installer batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.installer.batch_size = batch_size;
        self
    }

    /// Sets the resolver's per-pass member cap.
    #[must_use]
    pub const fn with_max_stack_size(mut self, max_stack_size: usize) -> Self {
        self.resolver.max_stack_size = max_stack_size;
        self
    }

    /// Sets the resolver's per-pass restart cap.
    #[must_use]
    pub const fn with_max_restarts(mut self, max_restarts: usize) -> Self {
        self.resolver.max_restarts = max_restarts;
        self
    }

    /// Renders the effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Installer {
            batch_size: usize,
        }
        #[derive(Serialize)]
        struct Resolver {
            max_stack_size: usize,
            max_restarts: usize,
        }
        #[derive(Serialize)]
        struct Pipeline {
            max_concurrent_workspaces: usize,
        }
        #[derive(Serialize)]
        struct Fields {
            contacts: Vec<RawFieldConfig>,
            companies: Vec<RawFieldConfig>,
        }
        #[derive(Serialize)]
        struct Rendered<'a> {
            data_dir: String,
            installer: Installer,
            resolver: Resolver,
            pipeline: Pipeline,
            scoring: &'a ScoringTable,
            logging: &'a LoggingSettings,
            metrics: &'a MetricsSettings,
            fields: Fields,
        }

        let rendered = Rendered {
            data_dir: self.data_dir.display().to_string(),
            installer: Installer {
                batch_size: self.installer.batch_size,
            },
            resolver: Resolver {
                max_stack_size: self.resolver.max_stack_size,
                max_restarts: self.resolver.max_restarts,
            },
            pipeline: Pipeline {
                max_concurrent_workspaces: self.pipeline.max_concurrent_workspaces,
            },
            scoring: &self.scoring,
            logging: &self.logging,
            metrics: &self.metrics,
            fields: Fields {
                contacts: self.fields.contacts.iter().map(RawFieldConfig::from).collect(),
                companies: self.fields.companies.iter().map(RawFieldConfig::from).collect(),
            },
        };
        toml::to_string_pretty(&rendered).map_err(|e| Error::OperationFailed {
            operation: "render_config".to_string(),
            cause: e.to_string(),
        })
    }
}

fn parse_usize_env(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DupstackConfig::default();
        assert_eq!(config.installer.batch_size, 1000);
        assert_eq!(config.resolver.max_stack_size, 500);
        assert_eq!(config.resolver.max_restarts, 32);
        assert_eq!(config.pipeline.max_concurrent_workspaces, 15);
        assert_eq!(config.database_path(), PathBuf::from(".dupstack/dupstack.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_sections() {
        let config = DupstackConfig::from_toml(
            r#"
data_dir = "/tmp/dupstack"

[installer]
batch_size = 50

[resolver]
max_restarts = 4

[scoring]
confident_threshold = 80.0

[[fields.companies]]
id = "name"
sources = ["name"]
matching_method = "similar"
if_match = "confident"
if_different = "null"
"#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/dupstack"));
        assert_eq!(config.installer.batch_size, 50);
        assert_eq!(config.resolver.max_restarts, 4);
        assert_eq!(config.resolver.max_stack_size, 500);
        assert!((config.scoring.confident_threshold - 80.0).abs() < f64::EPSILON);
        assert_eq!(config.fields.companies.len(), 1);
        assert_eq!(config.fields.companies[0].if_match, Some(IfMatch::Confident));
        assert_eq!(config.fields.contacts, default_contact_fields());
    }

    #[test]
    fn test_invalid_rule_is_rejected() {
        let result = DupstackConfig::from_toml(
            r#"
[[fields.contacts]]
id = "email"
sources = ["email"]
matching_method = "phonetic"
"#,
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let result = DupstackConfig::from_toml("[installer]\nbatch_size = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(DupstackConfig::from_toml("max_results = 3\n").is_err());
    }

    #[test]
    fn test_rendered_toml_loads_back() {
        let config = DupstackConfig::default().with_batch_size(25);
        let rendered = config.to_toml().unwrap();
        let reloaded = DupstackConfig::from_toml(&rendered).unwrap();
        assert_eq!(reloaded.installer.batch_size, 25);
        assert_eq!(reloaded.fields, config.fields);
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = DupstackConfig::load_from_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(Error::OperationFailed { .. })));
    }
}
