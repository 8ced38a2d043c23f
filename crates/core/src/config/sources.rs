use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::settings::MigrationSettings;
use super::validation::ConfigError;

pub const DEFAULT_ENV_PREFIX: &str = "KEEL_";

/// One place settings can be loaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    TomlFile(PathBuf),
    YamlFile(PathBuf),
    JsonFile(PathBuf),
    /// Variables such as `KEEL_SCHEMA` and `KEEL_DATABASE_URL`
    Env { prefix: String },
}

impl ConfigSource {
    /// Load settings from this source; `Ok(None)` when it has nothing to offer
    pub fn load(&self) -> Result<Option<MigrationSettings>, ConfigError> {
        match self {
            ConfigSource::TomlFile(path) => read_file(path, |content| {
                toml::from_str(content).map_err(|e| ConfigError::parsing(path.display().to_string(), e))
            }),
            ConfigSource::YamlFile(path) => read_file(path, |content| {
                serde_yaml::from_str(content).map_err(|e| ConfigError::parsing(path.display().to_string(), e))
            }),
            ConfigSource::JsonFile(path) => read_file(path, |content| {
                serde_json::from_str(content).map_err(|e| ConfigError::parsing(path.display().to_string(), e))
            }),
            ConfigSource::Env { prefix } => {
                let vars: HashMap<String, String> = std::env::vars().filter(|(k, _)| k.starts_with(prefix.as_str())).collect();
                if vars.is_empty() {
                    return Ok(None);
                }
                let mut settings = MigrationSettings::default();
                apply_env(&mut settings, prefix, &vars)?;
                Ok(Some(settings))
            }
        }
    }

    pub fn description(&self) -> String {
        match self {
            ConfigSource::TomlFile(path) => format!("TOML file: {}", path.display()),
            ConfigSource::YamlFile(path) => format!("YAML file: {}", path.display()),
            ConfigSource::JsonFile(path) => format!("JSON file: {}", path.display()),
            ConfigSource::Env { prefix } => format!("Environment variables: {}*", prefix),
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

fn read_file<F>(path: &Path, parse: F) -> Result<Option<MigrationSettings>, ConfigError>
where
    F: FnOnce(&str) -> Result<MigrationSettings, ConfigError>,
{
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    parse(&content).map(Some)
}

/// Overlay prefixed variables onto `settings`
pub fn apply_env(
    settings: &mut MigrationSettings,
    prefix: &str,
    vars: &HashMap<String, String>,
) -> Result<(), ConfigError> {
    for (key, value) in vars {
        let Some(field) = key.strip_prefix(prefix) else {
            continue;
        };
        match field {
            "MIGRATIONS_DIR" => settings.migrations_dir = PathBuf::from(value),
            "SCHEMA" => settings.schema = value.clone(),
            "LEDGER_TABLE" => settings.ledger_table = value.clone(),
            "DATABASE_URL" => settings.database_url = Some(value.clone()),
            _ => {
                return Err(ConfigError::environment_error(format!(
                    "Unknown configuration variable {}",
                    key
                )))
            }
        }
    }
    Ok(())
}

/// Tries sources in order; the first that yields settings wins
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    sources: Vec<ConfigSource>,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    pub fn new(sources: Vec<ConfigSource>) -> Self {
        Self {
            sources,
            env_prefix: None,
        }
    }

    /// `keel.toml`, `keel.yaml`, `keel.yml` then `keel.json` under `root`,
    /// followed by `KEEL_*` variables, which also overlay whichever file is found
    pub fn discover(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::new(vec![
            ConfigSource::TomlFile(root.join("keel.toml")),
            ConfigSource::YamlFile(root.join("keel.yaml")),
            ConfigSource::YamlFile(root.join("keel.yml")),
            ConfigSource::JsonFile(root.join("keel.json")),
            ConfigSource::Env {
                prefix: DEFAULT_ENV_PREFIX.to_string(),
            },
        ])
        .with_env_overlay(DEFAULT_ENV_PREFIX)
    }

    /// Overlay variables with `prefix` onto whatever source wins
    pub fn with_env_overlay(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    pub fn sources(&self) -> &[ConfigSource] {
        &self.sources
    }

    /// Load and validate settings using the process environment
    pub fn load(&self) -> Result<MigrationSettings, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        self.load_with_env(&vars)
    }

    /// Load and validate settings using `vars` as the environment overlay
    pub fn load_with_env(&self, vars: &HashMap<String, String>) -> Result<MigrationSettings, ConfigError> {
        let mut settings = self.first_found()?.unwrap_or_default();

        if let Some(prefix) = &self.env_prefix {
            let overlay: HashMap<String, String> = vars
                .iter()
                .filter(|(k, _)| k.starts_with(prefix.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            apply_env(&mut settings, prefix, &overlay)?;
        }

        settings.validate()?;
        Ok(settings)
    }

    fn first_found(&self) -> Result<Option<MigrationSettings>, ConfigError> {
        for source in &self.sources {
            if let Some(settings) = source.load()? {
                debug!("Loaded migration settings from {}", source);
                return Ok(Some(settings));
            }
        }
        debug!("No configuration source found, using defaults");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn files_only(root: &Path) -> ConfigLoader {
        ConfigLoader::new(vec![
            ConfigSource::TomlFile(root.join("keel.toml")),
            ConfigSource::YamlFile(root.join("keel.yaml")),
            ConfigSource::JsonFile(root.join("keel.json")),
        ])
    }

    #[test]
    fn test_defaults_when_nothing_is_found() {
        let dir = TempDir::new().unwrap();
        let settings = files_only(dir.path()).load_with_env(&HashMap::new()).unwrap();
        assert_eq!(settings, MigrationSettings::default());
    }

    #[test]
    fn test_first_source_wins() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keel.yaml"), "schema: from_yaml\n").unwrap();
        fs::write(dir.path().join("keel.json"), r#"{"schema": "from_json"}"#).unwrap();

        let settings = files_only(dir.path()).load_with_env(&HashMap::new()).unwrap();
        assert_eq!(settings.schema, "from_yaml");

        fs::write(
            dir.path().join("keel.toml"),
            "schema = \"from_toml\"\nmigrations_dir = \"db/changesets\"\n",
        )
        .unwrap();
        let settings = files_only(dir.path()).load_with_env(&HashMap::new()).unwrap();
        assert_eq!(settings.schema, "from_toml");
        assert_eq!(settings.migrations_dir, PathBuf::from("db/changesets"));
    }

    #[test]
    fn test_env_overlays_file_settings() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keel.toml"), "ledger_table = \"history\"\n").unwrap();

        let vars = HashMap::from([
            ("KEEL_SCHEMA".to_string(), "tenant_a".to_string()),
            ("KEEL_DATABASE_URL".to_string(), "postgres://localhost/app".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
        ]);
        let settings = files_only(dir.path())
            .with_env_overlay("KEEL_")
            .load_with_env(&vars)
            .unwrap();

        assert_eq!(settings.ledger_table, "history");
        assert_eq!(settings.schema, "tenant_a");
        assert_eq!(settings.database_url.as_deref(), Some("postgres://localhost/app"));
    }

    #[test]
    fn test_unknown_variable_is_rejected() {
        let vars = HashMap::from([("KEEL_SHEMA".to_string(), "typo".to_string())]);
        let mut settings = MigrationSettings::default();
        let err = apply_env(&mut settings, "KEEL_", &vars).unwrap_err();
        assert!(matches!(err, ConfigError::EnvironmentError { .. }));
    }

    #[test]
    fn test_malformed_file_is_a_parsing_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keel.toml"), "schema = \n").unwrap();
        let err = files_only(dir.path()).load_with_env(&HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::ParsingError { .. }));
    }

    #[test]
    fn test_loaded_settings_are_validated() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keel.json"), r#"{"ledger_table": "bad table"}"#).unwrap();
        let err = files_only(dir.path()).load_with_env(&HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_discover_order() {
        let loader = ConfigLoader::discover("/srv/app");
        let names: Vec<String> = loader.sources().iter().map(|s| s.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "TOML file: /srv/app/keel.toml",
                "YAML file: /srv/app/keel.yaml",
                "YAML file: /srv/app/keel.yml",
                "JSON file: /srv/app/keel.json",
                "Environment variables: KEEL_*",
            ]
        );
    }
}
