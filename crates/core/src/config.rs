use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::intent::IntentType;

pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["threadline.toml", "config/threadline.toml"];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub routing: RoutingConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoutingConfig {
    pub default_threshold: f64,
    pub thresholds: BTreeMap<String, f64>,
    pub snapshot_capacity: usize,
    pub context_window: usize,
    pub suppress_switch_clarification: bool,
    pub numeric_budget_narrowing: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub default_threshold: Option<f64>,
    pub suppress_switch_clarification: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let thresholds = [
            ("order", 0.7),
            ("payment", 0.7),
            ("return", 0.6),
            ("exchange", 0.6),
            ("discovery", 0.5),
            ("chitchat", 0.3),
        ]
        .into_iter()
        .map(|(intent, threshold)| (intent.to_string(), threshold))
        .collect();

        Self {
            default_threshold: 0.5,
            thresholds,
            snapshot_capacity: 10,
            context_window: 5,
            suppress_switch_clarification: false,
            numeric_budget_narrowing: false,
        }
    }
}

impl RoutingConfig {
    /// Per-intent gate, falling back to the default for unknown intents.
    pub fn threshold_for(&self, intent_type: &IntentType) -> f64 {
        self.thresholds.get(intent_type.as_str()).copied().unwrap_or(self.default_threshold)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://threadline.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            routing: RoutingConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATHS[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(routing) = patch.routing {
            if let Some(default_threshold) = routing.default_threshold {
                self.routing.default_threshold = default_threshold;
            }
            for (intent, threshold) in routing.thresholds.unwrap_or_default() {
                let key = IntentType::new(intent).as_str().to_string();
                self.routing.thresholds.insert(key, threshold);
            }
            if let Some(snapshot_capacity) = routing.snapshot_capacity {
                self.routing.snapshot_capacity = snapshot_capacity;
            }
            if let Some(context_window) = routing.context_window {
                self.routing.context_window = context_window;
            }
            if let Some(suppress) = routing.suppress_switch_clarification {
                self.routing.suppress_switch_clarification = suppress;
            }
            if let Some(numeric) = routing.numeric_budget_narrowing {
                self.routing.numeric_budget_narrowing = numeric;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("THREADLINE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("THREADLINE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("THREADLINE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("THREADLINE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("THREADLINE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("THREADLINE_ROUTING_DEFAULT_THRESHOLD") {
            self.routing.default_threshold =
                parse_env("THREADLINE_ROUTING_DEFAULT_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("THREADLINE_ROUTING_SNAPSHOT_CAPACITY") {
            self.routing.snapshot_capacity =
                parse_env("THREADLINE_ROUTING_SNAPSHOT_CAPACITY", &value)?;
        }
        if let Some(value) = read_env("THREADLINE_ROUTING_CONTEXT_WINDOW") {
            self.routing.context_window = parse_env("THREADLINE_ROUTING_CONTEXT_WINDOW", &value)?;
        }
        if let Some(value) = read_env("THREADLINE_ROUTING_SUPPRESS_SWITCH_CLARIFICATION") {
            self.routing.suppress_switch_clarification =
                parse_env("THREADLINE_ROUTING_SUPPRESS_SWITCH_CLARIFICATION", &value)?;
        }
        if let Some(value) = read_env("THREADLINE_ROUTING_NUMERIC_BUDGET_NARROWING") {
            self.routing.numeric_budget_narrowing =
                parse_env("THREADLINE_ROUTING_NUMERIC_BUDGET_NARROWING", &value)?;
        }

        let log_level =
            read_env("THREADLINE_LOGGING_LEVEL").or_else(|| read_env("THREADLINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("THREADLINE_LOGGING_FORMAT").or_else(|| read_env("THREADLINE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(default_threshold) = overrides.default_threshold {
            self.routing.default_threshold = default_threshold;
        }
        if let Some(suppress) = overrides.suppress_switch_clarification {
            self.routing.suppress_switch_clarification = suppress;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_routing(&self.routing)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_PATHS.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_routing(routing: &RoutingConfig) -> Result<(), ConfigError> {
    let in_unit_range = |value: f64| (0.0..=1.0).contains(&value);

    if !in_unit_range(routing.default_threshold) {
        return Err(ConfigError::Validation(
            "routing.default_threshold must be within 0.0..=1.0".to_string(),
        ));
    }

    if let Some((intent, _)) =
        routing.thresholds.iter().find(|(_, threshold)| !in_unit_range(**threshold))
    {
        return Err(ConfigError::Validation(format!(
            "routing.thresholds.{intent} must be within 0.0..=1.0"
        )));
    }

    if routing.snapshot_capacity == 0 {
        return Err(ConfigError::Validation(
            "routing.snapshot_capacity must be greater than zero".to_string(),
        ));
    }

    if routing.context_window == 0 {
        return Err(ConfigError::Validation(
            "routing.context_window must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    routing: Option<RoutingPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    default_threshold: Option<f64>,
    thresholds: Option<BTreeMap<String, f64>>,
    snapshot_capacity: Option<usize>,
    context_window: Option<usize>,
    suppress_switch_clarification: Option<bool>,
    numeric_budget_narrowing: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
    use crate::intent::IntentType;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_carry_per_intent_thresholds() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(
            config.routing.threshold_for(&IntentType::new("ORDER")) == 0.7,
            "order threshold should be 0.7",
        )?;
        ensure(
            config.routing.threshold_for(&IntentType::new("chitchat")) == 0.3,
            "chitchat threshold should be 0.3",
        )?;
        ensure(
            config.routing.threshold_for(&IntentType::new("warranty")) == 0.5,
            "unknown intents should use the default threshold",
        )?;
        ensure(config.routing.snapshot_capacity == 10, "snapshot capacity defaults to 10")?;
        ensure(config.routing.context_window == 5, "context window defaults to 5")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_THREADLINE_DB", "sqlite://interpolated.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("threadline.toml");
            fs::write(
                &path,
                r#"
[database]
url = "${TEST_THREADLINE_DB}"

[routing.thresholds]
Order = 0.8
warranty = 0.4
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://interpolated.db",
                "database url should be interpolated from environment",
            )?;
            ensure(
                config.routing.threshold_for(&IntentType::new("order")) == 0.8,
                "file thresholds are merged per intent",
            )?;
            ensure(
                config.routing.threshold_for(&IntentType::new("payment")) == 0.7,
                "untouched default thresholds survive a partial table",
            )?;
            ensure(
                config.routing.threshold_for(&IntentType::new("warranty")) == 0.4,
                "new intents can be added from the file",
            )
        })();

        clear_vars(&["TEST_THREADLINE_DB"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_fails() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("threadline.toml");
        fs::write(&path, "[database]\nurl = \"${THREADLINE_TEST_UNSET_VAR}\"\n")
            .map_err(|err| err.to_string())?;

        let error = match AppConfig::load(LoadOptions {
            config_path: Some(path),
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected interpolation failure".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(error, ConfigError::MissingEnvInterpolation { ref var } if var == "THREADLINE_TEST_UNSET_VAR"),
            "error should name the missing variable",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("THREADLINE_LOG_LEVEL", "warn");
        env::set_var("THREADLINE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&["THREADLINE_LOG_LEVEL", "THREADLINE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("THREADLINE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("THREADLINE_ROUTING_SNAPSHOT_CAPACITY", "4");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("threadline.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[routing]
snapshot_capacity = 20
suppress_switch_clarification = true

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.routing.snapshot_capacity == 4, "env should win over file")?;
            ensure(
                config.routing.suppress_switch_clarification,
                "file value should win over default",
            )
        })();

        clear_vars(&["THREADLINE_DATABASE_URL", "THREADLINE_ROUTING_SNAPSHOT_CAPACITY"]);
        result
    }

    #[test]
    fn invalid_env_override_is_reported_with_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("THREADLINE_ROUTING_DEFAULT_THRESHOLD", "high");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "THREADLINE_ROUTING_DEFAULT_THRESHOLD"),
                "error should name the env key",
            )
        })();

        clear_vars(&["THREADLINE_ROUTING_DEFAULT_THRESHOLD"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides { default_threshold: Some(1.5), ..ConfigOverrides::default() },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure but config load succeeded".to_string()),
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("routing.default_threshold")
        );
        ensure(has_message, "validation failure should mention routing.default_threshold")
    }

    #[test]
    fn required_file_must_exist() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;

        let result = AppConfig::load(LoadOptions {
            config_path: Some(dir.path().join("missing.toml")),
            require_file: true,
            ..LoadOptions::default()
        });
        ensure(
            matches!(result, Err(ConfigError::MissingConfigFile(_))),
            "missing required file should fail",
        )
    }
}
