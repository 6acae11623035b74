use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use threadline_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_PATHS};
use toml::Value;

use crate::commands::CommandResult;

/// Effective key, the env variables that may set it, in precedence order.
const FIELDS: &[(&str, &[&str])] = &[
    ("database.url", &["THREADLINE_DATABASE_URL"]),
    ("database.max_connections", &["THREADLINE_DATABASE_MAX_CONNECTIONS"]),
    ("database.timeout_secs", &["THREADLINE_DATABASE_TIMEOUT_SECS"]),
    ("routing.default_threshold", &["THREADLINE_ROUTING_DEFAULT_THRESHOLD"]),
    ("routing.thresholds", &[]),
    ("routing.snapshot_capacity", &["THREADLINE_ROUTING_SNAPSHOT_CAPACITY"]),
    ("routing.context_window", &["THREADLINE_ROUTING_CONTEXT_WINDOW"]),
    (
        "routing.suppress_switch_clarification",
        &["THREADLINE_ROUTING_SUPPRESS_SWITCH_CLARIFICATION"],
    ),
    ("routing.numeric_budget_narrowing", &["THREADLINE_ROUTING_NUMERIC_BUDGET_NARROWING"]),
    ("logging.level", &["THREADLINE_LOGGING_LEVEL", "THREADLINE_LOG_LEVEL"]),
    ("logging.format", &["THREADLINE_LOGGING_FORMAT", "THREADLINE_LOG_FORMAT"]),
];

#[derive(Debug, Serialize)]
struct ConfigReport<'a> {
    command: &'static str,
    status: &'static str,
    config_file: Option<String>,
    config: &'a AppConfig,
    sources: Vec<FieldSource>,
}

#[derive(Debug, Serialize)]
struct FieldSource {
    key: &'static str,
    source: String,
}

pub fn run(options: &LoadOptions) -> CommandResult {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let sources = FIELDS
        .iter()
        .map(|&(key, env_keys)| FieldSource {
            key,
            source: field_source(
                key,
                env_keys,
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            ),
        })
        .collect();

    let report = ConfigReport {
        command: "config",
        status: "ok",
        config_file: config_file_path.map(|path| path.display().to_string()),
        config: &config,
        sources,
    };

    match serde_json::to_string(&report) {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure("config", "serialization", error.to_string(), 1),
    }
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    DEFAULT_CONFIG_PATHS.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let from_env = env_keys
        .iter()
        .find(|key| env::var(key).is_ok_and(|value| !value.trim().is_empty()));
    if let Some(env_key) = from_env {
        return format!("env ({env_key})");
    }

    if config_file_doc.is_some_and(|doc| contains_path(doc, key_path)) {
        let file_path = config_file_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file_path})");
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
