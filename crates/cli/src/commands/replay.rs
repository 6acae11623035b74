//! Scripted replay of user messages through the routing engine.
//!
//! Each script line is either `{"message": "...", "session": "..."}` or a bare
//! JSON string. Every turn prints one JSON document with the resulting action,
//! followed by the usual command outcome line.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use threadline_agent::{
    analyzer_policy, default_registry, default_tools, AgentRuntime, KeywordClassifier, Planner,
};
use threadline_core::action::Action;
use threadline_core::config::{AppConfig, LoadOptions};
use threadline_core::continuity::AnalyzerPolicy;
use threadline_core::errors::ApplicationError;
use threadline_core::session::SessionStore;
use threadline_db::connection::connect_with_config;
use threadline_db::{migrations, InMemorySessionStore, SqlSessionStore};
use tracing::{info, warn};

use crate::commands::CommandResult;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum ScriptLine {
    Text(String),
    Turn {
        message: String,
        #[serde(default)]
        session: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct ScriptTurn {
    session: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct TurnRecord<'a> {
    turn: usize,
    session: &'a str,
    message: &'a str,
    action: &'a Action,
}

type Failure = (&'static str, String, u8);

pub fn run(options: &LoadOptions, script: &Path, session: &str, persist: bool) -> CommandResult {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "replay",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let turns = match load_script(script, session) {
        Ok(turns) => turns,
        Err(error) => {
            return CommandResult::failure("replay", "script_invalid", format!("{error:#}"), 2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "replay",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let classifier = Arc::new(KeywordClassifier::new());
    let planner = Planner::new(classifier, default_registry(&default_tools()), &config.routing);
    let policy = analyzer_policy(&config.routing);

    let result = runtime.block_on(async {
        if persist {
            replay_persisted(&config, planner, policy, &turns).await
        } else {
            let agent_runtime = AgentRuntime::new(planner, InMemorySessionStore::default(), policy);
            replay_turns(&agent_runtime, &turns).await
        }
    });

    match result {
        Ok(lines) => {
            info!(event_name = "cli.replay.completed", turns = turns.len(), persist, "replay completed");
            CommandResult::success("replay", format!("replayed {} turn(s)", turns.len()))
                .with_lines(lines)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("replay", error_class, message, exit_code)
        }
    }
}

async fn replay_persisted(
    config: &AppConfig,
    planner: Planner,
    policy: AnalyzerPolicy,
    turns: &[ScriptTurn],
) -> Result<Vec<String>, Failure> {
    let pool = connect_with_config(&config.database)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;

    let agent_runtime = AgentRuntime::new(planner, SqlSessionStore::new(pool.clone()), policy);
    let lines = replay_turns(&agent_runtime, turns).await;
    pool.close().await;
    lines
}

async fn replay_turns<S: SessionStore>(
    runtime: &AgentRuntime<S>,
    turns: &[ScriptTurn],
) -> Result<Vec<String>, Failure> {
    let mut lines = Vec::with_capacity(turns.len());
    for (index, turn) in turns.iter().enumerate() {
        let action = runtime
            .handle_message(&turn.session, &turn.message)
            .await
            .map_err(|error| turn_failure(index + 1, &error))?;
        let record = TurnRecord {
            turn: index + 1,
            session: &turn.session,
            message: &turn.message,
            action: &action,
        };
        let line = serde_json::to_string(&record)
            .map_err(|error| ("serialization", error.to_string(), 1u8))?;
        lines.push(line);
    }
    Ok(lines)
}

fn turn_failure(turn: usize, error: &ApplicationError) -> Failure {
    warn!(event_name = "cli.replay.turn_failed", turn, error = %error, "replay turn failed");
    ("turn_failed", format!("turn {turn}: {error}"), 6)
}

fn load_script(path: &Path, default_session: &str) -> anyhow::Result<Vec<ScriptTurn>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    parse_script(&raw, default_session)
}

fn parse_script(raw: &str, default_session: &str) -> anyhow::Result<Vec<ScriptTurn>> {
    let mut turns = Vec::new();
    for (index, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let parsed: ScriptLine = serde_json::from_str(trimmed)
            .with_context(|| format!("script line {} is not a message", index + 1))?;
        let turn = match parsed {
            ScriptLine::Text(message) => {
                ScriptTurn { session: default_session.to_string(), message }
            }
            ScriptLine::Turn { message, session } => ScriptTurn {
                session: session.unwrap_or_else(|| default_session.to_string()),
                message,
            },
        };
        turns.push(turn);
    }
    if turns.is_empty() {
        return Err(anyhow!("script contains no messages"));
    }
    Ok(turns)
}

#[cfg(test)]
mod tests {
    use super::{parse_script, ScriptTurn};

    #[test]
    fn script_accepts_objects_strings_and_comments() {
        let raw = "# warm-up\n\"hi there\"\n\n{\"message\": \"where is order 12345\", \"session\": \"s-2\"}\n";
        let turns = parse_script(raw, "s-1").expect("script");

        assert_eq!(
            turns,
            vec![
                ScriptTurn { session: "s-1".to_string(), message: "hi there".to_string() },
                ScriptTurn {
                    session: "s-2".to_string(),
                    message: "where is order 12345".to_string()
                },
            ]
        );
    }

    #[test]
    fn script_rejects_malformed_lines_with_line_number() {
        let error = parse_script("\"ok\"\n{not json}\n", "s").expect_err("malformed");
        assert!(format!("{error:#}").contains("script line 2"));
    }

    #[test]
    fn empty_script_is_rejected() {
        assert!(parse_script("# nothing\n\n", "s").is_err());
    }
}
