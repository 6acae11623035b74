pub mod config;
pub mod migrate;
pub mod replay;

use serde::Serialize;

/// What a command prints on stdout and the process exit code.
///
/// The final stdout line is always a [`CommandOutcome`] JSON document; commands
/// that stream records (replay) print them on the lines before it.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome<'a> {
    command: &'a str,
    status: &'static str,
    error_class: Option<&'a str>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::outcome(
            0,
            CommandOutcome { command, status: "ok", error_class: None, message: message.into() },
        )
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self::outcome(
            exit_code,
            CommandOutcome {
                command,
                status: "error",
                error_class: Some(error_class),
                message: message.into(),
            },
        )
    }

    /// Puts already-rendered JSON lines ahead of the outcome line.
    pub fn with_lines(mut self, lines: Vec<String>) -> Self {
        if !lines.is_empty() {
            self.output = format!("{}\n{}", lines.join("\n"), self.output);
        }
        self
    }

    fn outcome(exit_code: u8, payload: CommandOutcome<'_>) -> Self {
        let output = serde_json::to_string(&payload).unwrap_or_else(|error| {
            serde_json::json!({
                "command": payload.command,
                "status": "error",
                "error_class": "serialization",
                "message": error.to_string(),
            })
            .to_string()
        });
        Self { exit_code, output }
    }
}
