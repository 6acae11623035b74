use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// 1-based user turn number this entry belongs to.
    pub turn: u64,
}

/// Append-only, turn-ordered record of a conversation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<Turn>,
    user_turns: u64,
}

impl Transcript {
    pub fn record_user(&mut self, content: impl Into<String>) -> u64 {
        self.user_turns += 1;
        self.turns.push(Turn { role: Role::User, content: content.into(), turn: self.user_turns });
        self.user_turns
    }

    pub fn record_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::Assistant,
            content: content.into(),
            turn: self.user_turns,
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn user_turns(&self) -> u64 {
        self.user_turns
    }

    /// The last `window` entries, oldest first.
    pub fn recent(&self, window: usize) -> Vec<Turn> {
        let start = self.turns.len().saturating_sub(window);
        self.turns[start..].to_vec()
    }

    pub fn recent_text(&self, window: usize) -> Vec<String> {
        self.recent(window)
            .into_iter()
            .map(|turn| match turn.role {
                Role::User => format!("user: {}", turn.content),
                Role::Assistant => format!("assistant: {}", turn.content),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Role, Transcript};

    #[test]
    fn recent_window_keeps_latest_entries_in_order() {
        let mut transcript = Transcript::default();
        for index in 1..=4 {
            transcript.record_user(format!("message {index}"));
            transcript.record_assistant(format!("reply {index}"));
        }

        let recent = transcript.recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "reply 3");
        assert_eq!(recent[1].role, Role::User);
        assert_eq!(recent[2].turn, 4);
        assert_eq!(transcript.user_turns(), 4);
    }

    #[test]
    fn window_larger_than_history_returns_everything() {
        let mut transcript = Transcript::default();
        transcript.record_user("hi");
        assert_eq!(transcript.recent_text(10), vec!["user: hi".to_string()]);
    }
}
