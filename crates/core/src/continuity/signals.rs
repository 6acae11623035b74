//! Deterministic keyword signals read from the raw user message.

use crate::intent::Priority;

const URGENT_PHRASES: [&str; 5] = ["urgent", "emergency", "asap", "immediately", "right now"];
const HIGH_PHRASES: [&str; 4] = ["quickly", "as soon as", "priority", "hurry"];
const ROLLBACK_PHRASES: [&str; 6] =
    ["undo", "go back", "revert", "take that back", "scratch that", "never mind"];

pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_ascii_alphanumeric() && ch != '$' && ch != '.')
        .map(|token| token.trim_matches('.').to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Whole-token phrase match, so "asap" matches but "asapx" does not.
pub fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    let needle: Vec<&str> = phrase.split_whitespace().collect();
    if needle.is_empty() || needle.len() > tokens.len() {
        return false;
    }
    tokens
        .windows(needle.len())
        .any(|window| window.iter().map(String::as_str).eq(needle.iter().copied()))
}

fn starts_with_phrase(tokens: &[String], phrase: &str) -> bool {
    let needle: Vec<&str> = phrase.split_whitespace().collect();
    !needle.is_empty()
        && tokens.len() >= needle.len()
        && tokens.iter().map(String::as_str).zip(needle.iter().copied()).all(|(a, b)| a == b)
}

pub fn detect_urgency(message: &str) -> Option<Priority> {
    let tokens = tokenize(message);
    if URGENT_PHRASES.iter().any(|phrase| contains_phrase(&tokens, phrase)) {
        return Some(Priority::Urgent);
    }
    if HIGH_PHRASES.iter().any(|phrase| contains_phrase(&tokens, phrase)) {
        return Some(Priority::High);
    }
    None
}

/// True when the message opens with an undo command ("undo", "go back", ...).
pub fn is_rollback_request(message: &str) -> bool {
    let tokens = tokenize(message);
    ROLLBACK_PHRASES.iter().any(|phrase| starts_with_phrase(&tokens, phrase))
}
