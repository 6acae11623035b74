//! Deterministic keyword classifier used offline and in tests.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use threadline_core::continuity::signals::{contains_phrase, tokenize};
use threadline_core::continuity::ContinuityType;
use threadline_core::intent::{Classification, IntentType, ProposedContinuity};
use threadline_core::transcript::{Role, Turn};

use crate::classifier::Classifier;

const INTENT_KEYWORDS: [(&str, &[&str]); 6] = [
    ("return", &["return", "refund", "send back", "send it back"]),
    ("exchange", &["exchange", "swap"]),
    ("payment", &["payment", "pay", "charged", "invoice", "billing"]),
    ("order", &["order", "track", "tracking", "delivery", "shipped", "cancel"]),
    ("discovery", &["looking for", "show me", "find", "buy", "recommend", "shopping for"]),
    ("chitchat", &["hello", "hi", "hey", "thanks", "thank you"]),
];

const CATALOG: [(&str, &str); 11] = [
    ("laptop", "electronics"),
    ("phone", "electronics"),
    ("tablet", "electronics"),
    ("headphone", "electronics"),
    ("cupboard", "furniture"),
    ("sofa", "furniture"),
    ("table", "furniture"),
    ("chair", "furniture"),
    ("shoe", "fashion"),
    ("shirt", "fashion"),
    ("jacket", "fashion"),
];

const BUDGET_PHRASES: [&str; 7] =
    ["under", "below", "less than", "at most", "no more than", "max", "cheaper than"];

const ORDINALS: [(&str, u64); 10] = [
    ("first", 1),
    ("1st", 1),
    ("second", 2),
    ("2nd", 2),
    ("third", 3),
    ("3rd", 3),
    ("fourth", 4),
    ("4th", 4),
    ("fifth", 5),
    ("5th", 5),
];

const ORDER_ID_MIN_DIGITS: usize = 5;

#[derive(Clone, Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_text(&self, message: &str, recent_context: &[Turn]) -> Classification {
        let tokens = tokenize(message);

        let product = extract_product(&tokens);
        let budget = extract_budget(&tokens);
        let order_id = extract_order_id(&tokens);
        let selection = extract_selection(&tokens);

        let keyword_intent = match_intent(&tokens);
        let mut continuity = None;
        let mut score = 20u8;

        let intent = if let Some(intent) = keyword_intent {
            score += 40;
            Some(intent)
        } else if product.is_some() {
            score += 30;
            Some("discovery")
        } else if order_id.is_some() {
            score += 30;
            Some("order")
        } else if let Some(intent) = intent_from_context(recent_context) {
            score += 20;
            continuity = Some(ProposedContinuity::new(
                ContinuityType::Continuation,
                format!("follow-up to the recent {intent} conversation"),
            ));
            Some(intent)
        } else {
            None
        };

        score += confidence_bonus(
            product.is_some(),
            budget.is_some(),
            order_id.is_some(),
            selection.is_some(),
        );

        let intent_type = intent.map(IntentType::new).unwrap_or_else(IntentType::unknown);
        let mut classification = Classification::new(intent_type, f64::from(score.min(95)) / 100.0);
        if let Some((subcategory, category)) = product {
            classification = classification
                .with_entity("subcategory", subcategory)
                .with_entity("category", category);
        }
        if let Some(budget) = budget {
            classification = classification.with_entity("budget", budget);
        }
        if let Some(order_id) = order_id {
            classification = classification.with_entity("order_id", order_id);
        }
        if let Some(selection) = selection {
            classification = classification.with_entity("selection", selection);
        }
        if let Some(continuity) = continuity {
            classification = classification.with_continuity(continuity);
        }
        classification
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, message: &str, recent_context: &[Turn]) -> Result<Classification> {
        Ok(self.classify_text(message, recent_context))
    }
}

fn match_intent(tokens: &[String]) -> Option<&'static str> {
    INTENT_KEYWORDS
        .iter()
        .find(|(_, phrases)| phrases.iter().any(|phrase| contains_phrase(tokens, phrase)))
        .map(|(intent, _)| *intent)
}

fn intent_from_context(recent_context: &[Turn]) -> Option<&'static str> {
    recent_context
        .iter()
        .rev()
        .filter(|turn| turn.role == Role::User)
        .find_map(|turn| {
            let tokens = tokenize(&turn.content);
            match_intent(&tokens).or_else(|| extract_product(&tokens).map(|_| "discovery"))
        })
        .filter(|intent| *intent != "chitchat")
}

fn extract_product(tokens: &[String]) -> Option<(&'static str, &'static str)> {
    tokens.iter().find_map(|token| {
        CATALOG.iter().copied().find(|(subcategory, _)| {
            token == subcategory || token.strip_suffix('s') == Some(*subcategory)
        })
    })
}

/// The narrowing phrase and amount as written, e.g. "under $1500".
fn extract_budget(tokens: &[String]) -> Option<String> {
    BUDGET_PHRASES.iter().find_map(|phrase| {
        let width = phrase.split_whitespace().count();
        tokens.windows(width + 1).find_map(|window| {
            let (head, amount) = window.split_at(width);
            let matches_phrase =
                head.iter().map(String::as_str).eq(phrase.split_whitespace());
            (matches_phrase && is_money_token(&amount[0]))
                .then(|| format!("{phrase} {}", amount[0]))
        })
    })
}

fn is_money_token(token: &str) -> bool {
    let digits = token.trim_start_matches('$').trim_end_matches('k');
    !digits.is_empty()
        && digits.chars().all(|ch| ch.is_ascii_digit() || ch == '.')
        && digits.chars().any(|ch| ch.is_ascii_digit())
}

fn extract_order_id(tokens: &[String]) -> Option<String> {
    tokens
        .iter()
        .find(|token| {
            token.len() >= ORDER_ID_MIN_DIGITS && token.chars().all(|ch| ch.is_ascii_digit())
        })
        .cloned()
}

fn extract_selection(tokens: &[String]) -> Option<Value> {
    let ordinal = tokens.iter().find_map(|token| {
        ORDINALS.iter().find(|(word, _)| token == word).map(|(_, position)| *position)
    });
    let numbered = tokens.windows(2).find_map(|window| {
        matches!(window[0].as_str(), "number" | "option" | "item")
            .then(|| window[1].parse::<u64>().ok())
            .flatten()
    });
    ordinal.or(numbered).map(|position| json!(position))
}

fn confidence_bonus(has_product: bool, has_budget: bool, has_order: bool, has_selection: bool) -> u8 {
    let mut bonus = 0u8;
    if has_product {
        bonus += 20;
    }
    if has_budget {
        bonus += 10;
    }
    if has_order {
        bonus += 20;
    }
    if has_selection {
        bonus += 20;
    }
    bonus
}
