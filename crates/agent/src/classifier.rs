//! The classification capability consumed by the planner.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use threadline_core::continuity::ContinuityType;
use threadline_core::intent::{Classification, IntentType, ProposedContinuity};
use threadline_core::transcript::Turn;
use threadline_core::workstream::SlotMap;

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, message: &str, recent_context: &[Turn]) -> Result<Classification>;
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Generative classifier; the model only translates text into a classification.
pub struct LlmClassifier<L> {
    client: L,
}

impl<L> LlmClassifier<L>
where
    L: LlmClient,
{
    pub fn new(client: L) -> Self {
        Self { client }
    }

    pub fn build_prompt(message: &str, recent_context: &[Turn]) -> String {
        let context = if recent_context.is_empty() {
            "No previous conversation".to_string()
        } else {
            recent_context
                .iter()
                .map(|turn| {
                    let role = serde_json::to_value(turn.role)
                        .ok()
                        .and_then(|value| value.as_str().map(str::to_string))
                        .unwrap_or_else(|| "unknown".to_string());
                    format!("{role}: {}", turn.content)
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "Classify the latest shopping-assistant message.\n\n\
             RECENT CONVERSATION:\n{context}\n\n\
             LATEST MESSAGE:\n{message}\n\n\
             Respond with JSON only:\n\
             {{\"intent\": \"discovery|order|return|exchange|payment|chitchat\", \
             \"confidence\": 0.0-1.0, \"entities\": {{}}, \
             \"continuity\": {{\"type\": \"CONTINUATION|INTENT_SWITCH|CONTEXT_SWITCH|ADDITION|UNCLEAR\", \
             \"reasoning\": \"...\"}}}}"
        )
    }
}

#[async_trait]
impl<L> Classifier for LlmClassifier<L>
where
    L: LlmClient,
{
    async fn classify(&self, message: &str, recent_context: &[Turn]) -> Result<Classification> {
        let prompt = Self::build_prompt(message, recent_context);
        let raw = self.client.complete(&prompt).await.context("llm completion failed")?;
        parse_classification(&raw)
    }
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(alias = "intent_type")]
    intent: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    entities: Option<SlotMap>,
    #[serde(default)]
    continuity: Option<RawContinuity>,
}

#[derive(Debug, Deserialize)]
struct RawContinuity {
    #[serde(rename = "type")]
    kind: ContinuityType,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    suggested_clarification: Option<String>,
}

/// Accepts bare or code-fenced JSON; confidence is clamped into [0, 1].
pub fn parse_classification(raw: &str) -> Result<Classification> {
    let start = raw.find('{').ok_or_else(|| anyhow!("classifier output contains no JSON object"))?;
    let end = raw.rfind('}').ok_or_else(|| anyhow!("classifier output contains no JSON object"))?;
    if end < start {
        return Err(anyhow!("classifier output contains no JSON object"));
    }

    let parsed: RawClassification = serde_json::from_str(&raw[start..=end])
        .context("classifier output is not a valid classification")?;
    if parsed.intent.trim().is_empty() {
        return Err(anyhow!("classifier output has an empty intent"));
    }

    let confidence = parsed.confidence.filter(|value| value.is_finite()).unwrap_or(0.0);
    let mut classification = Classification::new(IntentType::new(&parsed.intent), confidence);
    classification.entities = parsed.entities.unwrap_or_default();
    classification.continuity = parsed.continuity.map(|continuity| ProposedContinuity {
        kind: continuity.kind,
        confidence: continuity.confidence.unwrap_or(1.0).clamp(0.0, 1.0),
        reasoning: continuity.reasoning.unwrap_or_default(),
        suggested_clarification: continuity.suggested_clarification,
    });
    Ok(classification)
}
