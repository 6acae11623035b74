use threadline_core::config::RoutingConfig;
use threadline_core::intent::Classification;

pub const GATE_QUESTION: &str = "Could you clarify what you'd like to do?";

#[derive(Clone, Debug, PartialEq)]
pub enum GateDecision {
    Pass,
    Clarify { reason_code: &'static str, threshold: f64, user_message: String },
}

/// Per-intent confidence floor applied before anything touches the session.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfidenceGate {
    routing: RoutingConfig,
}

impl Default for ConfidenceGate {
    fn default() -> Self {
        Self::new(RoutingConfig::default())
    }
}

impl ConfidenceGate {
    pub fn new(routing: RoutingConfig) -> Self {
        Self { routing }
    }

    pub fn threshold_for(&self, classification: &Classification) -> f64 {
        self.routing.threshold_for(&classification.intent_type)
    }

    pub fn evaluate(&self, classification: &Classification) -> GateDecision {
        let threshold = self.threshold_for(classification);
        let unknown = classification.intent_type.is_unknown();
        if !unknown && classification.confidence >= threshold {
            return GateDecision::Pass;
        }

        GateDecision::Clarify {
            reason_code: if unknown {
                "intent_unrecognized"
            } else {
                "confidence_below_threshold"
            },
            threshold,
            user_message: GATE_QUESTION.to_string(),
        }
    }
}
