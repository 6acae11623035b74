//! Per-turn entry point: classify, gate, analyze continuity, dispatch, apply.
//!
//! Every turn runs against a draft copy of the conversation. The draft is
//! installed only when the turn produces an action; agent failures and
//! rejected rollbacks leave the session exactly as it was and only append the
//! exchange to the transcript.

use std::sync::Arc;

use threadline_core::action::Action;
use threadline_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use threadline_core::config::RoutingConfig;
use threadline_core::continuity::signals;
use threadline_core::continuity::{
    ClarificationOutcome, ContinuityAnalysis, ContinuityType, PendingDecision, RecommendedAction,
};
use threadline_core::errors::{ApplicationError, DomainError};
use threadline_core::intent::Classification;
use threadline_core::transcript::Turn;
use threadline_core::workstream::{can_transition, Workstream, WorkstreamState};
use tracing::{debug, error, info, warn};

use crate::classifier::Classifier;
use crate::conversation::Conversation;
use crate::gate::{ConfidenceGate, GateDecision, GATE_QUESTION};
use crate::registry::{AgentContext, AgentOutput, AgentRegistry};
use crate::telemetry::TracingAuditSink;

const ACTOR: &str = "planner";

pub struct Planner {
    classifier: Arc<dyn Classifier>,
    agents: AgentRegistry,
    gate: ConfidenceGate,
    audit: Arc<dyn AuditSink>,
    context_window: usize,
}

impl Planner {
    pub fn new(classifier: Arc<dyn Classifier>, agents: AgentRegistry, routing: &RoutingConfig) -> Self {
        Self {
            classifier,
            agents,
            gate: ConfidenceGate::new(routing.clone()),
            audit: Arc::new(TracingAuditSink),
            context_window: routing.context_window,
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// Runs one user turn and returns exactly one action.
    ///
    /// Errors are reserved for broken invariants; recoverable failures come
    /// back as `Info` actions.
    pub async fn handle_turn(
        &self,
        conversation: &mut Conversation,
        message: &str,
    ) -> Result<Action, ApplicationError> {
        let recent = conversation.transcript.recent(self.context_window);
        let mut draft = conversation.clone();
        let turn = draft.transcript.record_user(message);
        let audit = AuditContext::new(
            draft.session_id.clone(),
            draft.session.focus_id().cloned(),
            format!("{}:{turn}", draft.session_id),
            ACTOR,
        );

        match self.plan(&mut draft, message, &recent, &audit).await {
            Ok(action) => {
                draft.transcript.record_assistant(action.summary());
                *conversation = draft;
                Ok(action)
            }
            Err(error) if is_recoverable(&error) => {
                let action = Action::info(error.user_message());
                conversation.transcript.record_user(message);
                conversation.transcript.record_assistant(action.summary());
                Ok(action)
            }
            Err(error) => Err(error),
        }
    }

    async fn plan(
        &self,
        draft: &mut Conversation,
        message: &str,
        recent: &[Turn],
        audit: &AuditContext,
    ) -> Result<Action, ApplicationError> {
        // A retraction ("never mind") while a question is open answers that question.
        if let Some(pending) = draft.pending.take() {
            return self.resume(draft, pending, message, audit).await;
        }

        if signals::is_rollback_request(message) {
            return self.rollback(draft, audit);
        }

        let classification = match self.classifier.classify(message, recent).await {
            Ok(classification) => classification,
            Err(error) => {
                warn!(
                    event_name = "router.turn.classification_failed",
                    session_id = %audit.session_id,
                    correlation_id = %audit.correlation_id,
                    error = %format!("{error:#}"),
                    "classifier failed; falling back to unknown intent"
                );
                Classification::fallback()
            }
        };

        if let GateDecision::Clarify { reason_code, threshold, user_message } =
            self.gate.evaluate(&classification)
        {
            info!(
                event_name = "router.turn.gated",
                session_id = %audit.session_id,
                correlation_id = %audit.correlation_id,
                intent_type = %classification.intent_type,
                confidence = classification.confidence,
                threshold,
                reason_code,
                "classification below confidence threshold"
            );
            self.audit.emit(
                AuditEvent::new(audit, "turn.gated", AuditCategory::Gate, AuditOutcome::Rejected)
                    .with_metadata("intent_type", classification.intent_type.as_str())
                    .with_metadata("confidence", classification.confidence.to_string())
                    .with_metadata("threshold", threshold.to_string())
                    .with_metadata("reason_code", reason_code),
            );
            return Ok(Action::ask(user_message));
        }

        let analysis = draft.analyzer.analyze(draft.session.focused_intent(), &classification, message);
        debug!(
            event_name = "router.turn.continuity",
            session_id = %audit.session_id,
            correlation_id = %audit.correlation_id,
            continuity = analysis.kind.as_str(),
            recommended_action = analysis.recommended_action.as_str(),
            reasoning = %analysis.reasoning,
            "continuity analyzed"
        );
        self.audit.emit(
            AuditEvent::new(audit, "continuity.decided", AuditCategory::Continuity, AuditOutcome::Success)
                .with_metadata("type", analysis.kind.as_str())
                .with_metadata("recommended_action", analysis.recommended_action.as_str())
                .with_metadata("priority", analysis.priority_level.as_str()),
        );

        if analysis.requires_clarification {
            let question =
                analysis.suggested_clarification.clone().unwrap_or_else(|| GATE_QUESTION.to_string());
            let options = analysis.context_switch_options.clone();
            self.audit.emit(
                AuditEvent::new(
                    audit,
                    "clarification.requested",
                    AuditCategory::Clarification,
                    AuditOutcome::Success,
                )
                .with_metadata("type", analysis.kind.as_str()),
            );
            draft.pending =
                Some(PendingDecision { analysis, classification, message: message.to_string() });
            return Ok(Action::Ask { question, slot: None, options });
        }

        self.apply(draft, classification, analysis, message, audit).await
    }

    async fn resume(
        &self,
        draft: &mut Conversation,
        pending: PendingDecision,
        reply: &str,
        audit: &AuditContext,
    ) -> Result<Action, ApplicationError> {
        let action = match draft.analyzer.resolve_clarification(&pending, reply) {
            ClarificationOutcome::Resolved(action) => action,
            ClarificationOutcome::Reask(question) => {
                self.audit.emit(AuditEvent::new(
                    audit,
                    "clarification.reasked",
                    AuditCategory::Clarification,
                    AuditOutcome::Rejected,
                ));
                let options = pending.analysis.context_switch_options.clone();
                draft.pending = Some(pending);
                return Ok(Action::Ask { question, slot: None, options });
            }
        };

        info!(
            event_name = "router.turn.clarification_resolved",
            session_id = %audit.session_id,
            correlation_id = %audit.correlation_id,
            recommended_action = action.as_str(),
            "pending clarification resolved"
        );
        self.audit.emit(
            AuditEvent::new(
                audit,
                "clarification.resolved",
                AuditCategory::Clarification,
                AuditOutcome::Success,
            )
            .with_metadata("recommended_action", action.as_str()),
        );

        let PendingDecision { analysis, mut classification, message } = pending;
        let staying = action == RecommendedAction::Continue && analysis.kind != ContinuityType::Continuation;
        if staying {
            // The user kept the current request; the competing one is dropped.
            if let Some(focused) = draft.session.focused_intent() {
                classification.intent_type = focused.intent_type().clone();
            }
            classification.entities.clear();
        }

        self.apply(draft, classification, analysis.resolved(action), &message, audit).await
    }

    async fn apply(
        &self,
        draft: &mut Conversation,
        classification: Classification,
        analysis: ContinuityAnalysis,
        message: &str,
        audit: &AuditContext,
    ) -> Result<Action, ApplicationError> {
        let description = format!("{}: {message}", analysis.recommended_action.as_str());
        let recent = draft.transcript.recent(self.context_window);
        draft.analyzer.snapshot(&draft.session, recent, description);

        let outcome =
            draft.session.apply_continuity(&classification, &analysis, draft.analyzer.resolver())?;
        let workstream = draft.session.focused_workstream().cloned().ok_or_else(|| {
            DomainError::InvariantViolation("continuity left no focused workstream".to_string())
        })?;
        let intent_type = workstream.intent_type.clone();

        let Some(agent) = self.agents.get(&intent_type) else {
            warn!(
                event_name = "router.turn.unknown_agent",
                session_id = %audit.session_id,
                workstream_id = %workstream.id,
                correlation_id = %audit.correlation_id,
                intent_type = %intent_type,
                "no agent registered for intent"
            );
            self.audit.emit(
                AuditEvent::new(audit, "agent.missing", AuditCategory::Agent, AuditOutcome::Rejected)
                    .with_workstream(Some(workstream.id.clone()))
                    .with_metadata("intent_type", intent_type.as_str()),
            );
            return Ok(Action::info(ApplicationError::UnknownAgent(intent_type.to_string()).user_message()));
        };

        self.audit.emit(
            AuditEvent::new(audit, "agent.dispatched", AuditCategory::Agent, AuditOutcome::Success)
                .with_workstream(Some(workstream.id.clone()))
                .with_metadata("intent_type", intent_type.as_str()),
        );
        let context = AgentContext {
            workstream: workstream.clone(),
            session: draft.session.clone(),
            classification,
            conflicts: outcome.conflicts,
        };
        let output = match agent.decide_next(&context).await {
            Ok(output) => output,
            Err(failure) => {
                let message = format!("{failure:#}");
                error!(
                    event_name = "router.turn.agent_failed",
                    session_id = %audit.session_id,
                    workstream_id = %workstream.id,
                    correlation_id = %audit.correlation_id,
                    intent_type = %intent_type,
                    error = %message,
                    "agent failed; conversation left unchanged"
                );
                self.audit.emit(
                    AuditEvent::new(audit, "agent.failed", AuditCategory::Agent, AuditOutcome::Failed)
                        .with_workstream(Some(workstream.id.clone()))
                        .with_metadata("error", message.clone()),
                );
                return Err(ApplicationError::Agent { intent_type: intent_type.to_string(), message });
            }
        };

        let updated = self.apply_output(workstream, output.clone(), audit)?;
        draft.session.commit_workstream(updated)?;
        Ok(output.action)
    }

    /// Applies agent output to a copy of the workstream; nothing is installed
    /// unless the whole state path is legal.
    fn apply_output(
        &self,
        mut workstream: Workstream,
        output: AgentOutput,
        audit: &AuditContext,
    ) -> Result<Workstream, ApplicationError> {
        workstream.merge_slots(&output.updated_slots);
        workstream.awaiting_slot = match &output.action {
            Action::Ask { slot, .. } => slot.clone(),
            _ => None,
        };
        if let Some(items) = output.presented_items {
            workstream.replace_candidates(items);
        }
        workstream.adjust_satisfaction(output.satisfaction_delta);

        let mut path = match output.state_path {
            Some(path) => path,
            None => implied_step(workstream.state, &output.action),
        };
        if output.mark_completed && path.last() != Some(&WorkstreamState::Completed) {
            path.push(WorkstreamState::Completed);
        }

        let from = workstream.state;
        if let Err(rejected) = workstream.follow_path(&path) {
            error!(
                event_name = "router.turn.invalid_state_path",
                session_id = %audit.session_id,
                workstream_id = %workstream.id,
                correlation_id = %audit.correlation_id,
                error = %rejected,
                "agent proposed an illegal state path"
            );
            self.audit.emit(
                AuditEvent::new(
                    audit,
                    "workstream.transition_rejected",
                    AuditCategory::Workstream,
                    AuditOutcome::Rejected,
                )
                .with_workstream(Some(workstream.id.clone()))
                .with_metadata("error", rejected.to_string()),
            );
            return Err(ApplicationError::Agent {
                intent_type: workstream.intent_type.to_string(),
                message: rejected.to_string(),
            });
        }

        if workstream.state != from {
            self.audit.emit(
                AuditEvent::new(
                    audit,
                    "workstream.transition_applied",
                    AuditCategory::Workstream,
                    AuditOutcome::Success,
                )
                .with_workstream(Some(workstream.id.clone()))
                .with_metadata("from", from.as_str())
                .with_metadata("to", workstream.state.as_str()),
            );
        }
        Ok(workstream)
    }

    fn rollback(&self, draft: &mut Conversation, audit: &AuditContext) -> Result<Action, ApplicationError> {
        let snapshot = match draft.analyzer.rollback(1) {
            Ok(snapshot) => snapshot,
            Err(rejected) => {
                info!(
                    event_name = "router.turn.rollback_rejected",
                    session_id = %audit.session_id,
                    correlation_id = %audit.correlation_id,
                    error = %rejected,
                    "nothing to roll back"
                );
                self.audit.emit(
                    AuditEvent::new(audit, "rollback.rejected", AuditCategory::Rollback, AuditOutcome::Rejected)
                        .with_metadata("error", rejected.to_string()),
                );
                return Err(rejected.into());
            }
        };

        self.audit.emit(
            AuditEvent::new(audit, "rollback.applied", AuditCategory::Rollback, AuditOutcome::Success)
                .with_metadata("description", snapshot.description.clone()),
        );
        draft.session = snapshot.session;
        draft.pending = None;

        let message = match draft.session.focused_workstream() {
            Some(workstream) => format!(
                "Undone. We're back to your {} request about {}.",
                workstream.intent_type,
                workstream.target_summary()
            ),
            None => "Undone. There is no open request right now.".to_string(),
        };
        Ok(Action::info(message))
    }
}

fn implied_step(current: WorkstreamState, action: &Action) -> Vec<WorkstreamState> {
    action
        .implied_state()
        .filter(|next| *next != current && can_transition(current, *next))
        .into_iter()
        .collect()
}

fn is_recoverable(error: &ApplicationError) -> bool {
    matches!(
        error,
        ApplicationError::Agent { .. }
            | ApplicationError::UnknownAgent(_)
            | ApplicationError::Domain(DomainError::InsufficientSnapshots { .. })
            | ApplicationError::Domain(DomainError::InvalidRollbackDepth)
    )
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use threadline_core::action::Action;
    use threadline_core::audit::InMemoryAuditSink;
    use threadline_core::config::RoutingConfig;
    use threadline_core::continuity::ContextSwitchOption;
    use threadline_core::intent::{Classification, IntentStatus, IntentType, Priority};
    use threadline_core::session::{Session, COMPARISON_SLOT};
    use threadline_core::transcript::Turn;
    use threadline_core::workstream::{WorkstreamId, WorkstreamState};

    use super::Planner;
    use crate::classifier::Classifier;
    use crate::conversation::{analyzer_policy, Conversation};
    use crate::gate::GATE_QUESTION;
    use crate::keywords::KeywordClassifier;
    use crate::registry::{Agent, AgentContext, AgentOutput, AgentRegistry};
    use crate::slot_filling::{default_registry, default_tools};

    struct ScriptedClassifier {
        replies: Mutex<VecDeque<Result<Classification>>>,
    }

    impl ScriptedClassifier {
        fn new(replies: Vec<Result<Classification>>) -> Self {
            Self { replies: Mutex::new(replies.into()) }
        }
    }

    #[async_trait]
    impl Classifier for ScriptedClassifier {
        async fn classify(&self, _message: &str, _recent: &[Turn]) -> Result<Classification> {
            let mut replies = self.replies.lock().map_err(|_| anyhow!("poisoned"))?;
            replies.pop_front().unwrap_or_else(|| Err(anyhow!("script exhausted")))
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl Agent for FailingAgent {
        fn intent_type(&self) -> IntentType {
            IntentType::new("discovery")
        }

        async fn decide_next(&self, _context: &AgentContext) -> Result<AgentOutput> {
            Err(anyhow!("catalog backend timed out"))
        }
    }

    struct IllegalPathAgent;

    #[async_trait]
    impl Agent for IllegalPathAgent {
        fn intent_type(&self) -> IntentType {
            IntentType::new("discovery")
        }

        async fn decide_next(&self, _context: &AgentContext) -> Result<AgentOutput> {
            Ok(AgentOutput::new(Action::info("skipping ahead"))
                .with_slot("budget", "under $10")
                .via(vec![WorkstreamState::Completed]))
        }
    }

    fn keyword_planner(audit: &InMemoryAuditSink) -> Planner {
        Planner::new(
            Arc::new(KeywordClassifier::new()),
            default_registry(&default_tools()),
            &RoutingConfig::default(),
        )
        .with_audit_sink(Arc::new(audit.clone()))
    }

    fn scripted_planner(replies: Vec<Result<Classification>>, agents: AgentRegistry) -> Planner {
        Planner::new(Arc::new(ScriptedClassifier::new(replies)), agents, &RoutingConfig::default())
    }

    fn conversation() -> Conversation {
        Conversation::new("session-1", analyzer_policy(&RoutingConfig::default()))
    }

    #[tokio::test]
    async fn low_confidence_is_gated_without_touching_the_session() {
        let audit = InMemoryAuditSink::default();
        let planner = keyword_planner(&audit);
        let mut conversation = conversation();

        let action = planner.handle_turn(&mut conversation, "hmm, maybe?").await.expect("turn");

        assert_eq!(action, Action::ask(GATE_QUESTION));
        assert_eq!(conversation.session(), &Session::default());
        assert!(conversation.pending().is_none());
        assert!(conversation.analyzer().snapshots().is_empty());
        assert_eq!(conversation.transcript().turns().len(), 2);
        assert_eq!(audit.event_types(), vec!["turn.gated".to_string()]);
    }

    #[tokio::test]
    async fn search_then_select_completes_the_workstream() {
        let audit = InMemoryAuditSink::default();
        let planner = keyword_planner(&audit);
        let mut conversation = conversation();

        let first = planner
            .handle_turn(&mut conversation, "I'm looking for laptops under $1500")
            .await
            .expect("first turn");
        assert!(matches!(&first, Action::Present { items, .. } if items.len() == 2));
        let focused = conversation.session().focused_workstream().expect("focus");
        assert_eq!(focused.state, WorkstreamState::Presenting);
        assert_eq!(focused.candidates.len(), 2);

        let second = planner.handle_turn(&mut conversation, "the second one").await.expect("second turn");
        assert!(matches!(&second, Action::Commit { result } if result["selected"]["sku"] == json!("LT-200")));

        let session = conversation.session();
        assert!(session.focus_id().is_none());
        assert_eq!(session.archived_ids(), vec![WorkstreamId::from_sequence(1)]);
        let archived = session.workstream(&WorkstreamId::from_sequence(1)).expect("archived");
        assert_eq!(archived.state, WorkstreamState::Completed);
        assert!(audit.event_types().contains(&"workstream.transition_applied".to_string()));
    }

    #[tokio::test]
    async fn intent_switch_asks_first_and_replaces_on_yes() {
        let audit = InMemoryAuditSink::default();
        let planner = keyword_planner(&audit);
        let mut conversation = conversation();
        planner.handle_turn(&mut conversation, "show me laptops").await.expect("discovery");
        let before = conversation.session().clone();

        let ask = planner.handle_turn(&mut conversation, "Where is my order 12345?").await.expect("switch");

        let Action::Ask { question, options, .. } = &ask else {
            panic!("expected ask, got {ask:?}");
        };
        assert!(question.contains("discovery") && question.contains("order"));
        assert!(options.is_empty());
        assert_eq!(conversation.session(), &before);
        assert!(conversation.pending().is_some());

        let resolved = planner.handle_turn(&mut conversation, "yes").await.expect("resolved");
        assert!(matches!(resolved, Action::Commit { .. }));

        let session = conversation.session();
        let discovery = session.intent(&WorkstreamId::from_sequence(1)).expect("discovery");
        assert_eq!(discovery.status, IntentStatus::Abandoned);
        let order = session.intent(&WorkstreamId::from_sequence(2)).expect("order");
        assert_eq!(order.status, IntentStatus::Completed);
        assert!(conversation.pending().is_none());
        assert!(audit.event_types().contains(&"clarification.resolved".to_string()));
    }

    #[tokio::test]
    async fn staying_after_a_switch_prompt_keeps_the_current_request() {
        let planner = keyword_planner(&InMemoryAuditSink::default());
        let mut conversation = conversation();
        planner.handle_turn(&mut conversation, "show me laptops").await.expect("discovery");
        planner.handle_turn(&mut conversation, "track order 12345").await.expect("switch");

        let action = planner.handle_turn(&mut conversation, "keep going with the current one").await.expect("stay");

        assert!(matches!(action, Action::Present { .. }));
        let session = conversation.session();
        assert_eq!(session.intents().len(), 1);
        assert_eq!(session.focus_id(), Some(&WorkstreamId::from_sequence(1)));
        assert!(session.focused_workstream().and_then(|ws| ws.slot("order_id")).is_none());
    }

    #[tokio::test]
    async fn never_mind_answers_an_open_switch_question() {
        let audit = InMemoryAuditSink::default();
        let planner = keyword_planner(&audit);
        let mut conversation = conversation();
        planner.handle_turn(&mut conversation, "show me laptops").await.expect("discovery");
        let ask = planner.handle_turn(&mut conversation, "track order 12345").await.expect("switch");
        assert!(matches!(ask, Action::Ask { .. }));

        let action = planner.handle_turn(&mut conversation, "never mind").await.expect("retract");

        assert!(matches!(action, Action::Present { .. }), "got {action:?}");
        let session = conversation.session();
        assert_eq!(session.intents().len(), 1);
        assert_eq!(session.focus_id(), Some(&WorkstreamId::from_sequence(1)));
        assert!(conversation.pending().is_none());
        assert!(!audit.event_types().contains(&"rollback.applied".to_string()));
        assert!(audit.event_types().contains(&"clarification.resolved".to_string()));
    }

    #[tokio::test]
    async fn answering_a_budget_question_overrides_the_old_budget() {
        let laptops = Classification::new("discovery", 0.9)
            .with_entity("category", "electronics")
            .with_entity("subcategory", "laptop")
            .with_entity("budget", "under $1000");
        let wider = || Classification::new("discovery", 0.9).with_entity("budget", "$2000");
        let planner = scripted_planner(
            vec![Ok(laptops), Ok(wider()), Ok(wider())],
            default_registry(&default_tools()),
        );
        let mut conversation = conversation();
        planner.handle_turn(&mut conversation, "laptops under $1000").await.expect("search");

        let asked = planner.handle_turn(&mut conversation, "$2000").await.expect("conflict");
        assert!(matches!(&asked, Action::Ask { slot: Some(slot), .. } if slot == "budget"));
        let focused = conversation.session().focused_workstream().expect("focus");
        assert_eq!(focused.slot("budget"), Some(&json!("under $1000")));
        assert_eq!(focused.awaiting_slot.as_deref(), Some("budget"));

        let answered = planner.handle_turn(&mut conversation, "$2000").await.expect("answer");
        assert!(matches!(answered, Action::Present { .. }), "got {answered:?}");
        let focused = conversation.session().focused_workstream().expect("focus");
        assert_eq!(focused.slot("budget"), Some(&json!("$2000")));
        assert!(focused.awaiting_slot.is_none());
    }

    #[tokio::test]
    async fn unrecognized_reply_reasks_and_stays_pending() {
        let planner = keyword_planner(&InMemoryAuditSink::default());
        let mut conversation = conversation();
        planner.handle_turn(&mut conversation, "show me laptops").await.expect("discovery");
        planner.handle_turn(&mut conversation, "show me cupboards").await.expect("context switch");

        let pending = conversation.pending().expect("pending").analysis.clone();
        assert_eq!(
            pending.context_switch_options,
            vec![
                ContextSwitchOption::Replace,
                ContextSwitchOption::Add,
                ContextSwitchOption::Compare,
                ContextSwitchOption::Separate
            ]
        );

        let reask = planner.handle_turn(&mut conversation, "purple").await.expect("reask");
        assert!(matches!(&reask, Action::Ask { options, .. } if options.len() == 4));
        assert!(conversation.pending().is_some());

        planner.handle_turn(&mut conversation, "compare them").await.expect("compare");
        let focused = conversation.session().focused_workstream().expect("focus");
        assert_eq!(focused.slot(COMPARISON_SLOT), Some(&json!(["laptop", "cupboard"])));
        assert!(conversation.pending().is_none());
    }

    #[tokio::test]
    async fn urgent_request_interrupts_and_returns_to_the_suspended_work() {
        let planner = keyword_planner(&InMemoryAuditSink::default());
        let mut conversation = conversation();
        planner.handle_turn(&mut conversation, "show me laptops").await.expect("discovery");

        let action = planner
            .handle_turn(&mut conversation, "URGENT: cancel my order 12345")
            .await
            .expect("urgent");

        assert!(matches!(action, Action::Commit { .. }));
        let session = conversation.session();
        let order = session.intent(&WorkstreamId::from_sequence(2)).expect("order");
        assert_eq!(order.priority, Priority::Urgent);
        assert_eq!(order.status, IntentStatus::Completed);
        assert_eq!(session.focus_id(), Some(&WorkstreamId::from_sequence(1)));
        assert_eq!(
            session.intent(&WorkstreamId::from_sequence(1)).map(|intent| intent.status),
            Some(IntentStatus::Active)
        );
    }

    #[tokio::test]
    async fn agent_failure_leaves_the_session_untouched() {
        let audit = InMemoryAuditSink::default();
        let planner = scripted_planner(
            vec![Ok(Classification::new("discovery", 0.9).with_entity("subcategory", "laptop"))],
            AgentRegistry::default().with(FailingAgent),
        )
        .with_audit_sink(Arc::new(audit.clone()));
        let mut conversation = conversation();

        let action = planner.handle_turn(&mut conversation, "show me laptops").await.expect("turn");

        assert!(matches!(&action, Action::Info { message } if message.contains("Please try again")));
        assert_eq!(conversation.session(), &Session::default());
        assert!(conversation.analyzer().snapshots().is_empty());
        assert_eq!(conversation.transcript().turns().len(), 2);
        assert!(audit.event_types().contains(&"agent.failed".to_string()));
    }

    #[tokio::test]
    async fn illegal_state_path_is_an_agent_fault() {
        let planner = scripted_planner(
            vec![Ok(Classification::new("discovery", 0.9))],
            AgentRegistry::default().with(IllegalPathAgent),
        );
        let mut conversation = conversation();

        let action = planner.handle_turn(&mut conversation, "show me things").await.expect("turn");

        assert!(matches!(action, Action::Info { .. }));
        assert!(conversation.session().intents().is_empty());
    }

    #[tokio::test]
    async fn missing_agent_reports_the_capability_gap() {
        let planner = scripted_planner(
            vec![Ok(Classification::new("warranty", 0.9))],
            AgentRegistry::default(),
        );
        let mut conversation = conversation();

        let action = planner.handle_turn(&mut conversation, "is this under warranty").await.expect("turn");

        assert_eq!(action, Action::info("I can't help with warranty requests yet."));
        assert_eq!(conversation.session().intents().len(), 1);
    }

    #[tokio::test]
    async fn classifier_failure_falls_back_to_the_gate() {
        let planner = scripted_planner(vec![Err(anyhow!("model unavailable"))], AgentRegistry::default());
        let mut conversation = conversation();

        let action = planner.handle_turn(&mut conversation, "hello?").await.expect("turn");

        assert_eq!(action, Action::ask(GATE_QUESTION));
        assert!(conversation.session().intents().is_empty());
    }

    #[tokio::test]
    async fn undo_restores_the_previous_session() {
        let audit = InMemoryAuditSink::default();
        let planner = keyword_planner(&audit);
        let mut conversation = conversation();
        planner.handle_turn(&mut conversation, "show me laptops").await.expect("discovery");
        let before_order = conversation.session().clone();
        planner.handle_turn(&mut conversation, "URGENT: cancel my order 12345").await.expect("urgent");

        let undone = planner.handle_turn(&mut conversation, "undo").await.expect("undo");
        assert!(matches!(&undone, Action::Info { message } if message.starts_with("Undone")));
        assert_eq!(conversation.session(), &before_order);

        planner.handle_turn(&mut conversation, "go back").await.expect("second undo");
        assert_eq!(conversation.session(), &Session::default());

        let exhausted = planner.handle_turn(&mut conversation, "undo").await.expect("third undo");
        assert_eq!(exhausted, Action::info("There is nothing further back to undo."));
        assert!(audit.event_types().contains(&"rollback.rejected".to_string()));
    }
}
