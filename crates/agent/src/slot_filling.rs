//! Goal-driven agent: ask for what is missing, run the goal's tool, then commit.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use threadline_core::action::Action;
use threadline_core::intent::IntentType;
use threadline_core::workstream::slots::value_text;
use threadline_core::workstream::{route, Workstream, WorkstreamState};

use crate::registry::{Agent, AgentContext, AgentOutput, AgentRegistry};
use crate::tools::{CatalogSearchTool, OrderStatusTool, ToolRegistry};

pub const SELECTION_ENTITY: &str = "selection";
const PRESENT_AFFORDANCES: [&str; 3] = ["compare", "select", "refine"];

#[derive(Clone, Debug, PartialEq)]
pub struct Goal {
    pub intent_type: IntentType,
    pub required_slots: Vec<String>,
    pub prompts: BTreeMap<String, String>,
    pub tool: Option<String>,
    pub present_results: bool,
    pub reply: Option<String>,
}

impl Goal {
    pub fn new(intent_type: impl Into<IntentType>) -> Self {
        Self {
            intent_type: intent_type.into(),
            required_slots: Vec::new(),
            prompts: BTreeMap::new(),
            tool: None,
            present_results: false,
            reply: None,
        }
    }

    pub fn require(mut self, slot: impl Into<String>, prompt: impl Into<String>) -> Self {
        let slot = slot.into();
        self.prompts.insert(slot.clone(), prompt.into());
        self.required_slots.push(slot);
        self
    }

    pub fn using_tool(mut self, name: impl Into<String>) -> Self {
        self.tool = Some(name.into());
        self
    }

    pub fn presenting(mut self) -> Self {
        self.present_results = true;
        self
    }

    pub fn replying(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    fn prompt_for(&self, slot: &str) -> String {
        self.prompts
            .get(slot)
            .cloned()
            .unwrap_or_else(|| format!("Could you tell me the {}?", slot.replace('_', " ")))
    }
}

pub fn default_goals() -> Vec<Goal> {
    vec![
        Goal::new("discovery")
            .require("category", "Which kind of product are you shopping for?")
            .require("subcategory", "What type of product within that category?")
            .using_tool(CatalogSearchTool::NAME)
            .presenting(),
        Goal::new("order")
            .require("order_id", "What's your order number?")
            .using_tool(OrderStatusTool::NAME),
        Goal::new("return")
            .require("order_id", "Which order would you like to return? Please share the order number.")
            .require("reason", "What's the reason for the return?"),
        Goal::new("exchange")
            .require("order_id", "Which order would you like to exchange an item from?")
            .require("replacement", "What would you like to exchange it for?"),
        Goal::new("payment").require("order_id", "Which order is the payment question about?"),
        Goal::new("chitchat").replying("Happy to help! What are you shopping for today?"),
    ]
}

/// Registry with one slot-filling agent per default goal, sharing `tools`.
pub fn default_registry(tools: &ToolRegistry) -> AgentRegistry {
    default_goals().into_iter().fold(AgentRegistry::default(), |registry, goal| {
        registry.with(SlotFillingAgent::new(goal, tools.clone()))
    })
}

pub fn default_tools() -> ToolRegistry {
    let mut tools = ToolRegistry::default();
    tools.register(CatalogSearchTool::default());
    tools.register(OrderStatusTool::default());
    tools
}

pub struct SlotFillingAgent {
    goal: Goal,
    tools: ToolRegistry,
}

impl SlotFillingAgent {
    pub fn new(goal: Goal, tools: ToolRegistry) -> Self {
        Self { goal, tools }
    }

    pub fn goal(&self) -> &Goal {
        &self.goal
    }

    fn commit(&self, workstream: &Workstream, selected: Option<Value>) -> Result<AgentOutput> {
        let mut result = json!({
            "intent": self.goal.intent_type.as_str(),
            "workstream": workstream.id.as_str(),
            "slots": slot_params(workstream),
        });
        if let Some(item) = &selected {
            result["selected"] = item.clone();
        }
        let mut output = AgentOutput::new(Action::Commit { result });
        if let Some(item) = selected {
            output = output.with_slot("selected_item", item);
        }
        Ok(output
            .with_satisfaction(0.3)
            .completed()
            .via(path_to(workstream.state, WorkstreamState::Confirming)?))
    }

    async fn run_tool(&self, name: &str, workstream: &Workstream) -> Result<AgentOutput> {
        let result = self.tools.call(name, slot_params(workstream)).await?;
        if !self.goal.present_results {
            return self.commit_tool_result(workstream, result);
        }

        let items = match result.get("items") {
            Some(Value::Array(items)) => items.clone(),
            _ => vec![result],
        };
        if items.is_empty() {
            let question = format!(
                "I couldn't find anything matching {}. Could you adjust what you're looking for?",
                workstream.target_summary()
            );
            return Ok(AgentOutput::new(Action::ask(question))
                .presenting(Vec::new())
                .with_satisfaction(-0.1)
                .via(path_to(workstream.state, WorkstreamState::Collecting)?));
        }

        let affordances = PRESENT_AFFORDANCES.iter().map(|name| name.to_string()).collect();
        Ok(AgentOutput::new(Action::Present { items: items.clone(), affordances })
            .presenting(items)
            .with_satisfaction(0.1)
            .via(path_to(workstream.state, WorkstreamState::Presenting)?))
    }

    fn commit_tool_result(&self, workstream: &Workstream, result: Value) -> Result<AgentOutput> {
        Ok(AgentOutput::new(Action::Commit { result })
            .with_satisfaction(0.2)
            .completed()
            .via(path_to(workstream.state, WorkstreamState::Confirming)?))
    }
}

#[async_trait]
impl Agent for SlotFillingAgent {
    fn intent_type(&self) -> IntentType {
        self.goal.intent_type.clone()
    }

    async fn decide_next(&self, context: &AgentContext) -> Result<AgentOutput> {
        let workstream = &context.workstream;

        if let Some(conflict) = context.flagged_conflicts().next() {
            let question = format!(
                "Earlier you said {} for {}, and now {}. Which one should I use?",
                value_text(&conflict.existing),
                conflict.key.replace('_', " "),
                value_text(&conflict.incoming)
            );
            return Ok(AgentOutput::new(Action::ask_for_slot(question, conflict.key.clone()))
                .with_satisfaction(-0.05)
                .via(Vec::new()));
        }

        let selection = context
            .classification
            .entities
            .get(SELECTION_ENTITY)
            .and_then(Value::as_u64)
            .and_then(|position| usize::try_from(position).ok());
        if let Some(position) = selection.filter(|_| !workstream.candidates.is_empty()) {
            return match workstream.candidate(position) {
                Some(item) => self.commit(workstream, Some(item.clone())),
                None => Ok(AgentOutput::new(Action::ask(format!(
                    "Please pick a number between 1 and {}.",
                    workstream.candidates.len()
                )))
                .via(Vec::new())),
            };
        }

        if let Some(slot) = workstream.missing_slots(&self.goal.required_slots).first() {
            return Ok(AgentOutput::new(Action::ask_for_slot(self.goal.prompt_for(slot), *slot))
                .via(path_to(workstream.state, WorkstreamState::Collecting)?));
        }

        if let Some(reply) = &self.goal.reply {
            return Ok(AgentOutput::new(Action::info(reply.clone()))
                .completed()
                .via(path_to(workstream.state, WorkstreamState::Confirming)?));
        }

        match &self.goal.tool {
            Some(name) if self.tools.contains(name) => self.run_tool(name, workstream).await,
            Some(name) => Ok(AgentOutput::new(Action::ToolCall {
                name: name.clone(),
                params: slot_params(workstream),
            })
            .via(path_to(workstream.state, WorkstreamState::Processing)?)),
            None => self.commit(workstream, None),
        }
    }
}

fn slot_params(workstream: &Workstream) -> Value {
    Value::Object(workstream.slots.clone().into_iter().collect::<Map<String, Value>>())
}

fn path_to(current: WorkstreamState, target: WorkstreamState) -> Result<Vec<WorkstreamState>> {
    route(current, target).ok_or_else(|| anyhow!("no legal path from {current} to {target}"))
}
