use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use threadline_core::continuity::conflict::first_amount;
use threadline_core::workstream::slots::value_text;
use tracing::debug;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(&self, input: Value) -> Result<Value>;
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub async fn call(&self, name: &str, input: Value) -> Result<Value> {
        let tool = self.get(name).ok_or_else(|| anyhow!("tool `{name}` is not registered"))?;
        debug!(event_name = "agent.tool.call", tool = name, "calling tool");
        tool.execute(input).await
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Filters a fixed catalog by subcategory and an optional budget ceiling.
#[derive(Clone, Debug)]
pub struct CatalogSearchTool {
    items: Vec<Value>,
}

impl Default for CatalogSearchTool {
    fn default() -> Self {
        Self::new(vec![
            json!({"sku": "LT-100", "name": "Aero 14", "subcategory": "laptop", "price": 899.0}),
            json!({"sku": "LT-200", "name": "Forge 16", "subcategory": "laptop", "price": 1399.0}),
            json!({"sku": "LT-300", "name": "Titan 18", "subcategory": "laptop", "price": 2299.0}),
            json!({"sku": "PH-100", "name": "Pulse Mini", "subcategory": "phone", "price": 499.0}),
            json!({"sku": "CB-100", "name": "Oak Cupboard", "subcategory": "cupboard", "price": 349.0}),
            json!({"sku": "SF-100", "name": "Linen Sofa", "subcategory": "sofa", "price": 1199.0}),
            json!({"sku": "JK-100", "name": "Trail Jacket", "subcategory": "jacket", "price": 149.0}),
        ])
    }
}

impl CatalogSearchTool {
    pub const NAME: &'static str = "catalog.search";

    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl Tool for CatalogSearchTool {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let subcategory = input.get("subcategory").map(value_text);
        let ceiling = input.get("budget").map(value_text).as_deref().and_then(first_amount);

        let items = self
            .items
            .iter()
            .filter(|item| {
                subcategory.as_ref().map_or(true, |wanted| {
                    item.get("subcategory").map(value_text).as_deref() == Some(wanted.as_str())
                })
            })
            .filter(|item| {
                let price = item.get("price").and_then(Value::as_f64);
                match (ceiling, price) {
                    (Some(ceiling), Some(price)) => price <= ceiling,
                    _ => true,
                }
            })
            .cloned()
            .collect::<Vec<_>>();

        Ok(json!({ "items": items }))
    }
}

#[derive(Clone, Debug, Default)]
pub struct OrderStatusTool {
    statuses: HashMap<String, String>,
}

impl OrderStatusTool {
    pub const NAME: &'static str = "order.status";

    pub fn with_order(mut self, order_id: impl Into<String>, status: impl Into<String>) -> Self {
        self.statuses.insert(order_id.into(), status.into());
        self
    }
}

#[async_trait]
impl Tool for OrderStatusTool {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let order_id = input
            .get("order_id")
            .map(value_text)
            .ok_or_else(|| anyhow!("order.status requires an order_id"))?;
        let status = self.statuses.get(&order_id).map(String::as_str).unwrap_or("not_found");
        Ok(json!({ "order_id": order_id, "status": status }))
    }
}
