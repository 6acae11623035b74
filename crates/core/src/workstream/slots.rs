//! Slot accumulation primitives shared by workstreams and the entity resolver.

use std::collections::BTreeMap;

use serde_json::Value;

pub type SlotMap = BTreeMap<String, Value>;

/// Nested key merged key-wise instead of replaced wholesale.
pub const SPECIFICATIONS: &str = "specifications";

const PRODUCT_TARGET_KEYS: [&str; 4] = ["product", "product_id", "subcategory", "category"];
const ORDER_TARGET_KEYS: [&str; 1] = ["order_id"];

pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

pub fn union_values(existing: &[Value], incoming: &[Value]) -> Vec<Value> {
    let mut merged = existing.to_vec();
    for item in incoming {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}

pub fn merge_specifications(existing: &Value, incoming: &Value) -> Value {
    match (existing, incoming) {
        (Value::Object(current), Value::Object(update)) => {
            let mut merged = current.clone();
            for (key, value) in update {
                if is_empty_value(value) {
                    continue;
                }
                let next = match (merged.get(key), value) {
                    (Some(Value::Array(before)), Value::Array(after)) => {
                        Value::Array(union_values(before, after))
                    }
                    _ => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (Value::Array(current), Value::Array(update)) => Value::Array(union_values(current, update)),
        _ => incoming.clone(),
    }
}

/// Combined value for `key` after folding `incoming` into `existing`.
pub fn merged_value(key: &str, existing: Option<&Value>, incoming: &Value) -> Value {
    match existing {
        None => incoming.clone(),
        Some(current) if key == SPECIFICATIONS => merge_specifications(current, incoming),
        Some(Value::Array(current)) => match incoming {
            Value::Array(update) => Value::Array(union_values(current, update)),
            _ => incoming.clone(),
        },
        Some(_) => incoming.clone(),
    }
}

pub fn merge_into(target: &mut SlotMap, incoming: &SlotMap) {
    for (key, value) in incoming {
        if is_empty_value(value) {
            continue;
        }
        let next = merged_value(key, target.get(key), value);
        target.insert(key.clone(), next);
    }
}

pub fn has_all<S: AsRef<str>>(slots: &SlotMap, keys: &[S]) -> bool {
    keys.iter().all(|key| slots.get(key.as_ref()).is_some_and(|value| !is_empty_value(value)))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    Product,
    Order,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    pub kind: TargetKind,
    pub key: &'static str,
    pub value: Value,
}

impl Target {
    pub fn describe(&self) -> String {
        let text = value_text(&self.value);
        match self.kind {
            TargetKind::Order => format!("order {text}"),
            TargetKind::Product => text,
        }
    }
}

/// The most specific subject the entities point at, if any.
pub fn target_of(entities: &SlotMap) -> Option<Target> {
    let product = PRODUCT_TARGET_KEYS.iter().map(|key| (TargetKind::Product, *key));
    let order = ORDER_TARGET_KEYS.iter().map(|key| (TargetKind::Order, *key));

    product.chain(order).find_map(|(kind, key)| {
        entities
            .get(key)
            .filter(|value| !is_empty_value(value))
            .map(|value| Target { kind, key, value: value.clone() })
    })
}

pub fn describe_target(entities: &SlotMap) -> String {
    target_of(entities).map(|target| target.describe()).unwrap_or_else(|| "your request".to_string())
}

/// True when both maps name the same target key with different values.
pub fn targets_conflict(existing: &SlotMap, incoming: &SlotMap) -> bool {
    PRODUCT_TARGET_KEYS.iter().chain(ORDER_TARGET_KEYS.iter()).any(|key| {
        match (existing.get(*key), incoming.get(*key)) {
            (Some(before), Some(after)) if !is_empty_value(before) && !is_empty_value(after) => {
                normalized_text(before) != normalized_text(after)
            }
            _ => false,
        }
    })
}

pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn normalized_text(value: &Value) -> String {
    value_text(value).trim().to_ascii_lowercase()
}
