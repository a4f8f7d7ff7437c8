//! Structured event data passed through the bus.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::clock;

fn default_category() -> String {
    "general".to_owned()
}

const fn default_priority() -> u8 {
    5
}

/// The single argument handed to every event handler.
///
/// `priority` runs from 1 (highest) to 10 (lowest) and defaults to 5;
/// `category` defaults to `"general"`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventContext {
    pub event_type: String,
    pub source: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub timestamp: f64,
}

impl EventContext {
    pub fn new(event_type: &str, source: &str, payload: Map<String, Value>) -> Self {
        Self {
            event_type: event_type.to_owned(),
            source: source.to_owned(),
            payload,
            category: default_category(),
            priority: default_priority(),
            timestamp: clock::now(),
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_owned();
        self
    }

    /// Clamped to the 1..=10 range.
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    /// Serialize to a JSON value (always succeeds for this shape).
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
