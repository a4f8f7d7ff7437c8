//! External action and result envelopes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Action kinds the orchestrator dispatches. Anything else is refused with
/// an `Unknown action` envelope.
pub const SUPPORTED_ACTIONS: &[&str] = &[
    "run.module",
    "query.status",
    "execute.task",
    "load.module",
    "list.modules",
];

/// A structured command passed to the orchestrator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Action {
    pub action_type: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Action {
    pub fn new(action_type: &str, payload: Map<String, Value>, source: &str) -> Self {
        Self {
            action_type: action_type.to_owned(),
            payload,
            source: source.to_owned(),
            request_id: None,
        }
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: &str) -> Self {
        self.request_id = Some(request_id.to_owned());
        self
    }
}

/// Standard result envelope: `{ok, action_type, data | error, status?}`.
#[derive(Clone, Debug, Serialize)]
pub struct ResultEnvelope {
    pub ok: bool,
    pub action_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl ResultEnvelope {
    pub fn success(action_type: &str, data: Value) -> Self {
        Self {
            ok: true,
            action_type: action_type.to_owned(),
            data: Some(data),
            error: None,
            status: None,
            task_id: None,
        }
    }

    pub fn failure(action_type: &str, error: &str) -> Self {
        Self {
            ok: false,
            action_type: action_type.to_owned(),
            data: None,
            error: Some(error.to_owned()),
            status: None,
            task_id: None,
        }
    }

    /// Failure with a machine-readable status such as `capability_denied`
    /// or `not_loaded`.
    pub fn denied(action_type: &str, status: &str, error: &str) -> Self {
        Self {
            status: Some(status.to_owned()),
            ..Self::failure(action_type, error)
        }
    }

    /// `{ok:true, status:"pending", task_id}` for runs that went async.
    pub fn pending(action_type: &str, task_id: &str) -> Self {
        Self {
            ok: true,
            action_type: action_type.to_owned(),
            data: None,
            error: None,
            status: Some("pending".to_owned()),
            task_id: Some(task_id.to_owned()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_json_round_trip() {
        let raw = json!({
            "action_type": "run.module",
            "payload": {"module": "demo"},
            "source": "cli",
            "request_id": "req-1"
        });
        let action: Action = serde_json::from_value(raw).unwrap();
        assert_eq!(action.action_type, "run.module");
        assert_eq!(action.payload.get("module"), Some(&json!("demo")));
        assert_eq!(action.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn envelope_serialization_omits_empty_fields() {
        let envelope = ResultEnvelope::success("query.status", json!({"n": 1}));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({"ok": true, "action_type": "query.status", "data": {"n": 1}})
        );

        let denied = ResultEnvelope::denied("run.module", "capability_denied", "no module.run");
        let value = serde_json::to_value(&denied).unwrap();
        assert_eq!(value.get("status"), Some(&json!("capability_denied")));
        assert_eq!(value.get("ok"), Some(&json!(false)));

        let pending = ResultEnvelope::pending("run.module", "task-9");
        let value = serde_json::to_value(&pending).unwrap();
        assert_eq!(
            value,
            json!({"ok": true, "action_type": "run.module", "status": "pending", "task_id": "task-9"})
        );
    }
}
