use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Standardised payload flowing between nodes.
///
/// `payload` is the predecessor's `data` (or the caller-provided seed for
/// start nodes), `metadata` carries engine-attached context, and `source` is
/// the id of the node that scheduled this invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInput {
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl NodeInput {
    /// Input handed to a start node.
    pub fn seed(payload: Value) -> Self {
        Self {
            payload,
            metadata: Map::new(),
            source: None,
        }
    }

    /// Derive the input for a successor scheduled by `source` from its output.
    ///
    /// The predecessor's metadata is carried forward with a `from` marker so
    /// downstream nodes can tell which branch scheduled them.
    pub fn from_output(output: &NodeOutput, source: &str) -> Self {
        let mut metadata = output.metadata.clone();
        metadata.insert("from".to_string(), Value::String(source.to_string()));
        Self {
            payload: output.data.clone(),
            metadata,
            source: Some(source.to_string()),
        }
    }
}

impl Default for NodeInput {
    fn default() -> Self {
        Self::seed(Value::Null)
    }
}

/// Result produced by a node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_status() -> String {
    "success".to_string()
}

impl NodeOutput {
    pub fn success(data: Value) -> Self {
        Self {
            status: default_status(),
            data,
            metadata: Map::new(),
        }
    }

    pub fn with_status(status: impl Into<String>, data: Value) -> Self {
        Self {
            status: status.into(),
            data,
            metadata: Map::new(),
        }
    }

    /// Synthetic output for a failed invocation.
    pub fn error(message: impl Into<String>) -> Self {
        let mut metadata = Map::new();
        metadata.insert("error".to_string(), Value::String(message.into()));
        Self {
            status: "error".to_string(),
            data: Value::Null,
            metadata,
        }
    }

    /// Synthetic output for a timed-out invocation.
    pub fn timeout(seconds: f64) -> Self {
        let mut metadata = Map::new();
        metadata.insert(
            "error".to_string(),
            Value::String(format!("timeout after {seconds}s")),
        );
        Self {
            status: "timeout".to_string(),
            data: Value::Null,
            metadata,
        }
    }

    pub fn insert_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Normalise a loose return value into a `NodeOutput`.
    ///
    /// An object carrying at least one of `status`/`data`/`metadata` is read
    /// as a partial output with missing fields defaulted; extra keys are
    /// folded into the metadata. Any other value becomes the `data` of a
    /// `success` output. Normalising an already-normal value is a no-op.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map)
                if map.contains_key("status")
                    || map.contains_key("data")
                    || map.contains_key("metadata") =>
            {
                let mut status = default_status();
                let mut data = Value::Null;
                let mut metadata = Map::new();
                let mut extra = Map::new();
                for (key, val) in map {
                    match key.as_str() {
                        "status" => {
                            if let Value::String(s) = val {
                                status = s;
                            } else {
                                status = val.to_string();
                            }
                        }
                        "data" => data = val,
                        "metadata" => {
                            if let Value::Object(meta) = val {
                                metadata = meta;
                            }
                        }
                        _ => {
                            extra.insert(key, val);
                        }
                    }
                }
                for (key, val) in extra {
                    metadata.entry(key).or_insert(val);
                }
                Self {
                    status,
                    data,
                    metadata,
                }
            }
            other => Self::success(other),
        }
    }

    /// Re-encode as the loose object form accepted by `from_value`.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Default for NodeOutput {
    fn default() -> Self {
        Self::success(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_value_becomes_success_data() {
        let out = NodeOutput::from_value(json!([1, 2, 3]));
        assert_eq!(out.status, "success");
        assert_eq!(out.data, json!([1, 2, 3]));
        assert!(out.metadata.is_empty());
    }

    #[test]
    fn partial_object_fills_missing_fields() {
        let out = NodeOutput::from_value(json!({"status": "retry"}));
        assert_eq!(out.status, "retry");
        assert_eq!(out.data, Value::Null);

        let out = NodeOutput::from_value(json!({"data": {"answer": 42}}));
        assert_eq!(out.status, "success");
        assert_eq!(out.data, json!({"answer": 42}));
    }

    #[test]
    fn extra_keys_fold_into_metadata() {
        let out = NodeOutput::from_value(json!({
            "status": "success",
            "data": 1,
            "metadata": {"kept": true},
            "note": "extra"
        }));
        assert_eq!(out.metadata.get("kept"), Some(&json!(true)));
        assert_eq!(out.metadata.get("note"), Some(&json!("extra")));
    }

    #[test]
    fn object_without_envelope_keys_is_plain_data() {
        let out = NodeOutput::from_value(json!({"answer": 42}));
        assert_eq!(out.status, "success");
        assert_eq!(out.data, json!({"answer": 42}));
    }

    #[test]
    fn normalisation_is_idempotent() {
        for value in [
            json!("hello"),
            json!({"status": "odd", "data": 7}),
            json!({"x": 1}),
            Value::Null,
        ] {
            let once = NodeOutput::from_value(value);
            let twice = NodeOutput::from_value(once.to_value());
            assert_eq!(once, twice, "normalising twice must equal normalising once");
        }
    }

    #[test]
    fn successor_input_carries_metadata_and_source() {
        let mut out = NodeOutput::success(json!({"n": 1}));
        out.insert_metadata("branch", json!("left"));
        let input = NodeInput::from_output(&out, "start");
        assert_eq!(input.payload, json!({"n": 1}));
        assert_eq!(input.source.as_deref(), Some("start"));
        assert_eq!(input.metadata.get("from"), Some(&json!("start")));
        assert_eq!(input.metadata.get("branch"), Some(&json!("left")));
    }

    #[test]
    fn input_serde_round_trip() {
        let input = NodeInput::from_output(&NodeOutput::success(json!(5)), "a");
        let text = serde_json::to_string(&input).unwrap();
        let back: NodeInput = serde_json::from_str(&text).unwrap();
        assert_eq!(input, back);
    }
}
