//! Function invocation request/response shape.

use crate::event::CloudEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A function invocation as submitted to the function runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionRun {
    /// Whether the caller waits for the result.
    #[serde(default)]
    pub blocking: bool,

    pub function_name: String,

    /// Processed event payload handed to the function as input.
    #[serde(default)]
    pub input: Value,

    /// Event attributes (payload cleared) for traceability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<CloudEvent>,

    /// Secret names injected into the invocation context.
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Function output, populated by the runner.
    #[serde(default)]
    pub output: Value,
}

impl FunctionRun {
    /// Non-blocking run of `function_name` with the given input.
    pub fn non_blocking(function_name: impl Into<String>, input: Value) -> Self {
        Self {
            blocking: false,
            function_name: function_name.into(),
            input,
            event: None,
            secrets: Vec::new(),
            output: Value::Null,
        }
    }
}
