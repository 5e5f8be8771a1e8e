//! Task specifications submitted to the pipeline.

use serde::{Deserialize, Serialize};

/// Summary used when a specification carries no task text.
pub const DEFAULT_SUMMARY: &str = "orchestrator task";

/// A caller-supplied description of work to run.
///
/// Unknown fields are kept in `extra` so they survive into the
/// `run:received` event untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpecification {
    /// Free-text description of the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,

    /// Source language of the task, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Ask for the WASM sandbox when possible
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefer_wasm: Option<bool>,

    /// The task needs a native environment (forces container)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_native: Option<bool>,

    /// Per-step time budget in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_seconds: Option<u64>,

    /// Any other caller fields, preserved verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TaskSpecification {
    /// Create a specification with only task text set
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: Some(task.into()),
            ..Default::default()
        }
    }

    /// Parse a specification from an arbitrary JSON value.
    ///
    /// `null` is treated as an empty specification.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
    }

    /// Task text, or the default summary when absent or blank
    pub fn summary(&self) -> &str {
        match self.task.as_deref() {
            Some(task) if !task.trim().is_empty() => task,
            _ => DEFAULT_SUMMARY,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_prefer_wasm(mut self, prefer_wasm: bool) -> Self {
        self.prefer_wasm = Some(prefer_wasm);
        self
    }

    pub fn with_requires_native(mut self, requires_native: bool) -> Self {
        self.requires_native = Some(requires_native);
        self
    }

    pub fn with_max_seconds(mut self, max_seconds: u64) -> Self {
        self.max_seconds = Some(max_seconds);
        self
    }
}

/// Execution backend chosen for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Runtime {
    /// WASM sandbox
    Wasm,

    /// Container runtime
    Container,
}

impl Runtime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wasm => "wasm",
            Self::Container => "container",
        }
    }
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_case_fields() {
        let spec: TaskSpecification = serde_json::from_str(
            r#"{"task":"build","preferWasm":true,"requiresNative":false,"maxSeconds":5,"details":"verify"}"#,
        )
        .unwrap();

        assert_eq!(spec.task.as_deref(), Some("build"));
        assert_eq!(spec.prefer_wasm, Some(true));
        assert_eq!(spec.requires_native, Some(false));
        assert_eq!(spec.max_seconds, Some(5));
        assert_eq!(spec.extra.get("details"), Some(&serde_json::json!("verify")));
    }

    #[test]
    fn test_null_is_empty_spec() {
        let spec = TaskSpecification::from_value(serde_json::Value::Null).unwrap();
        assert_eq!(spec, TaskSpecification::default());
        assert_eq!(spec.summary(), DEFAULT_SUMMARY);
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let result = TaskSpecification::from_value(serde_json::json!({ "preferWasm": "yes" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_runtime_names() {
        assert_eq!(Runtime::Wasm.to_string(), "wasm");
        assert_eq!(
            serde_json::to_value(Runtime::Container).unwrap(),
            serde_json::json!("container")
        );
    }
}
