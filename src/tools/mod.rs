//! Tool registry for the interrogator loop.
//!
//! Tools are typed callables with schema-described arguments. The registry
//! produces the machine descriptor list for providers with native function
//! calling, and the teaching system prompt that instructs every other model
//! to emit the JSON tool-call envelope. It is read-only after startup.

pub mod browse;
pub mod search_web;

pub use browse::BrowseTool;
pub use search_web::SearchWebTool;

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A tool the model can invoke.
///
/// Typed arguments and outputs with automatic schema generation; the
/// registry stores tools through [`ErasedTool`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool
    const NAME: &'static str;

    type Args: DeserializeOwned + JsonSchema + Send;
    type Output: Serialize + Send;
    type Error: std::error::Error + Send + Sync + 'static;

    fn description(&self) -> &str;

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error>;

    fn descriptor(&self) -> ToolDescriptor {
        let schema = schema_for!(Self::Args);
        ToolDescriptor {
            name: Self::NAME.to_string(),
            description: self.description().to_string(),
            parameters: serde_json::to_value(schema.schema).unwrap_or_default(),
        }
    }
}

/// Machine-readable tool descriptor
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's arguments
    pub parameters: Value,
}

impl ToolDescriptor {
    /// Wire shape for the native function-calling channel
    pub fn to_openai_format(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters
            }
        })
    }
}

/// Error type for erased tool calls
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),

    #[error("failed to parse arguments: {0}")]
    ArgumentParse(String),

    #[error("tool execution failed: {0}")]
    Execution(String),

    #[error("failed to serialize output: {0}")]
    OutputSerialize(String),
}

/// Wraps an [`anyhow::Error`] so it satisfies [`Tool::Error`]'s
/// `std::error::Error` bound (anyhow's own type deliberately does not
/// implement it).
#[derive(Debug)]
pub struct AnyhowError(pub anyhow::Error);

impl std::fmt::Display for AnyhowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for AnyhowError {}

impl From<anyhow::Error> for AnyhowError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

/// Type-erased tool for storing heterogeneous tools in the registry
#[async_trait]
pub trait ErasedTool: Send + Sync {
    fn name(&self) -> &str;
    fn descriptor(&self) -> ToolDescriptor;
    /// Execute with JSON arguments, returning the text fed back to the model
    async fn call_erased(&self, arguments: &Value) -> Result<String, ToolError>;
}

#[async_trait]
impl<T: Tool> ErasedTool for T {
    fn name(&self) -> &str {
        T::NAME
    }

    fn descriptor(&self) -> ToolDescriptor {
        Tool::descriptor(self)
    }

    async fn call_erased(&self, arguments: &Value) -> Result<String, ToolError> {
        let args: T::Args = serde_json::from_value(arguments.clone())
            .map_err(|e| ToolError::ArgumentParse(e.to_string()))?;

        let output = self
            .call(args)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        // String outputs go to the model raw; structured outputs as JSON
        match serde_json::to_value(&output)
            .map_err(|e| ToolError::OutputSerialize(e.to_string()))?
        {
            Value::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }
}

/// Named tool collection shared by every request
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ErasedTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn ErasedTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ErasedTool>> {
        self.tools.get(name)
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor()).collect()
    }

    /// Descriptors in the native function-calling wire shape
    pub fn openai_tools(&self) -> Vec<Value> {
        self.descriptors()
            .iter()
            .map(ToolDescriptor::to_openai_format)
            .collect()
    }

    /// Dispatch one call. Execution failures are returned as `Err` here;
    /// the interrogator stringifies them into tool output.
    pub async fn dispatch(&self, name: &str, arguments: &Value) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        tool.call_erased(arguments).await
    }

    /// The system prompt that teaches the JSON envelope protocol.
    ///
    /// Byte-identical across requests except for the embedded descriptor
    /// JSON and the optional enforcement clause for a pinned tool.
    pub fn teaching_prompt(&self, pinned_tool: Option<&str>) -> String {
        let descriptors = serde_json::to_string_pretty(&self.descriptors())
            .unwrap_or_else(|_| "[]".to_string());

        let mut prompt = format!(
            "You have access to the following tools:\n\n\
             {descriptors}\n\n\
             When you decide to use one or more tools, respond with ONLY a JSON \
             object of exactly this shape, and nothing else before or after it:\n\n\
             {{\"intention\": \"USE_TOOLS\", \"thoughts\": \"<why you need these tools>\", \
             \"tools\": [{{\"name\": \"<tool name>\", \"arguments\": {{<arguments object>}}, \
             \"id\": \"<short unique id>\"}}]}}\n\n\
             The results of every call will be provided to you in a follow-up \
             message. If you do not need any tool, answer the user directly and \
             do not emit the JSON object."
        );

        if let Some(name) = pinned_tool {
            prompt.push_str(&format!(
                "\n\nYou MUST invoke tool {name} before answering."
            ));
        }

        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct EchoArgs {
        message: String,
    }

    #[derive(Serialize)]
    struct EchoOutput {
        echoed: String,
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        const NAME: &'static str = "echo";
        type Args = EchoArgs;
        type Output = EchoOutput;
        type Error = std::convert::Infallible;

        fn description(&self) -> &str {
            "Echo back the input message"
        }

        async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
            Ok(EchoOutput {
                echoed: args.message,
            })
        }
    }

    struct TextTool;

    #[async_trait]
    impl Tool for TextTool {
        const NAME: &'static str = "text";
        type Args = EchoArgs;
        type Output = String;
        type Error = std::convert::Infallible;

        fn description(&self) -> &str {
            "Return plain text"
        }

        async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
            Ok(format!("saw: {}", args.message))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(TextTool));
        registry
    }

    #[test]
    fn descriptor_shape() {
        let descriptor = Tool::descriptor(&EchoTool);
        assert_eq!(descriptor.name, "echo");
        assert!(descriptor.parameters.is_object());

        let wire = descriptor.to_openai_format();
        assert_eq!(wire["type"], "function");
        assert_eq!(wire["function"]["name"], "echo");
    }

    #[tokio::test]
    async fn dispatch_structured_output_is_json() {
        let out = registry()
            .dispatch("echo", &serde_json::json!({"message": "hi"}))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["echoed"], "hi");
    }

    #[tokio::test]
    async fn dispatch_string_output_is_raw() {
        let out = registry()
            .dispatch("text", &serde_json::json!({"message": "hi"}))
            .await
            .unwrap();
        assert_eq!(out, "saw: hi");
    }

    #[tokio::test]
    async fn dispatch_unknown_tool() {
        let err = registry()
            .dispatch("nope", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Unknown(_)));
    }

    #[test]
    fn teaching_prompt_is_stable() {
        let a = registry().teaching_prompt(None);
        let b = registry().teaching_prompt(None);
        assert_eq!(a, b);
        assert!(a.contains("\"intention\": \"USE_TOOLS\""));
    }

    #[test]
    fn teaching_prompt_enforcement_clause() {
        let prompt = registry().teaching_prompt(Some("echo"));
        assert!(prompt.contains("You MUST invoke tool echo"));
    }
}
