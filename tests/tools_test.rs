//! Tool registry: descriptors, dispatch, and the teaching prompt.

use async_trait::async_trait;
use pagereader::{Tool, ToolRegistry};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize, JsonSchema)]
struct LookupArgs {
    /// Term to look up
    term: String,
}

#[derive(Serialize)]
struct LookupResult {
    term: String,
    found: bool,
}

struct LookupTool;

#[async_trait]
impl Tool for LookupTool {
    const NAME: &'static str = "lookup";
    type Args = LookupArgs;
    type Output = LookupResult;
    type Error = std::convert::Infallible;

    fn description(&self) -> &str {
        "Look up a term in the index"
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        Ok(LookupResult {
            term: args.term,
            found: true,
        })
    }
}

fn registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(LookupTool));
    registry
}

#[test]
fn descriptors_carry_argument_schema() {
    let descriptors = registry().descriptors();
    assert_eq!(descriptors.len(), 1);
    let descriptor = &descriptors[0];
    assert_eq!(descriptor.name, "lookup");
    let props = &descriptor.parameters["properties"];
    assert!(props.get("term").is_some(), "schema lists the term arg");
}

#[test]
fn openai_wire_format() {
    let tools = registry().openai_tools();
    assert_eq!(tools[0]["type"], "function");
    assert_eq!(tools[0]["function"]["name"], "lookup");
    assert!(tools[0]["function"]["parameters"].is_object());
}

#[test]
fn teaching_prompt_identical_across_instances() {
    // Two registries with the same tools produce byte-identical prompts
    let a = registry().teaching_prompt(None);
    let b = registry().teaching_prompt(None);
    assert_eq!(a, b);

    // The descriptor JSON is embedded
    assert!(a.contains("\"lookup\""));
    assert!(a.contains("Look up a term in the index"));
    // The envelope contract is spelled out
    assert!(a.contains("\"intention\": \"USE_TOOLS\""));
    assert!(a.contains("\"tools\""));
}

#[test]
fn teaching_prompt_pin_differs_only_by_clause() {
    let plain = registry().teaching_prompt(None);
    let pinned = registry().teaching_prompt(Some("lookup"));
    assert!(pinned.starts_with(&plain));
    assert!(pinned.ends_with("You MUST invoke tool lookup before answering."));
}

#[tokio::test]
async fn dispatch_round_trip() {
    let out = registry()
        .dispatch("lookup", &serde_json::json!({"term": "rust"}))
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(value["term"], "rust");
    assert_eq!(value["found"], true);
}

#[tokio::test]
async fn dispatch_bad_arguments_is_an_error() {
    let err = registry()
        .dispatch("lookup", &serde_json::json!({"wrong": 1}))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("parse"));
}
