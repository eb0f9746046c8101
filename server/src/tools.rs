use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::error::{PersonaError, Result};
use crate::service::*;

#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: JsonValue,
}

/// Payload of a successful call. Text goes out verbatim, JSON pretty-printed.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Text(String),
    Json(JsonValue),
}

impl ToolOutput {
    pub fn into_text(self) -> String {
        match self {
            ToolOutput::Text(s) => s,
            ToolOutput::Json(v) => serde_json::to_string_pretty(&v).unwrap_or_else(|_| v.to_string()),
        }
    }

    pub fn into_json(self) -> JsonValue {
        match self {
            ToolOutput::Text(s) => json!({ "text": s }),
            ToolOutput::Json(v) => v,
        }
    }
}

fn schema(properties: JsonValue, required: &[&str]) -> JsonValue {
    json!({ "type": "object", "properties": properties, "required": required })
}

fn no_args() -> JsonValue {
    schema(json!({}), &[])
}

fn persona_id_only(what: &str) -> JsonValue {
    schema(json!({ "persona_id": { "type": "string", "description": what } }), &["persona_id"])
}

fn string_array() -> JsonValue {
    json!({ "type": "array", "items": { "type": "string" } })
}

pub fn list_tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor { name: "list_personas", description: "List all personas with active/default markers", input_schema: no_args() },
        ToolDescriptor { name: "get_active_persona", description: "Get the currently active persona", input_schema: no_args() },
        ToolDescriptor {
            name: "switch_persona",
            description: "Make a persona the active one",
            input_schema: schema(
                json!({
                    "persona_id": { "type": "string" },
                    "context": { "type": "string", "description": "What the persona will be used for; feeds usage stats" }
                }),
                &["persona_id"],
            ),
        },
        ToolDescriptor { name: "get_persona_details", description: "Get the full record of one persona", input_schema: persona_id_only("Persona to fetch") },
        ToolDescriptor {
            name: "create_custom_persona",
            description: "Create a persona from explicit fields",
            input_schema: schema(
                json!({
                    "id": { "type": "string" },
                    "name": { "type": "string" },
                    "description": { "type": "string" },
                    "system_prompt": { "type": "string" },
                    "traits": string_array(),
                    "communication_style": { "type": "string" },
                    "expertise": string_array()
                }),
                &["id", "name", "description", "system_prompt"],
            ),
        },
        ToolDescriptor { name: "delete_persona", description: "Delete a persona", input_schema: persona_id_only("Persona to delete") },
        ToolDescriptor { name: "get_persona_prompt", description: "Get the active persona's system prompt as text", input_schema: no_args() },
        ToolDescriptor {
            name: "generate_persona",
            description: "Generate and save a persona from a free-text description",
            input_schema: schema(json!({ "description": { "type": "string" }, "id": { "type": "string" } }), &["description"]),
        },
        ToolDescriptor {
            name: "update_persona",
            description: "Modify a persona with a natural-language instruction",
            input_schema: schema(
                json!({
                    "persona_id": { "type": "string" },
                    "modifications": { "type": "string", "description": "e.g. 'make it more formal and add Python expertise'" }
                }),
                &["persona_id", "modifications"],
            ),
        },
        ToolDescriptor { name: "set_default_persona", description: "Set the fallback persona", input_schema: persona_id_only("New default persona") },
        ToolDescriptor {
            name: "suggest_persona",
            description: "Rank personas by relevance to a task",
            input_schema: schema(json!({ "task_description": { "type": "string" } }), &["task_description"]),
        },
        ToolDescriptor {
            name: "auto_switch_persona",
            description: "Switch to the best-matching persona when confident enough",
            input_schema: schema(
                json!({
                    "context": { "type": "string" },
                    "user_preference": { "type": "string" },
                    "confidence_threshold": { "type": "number", "minimum": 0, "maximum": 1, "default": DEFAULT_CONFIDENCE_THRESHOLD }
                }),
                &["context"],
            ),
        },
        ToolDescriptor {
            name: "blend_personas",
            description: "Create a temporary blend of two or more personas and activate it",
            input_schema: schema(
                json!({
                    "persona_ids": string_array(),
                    "task": { "type": "string" },
                    "blend_mode": { "type": "string", "enum": ["merge", "sequential"], "default": "merge" }
                }),
                &["persona_ids", "task"],
            ),
        },
        ToolDescriptor {
            name: "get_persona_stats",
            description: "Usage statistics for one persona or all",
            input_schema: schema(json!({ "persona_id": { "type": "string" } }), &[]),
        },
        ToolDescriptor {
            name: "reset_stats",
            description: "Clear usage statistics for one persona or all",
            input_schema: schema(json!({ "persona_id": { "type": "string" } }), &[]),
        },
        ToolDescriptor {
            name: "get_smart_recommendations",
            description: "Recommend personas from usage history and content relevance",
            input_schema: schema(json!({ "context": { "type": "string" } }), &["context"]),
        },
        ToolDescriptor { name: "list_expired_personas", description: "List expired blends still inside the grace window", input_schema: no_args() },
        ToolDescriptor { name: "promote_expired_persona", description: "Turn an expired blend into a permanent persona", input_schema: persona_id_only("Expired blend id") },
        ToolDescriptor {
            name: "save_ai_persona",
            description: "Validate and save persona JSON written by an assistant",
            input_schema: schema(json!({ "persona_json": { "type": "string" } }), &["persona_json"]),
        },
        ToolDescriptor { name: "list_active_blends", description: "List blends that have not expired yet", input_schema: no_args() },
        ToolDescriptor {
            name: "list_prompt_templates",
            description: "List prompt templates, optionally by category",
            input_schema: schema(json!({ "category": { "type": "string" } }), &[]),
        },
        ToolDescriptor {
            name: "get_prompt_template",
            description: "Get one prompt template",
            input_schema: schema(json!({ "template_id": { "type": "string" } }), &["template_id"]),
        },
        ToolDescriptor {
            name: "create_prompt_template",
            description: "Create a prompt template with {{variable}} placeholders",
            input_schema: schema(
                json!({
                    "name": { "type": "string" },
                    "content": { "type": "string" },
                    "id": { "type": "string" },
                    "description": { "type": "string" },
                    "category": { "type": "string" },
                    "tags": string_array()
                }),
                &["name", "content"],
            ),
        },
        ToolDescriptor {
            name: "delete_prompt_template",
            description: "Delete a prompt template",
            input_schema: schema(json!({ "template_id": { "type": "string" } }), &["template_id"]),
        },
        ToolDescriptor {
            name: "search_prompt_templates",
            description: "Search templates by name, description, content, category or tag",
            input_schema: schema(json!({ "query": { "type": "string" } }), &["query"]),
        },
        ToolDescriptor {
            name: "apply_prompt_template",
            description: "Render a template with variable values",
            input_schema: schema(
                json!({
                    "template_id": { "type": "string" },
                    "variables": { "type": "object", "additionalProperties": { "type": "string" } }
                }),
                &["template_id"],
            ),
        },
    ]
}

fn parse<T: DeserializeOwned>(args: JsonValue) -> Result<T> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| PersonaError::invalid(format!("invalid arguments: {}", e)))
}

fn to_json<T: Serialize>(value: T) -> Result<ToolOutput> {
    serde_json::to_value(value)
        .map(ToolOutput::Json)
        .map_err(|e| PersonaError::internal("serialize", e.to_string()))
}

/// Routes one tool call to the facade. Unknown names are InvalidRequest.
pub fn call_tool(service: &mut PersonaService, name: &str, args: JsonValue) -> Result<ToolOutput> {
    match name {
        "list_personas" => service.list_personas().map(ToolOutput::Json),
        "get_active_persona" => to_json(service.get_active_persona()?),
        "switch_persona" => service.switch_persona(parse(args)?).map(ToolOutput::Json),
        "get_persona_details" => to_json(service.get_persona_details(parse(args)?)?),
        "create_custom_persona" => to_json(service.create_custom_persona(parse(args)?)?),
        "delete_persona" => service.delete_persona(parse(args)?).map(ToolOutput::Json),
        "get_persona_prompt" => service.get_persona_prompt().map(ToolOutput::Text),
        "generate_persona" => to_json(service.generate_persona(parse(args)?)?),
        "update_persona" => service.update_persona(parse(args)?).map(ToolOutput::Json),
        "set_default_persona" => service.set_default_persona(parse(args)?).map(ToolOutput::Json),
        "suggest_persona" => service.suggest_persona(parse(args)?).map(ToolOutput::Json),
        "auto_switch_persona" => service.auto_switch_persona(parse(args)?).map(ToolOutput::Json),
        "blend_personas" => service.blend_personas(parse(args)?).map(ToolOutput::Json),
        "get_persona_stats" => service.get_persona_stats(parse(args)?).map(ToolOutput::Json),
        "reset_stats" => service.reset_stats(parse(args)?).map(ToolOutput::Json),
        "get_smart_recommendations" => {
            let recs = service.get_smart_recommendations(parse(args)?)?;
            Ok(ToolOutput::Json(json!({ "recommendations": recs })))
        }
        "list_expired_personas" => service.list_expired_personas().map(ToolOutput::Json),
        "promote_expired_persona" => to_json(service.promote_expired_persona(parse(args)?)?),
        "save_ai_persona" => to_json(service.save_ai_persona(parse(args)?)?),
        "list_active_blends" => service.list_active_blends().map(ToolOutput::Json),
        "list_prompt_templates" => service.list_prompt_templates(parse(args)?).map(ToolOutput::Json),
        "get_prompt_template" => service.get_prompt_template(parse(args)?).map(ToolOutput::Json),
        "create_prompt_template" => service.create_prompt_template(parse(args)?).map(ToolOutput::Json),
        "delete_prompt_template" => service.delete_prompt_template(parse(args)?).map(ToolOutput::Json),
        "search_prompt_templates" => service.search_prompt_templates(parse(args)?).map(ToolOutput::Json),
        "apply_prompt_template" => service.apply_prompt_template(parse(args)?).map(ToolOutput::Text),
        other => Err(PersonaError::invalid(format!("unknown tool '{}'", other))),
    }
}
