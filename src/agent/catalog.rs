//! Assembles the tool catalog offered to the model for a turn: the six
//! reserved checkpoint-management tools plus whatever the host registered
//! on the agent's [`ToolTrackRegistry`].

use serde_json::json;

use crate::model::ToolCatalogEntry;
use crate::tools::ToolTrackRegistry;

pub fn build_tool_catalog(track: &ToolTrackRegistry) -> crate::agent::Result<Vec<ToolCatalogEntry>> {
    let mut catalog: Vec<ToolCatalogEntry> = reserved_tool_catalog();
    for spec in track.list()? {
        catalog.push(ToolCatalogEntry {
            name: spec.name,
            description: spec.description,
            parameters_schema: json!({ "type": "object" }),
        });
    }
    Ok(catalog)
}

/// Catalog entries for the reserved tool surface, grounded on
/// `original_source/core/rollback_protocol.py`'s tool descriptions exposed
/// to the model.
fn reserved_tool_catalog() -> Vec<ToolCatalogEntry> {
    vec![
        ToolCatalogEntry {
            name: "create_checkpoint".to_string(),
            description: "Create a manual checkpoint of the current conversation and tool state."
                .to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": { "name": { "type": "string" } },
            }),
        },
        ToolCatalogEntry {
            name: "list_checkpoints".to_string(),
            description: "List checkpoints available in the current session.".to_string(),
            parameters_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolCatalogEntry {
            name: "rollback_to_checkpoint".to_string(),
            description: "Roll the session back to a checkpoint by id or name, branching a new timeline.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": { "id_or_name": { "type": "string" } },
                "required": ["id_or_name"],
            }),
        },
        ToolCatalogEntry {
            name: "delete_checkpoint".to_string(),
            description: "Delete a checkpoint by id, within the current inner session.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": { "id": { "type": "integer" } },
                "required": ["id"],
            }),
        },
        ToolCatalogEntry {
            name: "get_checkpoint_info".to_string(),
            description: "Get formatted detail about a single checkpoint by id.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": { "id": { "type": "integer" } },
                "required": ["id"],
            }),
        },
        ToolCatalogEntry {
            name: "cleanup_auto_checkpoints".to_string(),
            description: "Delete automatic checkpoints, keeping the N most recent (default 5).".to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": { "keep_latest": { "type": "integer" } },
            }),
        },
    ]
}
