//! The director's tool surface and its translation into deltas.
//!
//! The director emits structured tool calls; each is translated into a
//! world-state delta, an action-outcome note for the writer, or nothing.
//! Unknown tool names are logged and ignored.

use crate::delta::DeltaPair;
use crate::error::EngineError;
use crate::world::{NewPlot, PlotId, PlotUpdate, WorldState};
use serde_json::{json, Value};
use weft_provider::{ToolCall, ToolDefinition};

/// All tools offered to the director.
pub fn director_tools() -> Vec<ToolDefinition> {
    vec![
        patch_state(),
        add_plot(),
        update_plot(),
        remove_plot(),
        determine_action_result(),
    ]
}

fn patch_state() -> ToolDefinition {
    ToolDefinition {
        name: "patch_state".to_string(),
        description: "Merge a partial state tree into the world state. Use for any change to \
            tracked facts: character stats, inventory, location, relationships, flags. \
            Set a key to null to remove it."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "partial_state": {
                    "type": "object",
                    "description": "Subtree to deep-merge into the current state"
                }
            },
            "required": ["partial_state"]
        }),
    }
}

fn add_plot() -> ToolDefinition {
    ToolDefinition {
        name: "add_plot".to_string(),
        description: "Open a new plot thread the story should keep track of.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "Short plot title" },
                "description": { "type": "string", "description": "What this plot is about" },
                "player_alignment": {
                    "type": "number",
                    "minimum": 0.0,
                    "maximum": 1.0,
                    "description": "How favorably the plot is going for the player"
                }
            },
            "required": ["title", "description"]
        }),
    }
}

fn update_plot() -> ToolDefinition {
    ToolDefinition {
        name: "update_plot".to_string(),
        description: "Update an existing plot thread.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "plot_id": { "type": "string", "description": "Id of the plot to update" },
                "updates": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "description": { "type": "string" },
                        "player_alignment": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
                    }
                }
            },
            "required": ["plot_id", "updates"]
        }),
    }
}

fn remove_plot() -> ToolDefinition {
    ToolDefinition {
        name: "remove_plot".to_string(),
        description: "Close and remove a resolved or abandoned plot thread.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "plot_id": { "type": "string", "description": "Id of the plot to remove" }
            },
            "required": ["plot_id"]
        }),
    }
}

fn determine_action_result() -> ToolDefinition {
    ToolDefinition {
        name: "determine_action_result".to_string(),
        description: "Decide whether the player's attempted action succeeds and note the \
            outcome for the narrator."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "action_description": { "type": "string" },
                "success": { "type": "boolean" },
                "outcome_note": { "type": "string" }
            },
            "required": ["action_description", "success"]
        }),
    }
}

/// What one tool call turned into.
#[derive(Debug)]
pub enum Translated {
    /// A captured world-state delta.
    Delta(DeltaPair),
    /// An action-outcome note for the writer (not a delta).
    Outcome(String),
    /// Nothing; the call was unknown or referenced missing state.
    Ignored,
}

/// Translate one director tool call against the staged world.
pub fn translate_tool_call(
    call: &ToolCall,
    world: &mut WorldState,
    current_turn: u64,
) -> Result<Translated, EngineError> {
    let args = &call.arguments;
    match call.name.as_str() {
        "patch_state" => {
            let Some(partial) = args.get("partial_state").filter(|v| v.is_object()) else {
                tracing::warn!("patch_state without a partial_state object; ignoring");
                return Ok(Translated::Ignored);
            };
            Ok(Translated::Delta(world.patch_state(partial)?))
        }
        "add_plot" => {
            let new = NewPlot {
                title: str_arg(args, "title"),
                description: str_arg(args, "description"),
                alignment: args
                    .get("player_alignment")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.5),
                created_at_turn: current_turn,
            };
            let (_, pair) = world.add_plot(new)?;
            Ok(Translated::Delta(pair))
        }
        "update_plot" => {
            let Some(id) = plot_id_arg(args) else {
                tracing::warn!("update_plot with unparsable plot_id; ignoring");
                return Ok(Translated::Ignored);
            };
            let updates = args.get("updates").cloned().unwrap_or(Value::Null);
            let update = PlotUpdate {
                title: updates.get("title").and_then(Value::as_str).map(String::from),
                description: updates
                    .get("description")
                    .and_then(Value::as_str)
                    .map(String::from),
                alignment: updates.get("player_alignment").and_then(Value::as_f64),
            };
            match world.update_plot(id, update)? {
                Some(pair) => Ok(Translated::Delta(pair)),
                None => {
                    tracing::warn!(plot = %id, "update_plot for unknown plot; ignoring");
                    Ok(Translated::Ignored)
                }
            }
        }
        "remove_plot" => {
            let Some(id) = plot_id_arg(args) else {
                tracing::warn!("remove_plot with unparsable plot_id; ignoring");
                return Ok(Translated::Ignored);
            };
            match world.remove_plot(id)? {
                Some(pair) => Ok(Translated::Delta(pair)),
                None => {
                    tracing::warn!(plot = %id, "remove_plot for unknown plot; ignoring");
                    Ok(Translated::Ignored)
                }
            }
        }
        "determine_action_result" => {
            let action = str_arg(args, "action_description");
            let success = args.get("success").and_then(Value::as_bool).unwrap_or(false);
            let note = str_arg(args, "outcome_note");
            let verdict = if success { "succeeds" } else { "fails" };
            let outcome = if note.is_empty() {
                format!("{action} {verdict}.")
            } else {
                format!("{action} {verdict}: {note}")
            };
            Ok(Translated::Outcome(outcome))
        }
        unknown => {
            tracing::warn!(tool = unknown, "ignoring unknown director tool call");
            Ok(Translated::Ignored)
        }
    }
}

fn str_arg(args: &Value, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn plot_id_arg(args: &Value) -> Option<PlotId> {
    args.get("plot_id")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_provider::ToolCall;

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            arguments,
        }
    }

    #[test]
    fn patch_state_translates_to_a_delta() {
        let mut world = WorldState::new();
        let translated = translate_tool_call(
            &call("patch_state", json!({"partial_state": {"player": {"hp": 10}}})),
            &mut world,
            1,
        )
        .unwrap();

        assert!(matches!(translated, Translated::Delta(_)));
        assert_eq!(world.state["player"]["hp"], 10);
    }

    #[test]
    fn plot_lifecycle_through_tool_calls() {
        let mut world = WorldState::new();
        translate_tool_call(
            &call(
                "add_plot",
                json!({"title": "Main Quest", "description": "Defeat the dragon", "player_alignment": 0.1}),
            ),
            &mut world,
            1,
        )
        .unwrap();
        assert_eq!(world.plots.len(), 1);
        let id = world.plots[0].id;

        translate_tool_call(
            &call(
                "update_plot",
                json!({"plot_id": id.to_string(), "updates": {"player_alignment": 0.9}}),
            ),
            &mut world,
            2,
        )
        .unwrap();
        assert_eq!(world.plots[0].alignment, 0.9);

        translate_tool_call(
            &call("remove_plot", json!({"plot_id": id.to_string()})),
            &mut world,
            3,
        )
        .unwrap();
        assert!(world.plots.is_empty());
    }

    #[test]
    fn determine_action_result_is_an_outcome_not_a_delta() {
        let mut world = WorldState::new();
        let before = world.clone();
        let translated = translate_tool_call(
            &call(
                "determine_action_result",
                json!({"action_description": "Pick the lock", "success": true, "outcome_note": "the tumblers click"}),
            ),
            &mut world,
            1,
        )
        .unwrap();

        let Translated::Outcome(outcome) = translated else {
            panic!("expected an outcome");
        };
        assert!(outcome.contains("succeeds"));
        assert_eq!(world, before);
    }

    #[test]
    fn unknown_tools_are_ignored() {
        let mut world = WorldState::new();
        let before = world.clone();
        let translated =
            translate_tool_call(&call("cast_fireball", json!({})), &mut world, 1).unwrap();
        assert!(matches!(translated, Translated::Ignored));
        assert_eq!(world, before);
    }
}
