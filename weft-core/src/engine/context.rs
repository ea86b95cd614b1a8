//! Context assembly for the director and writer calls.

use crate::cards::ScoredCard;
use crate::memory::Memory;
use crate::tree::{Actor, Turn};
use crate::world::WorldState;
use weft_provider::ChatMessage;

pub(crate) const DIRECTOR_SYSTEM_PROMPT: &str = "You are the director of an interactive story. \
Read the player's action, decide what actually happens, and record every change to the world \
through your tools. Use determine_action_result to settle risky actions. Do not narrate prose.";

pub(crate) const WRITER_SYSTEM_PROMPT: &str = "You are the writer of an interactive story. \
Continue the narrative in second person, present tense, with one or two paragraphs of prose. \
Honor the action outcomes and world facts you are given. Never speak for the player.";

pub(crate) const POST_WRITER_SYSTEM_PROMPT: &str = "You are the director of an interactive \
story reviewing the narrator's latest passage. Record any world changes it established \
through your tools. Do not narrate prose.";

/// Map path turns onto chat roles: the player speaks as the user, the
/// writer as the assistant.
pub(crate) fn turns_as_messages(turns: &[&Turn]) -> Vec<ChatMessage> {
    turns
        .iter()
        .map(|turn| match turn.actor {
            Actor::Player => ChatMessage::user(&turn.text),
            Actor::Writer => ChatMessage::assistant(&turn.text),
        })
        .collect()
}

/// The retrieval block shared by director and writer system prompts.
pub(crate) fn build_context_block(
    world: &WorldState,
    memories: &[Memory],
    cards: &[ScoredCard],
) -> String {
    let mut block = String::new();

    if let Ok(state) = serde_json::to_string_pretty(&world.state) {
        if state != "{}" {
            block.push_str("## World State\n");
            block.push_str(&state);
            block.push_str("\n\n");
        }
    }

    if !world.plots.is_empty() {
        block.push_str("## Active Plots\n");
        for plot in &world.plots {
            block.push_str(&format!(
                "- [{}] {}: {} (alignment {:.2})\n",
                plot.id, plot.title, plot.description, plot.alignment
            ));
        }
        block.push('\n');
    }

    if !memories.is_empty() {
        block.push_str("## Memories\n");
        for memory in memories {
            block.push_str(&format!("- {}\n", memory.text));
        }
        block.push('\n');
    }

    if !cards.is_empty() {
        block.push_str("## Lore\n");
        for scored in cards {
            block.push_str(&format!(
                "- {} ({}): {}\n",
                scored.card.name, scored.card.category, scored.card.content
            ));
        }
        block.push('\n');
    }

    block
}

/// Combine a system prompt with the retrieval block.
pub(crate) fn with_context(system: &str, context_block: &str) -> String {
    if context_block.is_empty() {
        return system.to_string();
    }
    format!("{system}\n\n{context_block}")
}

/// The writer's user message for a turn: the player's action plus any
/// settled outcomes.
pub(crate) fn writer_prompt(player_input: &str, outcomes: &[String]) -> String {
    if outcomes.is_empty() {
        return player_input.to_string();
    }
    format!("{player_input}\n\n[Outcomes: {}]", outcomes.join(" "))
}
