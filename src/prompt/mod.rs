//! Prompt construction for agent-conditioned completions.
//!
//! Everything here is pure: the same inputs always produce byte-identical
//! prompts, and no input can make composition fail.

use crate::core::types::{AgentPersona, ConversationTurn, TurnRole};

/// Number of prior turns included by [`compose`].
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

const NO_CAPABILITIES: &str = "none specified";

pub fn compose(persona: &AgentPersona, history: &[ConversationTurn], user_message: &str) -> String {
    compose_with_window(persona, history, user_message, DEFAULT_HISTORY_WINDOW)
}

/// Builds the instruction block from the persona, the last `window` turns of
/// `history` (malformed turns dropped, order kept) and the new message.
pub fn compose_with_window(
    persona: &AgentPersona,
    history: &[ConversationTurn],
    user_message: &str,
    window: usize,
) -> String {
    let recent = &history[history.len().saturating_sub(window)..];
    let context = recent
        .iter()
        .filter(|turn| turn.is_well_formed())
        .map(render_turn)
        .collect::<Vec<_>>()
        .join("\n");

    let capabilities = if persona.capabilities.is_empty() {
        NO_CAPABILITIES.to_string()
    } else {
        persona.capabilities.join(", ")
    };

    format!(
        "{system_prompt}\n\n\
         You are an AI agent with the following capabilities: {capabilities}\n\n\
         Previous conversation context:\n\
         {context}\n\n\
         Current user message: {user_message}\n\n\
         Please respond as this agent, staying in character and using your specified \
         capabilities. Be helpful, accurate, and maintain the personality defined in your \
         system prompt.",
        system_prompt = persona.system_prompt,
    )
}

/// Prompt asking the model to design an agent for `description`, answered as
/// a JSON object matching [`crate::core::types::AgentBlueprint`].
pub fn agent_config_prompt(description: &str) -> String {
    format!(
        r#"You are an AI agent configuration generator. Based on the following description, generate a comprehensive agent configuration in JSON format.

Description: "{description}"

Generate a JSON configuration with the following structure:
{{
  "name": "Agent Name",
  "description": "Detailed description of the agent's purpose",
  "type": "primary" or "specialized",
  "capabilities": ["capability1", "capability2", ...],
  "systemPrompt": "Detailed system prompt defining behavior and personality",
  "tools": ["tool1", "tool2", ...],
  "settings": {{
    "temperature": 0.7,
    "maxTokens": 2000,
    "internetAccess": true/false,
    "knowledgeBase": true/false,
    "memoryEnabled": true/false
  }},
  "suggestedSubAgents": [
    {{
      "name": "Sub-agent name",
      "description": "Sub-agent description",
      "capabilities": ["capability1", "capability2"]
    }}
  ]
}}

Make the configuration detailed, practical, and tailored to the specific use case described. Reply with the JSON object only."#
    )
}

/// Returns the first balanced `{...}` object in `reply`, skipping braces
/// inside JSON strings. Models often wrap JSON in prose or code fences.
pub(crate) fn extract_json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in reply[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&reply[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn render_turn(turn: &ConversationTurn) -> String {
    let speaker = match turn.role {
        TurnRole::User => "User",
        TurnRole::Agent | TurnRole::Unknown => "Assistant",
    };
    format!("{speaker}: {}", turn.content)
}
