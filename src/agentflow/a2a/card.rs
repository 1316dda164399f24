//! Agent card generation.
//!
//! The card is the A2A discovery document served at
//! `/a2a/agents/{id}/.well-known/agent.json`.  Skills are derived from the
//! agent's tool allow-list plus a default conversation skill.

use crate::agentflow::models::Agent;
use serde_json::{json, Value};

/// A2A protocol version spoken by this platform.
pub const PROTOCOL_VERSION: &str = "0.3.0";

fn skill_title(tool_name: &str) -> String {
    tool_name
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build the agent card for an agent.
pub fn generate_agent_card(agent: &Agent, base_url: &str, app_name: &str) -> Value {
    let mut skills: Vec<Value> = agent
        .tools
        .iter()
        .map(|tool_name| {
            json!({
                "id": tool_name,
                "name": skill_title(tool_name),
                "description": format!("Tool capability: {}", tool_name),
                "tags": [tool_name],
            })
        })
        .collect();

    skills.push(json!({
        "id": "conversation",
        "name": "Conversation",
        "description": agent
            .description
            .clone()
            .unwrap_or_else(|| format!("Conversational AI: {}", agent.name)),
        "tags": ["conversation", "chat", "general"],
    }));

    let base_url = base_url.trim_end_matches('/');

    json!({
        "name": agent.name,
        "description": agent
            .description
            .clone()
            .unwrap_or_else(|| format!("AI Agent: {}", agent.name)),
        "url": format!("{}/a2a/agents/{}", base_url, agent.id),
        "version": "1.0.0",
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "streaming": true,
            "pushNotifications": false,
            "stateTransitionHistory": false,
        },
        "skills": skills,
        "defaultInputModes": ["text/plain"],
        "defaultOutputModes": ["text/plain"],
        "provider": {
            "organization": app_name,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_card_shape() {
        let agent = Agent::new(Uuid::new_v4(), "Researcher", "You research.", "gpt-4o")
            .with_tools(vec![String::from("web_search")])
            .with_a2a_enabled(true);

        let card = generate_agent_card(&agent, "http://localhost:8000/", "Agent Platform");

        assert_eq!(card["name"], "Researcher");
        assert_eq!(card["protocolVersion"], "0.3.0");
        assert_eq!(card["capabilities"]["streaming"], true);
        assert_eq!(card["capabilities"]["pushNotifications"], false);
        assert_eq!(
            card["url"],
            format!("http://localhost:8000/a2a/agents/{}", agent.id)
        );

        let skills = card["skills"].as_array().unwrap();
        assert_eq!(skills.len(), 2);
        assert_eq!(skills[0]["id"], "web_search");
        assert_eq!(skills[0]["name"], "Web Search");
        assert_eq!(skills[1]["id"], "conversation");
        assert_eq!(card["provider"]["organization"], "Agent Platform");
    }
}
