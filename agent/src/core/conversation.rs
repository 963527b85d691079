//! Append-only conversation log for a single task.

use crate::core::types::{Role, ToolDescriptor, Turn};

const MODEL_IDENTITY: &str = "You are a helpful bash assistant that can execute commands.";

fn developer_instructions(tool_name: &str) -> String {
    format!(
        "# Instructions\n\n\
         When users ask you to perform file/system operations:\n\
         1. Call {tool_name} with the appropriate command\n\
         2. Wait for results\n\
         3. Provide a friendly summary\n\n\
         Always call the tool - don't just suggest commands."
    )
}

/// Ordered turns for one task.
///
/// The first three turns are always system, developer and user. Turns are
/// never edited or removed after being appended.
#[derive(Debug, Clone)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// Seed a conversation with the system, developer and user turns.
    pub fn new(tool: &ToolDescriptor, task: &str, start_date: &str) -> Self {
        let system = Turn::new(Role::System, MODEL_IDENTITY)
            .with_segment(format!("Current date: {start_date}"));
        let developer = Turn::new(Role::Developer, developer_instructions(&tool.name))
            .with_segment(render_tool_catalog(std::slice::from_ref(tool)));
        let user = Turn::new(Role::User, task);
        Self {
            turns: vec![system, developer, user],
        }
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// `(role, text)` pairs in order, skipping turns without content.
    pub fn flattened(&self) -> Vec<(Role, String)> {
        self.turns
            .iter()
            .filter(|turn| !turn.content.is_empty())
            .map(|turn| (turn.role, turn.flattened_text()))
            .collect()
    }
}

/// Render tools as a `functions` namespace, the shape the model was trained on.
pub fn render_tool_catalog(tools: &[ToolDescriptor]) -> String {
    let mut out = String::from("# Tools\n\n## functions\n\nnamespace functions {\n\n");
    for tool in tools {
        out.push_str(&format!("// {}\n", tool.description));
        out.push_str(&format!("type {} = (_: {{\n", tool.name));
        let required: Vec<&str> = tool.parameters["required"]
            .as_array()
            .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        if let Some(props) = tool.parameters["properties"].as_object() {
            for (name, schema) in props {
                if let Some(desc) = schema["description"].as_str() {
                    out.push_str(&format!("// {desc}\n"));
                }
                let ty = schema["type"].as_str().unwrap_or("any");
                let optional = if required.contains(&name.as_str()) {
                    ""
                } else {
                    "?"
                };
                out.push_str(&format!("{name}{optional}: {ty},\n"));
            }
        }
        out.push_str("}) => any;\n\n");
    }
    out.push_str("} // namespace functions");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Conversation {
        Conversation::new(
            &ToolDescriptor::shell("execute_bash"),
            "list files",
            "2025-11-19",
        )
    }

    #[test]
    fn seeds_system_developer_user() {
        let conversation = seeded();
        let roles: Vec<Role> = conversation.turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::System, Role::Developer, Role::User]);
        assert!(conversation.turns()[0].content[1].contains("2025-11-19"));
        assert_eq!(conversation.turns()[2].content, vec!["list files"]);
    }

    #[test]
    fn developer_turn_carries_tool_catalog() {
        let conversation = seeded();
        let developer = conversation.turns()[1].flattened_text();
        assert!(developer.contains("Always call the tool"));
        assert!(developer.contains("type execute_bash = (_: {"));
        assert!(developer.contains("command: string,"));
    }

    #[test]
    fn append_keeps_existing_turns() {
        let mut conversation = seeded();
        let before: Vec<Turn> = conversation.turns().to_vec();
        conversation.append(Turn::new(Role::Assistant, "done").with_channel("final"));

        assert_eq!(conversation.len(), 4);
        assert_eq!(&conversation.turns()[..3], before.as_slice());
        assert_eq!(conversation.turns()[3].channel.as_deref(), Some("final"));
    }

    #[test]
    fn flattened_joins_segments_and_skips_empty_turns() {
        let mut conversation = seeded();
        conversation.append(Turn {
            role: Role::Assistant,
            name: None,
            channel: None,
            recipient: None,
            content: Vec::new(),
        });
        conversation.append(Turn::new(Role::Tool, "a").with_segment("b"));

        let flat = conversation.flattened();
        assert_eq!(flat.len(), 4);
        assert_eq!(flat[3], (Role::Tool, "a b".to_string()));
    }

    #[test]
    fn catalog_marks_optional_parameters() {
        let mut tool = ToolDescriptor::shell("execute_bash");
        tool.parameters["required"] = serde_json::json!([]);
        let catalog = render_tool_catalog(&[tool]);
        assert!(catalog.contains("command?: string,"));
    }
}
