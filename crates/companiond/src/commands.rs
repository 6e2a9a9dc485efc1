//! Slash-command registry: a flat descriptor list a front-end dispatches
//! against, rather than each front-end hand-rolling its own command parser.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCategory {
    Info,
    Memory,
    Tasks,
    System,
}

#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub category: CommandCategory,
    pub requires_brain: bool,
    pub requires_api: bool,
    pub takes_argument: bool,
}

pub const COMMANDS: &[CommandDescriptor] = &[
    CommandDescriptor { name: "help", description: "List available commands", category: CommandCategory::Info, requires_brain: false, requires_api: false, takes_argument: false },
    CommandDescriptor { name: "status", description: "Show mood, level, and battery status", category: CommandCategory::Info, requires_brain: false, requires_api: false, takes_argument: false },
    CommandDescriptor { name: "stats", description: "Show today's token usage and XP", category: CommandCategory::Info, requires_brain: true, requires_api: false, takes_argument: false },
    CommandDescriptor { name: "remember", description: "Store a memory: /remember <category> <key> <value>", category: CommandCategory::Memory, requires_brain: false, requires_api: false, takes_argument: true },
    CommandDescriptor { name: "recall", description: "Show recently recalled memories", category: CommandCategory::Memory, requires_brain: false, requires_api: false, takes_argument: false },
    CommandDescriptor { name: "forget", description: "Clear all stored memories", category: CommandCategory::Memory, requires_brain: false, requires_api: false, takes_argument: false },
    CommandDescriptor { name: "tasks", description: "List open tasks", category: CommandCategory::Tasks, requires_brain: false, requires_api: false, takes_argument: false },
    CommandDescriptor { name: "addtask", description: "Add a task: /addtask <title>", category: CommandCategory::Tasks, requires_brain: false, requires_api: false, takes_argument: true },
    CommandDescriptor { name: "done", description: "Complete a task by id: /done <task-id>", category: CommandCategory::Tasks, requires_brain: false, requires_api: false, takes_argument: true },
    CommandDescriptor { name: "clear", description: "Clear the conversation transcript", category: CommandCategory::System, requires_brain: true, requires_api: false, takes_argument: false },
    CommandDescriptor { name: "tools", description: "List MCP tools available this turn", category: CommandCategory::System, requires_brain: false, requires_api: false, takes_argument: false },
];

/// Looks up a command by name, with or without a leading `/`.
pub fn find_command(input: &str) -> Option<&'static CommandDescriptor> {
    let name = input.strip_prefix('/').unwrap_or(input);
    let name = name.split_whitespace().next().unwrap_or(name);
    COMMANDS.iter().find(|c| c.name == name)
}

/// Splits `/name rest-of-line` into `(name, Some(rest))`, or `(name, None)`
/// if there's no argument text.
pub fn split_command(input: &str) -> (&str, Option<&str>) {
    let stripped = input.strip_prefix('/').unwrap_or(input);
    match stripped.split_once(char::is_whitespace) {
        Some((name, rest)) => {
            let rest = rest.trim();
            (name, if rest.is_empty() { None } else { Some(rest) })
        }
        None => (stripped, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_command_with_or_without_slash() {
        assert!(find_command("/help").is_some());
        assert!(find_command("help").is_some());
        assert!(find_command("/nonexistent").is_none());
    }

    #[test]
    fn splits_name_and_argument() {
        assert_eq!(split_command("/addtask buy milk"), ("addtask", Some("buy milk")));
        assert_eq!(split_command("/help"), ("help", None));
    }
}
