//! Slash commands available at the chat prompt

use crate::event::Event;

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "install",
    aliases: &["i"],
    description: "Fetch and store every manifest resource",
  },
  Command {
    name: "activate",
    aliases: &["a"],
    description: "Purge old cache generations and start serving from cache",
  },
  Command {
    name: "fetch",
    aliases: &["f", "get"],
    description: "Request a resource through the cache (/fetch <path or url>)",
  },
  Command {
    name: "history",
    aliases: &["h", "log"],
    description: "Print the stored conversation",
  },
  Command {
    name: "help",
    aliases: &["?"],
    description: "List commands",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    description: "Leave the chat",
  },
];

/// Look up a command by exact name or alias.
pub fn find(name: &str) -> Option<&'static Command> {
  let name = name.to_lowercase();
  COMMANDS
    .iter()
    .find(|cmd| cmd.name == name || cmd.aliases.contains(&name.as_str()))
}

/// Turn one line typed at the prompt into an event.
///
/// Lines starting with `/` are commands; anything else is a chat message.
/// Blank lines and unknown commands yield `None`.
pub fn parse_input(line: &str) -> Option<Event> {
  let line = line.trim();
  if line.is_empty() {
    return None;
  }

  let Some(rest) = line.strip_prefix('/') else {
    return Some(Event::Send(line.to_string()));
  };

  let (name, arg) = match rest.split_once(char::is_whitespace) {
    Some((name, arg)) => (name, arg.trim()),
    None => (rest, ""),
  };

  match find(name)?.name {
    "install" => Some(Event::Install),
    "activate" => Some(Event::Activate),
    "fetch" if !arg.is_empty() => Some(Event::Fetch(arg.to_string())),
    "history" => Some(Event::History),
    "help" => Some(Event::Help),
    "quit" => Some(Event::Quit),
    _ => None,
  }
}

/// One line per command for `/help`.
pub fn help_text() -> String {
  COMMANDS
    .iter()
    .map(|cmd| format!("/{:<10} {}", cmd.name, cmd.description))
    .collect::<Vec<_>>()
    .join("\n")
}
