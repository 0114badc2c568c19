#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    None,
    Verify,
    List,
    Cat,
}

impl Command {
    /// Positional tokens the command expects, counting its own name.
    pub fn arity(self) -> usize {
        match self {
            Command::None => 0,
            Command::Verify | Command::List => 2,
            Command::Cat => 3,
        }
    }
}

#[derive(Debug)]
pub struct CommandDescriptor {
    pub command: Command,
    pub name: &'static str,
    pub description: &'static str,
}

pub static COMMANDS: [CommandDescriptor; 3] = [
    CommandDescriptor {
        command: Command::Verify,
        name: "verify",
        description: "Verify a Qt resource file or library.",
    },
    CommandDescriptor {
        command: Command::List,
        name: "list",
        description: "List the files of a Qt resource file or library.",
    },
    CommandDescriptor {
        command: Command::Cat,
        name: "cat",
        description: "Cat a file from a Qt resource file or library.",
    },
];

/// Exact, case-sensitive lookup.
pub fn lookup(name: &str) -> Option<&'static CommandDescriptor> {
    COMMANDS.iter().find(|descriptor| descriptor.name == name)
}

/// The "Available commands" block of the help text, descriptions aligned
/// one column past the longest name.
pub fn command_summary() -> String {
    let longest = COMMANDS.iter().map(|d| d.name.len()).max().unwrap_or(0);
    let mut summary = String::from("Available commands are:\n");
    for descriptor in &COMMANDS {
        summary.push_str(&format!(
            "  {:<width$} {}\n",
            descriptor.name,
            descriptor.description,
            width = longest
        ));
    }
    summary.push_str("\nMore information about each command can be obtained by running\n");
    summary.push_str("  qtresources <command> --help");
    summary
}
