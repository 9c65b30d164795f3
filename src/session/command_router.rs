//! Command Router for interactive shell input

use anyhow::Result;
use std::path::PathBuf;

/// Named shortcuts for common debugger commands: (alias, command, description)
pub const COMMAND_ALIASES: &[(&str, &str, &str)] = &[
    ("analyze_crash", "!analyze -v", "Automatic crash analysis"),
    ("call_stack", "k", "Call stack of the current thread"),
    ("call_stack_verbose", "kv", "Call stack with frame data"),
    ("call_stack_detailed", "kp", "Call stack with parameters"),
    ("exception_record", ".exr -1", "Most recent exception record"),
    ("threads", "~", "List threads"),
    ("threads_verbose", "~*", "All threads in detail"),
    ("modules", "lm", "Loaded modules"),
    ("modules_verbose", "lmv", "Loaded modules with version info"),
    ("memory", "d", "Display memory"),
    ("memory_ascii", "da", "Display memory as ASCII"),
    ("memory_unicode", "du", "Display memory as Unicode"),
    ("disassemble", "u", "Disassemble code"),
    ("registers", "r", "Register values"),
    ("reload_symbols", ".reload", "Reload symbols"),
    ("set_symbol_path", ".sympath", "Set the symbol path"),
    ("get_symbol_path", ".sympath", "Show the symbol path"),
    ("process_info", ".process", "Current process"),
    ("thread_info", ".thread", "Current thread"),
    ("heap", "!heap", "Heap information"),
    ("handle", "!handle", "Handle information"),
];

/// Commands understood by the interactive shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// Close the current session and open another dump
    Open { path: PathBuf },
    /// Close the current session
    Close,
    /// Show session status
    Status,
    /// Show commands executed in this session
    History,
    /// List command aliases
    Aliases,
    /// Run an aliased debugger command, with optional arguments
    Run { command: String },
    /// Toggle live output
    Follow { enabled: bool },
    /// Show help
    Help,
    /// Quit the shell
    Quit,
    /// Raw debugger command
    Debugger { command: String },
}

/// Translate an alias plus arguments into a debugger command
pub fn resolve_alias(alias: &str, args: &[&str]) -> Option<String> {
    COMMAND_ALIASES
        .iter()
        .find(|(name, _, _)| *name == alias)
        .map(|(_, command, _)| {
            if args.is_empty() {
                command.to_string()
            } else {
                format!("{} {}", command, args.join(" "))
            }
        })
}

/// Parses interactive input into shell commands
#[derive(Debug, Default, Clone)]
pub struct CommandRouter;

impl CommandRouter {
    pub fn new() -> Self {
        Self
    }

    /// Parse interactive command from string input.
    ///
    /// Input starting with `/` is a shell command; anything else is sent to
    /// the debugger verbatim.
    pub fn parse(&self, input: &str) -> Result<Option<ShellCommand>> {
        let input = input.trim();

        if input.is_empty() {
            return Ok(None);
        }

        if !input.starts_with('/') {
            return Ok(Some(ShellCommand::Debugger {
                command: input.to_string(),
            }));
        }

        let parts: Vec<&str> = input.split_whitespace().collect();

        match parts[0] {
            "/open" => {
                if parts.len() < 2 {
                    return Err(anyhow::anyhow!("Usage: /open <dump file>"));
                }
                let path = input["/open".len()..].trim();
                Ok(Some(ShellCommand::Open {
                    path: PathBuf::from(path),
                }))
            }
            "/close" => Ok(Some(ShellCommand::Close)),
            "/status" => Ok(Some(ShellCommand::Status)),
            "/history" => Ok(Some(ShellCommand::History)),
            "/aliases" => Ok(Some(ShellCommand::Aliases)),
            "/run" => {
                if parts.len() < 2 {
                    return Err(anyhow::anyhow!("Usage: /run <alias> [args]"));
                }
                let command = resolve_alias(parts[1], &parts[2..]).ok_or_else(|| {
                    anyhow::anyhow!(
                        "Unknown alias: {}. Type /aliases for available aliases.",
                        parts[1]
                    )
                })?;
                Ok(Some(ShellCommand::Run { command }))
            }
            "/follow" => match parts.get(1).copied() {
                Some("on") => Ok(Some(ShellCommand::Follow { enabled: true })),
                Some("off") => Ok(Some(ShellCommand::Follow { enabled: false })),
                _ => Err(anyhow::anyhow!("Usage: /follow on|off")),
            },
            "/help" | "/?" => Ok(Some(ShellCommand::Help)),
            "/quit" | "/exit" | "/q" => Ok(Some(ShellCommand::Quit)),
            _ => Err(anyhow::anyhow!(
                "Unknown command: {}. Type /help for available commands.",
                parts[0]
            )),
        }
    }

    /// Interactive command help
    pub fn help_messages(&self) -> Vec<String> {
        vec![
            "  /open <dump>          - Close the current session and open another dump".to_string(),
            "  /close                - Close the current session".to_string(),
            "  /status               - Show session status".to_string(),
            "  /history              - Show commands run in this session".to_string(),
            "  /aliases              - List command aliases".to_string(),
            "  /run <alias> [args]   - Run an aliased debugger command".to_string(),
            "  /follow on|off        - Print debugger output live".to_string(),
            "  /help                 - Show this help".to_string(),
            "  /quit                 - Close the session and exit".to_string(),
            "  <anything else>       - Sent to the debugger as-is".to_string(),
        ]
    }
}
