//! Plain terminal rendering for the interactive shell and one-shot runs

use colored::Colorize;

use crate::AppResult;
use crate::config::Config;
use crate::debugger::{
    CommandResult, HistoryEntry, LaunchSpec, OutputLine, OutputStream, SessionInfo, SessionState,
};
use crate::session::command_router::COMMAND_ALIASES;

/// Banner shown when the shell starts
pub fn display_welcome(artifact: &str) {
    println!("{}", "dbgshell - persistent debugger session".bold());
    println!("   Dump: {}", artifact.cyan());
    println!("   Type {} for commands, {} to exit", "/help".green(), "/quit".green());
    println!();
}

/// Input prompt, reflecting the session state
pub fn display_prompt(state: SessionState) {
    use std::io::Write;

    let prompt = match state {
        SessionState::Ready => "dbg> ".green().bold(),
        SessionState::Closed => "dbg(closed)> ".red().bold(),
        _ => format!("dbg({})> ", state).yellow().bold(),
    };
    print!("{}", prompt);
    let _ = std::io::stdout().flush();
}

/// Output and outcome of one command
pub fn display_result(result: &CommandResult, show_output: bool) {
    if show_output && !result.output.is_empty() {
        println!("{}", result.output);
    }

    if result.duration_exceeded {
        println!(
            "{} {} (partial output above)",
            "⏱".yellow(),
            result.error.yellow()
        );
    } else if result.process_exited {
        println!("{} {}", "✖".red(), "debugger exited while running the command".red());
    } else if !result.success {
        println!("{} {}", "✖".red(), result.error.red());
    }

    println!(
        "{}",
        format!("[{} in {:.2}s]", result.command, result.elapsed.as_secs_f64()).dimmed()
    );
}

/// A live line from the debugger
pub fn display_live_line(line: &OutputLine) {
    match line.stream {
        OutputStream::Stdout => println!("{}", line.text.dimmed()),
        OutputStream::Stderr => eprintln!("{}", line.text.red()),
    }
}

pub fn display_error(message: &str) {
    eprintln!("{} {}", "error:".red().bold(), message);
}

pub fn display_info(message: &str) {
    println!("{} {}", "ℹ".blue(), message);
}

/// One-line notice for a session state change
pub fn display_state_change(info: &SessionInfo) {
    let state = match info.state {
        SessionState::Ready => info.state.to_string().green(),
        SessionState::Busy => return,
        SessionState::Closed => info.state.to_string().red(),
        _ => info.state.to_string().yellow(),
    };
    println!("{} {}", "session:".dimmed(), state);
}

/// Session status block
pub fn display_status(info: &SessionInfo) -> AppResult<()> {
    println!("🔍 Session Status:");
    println!("   State: {}", info.state);
    match &info.artifact_path {
        Some(path) => println!("   Dump: {}", path.display()),
        None => println!("   Dump: (none)"),
    }
    match info.pid {
        Some(pid) => println!("   PID: {}", pid),
        None => println!("   PID: -"),
    }
    println!("   Process alive: {}", if info.alive { "yes" } else { "no" });
    println!("   Commands executed: {}", info.commands_executed);
    if let Some(uptime) = info.uptime() {
        println!("   Uptime: {}s", uptime.num_seconds());
    }
    if let Some(failure) = &info.last_error {
        println!("   Last error: {}", failure.message.red());
    }

    Ok(())
}

/// Executed commands, oldest first
pub fn display_history(history: &[HistoryEntry]) -> AppResult<()> {
    println!("📋 Command history:");
    if history.is_empty() {
        println!("   (No commands executed)");
        return Ok(());
    }

    for (i, entry) in history.iter().enumerate() {
        let outcome = if entry.success {
            "ok".green()
        } else if entry.duration_exceeded {
            "timeout".yellow()
        } else {
            "failed".red()
        };
        println!(
            "   {:>3}. {} {} [{}ms] {}",
            i + 1,
            entry.executed_at.format("%H:%M:%S"),
            entry.command,
            entry.elapsed_ms,
            outcome
        );
    }

    Ok(())
}

pub fn display_aliases() -> AppResult<()> {
    println!("Command aliases (use /run <alias> [args]):");
    for (alias, command, description) in COMMAND_ALIASES {
        println!("   {:<22} {:<14} {}", alias.green(), command, description.dimmed());
    }
    Ok(())
}

pub fn display_help(lines: &[String]) {
    println!("\ndbgshell interactive commands:");
    for line in lines {
        println!("{}", line);
    }
    println!();
}

/// Configuration and the exact debugger invocation, without launching it
pub fn display_dry_run(config: &Config, launch: Option<&LaunchSpec>) -> AppResult<()> {
    println!("{}", "Dry run: no debugger will be started".yellow().bold());
    println!();
    println!("{}", toml::to_string_pretty(config)?);
    if let Some(spec) = launch {
        println!("{} {}", "Launch:".bold(), spec.command_line());
    }
    Ok(())
}
