use std::path::{Path, PathBuf};

use colored::Colorize;
use dbgshell::{
    AppResult,
    cli::{Cli, Commands},
    config::Config,
    debugger::{SessionManager, SessionSettings, process::absolute_artifact_path},
    init_logging,
    session::ShellSession,
    ui,
};

const EXIT_COMMAND_FAILED: i32 = 1;
const EXIT_SESSION_FAILED: i32 = 2;

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse_args();
    let config_path = PathBuf::from(&cli.config_file);

    if let Commands::Config { action } = &cli.command {
        Config::handle_command(action, &config_path)?;
        return Ok(());
    }

    // Load configuration
    let mut config = Config::load_or_default(&config_path);
    cli.apply_overrides(&mut config);
    config.validate()?;

    // Initialize logging
    let log_file = Some(config.log.file_path.trim())
        .filter(|path| !path.is_empty())
        .map(PathBuf::from);
    let guard = init_logging(&cli.effective_log_level(&config), log_file.as_deref())?;

    tracing::info!("dbgshell {} starting...", env!("CARGO_PKG_VERSION"));
    tracing::debug!("CLI arguments: {:?}", cli);

    if cli.is_dry_run_mode() {
        let settings = SessionSettings::from_config(&config)?;
        let launch = cli
            .artifact()
            .map(|artifact| settings.launch_spec(&absolute_artifact_path(artifact)));
        ui::cli::display_dry_run(&config, launch.as_ref())?;
        return Ok(());
    }

    let exit_code = match &cli.command {
        Commands::Shell { artifact, follow } => {
            let mut shell = ShellSession::new(&config, *follow)?;
            shell.run(artifact).await?;
            0
        }
        Commands::Exec {
            artifact,
            command,
            json,
        } => run_exec(&config, artifact, &command.join(" "), *json).await,
        Commands::Config { .. } => 0,
    };

    drop(guard);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// Open the dump, run one command, close; returns the process exit code
async fn run_exec(config: &Config, artifact: &Path, command: &str, json: bool) -> i32 {
    let session = match SessionManager::from_config(config) {
        Ok(session) => session,
        Err(e) => {
            ui::cli::display_error(&e.report());
            return EXIT_SESSION_FAILED;
        }
    };

    if let Err(e) = session.open(artifact).await {
        ui::cli::display_error(&e.report());
        return EXIT_SESSION_FAILED;
    }

    let result = session.execute(command).await;
    if let Err(e) = session.close().await {
        tracing::warn!("Failed to close debugger session: {}", e);
    }

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            ui::cli::display_error(&e.report());
            return EXIT_SESSION_FAILED;
        }
    };

    if json {
        match ui::result_to_json(&result) {
            Ok(rendered) => println!("{}", rendered),
            Err(e) => {
                ui::cli::display_error(&format!("{:#}", e));
                return EXIT_SESSION_FAILED;
            }
        }
    } else {
        if !result.output.is_empty() {
            println!("{}", result.output);
        }
        if !result.success {
            eprintln!("{} {}", "error:".red().bold(), result.error);
        }
    }

    if result.success {
        0
    } else {
        EXIT_COMMAND_FAILED
    }
}
