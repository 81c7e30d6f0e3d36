pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "ladder",
    about = "Ladder approval workflow operator CLI",
    long_about = "Operate the approval hierarchy store: migrations, default skeletons, \
                  config inspection, readiness checks and request history.",
    after_help = "Examples:\n  ladder doctor --json\n  ladder seed\n  ladder history REQ-1f2e..."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Create default hierarchy skeletons for the standard keys if missing")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, DB connectivity and migration state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the rendered approval history of a request")]
    History {
        #[arg(help = "Request identifier")]
        request_id: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::History { request_id } => commands::history::run(&request_id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
