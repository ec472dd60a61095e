//! CronSync agent
//!
//! Entry point for the endpoint agent and its check-in helper.

mod cli;
mod cmd_checkin;
mod cmd_inspect;
mod cmd_run;
mod logging;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::cmd_checkin::CheckinArgs;
use crate::cmd_run::load_config;
use crate::logging::init_stderr;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Cli { config, command } = Cli::parse();

    match command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run::run_agent(&config).await,
        Commands::Checkin {
            id,
            name,
            namespace,
            command,
        } => {
            init_stderr("warn");
            let args = CheckinArgs {
                id,
                name,
                namespace,
                command,
            };
            let code = cmd_checkin::run_checkin(&config, args).await;
            std::process::exit(code);
        }
        Commands::Validate { dir } => {
            init_stderr("warn");
            if !cmd_inspect::validate(&dir) {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Discover { json } => {
            init_stderr("warn");
            let (config, _) = load_config(&config)?;
            cmd_inspect::discover_local(&config, json).await
        }
        Commands::Adopt {
            handle,
            id,
            name,
            namespace,
        } => {
            init_stderr("info");
            let (config, _) = load_config(&config)?;
            cmd_inspect::adopt_entry(&config, &handle, id, name, namespace).await
        }
        Commands::Version => {
            cmd_inspect::print_version();
            Ok(())
        }
    }
}
