use clap::{Parser, Subcommand};
use colored::*;
use dindrun::{cli, logging};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "dindrun")]
#[command(about = "Run smoke checks against a Docker-in-Docker daemon bound to a client container", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the daemon, bind it and run the smoke checks (default)
    Run,
    /// Run the smoke checks, then push the verified client image
    Publish {
        /// Target reference, e.g. registry.example.com/team/client:1.0
        reference: String,
    },
}

fn main() -> ExitCode {
    let args = Cli::parse();
    logging::init();

    let result = match args.command.unwrap_or(Commands::Run) {
        Commands::Run => cli::run::run(),
        Commands::Publish { reference } => cli::publish::run(reference),
    };

    // The only place a fatal error ends the process.
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{} {}", "✗".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
