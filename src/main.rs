use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use multicomp::cli::{self, Args, Command, WorkspaceReport};
use multicomp::parser;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("multicomp=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing();

    let config = args.load_config()?;
    let workspace = config.resolve_workspace(args.workspace.as_deref());

    match &args.command {
        Command::Stats { json } => {
            let report = WorkspaceReport::load(&workspace).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report.print();
            }
        }
        Command::Parse { input, user, chunks } => {
            let response = cli::read_input(input.as_deref())?;
            println!("{}", cli::parse_to_json(&response, user, *chunks)?);
        }
        Command::Redact { input } => {
            let response = cli::read_input(input.as_deref())?;
            println!("{}", parser::strip_observation_block(&response));
        }
        Command::Prompt { minimal } => {
            println!("{}", cli::prompt_text(*minimal));
        }
        Command::Replay { transcript } => {
            let text = std::fs::read_to_string(transcript)?;
            let (turns, emitted) = cli::replay(config, &workspace, &text).await?;
            println!(
                "{}: {} turns, {} observations emitted into {}",
                "Replay".bright_green().bold(),
                turns,
                emitted,
                workspace.display()
            );
        }
    }

    Ok(())
}
