use std::process::ExitCode;

use bsync_git::GitOpener;
use clap::Parser;
use tracing::Level;

mod cli;
mod config;
mod driver;
mod folder_sync;
mod projects;
mod render;

use cli::{Cli, OutputFormat};

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = config::Config::load(cli.config.as_deref())?;
    let plan = driver::RunPlan::resolve(&cli, &config)?;

    let summary = driver::run(&GitOpener, &plan, &config.folder_sync, |run| {
        if cli.format == OutputFormat::Text {
            println!("{}", render::text(run));
        }
    });

    match cli.format {
        OutputFormat::Text => println!("All done!"),
        OutputFormat::Json => println!("{}", render::json(&summary.runs)?),
    }

    Ok(if summary.failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
