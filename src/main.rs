use anyhow::Result;
use clap::{Parser, Subcommand};
use std::ffi::OsString;

mod archive;
mod args;
mod config;
mod download;
mod env;
mod http;
mod links;
mod logs;
mod span;
mod trace;
mod tree;
mod ui;

use crate::args::CLIArgs;

const CLI_VERSION: &str = env!("ZLENS_VERSION_STRING");

#[derive(Debug, Parser)]
#[command(
    name = "zlens",
    about = "Terminal viewer and archiver for Zipkin traces",
    version = CLI_VERSION
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// View a trace as an interactive timeline
    Trace(CLIArgs<trace::TraceArgs>),
    /// Copy a trace into the archive backend
    Archive(CLIArgs<archive::ArchiveArgs>),
    /// Download the raw trace JSON
    Download(CLIArgs<download::DownloadArgs>),
    /// Print or open the logs URL for a trace
    Logs(CLIArgs<logs::LogsArgs>),
    /// Manage stored configuration
    Config(CLIArgs<config::ConfigArgs>),
}

#[tokio::main]
async fn main() -> Result<()> {
    let argv: Vec<OsString> = std::env::args_os().collect();
    env::bootstrap_from_args(&argv)?;
    let cli = Cli::parse_from(argv);

    match cli.command {
        Commands::Trace(cmd) => trace::run(cmd.base, cmd.args).await?,
        Commands::Archive(cmd) => archive::run(cmd.base, cmd.args).await?,
        Commands::Download(cmd) => download::run(cmd.base, cmd.args).await?,
        Commands::Logs(cmd) => logs::run(cmd.base, cmd.args)?,
        Commands::Config(cmd) => config::run(cmd.base, cmd.args)?,
    }

    Ok(())
}
