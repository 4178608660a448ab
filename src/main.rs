mod cli;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use log::{debug, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use cli::{export::ExportArgs, import::ImportArgs};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in and upload the spreadsheet rows in batches
    Import(ImportArgs),
    /// Write the rows that would be uploaded as CSV
    Export(ExportArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Loaded before parsing so SUPABASE_* can come from .env
    let dotenv = dotenvy::dotenv();
    let opts = Cli::parse();

    let level = match opts.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    // Stderr keeps stdout free for `export`
    TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )?;

    match dotenv {
        Ok(path) => debug!("Loaded environment from {:?}", path),
        Err(err) if err.not_found() => debug!("No .env file found"),
        Err(err) => return Err(err.into()),
    }

    match opts.command {
        Command::Import(args) => cli::import::handle(args).await,
        Command::Export(args) => cli::export::handle(args),
    }
}
