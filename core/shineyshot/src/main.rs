//! shineyshot: screenshot annotation with shareable background sessions.
//!
//! ## Subcommands
//!
//! - `background start|stop|list|clean`: session lifecycle
//! - `background run|attach`: send commands to a running session
//! - `background serve`: daemon entry point (spawned by `start`)

mod background;
mod logging;
mod tools;

use background::BackgroundCommand;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "shineyshot")]
#[command(about = "Capture and annotate screenshots")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage background sessions that keep an image open between commands
    Background {
        #[command(subcommand)]
        command: BackgroundCommand,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Background { command } => {
            // Daemons set up their own log file once the directory exists.
            if !command.is_daemon() {
                logging::init_console();
            }
            if let Err(e) = background::execute(command) {
                tracing::debug!(error = ?e, "background command failed");
                eprintln!("shineyshot: {}", e);
                std::process::exit(1);
            }
        }
    }
}
