mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sigmaris::config::SigmarisConfig;

#[derive(Parser)]
#[command(name = "sigmaris", version, about = "Persona trait evolution and memory compaction for AI companions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one chat turn for a user and session
    Turn {
        #[arg(long, short)]
        user: String,
        #[arg(long, short, default_value = "default")]
        session: String,
        /// The user's message
        message: String,
        /// Print the full turn outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compact a session's message history into a summary
    Flush {
        #[arg(long, short)]
        user: String,
        #[arg(long, short, default_value = "default")]
        session: String,
        /// Override compaction.threshold
        #[arg(long)]
        threshold: Option<usize>,
        /// Override compaction.keep_recent
        #[arg(long)]
        keep_recent: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Show a user's traits and history counters
    Persona {
        #[arg(long, short)]
        user: String,
        #[arg(long)]
        json: bool,
    },
    /// Run the text signal extractors on a message and print JSON
    Classify {
        text: String,
    },
    /// Check database health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = SigmarisConfig::load()?;

    // Log to stderr so stdout stays clean for replies and JSON.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Turn {
            user,
            session,
            message,
            json,
        } => {
            cli::turn(config, &user, &session, &message, json).await?;
        }
        Command::Flush {
            user,
            session,
            threshold,
            keep_recent,
            json,
        } => {
            cli::flush(&config, &user, &session, threshold, keep_recent, json).await?;
        }
        Command::Persona { user, json } => {
            cli::persona(&config, &user, json)?;
        }
        Command::Classify { text } => {
            cli::classify(&text)?;
        }
        Command::Doctor => {
            cli::doctor(&config)?;
        }
    }

    Ok(())
}
