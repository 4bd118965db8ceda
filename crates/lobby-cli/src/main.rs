use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "lobby")]
#[command(about = "Lobby - headless visitor engagement widget", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount a widget session against a backend and drive it from the
    /// terminal
    Run(commands::run::RunArgs),
    /// Inspect or rotate the stored visitor identity
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },
}

#[derive(Subcommand)]
enum IdentityAction {
    /// Print the stored visitor and session ids
    Show,
    /// Start a fresh session, keeping the visitor id
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so the session transcript on stdout stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::Identity { action } => match action {
            IdentityAction::Show => commands::identity::show().await?,
            IdentityAction::Reset => commands::identity::reset().await?,
        },
    }

    Ok(())
}
