//! Tipjar web server.

mod error;
mod pipeline;
mod response;
mod routes;
mod state;
mod templates;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tipjar::io::config::{AppConfig, load_config};
use tipjar::io::db::Database;
use tipjar::wireup::{start_periodic_jobs, wire_up};
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "tipjar-web", version)]
#[command(about = "Web server for the tipjar donation platform")]
struct Cli {
    /// Path to the TOML config file (missing file means defaults)
    #[arg(long, default_value = "tipjar.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the web server and the periodic jobs.
    Serve {
        /// Address to bind the server to
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,

        /// Port to listen on
        #[arg(long, default_value = "8537")]
        port: u16,
    },
    /// Create a participant; prints a session token for claimed ones.
    MakeParticipant {
        username: String,
        /// Mark the account as claimed so it can sign in.
        #[arg(long)]
        claimed: bool,
    },
    /// Drop advisory locks left behind by a process that did not shut down cleanly.
    ReleaseLocks,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tipjar::logging::init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Serve { bind, port } => serve(config, &bind, port).await,
        Command::MakeParticipant { username, claimed } => {
            let db = Database::open(&config.database_path)?;
            let participant = db.make_participant(&username, claimed)?;
            info!(id = participant.id, username = %participant.username, "participant created");
            if claimed {
                let token = db.start_session(participant.id, config.session_days)?;
                println!("{token}");
            }
            Ok(())
        }
        Command::ReleaseLocks => {
            let db = Database::open(&config.database_path)?;
            let released = db.clear_advisory_locks()?;
            info!(released, "advisory locks cleared");
            Ok(())
        }
    }
}

async fn serve(config: AppConfig, bind: &str, port: u16) -> anyhow::Result<()> {
    let website = wire_up(config)?;
    start_periodic_jobs(&website)?;

    let state = AppState::new(website.clone())?;
    let app = routes::router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(addr = %addr, version = %website.version, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match website.db.release_advisory_locks() {
        Ok(released) => info!(released, "shut down"),
        Err(err) => warn!(error = %format!("{err:#}"), "failed to release advisory locks"),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_serve_defaults() {
        let cli = Cli::parse_from(["tipjar-web", "serve"]);
        assert_eq!(cli.config, PathBuf::from("tipjar.toml"));
        assert!(matches!(
            cli.command,
            Command::Serve { ref bind, port: 8537 } if bind == "127.0.0.1"
        ));
    }

    #[test]
    fn parse_make_participant() {
        let cli = Cli::parse_from([
            "tipjar-web",
            "make-participant",
            "alice",
            "--claimed",
            "--config",
            "other.toml",
        ]);
        assert_eq!(cli.config, PathBuf::from("other.toml"));
        assert!(matches!(
            cli.command,
            Command::MakeParticipant { ref username, claimed: true } if username == "alice"
        ));
    }
}
