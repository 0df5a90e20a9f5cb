use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hyperstream", about = "Decentralized peer-to-peer file transfer")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Send a file or directory, printing a share key for the receiver.
    Send { path: PathBuf },
    /// Receive a transfer using a share key.
    Receive {
        key: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_logging() {
    let filter = std::env::var("HYPERSTREAM_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Send { path }) => match hyperstream_cli::run_send(&path).await {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        },
        Some(Command::Receive { key, output }) => {
            match hyperstream_cli::run_receive(&key, output).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("error: {e:#}");
                    ExitCode::FAILURE
                }
            }
        }
        None => {
            eprintln!(
                "interactive mode is not part of this build; use `hyperstream send <path>` or `hyperstream receive <key>`"
            );
            ExitCode::FAILURE
        }
    }
}
