//! Unified sslwrap CLI.
//!
//! - `sslwrap serve` - terminate TLS and relay plaintext to a backend
//! - `sslwrap connect` - pipe stdin/stdout over a secure connection
//! - `sslwrap cert generate` - create a keystore for the server role

use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod cli;

/// sslwrap unified CLI.
#[derive(Parser)]
#[command(
    name = "sslwrap",
    version,
    about = "TLS streams over any wrap/unwrap engine",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept TLS connections and relay their plaintext to a backend.
    #[command(name = "serve", alias = "server")]
    Serve(Box<cli::serve::ServeArgs>),

    /// Open a TLS connection and pipe it to stdin/stdout.
    #[command(name = "connect")]
    Connect(cli::connect::ConnectArgs),

    /// Keystore management.
    #[command(name = "cert")]
    Cert(sslwrap_cert::CertArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(args) => cli::serve::run(*args).await,
        Commands::Connect(args) => cli::connect::run(args).await,
        Commands::Cert(args) => sslwrap_cert::run(args).map_err(Into::into),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
