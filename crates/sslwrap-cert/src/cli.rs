//! CLI definitions for keystore generation.

use clap::{Args, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

/// Keystore management for sslwrap.
#[derive(Parser, Debug, Clone)]
#[command(name = "sslwrap-cert", version, about = "Keystore management for sslwrap")]
pub struct CertArgs {
    #[command(subcommand)]
    pub command: CertCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CertCommands {
    /// Generate a certificate and private key.
    Generate(GenerateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// Domain names to include in the certificate (can specify multiple).
    #[arg(short, long, required = true)]
    pub domain: Vec<String>,

    /// IP addresses to include in Subject Alternative Names.
    #[arg(long)]
    pub ip: Vec<IpAddr>,

    /// Output directory for the PEM files.
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Certificate validity period in days.
    #[arg(long, default_value = "365")]
    pub days: u32,

    /// Also generate a CA and sign the certificate with it. The CA
    /// certificate can then serve as a client trust store.
    #[arg(long)]
    pub with_ca: bool,

    /// Certificate filename (without .pem extension).
    #[arg(long, default_value = "cert")]
    pub cert_name: String,

    /// Private key filename (without .pem extension).
    #[arg(long, default_value = "key")]
    pub key_name: String,

    /// CA certificate filename (without .pem extension).
    #[arg(long, default_value = "ca")]
    pub ca_name: String,
}

impl GenerateArgs {
    /// Arguments for a certificate covering `localhost` and 127.0.0.1.
    pub fn localhost(output: impl Into<PathBuf>) -> Self {
        Self {
            domain: vec!["localhost".to_string()],
            ip: vec![IpAddr::from([127, 0, 0, 1])],
            output: output.into(),
            days: 365,
            with_ca: true,
            cert_name: "cert".to_string(),
            key_name: "key".to_string(),
            ca_name: "ca".to_string(),
        }
    }
}
