//! Keystore generation for sslwrap.
//!
//! Produces a PEM certificate and private key, either self-signed or issued
//! by a freshly generated CA, so a server role can be stood up without
//! external tooling.
//!
//! # Usage
//!
//! ```bash
//! sslwrap cert generate --domain localhost --ip 127.0.0.1 --with-ca --output ./pki
//! ```

pub mod cli;
pub mod generate;

pub use cli::{CertArgs, CertCommands, GenerateArgs};
pub use generate::{CertError, IssuedCertificate, WrittenFiles, generate, issue};

/// Run the cert CLI with the given arguments.
pub fn run(args: CertArgs) -> Result<(), CertError> {
    match args.command {
        CertCommands::Generate(args) => generate(&args).map(|_| ()),
    }
}
