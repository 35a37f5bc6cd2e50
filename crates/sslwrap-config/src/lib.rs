//! Configuration loading and CLI definitions.
//!
//! A config file is read with [`load_config`] (format chosen by extension:
//! `.toml`, `.json`/`.jsonc`, `.yaml`/`.yml`), command-line flags are layered
//! on top with [`apply_overrides`], and the result is checked with
//! [`validate_config`] before anything is bound.

mod cli;
mod defaults;
mod loader;
mod types;
mod validate;

pub use cli::{CliOverrides, apply_overrides};
pub use loader::{ConfigError, load_config, parse_config};
pub use types::*;
pub use validate::{parse_tls_version, validate_config};
