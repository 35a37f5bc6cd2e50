//! Cipher list parsing and crypto provider restriction.

use std::sync::Arc;

use rustls::SupportedCipherSuite;
use rustls::crypto::CryptoProvider;
use tracing::debug;

use crate::error::SetupError;

/// The process-wide crypto provider, or aws-lc-rs if none is installed.
pub fn default_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Split a cipher list on `:`, `,` or whitespace.
pub fn parse_cipher_list(list: &str) -> Vec<&str> {
    list.split(|c: char| c == ':' || c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Suite identifier as rustls prints it, e.g. `TLS13_AES_128_GCM_SHA256`.
pub fn suite_name(suite: &SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

/// Resolve every entry of `list` against the provider's suites.
///
/// Fails if the list is empty or any entry is unknown.
pub fn select_suites(
    provider: &CryptoProvider,
    list: &str,
) -> Result<Vec<SupportedCipherSuite>, SetupError> {
    let names = parse_cipher_list(list);
    if names.is_empty() {
        return Err(SetupError::InvalidCiphers(list.to_string()));
    }

    let mut selected = Vec::with_capacity(names.len());
    let mut not_found = Vec::new();
    for name in &names {
        // Match by exact Debug name, or a suffix of it
        match provider.cipher_suites.iter().find(|s| {
            let debug_name = suite_name(s);
            debug_name.eq_ignore_ascii_case(name) || debug_name.ends_with(name)
        }) {
            Some(suite) => {
                if !selected
                    .iter()
                    .any(|s: &SupportedCipherSuite| s.suite() == suite.suite())
                {
                    selected.push(*suite);
                }
            }
            None => not_found.push(*name),
        }
    }

    if !not_found.is_empty() {
        debug!(
            not_found = ?not_found,
            available = ?provider.cipher_suites.iter().map(suite_name).collect::<Vec<_>>(),
            "cipher suites not supported"
        );
        return Err(SetupError::InvalidCiphers(not_found.join(":")));
    }
    Ok(selected)
}

/// Whether `list` is non-empty and fully supported by `provider`.
pub fn validate_cipher_list(provider: &CryptoProvider, list: &str) -> bool {
    select_suites(provider, list).is_ok()
}

/// Narrow `base` to the suites named in `list`; `None` keeps every suite.
pub fn restrict_provider(
    base: Arc<CryptoProvider>,
    list: Option<&str>,
) -> Result<Arc<CryptoProvider>, SetupError> {
    let Some(list) = list else {
        return Ok(base);
    };
    let cipher_suites = select_suites(&base, list)?;
    Ok(Arc::new(CryptoProvider {
        cipher_suites,
        ..(*base).clone()
    }))
}
