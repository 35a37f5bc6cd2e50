//! CLI override definitions and application logic.

use clap::Args;

use crate::Config;

#[derive(Debug, Clone, Args, Default)]
pub struct CliOverrides {
    /// Override listen address, e.g. 0.0.0.0:8443
    #[arg(long)]
    pub listen: Option<String>,
    /// Override plaintext backend address, e.g. 127.0.0.1:8080
    #[arg(long)]
    pub backend: Option<String>,
    /// Override TLS cert path
    #[arg(long)]
    pub tls_cert: Option<String>,
    /// Override TLS key path
    #[arg(long)]
    pub tls_key: Option<String>,
    /// CA bundle for verifying client certificates
    #[arg(long)]
    pub tls_truststore: Option<String>,
    /// Restricted cipher list (colon or comma separated)
    #[arg(long)]
    pub tls_ciphers: Option<String>,
    /// Minimum TLS version (tls12, tls13)
    #[arg(long)]
    pub tls_min_version: Option<String>,
    /// Maximum TLS version (tls12, tls13)
    #[arg(long)]
    pub tls_max_version: Option<String>,
    /// Override ALPN list (repeatable or comma-separated)
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub alpn: Option<Vec<String>>,
    /// Override TLS handshake timeout (seconds)
    #[arg(long)]
    pub handshake_timeout_secs: Option<u64>,
    /// Override idle timeout (seconds, 0 = disabled)
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,
    /// Override the write high-water mark (bytes)
    #[arg(long)]
    pub high_water_mark: Option<usize>,
    /// TCP listener backlog size
    #[arg(long)]
    pub backlog: Option<u32>,
    /// Set TCP_NODELAY on accepted sockets
    #[arg(long)]
    pub no_delay: Option<bool>,
    /// Override metrics listen address
    #[arg(long)]
    pub metrics_listen: Option<String>,
    /// Override log level (trace/debug/info/warn/error)
    #[arg(long)]
    pub log_level: Option<String>,
}

pub fn apply_overrides(config: &mut Config, overrides: &CliOverrides) {
    if let Some(v) = &overrides.listen {
        config.server.listen = v.clone();
    }
    if let Some(v) = &overrides.backend {
        config.server.backend = v.clone();
    }
    if let Some(v) = overrides.handshake_timeout_secs {
        config.server.handshake_timeout_secs = v;
    }
    if let Some(v) = overrides.idle_timeout_secs {
        config.server.idle_timeout_secs = v;
    }
    if let Some(v) = overrides.high_water_mark {
        config.server.high_water_mark = v;
    }
    if let Some(v) = overrides.backlog {
        config.server.backlog = v;
    }
    if let Some(v) = overrides.no_delay {
        config.server.no_delay = v;
    }
    if let Some(v) = &overrides.tls_cert {
        config.tls.cert = v.clone();
    }
    if let Some(v) = &overrides.tls_key {
        config.tls.key = v.clone();
    }
    if let Some(v) = &overrides.tls_truststore {
        config.tls.truststore = Some(v.clone());
    }
    if let Some(v) = &overrides.tls_ciphers {
        config.tls.ciphers = Some(v.clone());
    }
    if let Some(v) = &overrides.tls_min_version {
        config.tls.min_version = v.clone();
    }
    if let Some(v) = &overrides.tls_max_version {
        config.tls.max_version = v.clone();
    }
    if let Some(v) = &overrides.alpn {
        config.tls.alpn = v.clone();
    }
    if let Some(v) = &overrides.metrics_listen {
        config.metrics.listen = Some(v.clone());
    }
    if let Some(v) = &overrides.log_level {
        config.logging.level = Some(v.clone());
    }
}
