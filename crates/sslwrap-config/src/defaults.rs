//! Default value functions for serde deserialization.
//!
//! These functions forward to constants defined in `sslwrap_core::defaults`.

use sslwrap_core::defaults;

/// Generate default value functions that forward to sslwrap_core::defaults constants.
macro_rules! default_fns {
    ($($fn_name:ident => $const_name:ident : $ty:ty),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> $ty {
                defaults::$const_name
            }
        )*
    };
}

/// Generate default value functions that return String from &str constants.
macro_rules! default_string_fns {
    ($($fn_name:ident => $const_name:ident),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> String {
                defaults::$const_name.to_string()
            }
        )*
    };
}

default_fns! {
    default_handshake_timeout_secs => DEFAULT_TLS_HANDSHAKE_TIMEOUT_SECS: u64,
    default_idle_timeout_secs      => DEFAULT_IDLE_TIMEOUT_SECS: u64,
    default_shutdown_timeout_secs  => DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64,
    default_high_water_mark        => DEFAULT_HIGH_WATER_MARK: usize,
    default_connection_backlog     => DEFAULT_CONNECTION_BACKLOG: u32,
    default_tcp_no_delay           => DEFAULT_TCP_NO_DELAY: bool,
}

default_string_fns! {
    default_min_tls_version => DEFAULT_TLS_MIN_VERSION,
    default_max_tls_version => DEFAULT_TLS_MAX_VERSION,
}
