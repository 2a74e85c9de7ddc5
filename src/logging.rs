//! Logging macros that set target to "pgcred_proxy" for all log calls.
//!
//! Without an explicit target, tracing uses the full module path
//! (e.g., "pgcred_proxy::server::session"), creating overly verbose logger
//! names when filtering. These macros ensure all logs from this crate use a
//! single "pgcred_proxy" target.

macro_rules! trace {
    ($($arg:tt)*) => { ::tracing::trace!(target: "pgcred_proxy", $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { ::tracing::debug!(target: "pgcred_proxy", $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { ::tracing::info!(target: "pgcred_proxy", $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { ::tracing::warn!(target: "pgcred_proxy", $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { ::tracing::error!(target: "pgcred_proxy", $($arg)*) };
}
