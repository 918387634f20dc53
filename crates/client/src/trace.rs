//! Client-side trace logging, gated by `NCONF_DEBUG_TRACE_CLIENT`
//! (spec.md §6 "Environment": `GCONF_DEBUG_TRACE_CLIENT` enables client
//! trace logs). Grounded on the daemon crate's feature-gated `info`/
//! `error` free functions, extended here with the env-var check the
//! client side additionally requires: setting the `tracing` feature
//! alone isn't enough, the operator must also opt in per-process.

#[cfg(feature = "tracing")]
fn enabled() -> bool {
    use std::sync::OnceLock;
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        std::env::var("NCONF_DEBUG_TRACE_CLIENT")
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    })
}

#[cfg(feature = "tracing")]
pub(crate) fn trace(message: &str) {
    if enabled() {
        tracing::debug!(target: "client", "{message}");
    }
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn trace(_message: &str) {}
