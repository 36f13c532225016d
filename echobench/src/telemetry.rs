//! Optional Prometheus telemetry for the three binaries.
//!
//! This is ambient observability, not a feature the specification's
//! Non-goals exclude (those name TLS, authentication, request framing, and
//! result persistence beyond the CSV log). Each binary installs an exporter
//! only when `--telemetry-addr` is supplied; without it, `metrics` macros
//! still compile and run, they simply have no recorder installed and are
//! silently dropped.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Errors installing the Prometheus exporter.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The exporter failed to bind its HTTP listener.
    #[error("failed to install prometheus exporter: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}

/// Install a Prometheus exporter bound to `addr`, if one was requested.
///
/// # Errors
///
/// Returns [`Error`] if the exporter fails to bind its listener.
pub fn install(addr: Option<SocketAddr>) -> Result<(), Error> {
    let Some(addr) = addr else {
        return Ok(());
    };
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    info!(%addr, "prometheus exporter installed");
    Ok(())
}
