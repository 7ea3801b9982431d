//! Structured logging init. A deliberately small slice of the teacher's
//! `telemetry.rs`: the full OpenTelemetry OTLP exporter pipeline isn't
//! grounded in anything this crate needs, so only the `tracing_subscriber`
//! registry survives (see `DESIGN.md`).

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the global `tracing` subscriber. `RUST_LOG` controls verbosity;
/// defaults to `info` for this crate and `warn` elsewhere.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,yubikey_valsrv=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
