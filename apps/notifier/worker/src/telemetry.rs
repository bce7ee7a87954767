use eyre::{Result, WrapErr};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{EnvFilter, prelude::*};

static METRICS_EXPORTER: OnceCell<SocketAddr> = OnceCell::new();

/// Install color-eyre with file:line locations and no env section.
pub fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

/// Initialize tracing with an ErrorLayer for span capture.
///
/// - Production: JSON, flattened events, no targets
/// - Development: pretty-printed
///
/// `RUST_LOG` overrides the default filter. Safe to call more than once.
pub fn init_tracing(is_production: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if is_production {
            EnvFilter::new("info,sea_orm=warn,sqlx=warn")
        } else {
            EnvFilter::new("debug,sqlx=info")
        }
    });

    let result = if is_production {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .flatten_event(true),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .pretty(),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    };

    if result.is_ok() {
        info!(production = is_production, "Tracing initialized");
    }
}

/// Install the Prometheus recorder and its scrape listener once per process.
pub fn init_metrics(port: u16) -> Result<SocketAddr> {
    let addr = METRICS_EXPORTER.get_or_try_init(|| {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .wrap_err("Failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
        Ok::<_, eyre::Report>(addr)
    })?;
    Ok(*addr)
}
