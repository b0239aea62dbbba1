use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "analytics_service=info,energy_client=info,tower_http=info";

/// Installs the global fmt subscriber. `RUST_LOG` replaces the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
