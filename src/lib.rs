pub mod config;
pub mod jobs;
pub mod ledger;
pub mod metrics;
pub mod model;
pub mod report;
pub mod sources;
pub mod stats;
pub mod store;

/// Installs the global tracing subscriber. `RUST_LOG` overrides the default
/// filter; setting `GW2_LOG_JSON` switches to JSON lines.
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gw2_analyzer=info"));

    let json_logging = std::env::var("GW2_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
