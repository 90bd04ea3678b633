use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Install the global fmt subscriber. `RUST_LOG` wins over `default_filter` when set.
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

/// Load `.env` from the working directory, falling back to the crate root.
pub fn ensure_dotenv() {
    if dotenv::dotenv().is_ok() {
        return;
    }
    let candidate = format!("{}/.env", env!("CARGO_MANIFEST_DIR"));
    let _ = dotenv::from_filename(candidate);
}
