use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::TryInitError;

const DEFAULT_FILTER: &str = "info,sluice_core=debug";

/// Initialize a stdout tracing subscriber. `RUST_LOG` overrides the default
/// filter.
///
/// # Panics
///
/// Panics if a global subscriber is already set.
pub fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(filter()).init();
}

/// Like [`init_tracing`], but reports an already installed subscriber
/// instead of panicking.
pub fn try_init_tracing() -> Result<(), TryInitError> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(filter())
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
