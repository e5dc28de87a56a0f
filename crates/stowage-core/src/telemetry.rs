use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize standard tracing.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` is used (e.g.
/// `"stowage_storage=debug"`). Calling this more than once is harmless, which
/// lets every test binary call it freely.
pub fn init_tracing(default_filter: &str) {
    let result = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_ok() {
        tracing::debug!(default_filter, "Tracing initialized");
    }
}
