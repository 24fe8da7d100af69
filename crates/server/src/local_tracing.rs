use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the process-wide subscriber. `MODCDN_LOG` takes the usual
/// tracing directive syntax; the default level is `info`.
pub fn init() {
    let filter = EnvFilter::try_from_env("MODCDN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
}
