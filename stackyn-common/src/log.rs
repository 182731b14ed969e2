use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the sole logging facade for every binary in this workspace,
/// following `gateway/src/main.rs`'s registry setup. `json` selects the
/// structured layer used in production; plain `fmt` otherwise.
pub fn init(json: bool) {
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter_layer);

    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
