use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install a console subscriber reading `STAMPEDE_LOG_LEVEL` (default
/// `info`). Safe to call from every test and binary; only the first call
/// wins, and a subscriber installed by the embedding harness is left alone.
pub fn init_default_logging() {
    INIT.call_once(|| {
        let level = std::env::var("STAMPEDE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
