//! Process-wide log output.

use tracing_subscriber::EnvFilter;

use crate::config::ProcessConfig;

/// Install the global subscriber. Later calls are ignored, so every process
/// role may call this during startup.
pub fn init(config: &ProcessConfig) {
    let filter = EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(crate::config::DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init();
}
