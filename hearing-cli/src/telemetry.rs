use std::sync::OnceLock;

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

static TELEMETRY_INIT: OnceLock<()> = OnceLock::new();

/// Installs the log subscriber once. `RUST_LOG` overrides the default
/// `hearing=info` filter.
pub fn init(verbose: bool) {
    TELEMETRY_INIT.get_or_init(|| {
        let fallback = if verbose {
            "hearing=debug,hearing_core=debug"
        } else {
            "hearing=info,hearing_core=info"
        };
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(fallback))
            .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::INFO.into()));

        if let Err(err) = fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .try_init()
        {
            eprintln!("[telemetry] failed to initialise tracing subscriber: {err}");
        }
    });
}
