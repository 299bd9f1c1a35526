/*!
 * Logging initialization
 */

use tracing_subscriber::EnvFilter;

/// Initialize structured logging to stderr, keeping stdout for command
/// output. `RUST_LOG` overrides the default level.
pub fn init(verbose: bool) {
    let default_level = if verbose {
        "blockdb=debug,blockdb_core_index=debug"
    } else {
        "blockdb=info,blockdb_core_index=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
