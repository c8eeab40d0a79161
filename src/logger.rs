//! Centralized logging configuration for applications embedding the odometry core
//!
//! The library itself only emits `tracing` events (`debug!`/`trace!` from the feature
//! tracks, `warn!` from problem assembly). Installing a subscriber is left to the
//! application; these helpers provide the standard one.

use tracing::Level;

/// Initialize the tracing subscriber with the crate's standard configuration
///
/// Default log level: INFO (overrideable via RUST_LOG environment variable)
///
/// # Example
/// ```no_run
/// use lidar_gp_odometry::init_logger;
///
/// fn main() {
///     init_logger();
///     tracing::info!("Odometry started");
/// }
/// ```
///
/// # Environment Variables
/// Override the default log level using `RUST_LOG`:
/// ```bash
/// RUST_LOG=lidar_gp_odometry=trace cargo bench
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level
///
/// Calling this more than once is harmless: later calls leave the first subscriber in
/// place.
///
/// # Arguments
/// * `default_level` - The default log level (overrideable via RUST_LOG)
///
/// # Example
/// ```no_run
/// use lidar_gp_odometry::init_logger_with_level;
/// use tracing::Level;
///
/// fn main() {
///     init_logger_with_level(Level::DEBUG);
///     tracing::debug!("Debug logging enabled");
/// }
/// ```
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    let result = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        // [LEVEL: date:time module]
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();

    if result.is_err() {
        tracing::debug!("global tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logger_twice_does_not_panic() {
        init_logger_with_level(Level::WARN);
        init_logger();
    }
}
