use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub(crate) fn default_filter(debug: bool) -> &'static str {
    if debug {
        "rcupgrade=debug,rcupgrade_installer=debug,rcupgrade_core=debug,warn"
    } else {
        "warn"
    }
}

/// Diagnostics go to stderr so stdout stays the status-line stream.
pub(crate) fn init_logging(debug: bool) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(value) if !value.trim().is_empty() => EnvFilter::new(value),
        _ => EnvFilter::new(default_filter(debug)),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(debug)
        .try_init();
}
