pub(crate) mod metrics;

#[cfg(test)]
pub(crate) mod test_util;

/// Initialize the process wide logger. `RUST_LOG` overrides the default info level.
pub fn init_globals() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .target(env_logger::Target::Stdout)
        .parse_default_env()
        .init();
}
