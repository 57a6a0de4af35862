use anyhow::Result;
use env_logger::Builder;
use log::LevelFilter;

/// Install the global logger. The CLI level is the baseline; `RUST_LOG`
/// still applies for per-module overrides.
pub fn setup(level: LevelFilter) -> Result<()> {
    let mut builder = Builder::new();

    builder.filter_level(level);
    builder.parse_default_env();
    builder.try_init()?;

    Ok(())
}
