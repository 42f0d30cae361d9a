use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber. `RUST_LOG` wins over `default_directive`
/// (e.g. `"studio_core=debug,warn"`). Calling this twice is harmless.
pub fn init(default_directive: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)
            .with_context(|| format!("Invalid log directive '{}'", default_directive))?,
    };

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }

    Ok(())
}
