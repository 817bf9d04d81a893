mod settings;

use config::{Config, ConfigError, Environment, File};
use tracing::debug;

use crate::config::settings::PartialSettings;

pub use settings::{
    CallbackSettings, LogSettings, ServerSettings, Settings, UpstreamSettings,
};

/// Default configuration file, relative to the working directory. Any format
/// the `config` crate understands (`default.toml`, `default.yaml`, ...).
pub const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Prefix for environment overrides, e.g. `MQGATE__SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "MQGATE";

/// Loads the configuration from the default file and environment variables.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(DEFAULT_CONFIG_FILE)
}

/// Loads the configuration with `path` as the configuration file.
///
/// Precedence, lowest first: built-in defaults, environment variables (after
/// reading `.env` if present), then the file. A missing file is not an error.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    if let Ok(env_file) = dotenvy::dotenv() {
        debug!("loaded environment from {}", env_file.display());
    }

    let builder = Config::builder()
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .add_source(File::with_name(path).required(false));

    let config = builder.build()?;

    // Try to deserialize what is available, then merge with defaults
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_with_defaults())
}

#[cfg(test)]
mod tests;
