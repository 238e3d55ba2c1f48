mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{ConnectionSettings, LoggingSettings, ServerSettings, Settings};

/// Loads the configuration from `config/default` and `MESSAGER__*` environment variables,
/// merged over `Settings::default()`.
///
/// Nested keys use a double underscore, e.g. `MESSAGER__CONNECTION__RETRY_MAX_MS=2000`.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("MESSAGER")
                .prefix_separator("__")
                .separator("__"),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_over(Settings::default()))
}
