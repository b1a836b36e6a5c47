mod settings;

use config::{Config, Environment, File};

use crate::utils::Result;

pub use settings::{
    AuthMode, ClientSettings, DEFAULT_ADDRESS, DEFAULT_KEEPALIVE, DEFAULT_PORT,
    DEFAULT_TLS_PORT, Endpoint, LogSettings, NetConfig, PartialSettings, Settings,
};

/// Loads the configuration from `config/default` (any format the `config`
/// crate understands, optional) and `HOMEBUS__*` environment variables,
/// then fills the gaps from `Settings::default()`.
///
/// `HOMEBUS__NET__ADDRESS=tcp+tls://hub:23443` sets `net.address`.
pub fn load_config() -> Result<Settings> {
    load_config_from("config/default")
}

/// Like [`load_config`], reading the file at `path` instead.
pub fn load_config_from(path: &str) -> Result<Settings> {
    let config = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("HOMEBUS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let partial: PartialSettings = config.try_deserialize()?;
    Ok(partial.merge(Settings::default()))
}

#[cfg(test)]
mod tests;
