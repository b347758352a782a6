//! Configuration loading helper functions
//!
//! Layers, lowest priority first: `T::default()`, the config file (format
//! picked by extension), then `<PREFIX>_`-prefixed environment variables.
//! Nested keys in the environment use a double underscore, e.g.
//! `METERSRV_SERIAL__PORT=/dev/ttyUSB0`.

use errors::{MeterError, MeterResult};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Build the layered figment without extracting it
pub fn figment_for<T>(path: Option<&Path>, env_prefix: &str) -> MeterResult<Figment>
where
    T: Serialize + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = path {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                MeterError::Configuration(format!(
                    "Config file {} must have an extension",
                    path.display()
                ))
            })?;

        figment = match extension {
            "toml" => figment.merge(Toml::file(path)),
            "yaml" | "yml" => figment.merge(Yaml::file(path)),
            "json" => figment.merge(Json::file(path)),
            other => {
                return Err(MeterError::Configuration(format!(
                    "Unsupported config file format: {}",
                    other
                )))
            },
        };

        if path.exists() {
            info!("Config: {}", path.display());
        } else {
            debug!("Config file {} not found, using defaults", path.display());
        }
    }

    Ok(figment.merge(Env::prefixed(&format!("{}_", env_prefix.to_uppercase())).split("__")))
}

/// Load configuration: defaults < file < environment
pub fn load_config<T>(path: Option<&Path>, env_prefix: &str) -> MeterResult<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    figment_for::<T>(path, env_prefix)?
        .extract()
        .map_err(|e| MeterError::Configuration(format!("Failed to load configuration: {}", e)))
}
