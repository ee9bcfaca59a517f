use crate::conf::validation::validate_config;
use crate::conf::{AmqpwayConfig, ConfigError, ConfigOverrides};
use std::fs;
use std::path::Path;

/// Load the config file (defaults when `path` is `None`), apply command-line
/// overrides and validate the result.
pub fn load_config(
    path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<AmqpwayConfig, ConfigError> {
    //--------------------------------------------------------------------------
    // Hard fail: IO and parsing
    //--------------------------------------------------------------------------
    let mut config = match path {
        Some(path) => {
            let raw =
                fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
            parse_config(&raw, path)?
        }
        None => AmqpwayConfig::default(),
    };

    //--------------------------------------------------------------------------
    // Command line wins over the file
    //--------------------------------------------------------------------------
    overrides.apply(&mut config);

    //--------------------------------------------------------------------------
    // Semantic validation (aggregate all errors)
    //--------------------------------------------------------------------------
    validate_config(&config).map_err(|errors| ConfigError::Validation { errors })?;

    Ok(config)
}

/// Parse TOML text. `origin` is only used for error messages.
pub fn parse_config(raw: &str, origin: &Path) -> Result<AmqpwayConfig, ConfigError> {
    toml::from_str(raw).map_err(|e| ConfigError::parse(origin, e))
}
