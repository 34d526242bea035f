use std::env::VarError;
use std::str::FromStr;

use crate::error::ConfigError;

/// Read an environment variable, treating "unset" as `None`.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "not valid unicode".to_string(),
        }),
    }
}

/// Parse an optional value, reporting the key on failure.
pub(crate) fn parse_value<T>(key: &str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|s| s.trim().parse::<T>())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

/// Parse an optional `true`/`false` flag.
pub(crate) fn parse_bool(key: &str, value: Option<String>) -> Result<Option<bool>, ConfigError> {
    parse_value::<bool>(key, value).map_err(|e| match e {
        ConfigError::InvalidValue { key, message } => ConfigError::InvalidValue {
            key,
            message: format!("must be 'true' or 'false': {message}"),
        },
    })
}

/// Split a comma separated list, dropping empty items.
pub(crate) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
