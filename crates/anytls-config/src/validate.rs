//! Configuration validation.

use crate::loader::ConfigError;
use crate::types::Config;

/// Validate a loaded (or synthesised) configuration.
///
/// Standalone mode only needs a password; panel mode needs the full API
/// triple. Listen address syntax is left to the bind call.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.standalone {
        if config.password.is_empty() {
            return Err(ConfigError::Validation(
                "standalone mode requires a password".into(),
            ));
        }
        return Ok(());
    }

    if config.api_host.is_empty() {
        return Err(ConfigError::Validation("api_host must not be empty".into()));
    }
    if config.api_token.is_empty() {
        return Err(ConfigError::Validation(
            "api_token must not be empty".into(),
        ));
    }
    if config.node_id <= 0 {
        return Err(ConfigError::Validation(
            "node_id must be greater than 0".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_mode_requires_api_fields() {
        let mut cfg = Config::default();
        assert!(validate_config(&cfg).is_err());

        cfg.api_host = "http://panel".into();
        cfg.api_token = "tok".into();
        assert!(validate_config(&cfg).is_err()); // node_id still 0

        cfg.node_id = 3;
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn standalone_requires_password_only() {
        let cfg = Config::standalone("hunter2".into(), None);
        assert!(validate_config(&cfg).is_ok());

        let empty = Config::standalone(String::new(), None);
        assert!(validate_config(&empty).is_err());
    }
}
