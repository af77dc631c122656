//! Configuration validation utilities.

use std::collections::HashSet;

use onecat_core::BindingConfig;

use super::error::{ConfigError, ConfigResult};
use super::schema::{ClientSection, OnecatConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &OnecatConfig) -> ConfigResult<()> {
    validate_client_section(&config.client)?;
    validate_bindings(&config.bindings)?;
    Ok(())
}

fn validate_client_section(client: &ClientSection) -> ConfigResult<()> {
    if client.action_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "client.action_timeout_ms must be greater than 0",
        ));
    }

    let reconnect = &client.reconnect;
    if reconnect.base_delay_ms == 0 {
        return Err(ConfigError::validation(
            "client.reconnect.base_delay_ms must be greater than 0",
        ));
    }
    if reconnect.max_delay_ms < reconnect.base_delay_ms {
        return Err(ConfigError::validation(
            "client.reconnect.max_delay_ms must be at least base_delay_ms",
        ));
    }

    Ok(())
}

/// Names must be present and unique, disabled bindings included.
fn validate_bindings(bindings: &[BindingConfig]) -> ConfigResult<()> {
    let mut seen = HashSet::new();

    for binding in bindings {
        let name = binding.name();
        if name.trim().is_empty() {
            return Err(ConfigError::missing_field("bindings[].name"));
        }
        if !seen.insert(name) {
            return Err(ConfigError::DuplicateBinding(name.to_string()));
        }
        // Servers may bind port 0; clients need a real remote port.
        if binding.kind().is_client() && binding.port() == 0 {
            return Err(ConfigError::InvalidPort {
                name: name.to_string(),
                port: 0,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use onecat_core::{HttpClientConfig, WsClientConfig, WsServerConfig};

    fn config_with(bindings: Vec<BindingConfig>) -> OnecatConfig {
        OnecatConfig {
            bindings,
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config() {
        let mut server = WsServerConfig::new("inbound");
        server.port = 0;
        let config = config_with(vec![
            WsClientConfig::new("main").into(),
            BindingConfig::WsServer(server),
        ]);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_duplicate_names() {
        let config = config_with(vec![
            WsClientConfig::new("main").into(),
            HttpClientConfig::new("main").into(),
        ]);
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::DuplicateBinding(name)) if name == "main"
        ));
    }

    #[test]
    fn test_empty_name() {
        let config = config_with(vec![WsClientConfig::new("  ").into()]);
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_client_port_zero() {
        let mut client = WsClientConfig::new("main");
        client.port = 0;
        let config = config_with(vec![client.into()]);
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidPort { port: 0, .. })
        ));
    }

    #[test]
    fn test_reconnect_bounds() {
        let mut config = OnecatConfig::default();
        config.client.reconnect.base_delay_ms = 5_000;
        config.client.reconnect.max_delay_ms = 1_000;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Validation { .. })
        ));

        let mut config = OnecatConfig::default();
        config.client.action_timeout_ms = 0;
        assert!(validate_config(&config).is_err());
    }
}
