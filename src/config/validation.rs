#![allow(clippy::collapsible_if)]

use std::{net::SocketAddr, path::Path, time::Duration};

use eyre::Result;

use crate::config::models::{AppConfig, bind_address};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Address conflict: {message}")]
    AddressConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Whole-stack configuration validator
pub struct AppConfigValidator;

impl AppConfigValidator {
    /// Validate the configuration, reporting every problem at once
    pub fn validate(config: &AppConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        let server = Self::validate_listen_address("server_addr", &config.server_addr);
        let balancer =
            Self::validate_listen_address("load_balancer_addr", &config.load_balancer_addr);
        match (server, balancer) {
            (Ok(server), Ok(balancer)) => {
                if server.port() == balancer.port()
                    && (server.ip() == balancer.ip()
                        || server.ip().is_unspecified()
                        || balancer.ip().is_unspecified())
                {
                    errors.push(ValidationError::AddressConflict {
                        message: format!(
                            "server_addr '{}' and load_balancer_addr '{}' overlap",
                            config.server_addr, config.load_balancer_addr
                        ),
                    });
                }
            }
            (server, balancer) => {
                errors.extend(server.err());
                errors.extend(balancer.err());
            }
        }

        if config.root_path.trim().is_empty() {
            errors.push(ValidationError::InvalidField {
                field: "root_path".to_string(),
                message: "Static root must not be empty".to_string(),
            });
        }

        if let Some(dir) = &config.blob_dir {
            if !Path::new(dir).is_dir() {
                errors.push(ValidationError::InvalidField {
                    field: "blob_dir".to_string(),
                    message: format!("Blob directory '{dir}' does not exist"),
                });
            }
        }

        let prefix = config.proxy.api_prefix.trim_end_matches('/');
        if !prefix.starts_with('/') || prefix.len() < 2 {
            errors.push(ValidationError::InvalidField {
                field: "proxy.api_prefix".to_string(),
                message: "API prefix must start with '/' and name a path segment".to_string(),
            });
        }

        for (field, value) in [
            ("proxy.idle_timeout", &config.proxy.idle_timeout),
            ("proxy.shutdown_grace", &config.proxy.shutdown_grace),
            ("session.lifetime", &config.session.lifetime),
        ] {
            if let Err(e) = Self::validate_duration(field, value) {
                errors.push(e);
            }
        }

        if config.session.cookie_name.is_empty()
            || !config
                .session
                .cookie_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            errors.push(ValidationError::InvalidField {
                field: "session.cookie_name".to_string(),
                message: "Cookie names may only contain ASCII letters, digits, '_' and '-'"
                    .to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate a listen address, accepting the Go-style `:PORT` form
    fn validate_listen_address(field: &str, address: &str) -> ValidationResult<SocketAddr> {
        bind_address(address)
            .parse::<SocketAddr>()
            .map_err(|_| ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: format!(
                    "{field} must be in format 'IP:PORT' or ':PORT' (e.g., '127.0.0.1:8081' or ':8080')"
                ),
            })
    }

    fn validate_duration(field: &str, value: &str) -> ValidationResult<Duration> {
        match humantime::parse_duration(value) {
            Ok(duration) if duration.is_zero() => Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: "Duration must be greater than zero".to_string(),
            }),
            Ok(duration) => Ok(duration),
            Err(e) => Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("Invalid duration '{value}': {e}"),
            }),
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
