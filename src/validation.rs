//! Validation of operator-supplied station settings.
//!
//! Every value that can reach the network layer (ports, bind addresses, the shared
//! discovery token, fleet size) passes through here before it is applied. Invalid
//! values are rejected synchronously and the caller's state is left untouched.

use std::net::IpAddr;

use crate::pads::codec::TOKEN_LEN;

/// Largest fleet addressable by the one-byte slot index of the discovery datagram.
pub const MAX_FLEET_SIZE: usize = 256;

/// Configuration validation errors with helpful messages
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Port must be between 1 and 65535 (got {0})")]
    PortOutOfRange(i64),

    #[error("Invalid IP address '{0}'")]
    InvalidAddress(String),

    #[error("Shared secret cannot be empty")]
    EmptySecret,

    #[error("Shared secret is too long (maximum {max} bytes)")]
    SecretTooLong { max: usize },

    #[error("Shared secret must be printable ASCII without NUL bytes")]
    SecretNotAscii,

    #[error("Fleet size must be between 1 and {max} (got {got})")]
    FleetSize { got: usize, max: usize },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
}

/// Validate a TCP/UDP port number. Accepts a wide integer so out-of-range operator input
/// (e.g. `70000` or `-1` typed into a dialog) is reported rather than truncated.
pub fn validate_port(port: i64) -> Result<u16, ConfigError> {
    if (1..=65535).contains(&port) {
        Ok(port as u16)
    } else {
        Err(ConfigError::PortOutOfRange(port))
    }
}

/// Parse and validate an IP address string.
pub fn validate_ip(addr: &str) -> Result<IpAddr, ConfigError> {
    addr.trim()
        .parse::<IpAddr>()
        .map_err(|_| ConfigError::InvalidAddress(addr.to_string()))
}

/// Validate the shared discovery token.
///
/// The token travels in a fixed 16-byte, NUL-padded field and is compared after trimming
/// at the first NUL, so it must fit the field and must not contain NUL itself.
pub fn validate_secret(secret: &str) -> Result<(), ConfigError> {
    if secret.is_empty() {
        return Err(ConfigError::EmptySecret);
    }
    if secret.len() > TOKEN_LEN {
        return Err(ConfigError::SecretTooLong { max: TOKEN_LEN });
    }
    if !secret.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
        return Err(ConfigError::SecretNotAscii);
    }
    Ok(())
}

pub fn validate_fleet_size(size: usize) -> Result<(), ConfigError> {
    if (1..=MAX_FLEET_SIZE).contains(&size) {
        Ok(())
    } else {
        Err(ConfigError::FleetSize {
            got: size,
            max: MAX_FLEET_SIZE,
        })
    }
}

pub fn validate_nonzero_ms(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::ZeroDuration { field })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_bounds() {
        assert_eq!(validate_port(1), Ok(1));
        assert_eq!(validate_port(5555), Ok(5555));
        assert_eq!(validate_port(65535), Ok(65535));
        assert_eq!(validate_port(0), Err(ConfigError::PortOutOfRange(0)));
        assert_eq!(validate_port(65536), Err(ConfigError::PortOutOfRange(65536)));
        assert_eq!(validate_port(-1), Err(ConfigError::PortOutOfRange(-1)));
    }

    #[test]
    fn test_ip_parsing() {
        assert!(validate_ip("192.168.4.1").is_ok());
        assert!(validate_ip(" 10.0.0.7 ").is_ok());
        assert!(validate_ip("::1").is_ok());
        assert!(matches!(
            validate_ip("192.168.4"),
            Err(ConfigError::InvalidAddress(_))
        ));
        assert!(validate_ip("pad-a.local").is_err());
    }

    #[test]
    fn test_secret_rules() {
        assert!(validate_secret("RLCU!2025").is_ok());
        assert!(validate_secret("exactly16bytes!!").is_ok());
        assert_eq!(validate_secret(""), Err(ConfigError::EmptySecret));
        assert_eq!(
            validate_secret("seventeen bytes!!"),
            Err(ConfigError::SecretTooLong { max: 16 })
        );
        assert_eq!(validate_secret("bad\0key"), Err(ConfigError::SecretNotAscii));
        assert_eq!(validate_secret("clé"), Err(ConfigError::SecretNotAscii));
    }

    #[test]
    fn test_fleet_size() {
        assert!(validate_fleet_size(1).is_ok());
        assert!(validate_fleet_size(6).is_ok());
        assert!(validate_fleet_size(256).is_ok());
        assert!(validate_fleet_size(0).is_err());
        assert!(validate_fleet_size(257).is_err());
    }
}
