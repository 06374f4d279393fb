//! Interface name validation.

use crate::ParseError;
use once_cell::sync::Lazy;
use regex::Regex;

/// Longest accepted interface name.
pub const INTERFACE_NAME_MAX_LEN: usize = 255;

/// Word characters, dash, dot and colon only. This is a last-resort check;
/// callers that know the interface type may apply stricter rules.
static INTERFACE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w\-_.:]+$").expect("Invalid regex pattern"));

/// Checks an interface name against the allowed charset and length.
pub fn validate_interface_name(name: &str) -> Result<(), ParseError> {
    if name.is_empty()
        || name.len() > INTERFACE_NAME_MAX_LEN
        || !INTERFACE_NAME_RE.is_match(name)
    {
        return Err(ParseError::InvalidInterfaceName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["eth0", "br-eth0", "bond0.100", "enp0s31f6", "eth0:1", "unknown.42"] {
            assert!(validate_interface_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_invalid_names() {
        assert!(validate_interface_name("").is_err());
        assert!(validate_interface_name("eth 0").is_err());
        assert!(validate_interface_name("eth0;rm").is_err());
        assert!(validate_interface_name(&"x".repeat(256)).is_err());
    }
}
