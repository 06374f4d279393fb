//! 802.1Q VLAN tag with validation.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// IEEE 802.1Q VLAN tag (0-4094).
///
/// Tag 0 denotes the untagged VLAN every fabric starts with. 4095 is
/// reserved by the standard and rejected.
///
/// # Examples
///
/// ```
/// use metalnet_types::Vid;
///
/// let vid = Vid::new(100).unwrap();
/// assert_eq!(vid.as_u16(), 100);
/// assert!(Vid::UNTAGGED.is_untagged());
/// assert!(Vid::new(4095).is_err());
/// assert_eq!("untagged".parse::<Vid>().unwrap(), Vid::UNTAGGED);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Vid(u16);

impl Vid {
    pub const MAX: u16 = 4094;

    /// The untagged VLAN.
    pub const UNTAGGED: Vid = Vid(0);

    pub fn new(id: u16) -> Result<Self, ParseError> {
        Vid::try_from(id)
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    pub const fn is_untagged(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Vid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Vid {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("untagged") {
            return Ok(Vid::UNTAGGED);
        }
        let id: u16 = trimmed
            .parse()
            .map_err(|_| ParseError::InvalidVid(s.to_string()))?;
        if id > Self::MAX {
            return Err(ParseError::InvalidVid(s.to_string()));
        }
        Ok(Vid(id))
    }
}

impl TryFrom<u16> for Vid {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        if id > Self::MAX {
            return Err(ParseError::InvalidVid(id.to_string()));
        }
        Ok(Vid(id))
    }
}

impl From<Vid> for u16 {
    fn from(vid: Vid) -> u16 {
        vid.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_range() {
        assert!(Vid::new(0).is_ok());
        assert!(Vid::new(4094).is_ok());
        assert!(Vid::new(4095).is_err());
        assert!(Vid::try_from(65535).is_err());
    }

    #[test]
    fn test_parse() {
        assert_eq!("42".parse::<Vid>().unwrap().as_u16(), 42);
        assert_eq!(" UNTAGGED ".parse::<Vid>().unwrap(), Vid::UNTAGGED);
        assert!("vlan42".parse::<Vid>().is_err());
        assert!("5000".parse::<Vid>().is_err());
    }

    #[test]
    fn test_ordering_and_display() {
        let low = Vid::new(10).unwrap();
        let high = Vid::new(20).unwrap();
        assert!(low < high);
        assert_eq!(high.to_string(), "20");
    }
}
