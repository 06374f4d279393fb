//! Error types for interface and address operations.
//!
//! Every variant maps to one [`ErrorKind`], which is what callers match on
//! to pick a request-level failure. The remaining fields are structured
//! detail for logs; nothing here is meant to be shown to end users as-is.

use metalnet_types::ParseError;
use thiserror::Error;

/// Result type alias for core operations.
pub type NetResult<T> = Result<T, NetError>;

/// Machine-checkable classification of a [`NetError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidComposition,
    ValidationFailure,
    OutOfRange,
    AddressUnavailable,
    PoolExhausted,
    NoSubnet,
    NotFound,
}

/// Errors that can occur while mutating interfaces or address links.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    /// Parent type, parent cardinality or cross-node parent violation.
    #[error("Invalid composition for {interface}: {message}")]
    InvalidComposition {
        /// Interface being created or modified.
        interface: String,
        /// What rule was broken.
        message: String,
    },

    /// Field-level failure: blank required field, bad format, duplicate MAC.
    #[error("Invalid value for {field}: {message}")]
    ValidationFailure {
        /// The offending field.
        field: String,
        /// Error message.
        message: String,
    },

    /// Requested static address lies outside its subnet or inside a
    /// dynamic range.
    #[error("IP address {ip} is out of range: {message}")]
    OutOfRange {
        /// The requested address.
        ip: String,
        /// Why it was rejected.
        message: String,
    },

    /// Requested exact address is already claimed.
    #[error("IP address {ip} is already in use")]
    AddressUnavailable {
        /// The requested address.
        ip: String,
    },

    /// No free address remains in the subnet.
    #[error("No more IP addresses available in subnet {subnet}")]
    PoolExhausted {
        /// CIDR of the exhausted subnet.
        subnet: String,
    },

    /// An AUTO claim or a STATIC allocation has no subnet to draw from.
    #[error("IP address cannot be allocated on {interface} without an associated subnet")]
    NoSubnet {
        /// Interface holding the subnet-less link.
        interface: String,
    },

    /// Referenced entity does not exist.
    #[error("{entity} {key} not found")]
    NotFound {
        /// Entity kind ("interface", "link", "subnet", ...).
        entity: &'static str,
        /// Lookup key.
        key: String,
    },
}

impl NetError {
    /// Creates an invalid composition error.
    pub fn invalid_composition(interface: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidComposition {
            interface: interface.into(),
            message: message.into(),
        }
    }

    /// Creates a field validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationFailure {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn out_of_range(ip: impl ToString, message: impl Into<String>) -> Self {
        Self::OutOfRange {
            ip: ip.to_string(),
            message: message.into(),
        }
    }

    pub fn address_unavailable(ip: impl ToString) -> Self {
        Self::AddressUnavailable { ip: ip.to_string() }
    }

    pub fn pool_exhausted(subnet: impl ToString) -> Self {
        Self::PoolExhausted {
            subnet: subnet.to_string(),
        }
    }

    pub fn no_subnet(interface: impl Into<String>) -> Self {
        Self::NoSubnet {
            interface: interface.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Returns the classification callers dispatch on.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NetError::InvalidComposition { .. } => ErrorKind::InvalidComposition,
            NetError::ValidationFailure { .. } => ErrorKind::ValidationFailure,
            NetError::OutOfRange { .. } => ErrorKind::OutOfRange,
            NetError::AddressUnavailable { .. } => ErrorKind::AddressUnavailable,
            NetError::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            NetError::NoSubnet { .. } => ErrorKind::NoSubnet,
            NetError::NotFound { .. } => ErrorKind::NotFound,
        }
    }
}

impl From<ParseError> for NetError {
    fn from(err: ParseError) -> Self {
        let field = match &err {
            ParseError::InvalidMacAddress(_) => "mac_address",
            ParseError::InvalidIpAddress(_) => "ip",
            ParseError::InvalidCidr(_) => "cidr",
            ParseError::InvalidVid(_) => "vid",
            ParseError::InvalidInterfaceName(_) => "name",
        };
        NetError::validation(field, err.to_string())
    }
}
