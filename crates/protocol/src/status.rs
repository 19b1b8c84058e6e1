//! Remote call outcome

use std::fmt;

use crate::Result;
use crate::error::ProtocolError;

/// Outcome reported by the receiving side of an append call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteStatus {
    /// Events were accepted into every required queue
    Ok,
    /// Events were not accepted; the caller keeps ownership
    Error,
}

impl RemoteStatus {
    /// Wire discriminant
    #[inline]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Error => 1,
        }
    }

    /// Parse a wire discriminant
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Ok),
            1 => Ok(Self::Error),
            other => Err(ProtocolError::InvalidStatus(other)),
        }
    }

    #[inline]
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::Error => f.write_str("ERROR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(RemoteStatus::from_u8(0).unwrap(), RemoteStatus::Ok);
        assert_eq!(RemoteStatus::from_u8(1).unwrap(), RemoteStatus::Error);
        assert!(matches!(
            RemoteStatus::from_u8(2),
            Err(ProtocolError::InvalidStatus(2))
        ));
        assert!(RemoteStatus::Ok.is_ok());
        assert!(!RemoteStatus::Error.is_ok());
    }
}
