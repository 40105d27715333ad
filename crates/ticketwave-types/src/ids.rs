//! Identifier newtypes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when an identifier cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseIdError {
    #[error("invalid numeric id: {0}")]
    Numeric(String),

    #[error("invalid fingerprint: {0}")]
    Fingerprint(String),
}

/// Opaque recipient / operator identity as issued by the messaging channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// Row id of a stored ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(pub i64);

/// Monotonically increasing wave id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaveId(pub i64);

macro_rules! numeric_id {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $ty {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<i64>()
                    .map($ty)
                    .map_err(|_| ParseIdError::Numeric(s.to_string()))
            }
        }
    };
}

numeric_id!(UserId);
numeric_id!(TicketId);
numeric_id!(WaveId);

/// Content fingerprint of a ticket file (BLAKE3 of the raw bytes).
///
/// Serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, ParseIdError> {
        let bytes = hex::decode(s).map_err(|_| ParseIdError::Fingerprint(s.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ParseIdError::Fingerprint(s.to_string()))?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_parse() {
        let id: UserId = " 4242 ".parse().expect("parse");
        assert_eq!(id, UserId(4242));
        assert!("@alice".parse::<UserId>().is_err());
    }

    #[test]
    fn test_fingerprint_hex() {
        let fp = Fingerprint([0xab; 32]);
        let hex = fp.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Fingerprint::from_hex(&hex).expect("decode"), fp);
        assert!(Fingerprint::from_hex("abcd").is_err());
    }

    #[test]
    fn test_fingerprint_json() {
        let fp = Fingerprint([7u8; 32]);
        let json = serde_json::to_string(&fp).expect("serialize");
        assert_eq!(json, format!("\"{}\"", "07".repeat(32)));
        let back: Fingerprint = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, fp);
    }
}
