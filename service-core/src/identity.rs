//! Account identities.
//!
//! An identity is the 20-byte public address a wallet hands out. It keys every
//! balance lookup and usage record, and is never minted by this system.

use ethers::types::Address;
use ethers::utils::to_checksum;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Reasons an address string is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("address must be 40 hexadecimal digits with an optional 0x prefix")]
    Malformed,

    #[error("mixed-case address does not match its checksum")]
    BadChecksum,
}

/// A well-formed account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity(Address);

impl Identity {
    pub fn new(address: Address) -> Self {
        Self(address)
    }

    pub fn address(&self) -> Address {
        self.0
    }

    /// EIP-55 checksummed rendering, `0x`-prefixed.
    pub fn checksummed(&self) -> String {
        to_checksum(&self.0, None)
    }
}

impl From<Address> for Identity {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    /// Accepts `0x`-prefixed or bare hex. All-lowercase and all-uppercase
    /// bodies skip checksum validation; mixed case must match EIP-55.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.strip_prefix("0x").unwrap_or(s);

        if body.len() != 40 || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(IdentityError::Malformed);
        }

        let address = Address::from_str(body).map_err(|_| IdentityError::Malformed)?;

        let has_lower = body.bytes().any(|b| b.is_ascii_lowercase());
        let has_upper = body.bytes().any(|b| b.is_ascii_uppercase());
        if has_lower && has_upper && to_checksum(&address, None)[2..] != *body {
            return Err(IdentityError::BadChecksum);
        }

        Ok(Self(address))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.checksummed())
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.checksummed())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
