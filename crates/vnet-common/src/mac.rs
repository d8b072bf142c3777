//! MAC address generation and validation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{VnetError, VnetResult};

/// A validated Ethernet hardware address.
///
/// Accepts six hex pairs separated by `:` or `-` and always renders in the
/// lowercase, colon-separated form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Generate a random locally administered unicast address.
    ///
    /// The first three octets are fixed to `02:00:00`, the rest is random.
    #[must_use]
    pub fn random() -> Self {
        Self([
            0x02,
            0x00,
            0x00,
            rand::random::<u8>(),
            rand::random::<u8>(),
            rand::random::<u8>(),
        ])
    }

    /// Parse a MAC address.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not six hex pairs separated by
    /// `:` or `-`.
    pub fn parse(value: &str) -> VnetResult<Self> {
        let invalid = || VnetError::Config {
            message: format!("MAC address {value} is not a valid MAC"),
        };

        let parts: Vec<&str> = value.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(&parts) {
            if part.len() != 2 || !part.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        Ok(Self(octets))
    }

    /// The raw octets.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Whether the locally administered bit is set.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        self.0[0] & 0x02 != 0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = VnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MacAddress {
    type Error = VnetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_is_locally_administered() {
        for _ in 0..32 {
            let mac = MacAddress::random();
            assert!(mac.is_local());
            assert!(mac.to_string().starts_with("02:00:00:"));
        }
    }

    #[test]
    fn parse_valid() {
        let mac = MacAddress::parse("00:00:00:00:01:11").unwrap();
        assert_eq!(mac.to_string(), "00:00:00:00:01:11");

        let dashed: MacAddress = "AA-bb-CC-00-01-02".parse().unwrap();
        assert_eq!(dashed.to_string(), "aa:bb:cc:00:01:02");
    }

    #[test]
    fn parse_invalid() {
        assert!(MacAddress::parse("").is_err());
        assert!(MacAddress::parse("00:00:00:00:01").is_err());
        assert!(MacAddress::parse("00:00:00:00:01:1").is_err());
        assert!(MacAddress::parse("00:00:00:00:01:zz").is_err());
        assert!(MacAddress::parse("00:00:00:00:01:11:22").is_err());
        assert!(MacAddress::parse("+0:00:00:00:01:11").is_err());
    }
}
