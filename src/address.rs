//! Address normalization and client address extraction.

use crate::error::AddressError;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Canonical form of an IP address, used as the cache and single-flight key.
///
/// IPv4-mapped IPv6 addresses collapse to IPv4 and dotted quads with leading
/// zeros are read as decimal, so every textual form of one address yields
/// the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IpKey(IpAddr);

impl IpKey {
    /// Parse and canonicalize a textual address.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        let unbracketed = trimmed
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(trimmed);

        if unbracketed.is_empty() {
            return Err(AddressError::Invalid(input.to_string()));
        }

        if let Some(v4) = parse_dotted_quad(unbracketed) {
            return Ok(Self(IpAddr::V4(v4)));
        }

        match unbracketed.parse::<Ipv6Addr>() {
            Ok(v6) => Ok(Self::from(IpAddr::V6(v6))),
            Err(_) => Err(AddressError::Invalid(input.to_string())),
        }
    }

    /// The canonical address.
    pub fn addr(&self) -> IpAddr {
        self.0
    }
}

impl From<IpAddr> for IpKey {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => Self(IpAddr::V4(v4)),
                None => Self(IpAddr::V6(v6)),
            },
            v4 => Self(v4),
        }
    }
}

impl FromStr for IpKey {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for IpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for IpKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

/// Parse `a.b.c.d`, accepting leading zeros in each octet as decimal.
fn parse_dotted_quad(s: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut parts = s.split('.');
    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *octet = part.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(Ipv4Addr::from(octets))
}

/// Extract the client address from proxy headers.
///
/// `headers` keys must be lowercase. Headers are consulted in the order
/// given; for comma separated lists either the first (original client) or
/// last (nearest proxy) hop is used.
pub fn extract_client_ip(
    headers: &HashMap<String, String>,
    header_names: &[String],
    use_first_ip: bool,
) -> Option<IpKey> {
    for header_name in header_names {
        if let Some(value) = headers.get(&header_name.to_lowercase()) {
            let candidate = if use_first_ip {
                value.split(',').next()
            } else {
                value.split(',').last()
            };

            if let Some(Ok(ip)) = candidate.map(IpKey::parse) {
                return Some(ip);
            }
        }
    }
    None
}
