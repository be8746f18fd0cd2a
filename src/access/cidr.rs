//! CIDR parsing and OpenVPN netmask conversion

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CidrError {
    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),
    #[error("Invalid prefix length in {0}")]
    InvalidPrefix(String),
    #[error("IPv6 network has no netmask form: {0}")]
    NotIpv4(String),
}

/// A parsed destination network, host bits cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    V4 { network: Ipv4Addr, prefix: u8 },
    V6 { network: Ipv6Addr, prefix: u8 },
}

impl Destination {
    /// Parse `addr/prefix`, or a bare address as a host route.
    pub fn parse(cidr: &str) -> Result<Self, CidrError> {
        let cidr = cidr.trim();
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };

        let ip: IpAddr = addr
            .parse()
            .map_err(|_| CidrError::InvalidAddress(cidr.to_string()))?;
        let max = if ip.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= max)
                .ok_or_else(|| CidrError::InvalidPrefix(cidr.to_string()))?,
            None => max,
        };

        Ok(match ip {
            IpAddr::V4(v4) => {
                let mask = ipv4_mask(prefix);
                Destination::V4 {
                    network: Ipv4Addr::from(u32::from(v4) & u32::from(mask)),
                    prefix,
                }
            }
            IpAddr::V6(v6) => {
                let mask = if prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(prefix))
                };
                Destination::V6 {
                    network: Ipv6Addr::from(u128::from(v6) & mask),
                    prefix,
                }
            }
        })
    }

    pub fn is_ipv4(&self) -> bool {
        matches!(self, Destination::V4 { .. })
    }

    /// `network netmask` form, IPv4 only
    pub fn netmask_form(&self) -> Option<String> {
        match self {
            Destination::V4 { network, prefix } => {
                Some(format!("{} {}", network, ipv4_mask(*prefix)))
            }
            Destination::V6 { .. } => None,
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::V4 { network, prefix } => write!(f, "{}/{}", network, prefix),
            Destination::V6 { network, prefix } => write!(f, "{}/{}", network, prefix),
        }
    }
}

fn ipv4_mask(prefix: u8) -> Ipv4Addr {
    if prefix == 0 {
        Ipv4Addr::UNSPECIFIED
    } else {
        Ipv4Addr::from(u32::MAX << (32 - u32::from(prefix)))
    }
}

/// Convert CIDR notation to `network netmask`.
///
/// `"192.168.1.0/24"` becomes `"192.168.1.0 255.255.255.0"`; a bare
/// address becomes a host route with mask `255.255.255.255`.
pub fn cidr_to_netmask(cidr: &str) -> Result<String, CidrError> {
    let destination = Destination::parse(cidr)?;
    destination
        .netmask_form()
        .ok_or_else(|| CidrError::NotIpv4(cidr.to_string()))
}

/// Whether the CIDR matches every destination.
pub fn is_default_route(cidr: &str) -> bool {
    matches!(cidr.trim(), "0.0.0.0/0" | "0/0" | "::/0")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cidr_to_netmask() {
        assert_eq!(
            cidr_to_netmask("192.168.1.0/24").unwrap(),
            "192.168.1.0 255.255.255.0"
        );
        assert_eq!(cidr_to_netmask("10.0.0.0/8").unwrap(), "10.0.0.0 255.0.0.0");
        assert_eq!(
            cidr_to_netmask("172.16.0.0/12").unwrap(),
            "172.16.0.0 255.240.0.0"
        );
    }

    #[test]
    fn test_bare_address_is_host_route() {
        assert_eq!(
            cidr_to_netmask("10.0.0.5").unwrap(),
            "10.0.0.5 255.255.255.255"
        );
    }

    #[test]
    fn test_host_bits_are_cleared() {
        assert_eq!(
            cidr_to_netmask("192.168.1.77/24").unwrap(),
            "192.168.1.0 255.255.255.0"
        );
    }

    #[test]
    fn test_edge_prefixes() {
        assert_eq!(cidr_to_netmask("0.0.0.0/0").unwrap(), "0.0.0.0 0.0.0.0");
        assert_eq!(
            cidr_to_netmask("10.1.2.3/32").unwrap(),
            "10.1.2.3 255.255.255.255"
        );
    }

    #[test]
    fn test_malformed_input() {
        assert_eq!(
            cidr_to_netmask("not-a-cidr"),
            Err(CidrError::InvalidAddress("not-a-cidr".to_string()))
        );
        assert!(matches!(
            cidr_to_netmask("10.0.0.0/33"),
            Err(CidrError::InvalidPrefix(_))
        ));
        assert!(matches!(
            cidr_to_netmask("10.0.0.0/abc"),
            Err(CidrError::InvalidPrefix(_))
        ));
        assert!(cidr_to_netmask("").is_err());
    }

    #[test]
    fn test_ipv6_has_no_netmask_form() {
        assert!(matches!(
            cidr_to_netmask("2001:db8::/32"),
            Err(CidrError::NotIpv4(_))
        ));
        let dest = Destination::parse("2001:db8::1/32").unwrap();
        assert_eq!(dest.to_string(), "2001:db8::/32");
        assert!(!dest.is_ipv4());
    }

    #[test]
    fn test_is_default_route() {
        assert!(is_default_route("0.0.0.0/0"));
        assert!(is_default_route("0/0"));
        assert!(is_default_route("::/0"));
        assert!(!is_default_route("10.0.0.0/8"));
        assert!(!is_default_route("0.0.0.0/8"));
    }
}
