//! Deterministic address derivation and CIDR helpers
//!
//! Interfaces that do not declare an address or MAC get one derived from
//! their identifier. The derivation is a pure function of the identifier so
//! regenerating a topology from the same definition always yields the same
//! values. There is no allocation state and therefore no collision detection.

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

use crate::error::{HostlabError, HostlabResult};

const HEX: &[char] = &[
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
];

/// Candidate characters for each of the twelve MAC digits. The fixed
/// `00:00:5e` prefix keeps generated addresses unicast and out of the way of
/// real vendor ranges.
const MAC_DIGITS: [&[char]; 12] = [
    &['0'],
    &['0'],
    &['0'],
    &['0'],
    &['5'],
    &['e'],
    HEX,
    HEX,
    &['5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f'],
    &['3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f'],
    HEX,
    HEX,
];

fn offset(seed: &str) -> u32 {
    crc32fast::hash(seed.as_bytes()) % 255
}

/// Derive a private `192.168.x.y/24` address from a seed string
pub fn generate_ip(seed: &str) -> String {
    let offset = offset(seed);
    let third = offset % 255;
    let fourth = 1 + (offset % 254);
    format!("192.168.{}.{}/24", third, fourth)
}

/// Derive a MAC address from a seed string
pub fn generate_mac(seed: &str) -> String {
    let offset = offset(seed) as usize;
    let mut mac = String::with_capacity(17);
    for (i, digits) in MAC_DIGITS.iter().enumerate() {
        mac.push(digits[offset % digits.len()]);
        if i % 2 == 1 && i != MAC_DIGITS.len() - 1 {
            mac.push(':');
        }
    }
    mac
}

/// Derive both the address and MAC for a seed
pub fn derive(seed: &str) -> (String, String) {
    (generate_ip(seed), generate_mac(seed))
}

fn parse_cidr(address: &str) -> HostlabResult<Ipv4Net> {
    let invalid = |e: &dyn std::fmt::Display| {
        HostlabError::ConfigError(format!("Invalid address '{}': {}", address, e))
    };

    if address.contains('/') {
        address.parse::<Ipv4Net>().map_err(|e| invalid(&e))
    } else {
        address
            .parse::<Ipv4Addr>()
            .map(Ipv4Net::from)
            .map_err(|e| invalid(&e))
    }
}

/// The bare IP portion of a CIDR address
pub fn ip(address: &str) -> HostlabResult<Ipv4Addr> {
    Ok(parse_cidr(address)?.addr())
}

/// The prefix length of a CIDR address
pub fn cidr(address: &str) -> HostlabResult<u8> {
    Ok(parse_cidr(address)?.prefix_len())
}

/// The dotted netmask of a CIDR address
pub fn netmask(address: &str) -> HostlabResult<Ipv4Addr> {
    Ok(parse_cidr(address)?.netmask())
}

/// The network (first) address of a CIDR address
pub fn network(address: &str) -> HostlabResult<Ipv4Addr> {
    Ok(parse_cidr(address)?.network())
}

/// The broadcast address of a CIDR address
pub fn broadcast(address: &str) -> HostlabResult<Ipv4Addr> {
    Ok(parse_cidr(address)?.broadcast())
}

/// Reverse-DNS PTR name for the address, e.g. `4.3.168.192.in-addr.arpa`
pub fn ptr(address: &str) -> HostlabResult<String> {
    let octets = ip(address)?.octets();
    Ok(format!(
        "{}.{}.{}.{}.in-addr.arpa",
        octets[3], octets[2], octets[1], octets[0]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_generated_ip_shape() {
        let ip = generate_ip("web-1-eth0");
        assert!(ip.starts_with("192.168."));
        assert!(ip.ends_with("/24"));

        let parsed = super::ip(&ip).unwrap();
        let octets = parsed.octets();
        assert!(octets[3] >= 1 && octets[3] <= 254);
    }

    #[test]
    fn test_generated_mac_shape() {
        let mac = generate_mac("web-1-eth0");
        assert_eq!(mac.len(), 17);
        assert!(mac.starts_with("00:00:5e:"));
        assert_eq!(mac.matches(':').count(), 5);
    }

    #[test]
    fn test_known_seed_matches_crc32() {
        // crc32("") == 0 so every digit picks index zero
        assert_eq!(generate_ip(""), "192.168.0.1/24");
        assert_eq!(generate_mac(""), "00:00:5e:00:53:00");
    }

    #[test]
    fn test_cidr_helpers() {
        assert_eq!(ip("10.10.0.254/16").unwrap(), Ipv4Addr::new(10, 10, 0, 254));
        assert_eq!(cidr("10.10.0.254/16").unwrap(), 16);
        assert_eq!(netmask("10.10.0.254/16").unwrap(), Ipv4Addr::new(255, 255, 0, 0));
        assert_eq!(network("10.10.0.254/16").unwrap(), Ipv4Addr::new(10, 10, 0, 0));
        assert_eq!(broadcast("10.10.0.254/16").unwrap(), Ipv4Addr::new(10, 10, 255, 255));
        assert_eq!(ptr("192.168.3.4/24").unwrap(), "4.3.168.192.in-addr.arpa");
        assert_eq!(cidr("10.0.0.1").unwrap(), 32);
        assert!(ip("not-an-address").is_err());
    }

    proptest! {
        #[test]
        fn prop_derivation_is_deterministic(seed in ".*") {
            let first = derive(&seed);
            let second = derive(&seed);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_derived_ip_is_private(seed in "[a-z0-9-]{1,32}") {
            let ip = super::ip(&generate_ip(&seed)).unwrap();
            prop_assert!(ip.is_private());
        }
    }
}
