//! Per-peer TCP fingerprint table
//!
//! The send path consults this table to decide how each outgoing packet
//! toward a peer should be shaped. Peers are bucketed by an 8-bit hash of
//! their (IP, port); the narrow keyspace means distinct peers can alias into
//! one bucket, in which case the last installed profile list wins. Each
//! bucket holds an ordered list of profiles applied round-robin.

use crate::rotor::Rotor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;

/// A TCP header shaping profile applied to outgoing packets toward one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpFingerprint {
    /// IP time-to-live
    pub ttl: u8,
    /// Advertised receive window
    pub window: u16,
    /// Maximum segment size option
    pub mss: u16,
    /// Window scale option
    pub window_scale: u8,
    /// Offer the SACK-permitted option
    pub sack_permitted: bool,
    /// Offer the timestamps option
    pub timestamps: bool,
}

impl Default for TcpFingerprint {
    fn default() -> Self {
        // Stock Linux sender
        Self {
            ttl: 64,
            window: 64240,
            mss: 1460,
            window_scale: 7,
            sack_permitted: true,
            timestamps: true,
        }
    }
}

/// Bucket a peer address into the 8-bit fingerprint keyspace.
pub fn hash_addr(addr: &SocketAddr) -> u8 {
    match addr.ip() {
        IpAddr::V4(ip) => {
            let hash = (u64::from(u32::from(ip)) << 16) | u64::from(addr.port());
            hash as u8
        }
        IpAddr::V6(ip) => {
            let octets = ip.octets();
            let hi = u64::from_be_bytes(octets[0..8].try_into().unwrap());
            let lo = u64::from_be_bytes(octets[8..16].try_into().unwrap());
            let hash = (hi ^ lo) ^ (u64::from(addr.port()) << 48);
            hash as u8
        }
    }
}

/// Table of per-bucket fingerprint profile rotations.
pub struct FingerprintTable {
    buckets: Mutex<HashMap<u8, Rotor<TcpFingerprint>>>,
}

impl FingerprintTable {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Install the ordered profile list for the bucket `addr` hashes into,
    /// replacing whatever was there. Last writer wins on bucket collisions.
    pub fn set_profiles(&self, addr: &SocketAddr, profiles: Vec<TcpFingerprint>) {
        let mut buckets = self.buckets.lock().unwrap();
        if profiles.is_empty() {
            buckets.remove(&hash_addr(addr));
        } else {
            buckets.insert(hash_addr(addr), Rotor::new(profiles));
        }
    }

    /// The next profile in the bucket's rotation, if any is installed.
    pub fn next_profile(&self, addr: &SocketAddr) -> Option<TcpFingerprint> {
        let mut buckets = self.buckets.lock().unwrap();
        buckets.get_mut(&hash_addr(addr))?.next().copied()
    }
}

impl Default for FingerprintTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(ttl: u8) -> TcpFingerprint {
        TcpFingerprint {
            ttl,
            ..TcpFingerprint::default()
        }
    }

    #[test]
    fn test_hash_is_deterministic() {
        let addr: SocketAddr = "198.51.100.7:443".parse().unwrap();
        assert_eq!(hash_addr(&addr), hash_addr(&addr));

        let v6: SocketAddr = "[2001:db8::1]:443".parse().unwrap();
        assert_eq!(hash_addr(&v6), hash_addr(&v6));
    }

    #[test]
    fn test_v4_hash_matches_low_byte_of_port() {
        // For IPv4 the low byte of ((ip << 16) | port) is the port's low byte.
        let addr: SocketAddr = "198.51.100.7:4000".parse().unwrap();
        assert_eq!(hash_addr(&addr), (4000u16 & 0xff) as u8);
    }

    #[test]
    fn test_profile_rotation() {
        let table = FingerprintTable::new();
        let addr: SocketAddr = "198.51.100.7:443".parse().unwrap();
        table.set_profiles(&addr, vec![profile(64), profile(128)]);

        assert_eq!(table.next_profile(&addr).unwrap().ttl, 64);
        assert_eq!(table.next_profile(&addr).unwrap().ttl, 128);
        assert_eq!(table.next_profile(&addr).unwrap().ttl, 64);
    }

    #[test]
    fn test_bucket_aliasing_last_writer_wins() {
        // Ports 256 apart share the v4 bucket, so B's install replaces A's.
        let a: SocketAddr = "198.51.100.7:1000".parse().unwrap();
        let b: SocketAddr = "198.51.100.7:1256".parse().unwrap();
        assert_eq!(hash_addr(&a), hash_addr(&b));

        let table = FingerprintTable::new();
        table.set_profiles(&a, vec![profile(64)]);
        table.set_profiles(&b, vec![profile(255)]);

        // Packets toward A now observe B's profile.
        assert_eq!(table.next_profile(&a).unwrap().ttl, 255);
    }

    #[test]
    fn test_missing_bucket_yields_none() {
        let table = FingerprintTable::new();
        let addr: SocketAddr = "198.51.100.7:443".parse().unwrap();
        assert!(table.next_profile(&addr).is_none());
    }

    #[test]
    fn test_empty_profile_list_clears_bucket() {
        let table = FingerprintTable::new();
        let addr: SocketAddr = "198.51.100.7:443".parse().unwrap();
        table.set_profiles(&addr, vec![profile(64)]);
        table.set_profiles(&addr, Vec::new());
        assert!(table.next_profile(&addr).is_none());
    }
}
