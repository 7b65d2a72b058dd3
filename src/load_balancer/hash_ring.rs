//! Consistent hash ring with virtual nodes.
//!
//! Every address is placed on the ring `replicas` times, at
//! `crc32(index || address)` for `index` in `0..replicas`. A key belongs to
//! the first position at or after `crc32(key)`, wrapping to the first position
//! when none is larger. Removing an address only moves the keys that fell on
//! its arcs.
//!
//! Rebuilding is O(n·r·log(n·r)) for n addresses and r replicas; rings are
//! rebuilt wholesale on every change rather than maintained incrementally.

use std::collections::HashMap;

/// CRC-32 (IEEE) of `data`, the hash used for ring positions and fingerprints.
pub fn hash(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashRing {
    /// Sorted ring positions.
    positions: Vec<u32>,
    /// Owner of each position.
    nodes: HashMap<u32, String>,
}

impl HashRing {
    /// Build a ring for `addresses` with `replicas` virtual nodes each.
    ///
    /// If two virtual nodes land on the same position the first one placed
    /// keeps it.
    pub fn build<S: AsRef<str>>(addresses: &[S], replicas: u32) -> Self {
        let mut positions = Vec::with_capacity(addresses.len() * replicas as usize);
        let mut nodes = HashMap::with_capacity(positions.capacity());

        for address in addresses {
            let address = address.as_ref();
            for index in 0..replicas {
                let position = hash(format!("{}{}", index, address).as_bytes());
                if nodes.contains_key(&position) {
                    continue;
                }
                nodes.insert(position, address.to_string());
                positions.push(position);
            }
        }
        positions.sort_unstable();

        Self { positions, nodes }
    }

    /// Address owning `key`, or `None` for an empty ring.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        if self.positions.is_empty() {
            return None;
        }
        let target = hash(key.as_bytes());
        let index = self.positions.partition_point(|&position| position < target);
        let position = self.positions.get(index).unwrap_or(&self.positions[0]);
        self.nodes.get(position).map(String::as_str)
    }

    /// Number of virtual nodes on the ring.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Whether `address` owns any position.
    pub fn contains(&self, address: &str) -> bool {
        self.nodes.values().any(|node| node == address)
    }

    pub fn positions(&self) -> &[u32] {
        &self.positions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("10.0.0.{}:80", i + 1)).collect()
    }

    #[test]
    fn positions_are_sorted_and_counted() {
        let ring = HashRing::build(&addresses(4), 8);
        assert_eq!(ring.len(), 32);
        assert!(ring.positions().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn places_each_replica_at_index_prefixed_hash() {
        let ring = HashRing::build(&["10.0.0.1:80"], 3);
        let mut expected: Vec<u32> = (0..3)
            .map(|i| crc32fast::hash(format!("{}10.0.0.1:80", i).as_bytes()))
            .collect();
        expected.sort_unstable();
        assert_eq!(ring.positions(), expected.as_slice());
    }

    #[test]
    fn lookup_is_deterministic_and_in_set() {
        let addrs = addresses(5);
        let ring = HashRing::build(&addrs, 10);
        let again = HashRing::build(&addrs, 10);

        for i in 0..500 {
            let key = format!("192.168.{}.{}", i / 256, i % 256);
            let owner = ring.lookup(&key).unwrap();
            assert!(addrs.iter().any(|a| a == owner));
            assert_eq!(ring.lookup(&key), Some(owner));
            assert_eq!(again.lookup(&key), Some(owner));
        }
    }

    #[test]
    fn lookup_wraps_past_the_last_position() {
        let ring = HashRing::build(&addresses(3), 4);
        let last = *ring.positions().last().unwrap();
        let first_owner = ring.nodes[&ring.positions()[0]].clone();

        // Find a key hashing beyond the last position.
        let key = (0..100_000)
            .map(|i| format!("key-{}", i))
            .find(|k| hash(k.as_bytes()) > last)
            .expect("some key hashes past the last position");
        assert_eq!(ring.lookup(&key), Some(first_owner.as_str()));
    }

    #[test]
    fn empty_ring_has_no_owner() {
        let ring = HashRing::build::<&str>(&[], 3);
        assert!(ring.is_empty());
        assert_eq!(ring.lookup("127.0.0.1"), None);
    }

    #[test]
    fn removing_a_node_only_moves_its_keys() {
        let addrs = addresses(10);
        let before = HashRing::build(&addrs, 100);
        let removed = addrs[3].clone();
        let remaining: Vec<String> = addrs.iter().filter(|a| **a != removed).cloned().collect();
        let after = HashRing::build(&remaining, 100);

        let keys: Vec<String> = (0..10_000).map(|i| format!("client-{}", i)).collect();
        let mut moved = 0;
        for key in &keys {
            let old = before.lookup(key).unwrap();
            let new = after.lookup(key).unwrap();
            if old != new {
                assert_eq!(old, removed, "key {key} moved although its owner survived");
                moved += 1;
            }
        }

        let fraction = moved as f64 / keys.len() as f64;
        assert!(fraction > 0.0);
        assert!(fraction < 0.25, "moved fraction {fraction} is far above 1/n");
    }
}
