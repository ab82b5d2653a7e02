//! Shared cache fleet for behavioural tests.

use cacheflush::test_support::{MemoryCache, StaticDirectory, address, instance};
use cacheflush::{CacheInstance, NodeAddress, NodeRole};

/// Primary node hosts, one per instance.
pub const PRIMARY_HOSTS: [&str; 2] = ["10.0.0.1", "10.0.1.1"];

/// Replica node hosts, one per instance.
pub const REPLICA_HOSTS: [&str; 2] = ["10.0.0.2", "10.0.1.2"];

/// Keys stored under the reserved namespace.
pub const RESERVED_KEYS: [&str; 2] = ["area:fr", "area:nl"];

/// Keys outside the reserved namespace.
pub const ORDINARY_KEYS: [&str; 2] = ["session:1", "user:42"];

pub fn primaries() -> Vec<NodeAddress> {
    PRIMARY_HOSTS.iter().map(|host| address(host)).collect()
}

pub fn fleet_instances() -> Vec<CacheInstance> {
    vec![
        instance("cache-1", "10.0.0.1", "fr-par"),
        instance("cache-2", "10.0.1.1", "nl-ams"),
    ]
}

/// Two instances, each with one primary and one replica.
pub fn fleet() -> (MemoryCache, StaticDirectory) {
    let cache = MemoryCache::new();
    let ids = ["cache-1", "cache-2"];
    for ((id, primary), replica) in ids.iter().zip(PRIMARY_HOSTS).zip(REPLICA_HOSTS) {
        cache.add_node(id, address(primary), NodeRole::Primary);
        cache.add_node(id, address(replica), NodeRole::Replica);
    }
    (cache, StaticDirectory::new(fleet_instances()))
}
