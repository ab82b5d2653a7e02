//! Wire types for the Managed Database for Redis API and the mapping onto
//! [`CacheInstance`].

use serde::Deserialize;

use crate::directory::{AccessCredential, CacheInstance, NodeAddress, RegionFilter};

/// Zones offering Managed Database for Redis.
pub(crate) const REDIS_ZONES: &[&str] = &[
    "fr-par-1", "fr-par-2", "nl-ams-1", "nl-ams-2", "pl-waw-1", "pl-waw-2",
];

/// Status of a cluster that accepts connections.
const READY_STATUS: &str = "ready";

#[derive(Debug, Deserialize)]
pub(crate) struct ClusterList {
    #[serde(default)]
    pub(crate) clusters: Vec<Cluster>,
    #[serde(default)]
    pub(crate) total_count: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Cluster {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) zone: String,
    #[serde(default)]
    pub(crate) status: String,
    #[serde(default)]
    pub(crate) tags: Vec<String>,
    #[serde(default)]
    pub(crate) tls_enabled: bool,
    #[serde(default)]
    pub(crate) endpoints: Vec<Endpoint>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Endpoint {
    pub(crate) port: u16,
    #[serde(default)]
    pub(crate) ips: Vec<String>,
}

impl Cluster {
    pub(crate) fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags.iter().any(|tag| {
            tag.split_once('=')
                .is_some_and(|(tag_key, tag_value)| tag_key == key && tag_value == value)
        })
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.status.eq_ignore_ascii_case(READY_STATUS)
    }

    fn addresses(&self) -> Vec<NodeAddress> {
        self.endpoints
            .iter()
            .flat_map(|endpoint| {
                endpoint
                    .ips
                    .iter()
                    .map(move |ip| NodeAddress::new(ip.clone(), endpoint.port))
            })
            .collect()
    }

    /// Maps the cluster onto an instance, or `None` when it exposes no
    /// endpoint.
    pub(crate) fn into_instance(
        self,
        environment: &str,
        credential: &AccessCredential,
    ) -> Option<CacheInstance> {
        let endpoints = self.addresses();
        if endpoints.is_empty() {
            return None;
        }
        Some(CacheInstance {
            region: region_of(&self.zone).to_owned(),
            id: self.id,
            name: self.name,
            endpoints,
            credential: credential.clone(),
            zone: self.zone,
            environment: environment.to_owned(),
            tls: self.tls_enabled,
        })
    }
}

/// Returns the region a zone belongs to (`fr-par-1` → `fr-par`).
pub(crate) fn region_of(zone: &str) -> &str {
    match zone.rsplit_once('-') {
        Some((region, index))
            if !index.is_empty() && index.bytes().all(|byte| byte.is_ascii_digit()) =>
        {
            region
        }
        _ => zone,
    }
}

/// Zones whose region the filter allows.
pub(crate) fn zones_for(regions: &RegionFilter) -> Vec<&'static str> {
    REDIS_ZONES
        .iter()
        .copied()
        .filter(|zone| regions.allows(region_of(zone)))
        .collect()
}
