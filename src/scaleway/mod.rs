//! Cache directory backed by Scaleway Managed Database for Redis.
//!
//! Clusters are listed zone by zone through the public API and selected by an
//! `<environment_tag_key>=<environment>` tag. Only zones belonging to the
//! allowed regions are queried.

mod error;
mod types;

use std::sync::LazyLock;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ScalewayConfig;
use crate::directory::{
    AccessCredential, CacheDirectory, CacheInstance, DirectoryFuture, RegionFilter,
};
use types::{Cluster, ClusterList, zones_for};

pub use error::ScalewayDirectoryError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: u32 = 100;

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Directory that discovers Redis clusters through the Scaleway API.
#[derive(Clone, Debug)]
pub struct ScalewayRedisDirectory {
    config: ScalewayConfig,
    credential: AccessCredential,
}

impl ScalewayRedisDirectory {
    /// Constructs a directory from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayDirectoryError::Config`] when the configuration fails
    /// validation.
    pub fn new(config: ScalewayConfig) -> Result<Self, ScalewayDirectoryError> {
        config.validate()?;
        let credential = AccessCredential {
            username: Some(config.redis_user.clone()).filter(|user| !user.trim().is_empty()),
            password: config.redis_password.clone(),
        };
        Ok(Self { config, credential })
    }

    fn clusters_url(&self, zone: &str) -> String {
        format!(
            "{}/redis/v1/zones/{zone}/clusters",
            self.config.api_base.trim_end_matches('/')
        )
    }

    async fn list_zone(&self, zone: &str) -> Result<Vec<Cluster>, ScalewayDirectoryError> {
        let url = self.clusters_url(zone);
        let mut clusters = Vec::new();
        let mut page: u32 = 1;

        loop {
            let mut query = vec![
                ("page", page.to_string()),
                ("page_size", PAGE_SIZE.to_string()),
            ];
            if let Some(project_id) = &self.config.default_project_id {
                query.push(("project_id", project_id.clone()));
            }

            let response = HTTP_CLIENT
                .get(&url)
                .header("X-Auth-Token", &self.config.secret_key)
                .query(&query)
                .send()
                .await
                .map_err(|err| ScalewayDirectoryError::Request {
                    zone: zone.to_owned(),
                    message: err.to_string(),
                })?;

            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|err| ScalewayDirectoryError::Request {
                    zone: zone.to_owned(),
                    message: err.to_string(),
                })?;

            if !status.is_success() {
                return Err(ScalewayDirectoryError::Status {
                    zone: zone.to_owned(),
                    status: status.as_u16(),
                    message: String::from_utf8_lossy(&body).into_owned(),
                });
            }

            let parsed: ClusterList =
                serde_json::from_slice(&body).map_err(|err| ScalewayDirectoryError::Decode {
                    zone: zone.to_owned(),
                    message: err.to_string(),
                })?;
            let fetched = parsed.clusters.len();
            clusters.extend(parsed.clusters);

            if fetched == 0 || clusters.len() as u64 >= parsed.total_count {
                break;
            }
            page = page.saturating_add(1);
        }

        debug!(zone, clusters = clusters.len(), "listed redis clusters");
        Ok(clusters)
    }

    fn select(&self, environment: &str, clusters: Vec<Cluster>) -> Vec<CacheInstance> {
        clusters
            .into_iter()
            .filter(|cluster| cluster.has_tag(&self.config.environment_tag_key, environment))
            .filter(|cluster| {
                let ready = cluster.is_ready();
                if !ready {
                    debug!(cluster = %cluster.id, status = %cluster.status, "skipping cluster that is not ready");
                }
                ready
            })
            .filter_map(|cluster| {
                let id = cluster.id.clone();
                let instance = cluster.into_instance(environment, &self.credential);
                if instance.is_none() {
                    warn!(cluster = %id, "skipping cluster without endpoints");
                }
                instance
            })
            .collect()
    }
}

impl CacheDirectory for ScalewayRedisDirectory {
    type Error = ScalewayDirectoryError;

    fn list_instances<'a>(
        &'a self,
        environment: &'a str,
        regions: &'a RegionFilter,
    ) -> DirectoryFuture<'a, Vec<CacheInstance>, Self::Error> {
        Box::pin(async move {
            let mut instances = Vec::new();
            for zone in zones_for(regions) {
                let clusters = self.list_zone(zone).await?;
                instances.extend(self.select(environment, clusters));
            }
            info!(
                environment,
                regions = %regions,
                instances = instances.len(),
                "resolved cache instances"
            );
            Ok(instances)
        })
    }
}
