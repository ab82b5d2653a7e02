//! Directory abstraction for discovering the cache instances of an environment.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Host and port of a single cache endpoint.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeAddress {
    /// DNS name or IP literal of the endpoint.
    pub host: String,
    /// TCP port the endpoint listens on.
    pub port: u16,
}

impl NodeAddress {
    /// Creates an address from a host and port.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Credential used to authenticate against a cache instance.
#[derive(Clone, Eq, PartialEq)]
pub struct AccessCredential {
    /// Optional ACL user name.
    pub username: Option<String>,
    /// Password or access key.
    pub password: String,
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCredential")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A managed cache instance resolved for one flush pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CacheInstance {
    /// Provider specific identifier.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Endpoints advertised by the provider. The first one seeds connections.
    pub endpoints: Vec<NodeAddress>,
    /// Credential used to connect.
    pub credential: AccessCredential,
    /// Region the instance lives in (for example `fr-par`).
    pub region: String,
    /// Zone the instance lives in (for example `fr-par-1`).
    pub zone: String,
    /// Environment tag value the instance was selected by.
    pub environment: String,
    /// Whether connections must use TLS.
    pub tls: bool,
}

impl CacheInstance {
    /// Returns the host used to identify this instance in outcomes.
    #[must_use]
    pub fn host(&self) -> &str {
        self.endpoints
            .first()
            .map_or(self.name.as_str(), |endpoint| endpoint.host.as_str())
    }
}

/// Case-insensitive allow-list of regions.
///
/// An empty filter allows every region.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RegionFilter {
    regions: Vec<String>,
}

impl RegionFilter {
    /// Parses a comma-separated list such as `"fr-par, NL-AMS"`.
    ///
    /// Blank entries are ignored.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let regions = raw
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();
        Self { regions }
    }

    /// Returns a filter that allows every region.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    /// Returns `true` when the filter names no region.
    #[must_use]
    pub const fn is_unrestricted(&self) -> bool {
        self.regions.is_empty()
    }

    /// Returns `true` when `region` is allowed.
    #[must_use]
    pub fn allows(&self, region: &str) -> bool {
        self.is_unrestricted()
            || self
                .regions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(region.trim()))
    }

    /// Returns the normalised region names.
    #[must_use]
    pub fn regions(&self) -> &[String] {
        &self.regions
    }
}

impl fmt::Display for RegionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unrestricted() {
            f.write_str("*")
        } else {
            f.write_str(&self.regions.join(","))
        }
    }
}

/// Future returned by directory operations.
pub type DirectoryFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Source of cache instances for an environment.
pub trait CacheDirectory: Send + Sync {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists the instances tagged with `environment` in the allowed regions.
    ///
    /// An empty list is a valid answer; callers decide how to report it.
    fn list_instances<'a>(
        &'a self,
        environment: &'a str,
        regions: &'a RegionFilter,
    ) -> DirectoryFuture<'a, Vec<CacheInstance>, Self::Error>;
}
