//! Cache node client abstraction.
//!
//! The flush engine only needs a handful of primitives from the wire client:
//! connect to an instance, enumerate its nodes with their replication role,
//! flush, scan keys page by page, and delete a batch of keys. Everything else
//! about the protocol stays behind [`CacheClient`] and [`CacheConnection`].

mod redis_client;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::directory::{CacheInstance, NodeAddress};

pub use redis_client::{DEFAULT_CONNECT_TIMEOUT, RedisClient, RedisConnection};

/// Replication role reported by a node.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NodeRole {
    /// Accepts writes; the only valid flush target.
    Primary,
    /// Read-only follower; never flushed.
    Replica,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Replica => f.write_str("replica"),
        }
    }
}

/// A single addressable node within an instance's topology.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CacheNode {
    /// Endpoint of the node.
    pub address: NodeAddress,
    /// Role observed when the topology was read.
    pub role: NodeRole,
}

impl CacheNode {
    /// Creates a node descriptor.
    #[must_use]
    pub const fn new(address: NodeAddress, role: NodeRole) -> Self {
        Self { address, role }
    }

    /// Returns `true` when the node is a replica.
    #[must_use]
    pub const fn is_replica(&self) -> bool {
        matches!(self.role, NodeRole::Replica)
    }
}

/// Position of a server-side key scan. `ScanCursor::START` begins a new scan.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ScanCursor(pub u64);

impl ScanCursor {
    /// Cursor that starts a fresh scan.
    pub const START: Self = Self(0);
}

/// Parameters for fetching one page of keys.
#[derive(Clone, Copy, Debug)]
pub struct ScanRequest<'a> {
    /// Logical database index.
    pub database: u32,
    /// Server-side glob forwarded to the scan.
    pub pattern: &'a str,
    /// Where to resume.
    pub cursor: ScanCursor,
    /// Page size hint.
    pub count: usize,
}

/// One page of keys returned by a scan.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScanPage {
    /// Keys in this page, in no particular order.
    pub keys: Vec<String>,
    /// Cursor for the next page, or `None` once the scan is complete.
    pub next: Option<ScanCursor>,
}

/// Acknowledgements collected for one batch of deletions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeleteBatch {
    /// Keys the server reported as removed.
    pub removed: u64,
    /// Deletions that were rejected individually.
    pub failed: u64,
}

/// Errors raised by cache clients.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClientError {
    /// Raised when an endpoint cannot be reached or authenticated against.
    #[error("failed to connect to {endpoint}: {message}")]
    Connection {
        /// Endpoint that failed.
        endpoint: String,
        /// Client error message.
        message: String,
    },
    /// Raised when a command is rejected or fails mid-flight.
    #[error("{command} failed on {endpoint}: {message}")]
    Command {
        /// Command name (for example `FLUSHALL`).
        command: String,
        /// Endpoint that failed.
        endpoint: String,
        /// Client error message.
        message: String,
    },
    /// Raised when a reply does not have the expected shape.
    #[error("unexpected {command} reply from {endpoint}: {message}")]
    Protocol {
        /// Command whose reply could not be read.
        command: String,
        /// Endpoint that replied.
        endpoint: String,
        /// Description of the problem.
        message: String,
    },
}

/// Future returned by client operations.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Opens connections to cache instances.
pub trait CacheClient: Send + Sync {
    /// Connection type handed back by [`CacheClient::connect`].
    type Connection: CacheConnection;

    /// Connects to `instance` using its credential.
    fn connect<'a>(&'a self, instance: &'a CacheInstance) -> ClientFuture<'a, Self::Connection>;
}

/// Primitives available on an open instance connection.
pub trait CacheConnection: Send + Sync {
    /// Enumerates the nodes of the instance together with their roles.
    fn list_nodes(&self) -> ClientFuture<'_, Vec<CacheNode>>;

    /// Discards every logical database on `node`.
    fn flush_all_databases<'a>(&'a self, node: &'a CacheNode) -> ClientFuture<'a, ()>;

    /// Discards a single logical database on `node`.
    fn flush_database<'a>(&'a self, node: &'a CacheNode, database: u32) -> ClientFuture<'a, ()>;

    /// Fetches one page of keys.
    fn scan_keys<'a>(
        &'a self,
        node: &'a CacheNode,
        request: ScanRequest<'a>,
    ) -> ClientFuture<'a, ScanPage>;

    /// Issues one deletion per key concurrently and waits for every
    /// acknowledgement.
    ///
    /// Individually rejected deletions are counted in
    /// [`DeleteBatch::failed`]; an error is returned only when the connection
    /// itself fails.
    fn delete_keys<'a>(
        &'a self,
        node: &'a CacheNode,
        database: u32,
        keys: &'a [String],
    ) -> ClientFuture<'a, DeleteBatch>;
}
