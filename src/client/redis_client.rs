//! Redis implementation of the cache client primitives.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use redis::aio::MultiplexedConnection;
use redis::{RedisError, RedisResult};
use tracing::debug;
use url::Url;

use super::{
    CacheClient, CacheConnection, CacheNode, ClientError, ClientFuture, DeleteBatch, NodeRole,
    ScanCursor, ScanPage, ScanRequest,
};
use crate::directory::{AccessCredential, CacheInstance, NodeAddress};

/// Default bound on opening one node connection, handshake included.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client that talks RESP to managed Redis instances.
#[derive(Clone, Copy, Debug)]
pub struct RedisClient {
    connect_timeout: Duration,
}

impl RedisClient {
    /// Creates a client using [`DEFAULT_CONNECT_TIMEOUT`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Overrides the bound on opening a node connection.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for RedisClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheClient for RedisClient {
    type Connection = RedisConnection;

    fn connect<'a>(&'a self, instance: &'a CacheInstance) -> ClientFuture<'a, Self::Connection> {
        Box::pin(async move { RedisConnection::open(instance, self.connect_timeout).await })
    }
}

type Pool = HashMap<(NodeAddress, u32), MultiplexedConnection>;

/// Connection set for one instance.
///
/// Multiplexed connections are opened lazily per node and logical database
/// and reused for the lifetime of the pass. The pool lock is never held while
/// a connection is being opened, so one stalled node cannot hold up the
/// others.
pub struct RedisConnection {
    endpoints: Vec<NodeAddress>,
    credential: AccessCredential,
    tls: bool,
    connect_timeout: Duration,
    cluster: AtomicBool,
    pool: Mutex<Pool>,
}

impl fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConnection")
            .field("endpoints", &self.endpoints)
            .field("credential", &self.credential)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

impl RedisConnection {
    fn new(instance: &CacheInstance, connect_timeout: Duration) -> Self {
        Self {
            endpoints: instance.endpoints.clone(),
            credential: instance.credential.clone(),
            tls: instance.tls,
            connect_timeout,
            cluster: AtomicBool::new(false),
            pool: Mutex::new(HashMap::new()),
        }
    }

    async fn open(instance: &CacheInstance, connect_timeout: Duration) -> Result<Self, ClientError> {
        let connection = Self::new(instance, connect_timeout);
        let seed = connection
            .endpoints
            .first()
            .ok_or_else(|| ClientError::Connection {
                endpoint: instance.name.clone(),
                message: String::from("instance advertises no endpoints"),
            })?;
        let mut conn = connection.node_connection(seed, 0).await?;
        let reply: RedisResult<String> = connection
            .bounded(seed, redis::cmd("PING").query_async(&mut conn))
            .await?;
        reply.map_err(|err| connection_error(seed, &err))?;
        debug!(endpoint = %seed, tls = connection.tls, "connected to cache instance");
        Ok(connection)
    }

    fn pool(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails `future` with a connection error once the connect timeout
    /// elapses.
    async fn bounded<T>(
        &self,
        address: &NodeAddress,
        future: impl Future<Output = T>,
    ) -> Result<T, ClientError> {
        tokio::time::timeout(self.connect_timeout, future)
            .await
            .map_err(|_| ClientError::Connection {
                endpoint: address.to_string(),
                message: format!("timed out after {:?}", self.connect_timeout),
            })
    }

    async fn node_connection(
        &self,
        address: &NodeAddress,
        database: u32,
    ) -> Result<MultiplexedConnection, ClientError> {
        check_cluster_database(self.cluster.load(Ordering::Relaxed), address, database)?;
        let key = (address.clone(), database);
        let cached = self.pool().get(&key).cloned();
        if let Some(existing) = cached {
            return Ok(existing);
        }

        let url = connection_url(address, database, &self.credential, self.tls)?;
        let client =
            redis::Client::open(url.as_str()).map_err(|err| connection_error(address, &err))?;
        let opened = self
            .bounded(address, client.get_multiplexed_async_connection())
            .await?
            .map_err(|err| connection_error(address, &err))?;
        let conn = self.pool().entry(key).or_insert(opened).clone();
        Ok(conn)
    }

    async fn info(&self, address: &NodeAddress, section: &str) -> Result<String, ClientError> {
        let mut conn = self.node_connection(address, 0).await?;
        let reply: RedisResult<String> = redis::cmd("INFO")
            .arg(section)
            .query_async(&mut conn)
            .await;
        reply.map_err(|err| command_error("INFO", address, &err))
    }

    async fn discover_nodes(&self) -> Result<Vec<CacheNode>, ClientError> {
        let Some(seed) = self.endpoints.first() else {
            return Ok(Vec::new());
        };

        if cluster_enabled(&self.info(seed, "cluster").await?) {
            self.cluster.store(true, Ordering::Relaxed);
            let mut conn = self.node_connection(seed, 0).await?;
            let reply: RedisResult<String> = redis::cmd("CLUSTER")
                .arg("NODES")
                .query_async(&mut conn)
                .await;
            let listing = reply.map_err(|err| command_error("CLUSTER NODES", seed, &err))?;
            return parse_cluster_nodes(&listing).map_err(|message| ClientError::Protocol {
                command: String::from("CLUSTER NODES"),
                endpoint: seed.to_string(),
                message,
            });
        }

        let mut nodes: Vec<CacheNode> = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            let info = self.info(endpoint, "replication").await?;
            let replication =
                parse_replication_info(&info).ok_or_else(|| ClientError::Protocol {
                    command: String::from("INFO replication"),
                    endpoint: endpoint.to_string(),
                    message: String::from("missing role field"),
                })?;
            push_unique(&mut nodes, CacheNode::new(endpoint.clone(), replication.role));
            for replica in replication.replicas {
                push_unique(&mut nodes, CacheNode::new(replica, NodeRole::Replica));
            }
        }
        Ok(nodes)
    }
}

impl CacheConnection for RedisConnection {
    fn list_nodes(&self) -> ClientFuture<'_, Vec<CacheNode>> {
        Box::pin(async move { self.discover_nodes().await })
    }

    fn flush_all_databases<'a>(&'a self, node: &'a CacheNode) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.node_connection(&node.address, 0).await?;
            let reply: RedisResult<()> = redis::cmd("FLUSHALL").query_async(&mut conn).await;
            reply.map_err(|err| command_error("FLUSHALL", &node.address, &err))
        })
    }

    fn flush_database<'a>(&'a self, node: &'a CacheNode, database: u32) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.node_connection(&node.address, database).await?;
            let reply: RedisResult<()> = redis::cmd("FLUSHDB").query_async(&mut conn).await;
            reply.map_err(|err| command_error("FLUSHDB", &node.address, &err))
        })
    }

    fn scan_keys<'a>(
        &'a self,
        node: &'a CacheNode,
        request: ScanRequest<'a>,
    ) -> ClientFuture<'a, ScanPage> {
        Box::pin(async move {
            let mut conn = self
                .node_connection(&node.address, request.database)
                .await?;
            let reply: RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                .arg(request.cursor.0)
                .arg("MATCH")
                .arg(request.pattern)
                .arg("COUNT")
                .arg(request.count)
                .query_async(&mut conn)
                .await;
            let (next, keys) = reply.map_err(|err| command_error("SCAN", &node.address, &err))?;
            Ok(ScanPage {
                keys,
                next: (next != 0).then_some(ScanCursor(next)),
            })
        })
    }

    fn delete_keys<'a>(
        &'a self,
        node: &'a CacheNode,
        database: u32,
        keys: &'a [String],
    ) -> ClientFuture<'a, DeleteBatch> {
        Box::pin(async move {
            let conn = self.node_connection(&node.address, database).await?;
            let replies = join_all(keys.iter().map(|key| {
                let mut pipelined = conn.clone();
                async move {
                    let reply: RedisResult<u64> =
                        redis::cmd("DEL").arg(key).query_async(&mut pipelined).await;
                    reply
                }
            }))
            .await;

            let mut batch = DeleteBatch::default();
            for reply in replies {
                match reply {
                    Ok(removed) => batch.removed += removed,
                    Err(err) if is_connection_failure(&err) => {
                        return Err(command_error("DEL", &node.address, &err));
                    }
                    Err(err) => {
                        debug!(endpoint = %node.address, error = %err, "DEL rejected");
                        batch.failed += 1;
                    }
                }
            }
            Ok(batch)
        })
    }
}

fn push_unique(nodes: &mut Vec<CacheNode>, node: CacheNode) {
    if nodes.iter().all(|known| known.address != node.address) {
        nodes.push(node);
    }
}

fn is_connection_failure(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout()
}

/// Cluster-mode servers only serve database 0.
fn check_cluster_database(
    cluster: bool,
    address: &NodeAddress,
    database: u32,
) -> Result<(), ClientError> {
    if cluster && database != 0 {
        return Err(ClientError::Command {
            command: String::from("SELECT"),
            endpoint: address.to_string(),
            message: format!(
                "cluster mode serves database 0 only, cannot use database {database}; \
                 set CACHEFLUSH_FLUSH_DATABASE and CACHEFLUSH_ERASE_DATABASE to 0"
            ),
        });
    }
    Ok(())
}

fn connection_error(address: &NodeAddress, err: &RedisError) -> ClientError {
    ClientError::Connection {
        endpoint: address.to_string(),
        message: err.to_string(),
    }
}

fn command_error(command: &str, address: &NodeAddress, err: &RedisError) -> ClientError {
    if is_connection_failure(err) {
        return connection_error(address, err);
    }
    ClientError::Command {
        command: command.to_owned(),
        endpoint: address.to_string(),
        message: err.to_string(),
    }
}

/// Builds a `redis://` or `rediss://` URL; credentials are percent-encoded.
fn connection_url(
    address: &NodeAddress,
    database: u32,
    credential: &AccessCredential,
    tls: bool,
) -> Result<Url, ClientError> {
    let invalid = |message: String| ClientError::Connection {
        endpoint: address.to_string(),
        message,
    };
    let scheme = if tls { "rediss" } else { "redis" };
    let mut url = Url::parse(&format!("{scheme}://{address}/{database}"))
        .map_err(|err| invalid(err.to_string()))?;
    if let Some(username) = credential.username.as_deref() {
        url.set_username(username)
            .map_err(|()| invalid(String::from("user name cannot be encoded")))?;
    }
    if !credential.password.is_empty() {
        url.set_password(Some(&credential.password))
            .map_err(|()| invalid(String::from("password cannot be encoded")))?;
    }
    Ok(url)
}

fn info_fields(info: &str) -> impl Iterator<Item = (&str, &str)> {
    info.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
}

fn cluster_enabled(info: &str) -> bool {
    info_fields(info).any(|(name, value)| name == "cluster_enabled" && value.trim() == "1")
}

#[derive(Debug, Eq, PartialEq)]
struct ReplicationInfo {
    role: NodeRole,
    replicas: Vec<NodeAddress>,
}

/// Reads `role:` and the `slaveN:ip=..,port=..` lines of `INFO replication`.
fn parse_replication_info(info: &str) -> Option<ReplicationInfo> {
    let mut role = None;
    let mut replicas = Vec::new();
    for (name, value) in info_fields(info) {
        if name == "role" {
            role = match value.trim() {
                "master" => Some(NodeRole::Primary),
                "slave" | "replica" => Some(NodeRole::Replica),
                _ => None,
            };
        } else if name.starts_with("slave") && name.trim_start_matches("slave").parse::<u32>().is_ok()
        {
            if let Some(address) = parse_replica_entry(value) {
                replicas.push(address);
            }
        }
    }
    role.map(|found| ReplicationInfo {
        role: found,
        replicas,
    })
}

fn parse_replica_entry(entry: &str) -> Option<NodeAddress> {
    let mut host = None;
    let mut port = None;
    for pair in entry.split(',') {
        match pair.split_once('=') {
            Some(("ip", value)) => host = Some(value.trim().to_owned()),
            Some(("port", value)) => port = value.trim().parse::<u16>().ok(),
            _ => {}
        }
    }
    Some(NodeAddress::new(host?, port?))
}

/// Parses `CLUSTER NODES` output into primaries and replicas.
///
/// Nodes flagged `fail`, `handshake` or `noaddr` are left out.
fn parse_cluster_nodes(listing: &str) -> Result<Vec<CacheNode>, String> {
    let mut nodes = Vec::new();
    for line in listing.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let mut fields = line.split_whitespace();
        let (Some(_id), Some(raw_address), Some(raw_flags)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(format!("truncated node line: {line}"));
        };

        let flags: Vec<&str> = raw_flags.split(',').collect();
        if flags
            .iter()
            .any(|flag| matches!(*flag, "fail" | "handshake" | "noaddr"))
        {
            continue;
        }
        let role = if flags.contains(&"master") {
            NodeRole::Primary
        } else if flags.iter().any(|flag| matches!(*flag, "slave" | "replica")) {
            NodeRole::Replica
        } else {
            continue;
        };

        let endpoint = raw_address
            .split('@')
            .next()
            .and_then(|addr| addr.split(',').next())
            .unwrap_or(raw_address);
        let Some((host, port)) = endpoint.rsplit_once(':') else {
            return Err(format!("malformed node address: {raw_address}"));
        };
        if host.is_empty() {
            continue;
        }
        let parsed_port = port
            .parse::<u16>()
            .map_err(|err| format!("malformed node port in {raw_address}: {err}"))?;
        nodes.push(CacheNode::new(NodeAddress::new(host, parsed_port), role));
    }
    Ok(nodes)
}
