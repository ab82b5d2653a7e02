//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::env;
use std::ffi::OsString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::client::{
    CacheClient, CacheConnection, CacheNode, ClientError, ClientFuture, DeleteBatch, NodeRole,
    ScanCursor, ScanPage, ScanRequest,
};
use crate::directory::{
    AccessCredential, CacheDirectory, CacheInstance, DirectoryFuture, NodeAddress, RegionFilter,
};
use crate::telemetry::{DependencyCall, TelemetryRecorder};

/// Port used by [`instance`] for every generated endpoint.
pub const TEST_PORT: u16 = 6380;

/// Environment tag used by [`instance`].
pub const TEST_ENVIRONMENT: &str = "test";

/// Builds a TLS instance descriptor with a single endpoint `host:6380`.
#[must_use]
pub fn instance(id: &str, host: &str, region: &str) -> CacheInstance {
    CacheInstance {
        id: id.to_owned(),
        name: format!("redis-{id}"),
        endpoints: vec![NodeAddress::new(host, TEST_PORT)],
        credential: AccessCredential {
            username: Some(String::from("default")),
            password: String::from("secret"),
        },
        region: region.to_owned(),
        zone: format!("{region}-1"),
        environment: String::from(TEST_ENVIRONMENT),
        tls: true,
    }
}

/// Returns the address [`instance`] assigns to `host`.
#[must_use]
pub fn address(host: &str) -> NodeAddress {
    NodeAddress::new(host, TEST_PORT)
}

/// Command observed by [`MemoryCache`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CacheCommand {
    /// `FLUSHALL`.
    FlushAll,
    /// `FLUSHDB` on a database.
    FlushDatabase(u32),
    /// One `SCAN` page on a database.
    Scan(u32),
    /// One batch of deletions on a database.
    Delete {
        /// Database index.
        database: u32,
        /// Number of keys in the batch.
        keys: usize,
    },
}

/// Records a single command issued to a node of a [`MemoryCache`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordedOperation {
    /// Node that received the command.
    pub address: NodeAddress,
    /// Role of that node.
    pub role: NodeRole,
    /// Command issued.
    pub command: CacheCommand,
}

#[derive(Debug, Default)]
struct MemoryInstance {
    nodes: Vec<NodeAddress>,
    unreachable: bool,
    topology_failure: bool,
}

#[derive(Debug)]
struct MemoryNode {
    role: NodeRole,
    databases: BTreeMap<u32, BTreeSet<String>>,
    failing_commands: bool,
    delete_budget: Option<usize>,
    expire_scanned: bool,
    reject_deletes: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    instances: BTreeMap<String, MemoryInstance>,
    nodes: BTreeMap<NodeAddress, MemoryNode>,
    operations: Vec<RecordedOperation>,
    snapshots: HashMap<(NodeAddress, u32), Vec<String>>,
    connects: usize,
}

/// In-memory cache fleet implementing [`CacheClient`].
///
/// Instances are looked up by [`CacheInstance::id`]. Scans page through a
/// sorted snapshot taken when a scan starts, so deletions made between pages
/// never shift the cursor. Patterns support `*` and `prefix*`.
#[derive(Clone, Debug, Default)]
pub struct MemoryCache {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryCache {
    /// Creates an empty fleet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an instance with no nodes.
    pub fn add_instance(&self, instance_id: &str) {
        self.state()
            .instances
            .entry(instance_id.to_owned())
            .or_default();
    }

    /// Adds a node to an instance, registering the instance when needed.
    pub fn add_node(&self, instance_id: &str, address: NodeAddress, role: NodeRole) {
        let mut state = self.state();
        state
            .instances
            .entry(instance_id.to_owned())
            .or_default()
            .nodes
            .push(address.clone());
        state.nodes.insert(
            address,
            MemoryNode {
                role,
                databases: BTreeMap::new(),
                failing_commands: false,
                delete_budget: None,
                expire_scanned: false,
                reject_deletes: false,
            },
        );
    }

    /// Stores keys in a node's logical database.
    pub fn insert_keys(&self, address: &NodeAddress, database: u32, keys: &[&str]) {
        if let Some(node) = self.state().nodes.get_mut(address) {
            node.databases
                .entry(database)
                .or_default()
                .extend(keys.iter().map(|key| (*key).to_owned()));
        }
    }

    /// Returns the keys currently stored in a node's logical database.
    #[must_use]
    pub fn keys(&self, address: &NodeAddress, database: u32) -> Vec<String> {
        self.state()
            .nodes
            .get(address)
            .and_then(|node| node.databases.get(&database))
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Makes connections to the instance fail.
    pub fn mark_unreachable(&self, instance_id: &str) {
        self.state()
            .instances
            .entry(instance_id.to_owned())
            .or_default()
            .unreachable = true;
    }

    /// Makes node enumeration fail for the instance.
    pub fn fail_topology(&self, instance_id: &str) {
        self.state()
            .instances
            .entry(instance_id.to_owned())
            .or_default()
            .topology_failure = true;
    }

    /// Makes every command sent to the node fail.
    pub fn fail_commands(&self, address: &NodeAddress) {
        if let Some(node) = self.state().nodes.get_mut(address) {
            node.failing_commands = true;
        }
    }

    /// Drops the node's connection once `batches` deletion batches succeeded.
    pub fn drop_connection_after(&self, address: &NodeAddress, batches: usize) {
        if let Some(node) = self.state().nodes.get_mut(address) {
            node.delete_budget = Some(batches);
        }
    }

    /// Makes every key returned by a scan expire before it can be deleted.
    pub fn expire_scanned_keys(&self, address: &NodeAddress) {
        if let Some(node) = self.state().nodes.get_mut(address) {
            node.expire_scanned = true;
        }
    }

    /// Makes the node reject every individual deletion.
    pub fn reject_deletes(&self, address: &NodeAddress) {
        if let Some(node) = self.state().nodes.get_mut(address) {
            node.reject_deletes = true;
        }
    }

    /// Clears every injected fault on the node.
    pub fn restore(&self, address: &NodeAddress) {
        if let Some(node) = self.state().nodes.get_mut(address) {
            node.failing_commands = false;
            node.delete_budget = None;
            node.expire_scanned = false;
            node.reject_deletes = false;
        }
    }

    /// Returns every command issued so far.
    #[must_use]
    pub fn operations(&self) -> Vec<RecordedOperation> {
        self.state().operations.clone()
    }

    /// Returns the commands that reached replica nodes.
    #[must_use]
    pub fn operations_on_replicas(&self) -> Vec<RecordedOperation> {
        self.operations()
            .into_iter()
            .filter(|op| op.role == NodeRole::Replica)
            .collect()
    }

    /// Returns how many connections were attempted.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.state().connects
    }

    fn run_command<T>(
        &self,
        node: &CacheNode,
        command: CacheCommand,
        apply: impl FnOnce(&mut MemoryState) -> Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        let mut state = self.state();
        let Some(stored) = state.nodes.get(&node.address) else {
            return Err(ClientError::Connection {
                endpoint: node.address.to_string(),
                message: String::from("unknown node"),
            });
        };
        let role = stored.role;
        let failing = stored.failing_commands;
        state.operations.push(RecordedOperation {
            address: node.address.clone(),
            role,
            command,
        });
        if failing {
            return Err(ClientError::Command {
                command: format!("{command:?}"),
                endpoint: node.address.to_string(),
                message: String::from("simulated failure"),
            });
        }
        apply(&mut state)
    }
}

fn glob_matches(pattern: &str, key: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    pattern
        .strip_suffix('*')
        .map_or(pattern == key, |prefix| key.starts_with(prefix))
}

impl CacheClient for MemoryCache {
    type Connection = MemoryConnection;

    fn connect<'a>(&'a self, instance: &'a CacheInstance) -> ClientFuture<'a, Self::Connection> {
        Box::pin(async move {
            let mut state = self.state();
            state.connects += 1;
            match state.instances.get(&instance.id) {
                Some(stored) if !stored.unreachable => Ok(MemoryConnection {
                    cache: self.clone(),
                    instance_id: instance.id.clone(),
                }),
                _ => Err(ClientError::Connection {
                    endpoint: instance.host().to_owned(),
                    message: String::from("connection refused"),
                }),
            }
        })
    }
}

/// Connection handed out by [`MemoryCache`].
#[derive(Clone, Debug)]
pub struct MemoryConnection {
    cache: MemoryCache,
    instance_id: String,
}

impl CacheConnection for MemoryConnection {
    fn list_nodes(&self) -> ClientFuture<'_, Vec<CacheNode>> {
        Box::pin(async move {
            let state = self.cache.state();
            let Some(stored) = state.instances.get(&self.instance_id) else {
                return Ok(Vec::new());
            };
            if stored.topology_failure {
                return Err(ClientError::Command {
                    command: String::from("CLUSTER NODES"),
                    endpoint: self.instance_id.clone(),
                    message: String::from("simulated topology failure"),
                });
            }
            Ok(stored
                .nodes
                .iter()
                .filter_map(|address| {
                    state
                        .nodes
                        .get(address)
                        .map(|node| CacheNode::new(address.clone(), node.role))
                })
                .collect())
        })
    }

    fn flush_all_databases<'a>(&'a self, node: &'a CacheNode) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.cache
                .run_command(node, CacheCommand::FlushAll, |state| {
                    if let Some(stored) = state.nodes.get_mut(&node.address) {
                        stored.databases.clear();
                    }
                    Ok(())
                })
        })
    }

    fn flush_database<'a>(&'a self, node: &'a CacheNode, database: u32) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.cache
                .run_command(node, CacheCommand::FlushDatabase(database), |state| {
                    if let Some(stored) = state.nodes.get_mut(&node.address) {
                        stored.databases.remove(&database);
                    }
                    Ok(())
                })
        })
    }

    fn scan_keys<'a>(
        &'a self,
        node: &'a CacheNode,
        request: ScanRequest<'a>,
    ) -> ClientFuture<'a, ScanPage> {
        Box::pin(async move {
            self.cache
                .run_command(node, CacheCommand::Scan(request.database), |state| {
                    let snapshot_key = (node.address.clone(), request.database);
                    if request.cursor == ScanCursor::START {
                        let snapshot = state
                            .nodes
                            .get(&node.address)
                            .and_then(|stored| stored.databases.get(&request.database))
                            .map(|keys| {
                                keys.iter()
                                    .filter(|key| glob_matches(request.pattern, key))
                                    .cloned()
                                    .collect()
                            })
                            .unwrap_or_default();
                        state.snapshots.insert(snapshot_key.clone(), snapshot);
                    }
                    let snapshot = state
                        .snapshots
                        .get(&snapshot_key)
                        .cloned()
                        .unwrap_or_default();
                    let offset = usize::try_from(request.cursor.0).unwrap_or(usize::MAX);
                    let count = request.count.max(1);
                    let keys: Vec<String> =
                        snapshot.iter().skip(offset).take(count).cloned().collect();
                    let end = offset.saturating_add(count);
                    let next = (end < snapshot.len())
                        .then(|| ScanCursor(u64::try_from(end).unwrap_or(u64::MAX)));
                    let expiring = state
                        .nodes
                        .get_mut(&node.address)
                        .filter(|stored| stored.expire_scanned)
                        .and_then(|stored| stored.databases.get_mut(&request.database));
                    if let Some(db) = expiring {
                        for key in &keys {
                            db.remove(key);
                        }
                    }
                    Ok(ScanPage { keys, next })
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
            let command = CacheCommand::Delete {
                database,
                keys: keys.len(),
            };
            self.cache.run_command(node, command, |state| {
                let Some(stored) = state.nodes.get_mut(&node.address) else {
                    return Ok(DeleteBatch::default());
                };
                match stored.delete_budget {
                    Some(0) => {
                        return Err(ClientError::Connection {
                            endpoint: node.address.to_string(),
                            message: String::from("connection reset by peer"),
                        });
                    }
                    Some(remaining) => stored.delete_budget = Some(remaining - 1),
                    None => {}
                }
                let mut batch = DeleteBatch::default();
                if stored.reject_deletes {
                    batch.failed = keys.len() as u64;
                    return Ok(batch);
                }
                if let Some(db) = stored.databases.get_mut(&database) {
                    for key in keys {
                        if db.remove(key) {
                            batch.removed += 1;
                        }
                    }
                }
                Ok(batch)
            })
        })
    }
}

/// Error returned by a failing [`StaticDirectory`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("directory unavailable: {0}")]
pub struct DirectoryFailure(pub String);

/// Directory that serves a fixed set of instances, filtered by environment
/// and region like a real provider would.
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    instances: Vec<CacheInstance>,
    failure: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl StaticDirectory {
    /// Serves `instances` on every call.
    #[must_use]
    pub fn new(instances: Vec<CacheInstance>) -> Self {
        Self {
            instances,
            failure: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fails every call with `message`.
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self {
            instances: Vec::new(),
            failure: Some(message.to_owned()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns how many times the directory was queried.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CacheDirectory for StaticDirectory {
    type Error = DirectoryFailure;

    fn list_instances<'a>(
        &'a self,
        environment: &'a str,
        regions: &'a RegionFilter,
    ) -> DirectoryFuture<'a, Vec<CacheInstance>, Self::Error> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.failure {
                return Err(DirectoryFailure(message.clone()));
            }
            Ok(self
                .instances
                .iter()
                .filter(|candidate| candidate.environment == environment)
                .filter(|candidate| regions.allows(&candidate.region))
                .cloned()
                .collect())
        })
    }
}

/// Telemetry recorder that keeps every call in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryTelemetry {
    calls: Arc<Mutex<Vec<DependencyCall>>>,
}

impl MemoryTelemetry {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<DependencyCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TelemetryRecorder for MemoryTelemetry {
    fn record_dependency_call(&self, call: &DependencyCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.clone());
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Produces a minimal JSON payload matching the Scaleway Redis cluster list
/// endpoint. Each item is `(id, zone, tags, endpoint ip, tls)`.
#[must_use]
pub fn json_clusters(clusters: &[(&str, &str, &[&str], &str, bool)]) -> String {
    let items = clusters
        .iter()
        .map(|(id, zone, tags, ip, tls)| {
            let tags_json = tags
                .iter()
                .map(|tag| format!("\"{tag}\""))
                .collect::<Vec<_>>()
                .join(",");
            format!(
                concat!(
                    "{{\"id\":\"{id}\",\"name\":\"redis-{id}\",\"zone\":\"{zone}\",",
                    "\"status\":\"ready\",\"tags\":[{tags}],\"tls_enabled\":{tls},",
                    "\"user_name\":\"flusher\",",
                    "\"endpoints\":[{{\"id\":\"ep-{id}\",\"port\":6379,\"ips\":[\"{ip}\"]}}]}}"
                ),
                id = id,
                zone = zone,
                tags = tags_json,
                tls = tls,
                ip = ip
            )
        })
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{{\"clusters\":[{items}],\"total_count\":{}}}",
        clusters.len()
    )
}
