use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use crate::registry::{Registrations, TopologyRegistry};
use crate::tasks::{TaskInspector, TaskMetadata};
use crate::topology::TopicPartition;

/// Which store of which topology a query targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreQueryParameters {
    topology: String,
    store_name: String,
    partition: Option<i32>,
    stale_stores: bool,
}

impl StoreQueryParameters {
    pub fn new(store_name: impl Into<String>, topology: impl Into<String>) -> Self {
        StoreQueryParameters {
            topology: topology.into(),
            store_name: store_name.into(),
            partition: None,
            stale_stores: false,
        }
    }

    /// Only query the given partition of the store.
    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Also serve from standby and restoring replicas.
    pub fn enable_stale_stores(mut self) -> Self {
        self.stale_stores = true;
        self
    }

    pub fn topology(&self) -> &str {
        &self.topology
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    pub fn partition(&self) -> Option<i32> {
        self.partition
    }

    pub fn stale_stores(&self) -> bool {
        self.stale_stores
    }
}

/// Read access to a local state store.
pub trait ReadOnlyStore: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;
}

/// Endpoint of a node serving interactive queries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostInfo {
    pub host: String,
    pub port: u16,
}

impl HostInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        HostInfo {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// What one node of the application hosts for a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMetadata {
    pub host_info: HostInfo,
    pub state_stores: BTreeSet<String>,
    pub topic_partitions: BTreeSet<TopicPartition>,
}

/// Where the partition holding a key lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyQueryMetadata {
    pub active_host: HostInfo,
    pub standby_hosts: BTreeSet<HostInfo>,
    pub partition: i32,
}

/// How far a local store partition trails its changelog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LagInfo {
    pub current_offset_position: i64,
    pub end_offset_position: i64,
}

impl LagInfo {
    pub fn offset_lag(&self) -> i64 {
        (self.end_offset_position - self.current_offset_position).max(0)
    }
}

/// Lag per store name, then per partition.
pub type StorePartitionLags = BTreeMap<String, BTreeMap<i32, LagInfo>>;

/// Store and metadata lookups of the node. Fails with [Error::NotRunning] when called while the
/// node cannot serve them.
pub trait StoreQueryService: Send + Sync {
    fn store(&self, params: &StoreQueryParameters) -> Result<Arc<dyn ReadOnlyStore>>;

    fn metadata_for_store(&self, store: &str, topology: &str) -> Result<Vec<NodeMetadata>>;

    fn metadata_for_key(&self, store: &str, key: &[u8], topology: &str)
    -> Result<KeyQueryMetadata>;

    fn partition_lags(&self, tasks: &[TaskMetadata]) -> Result<StorePartitionLags>;
}

/// Validates that the topology and its store exist before any query reaches the
/// [StoreQueryService].
pub(crate) struct QueryRouter {
    registrations: Arc<Registrations>,
    registry: Arc<dyn TopologyRegistry>,
    inspector: Arc<dyn TaskInspector>,
    queries: Arc<dyn StoreQueryService>,
    lifecycle: Arc<Lifecycle>,
}

impl QueryRouter {
    pub(crate) fn new(
        registrations: Arc<Registrations>,
        registry: Arc<dyn TopologyRegistry>,
        inspector: Arc<dyn TaskInspector>,
        queries: Arc<dyn StoreQueryService>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        QueryRouter {
            registrations,
            registry,
            inspector,
            queries,
            lifecycle,
        }
    }

    fn verify_topology_exists(&self, topology: &str) -> Result<()> {
        if self.registrations.lookup(topology).is_none() {
            return Err(Error::UnknownTopologyName(format!(
                "Unable to get store or metadata for NamedTopology {topology} as it does not exist"
            )));
        }
        Ok(())
    }

    fn verify_topology_store(&self, topology: &str, store: &str) -> Result<()> {
        self.verify_topology_exists(topology)?;
        if !self.registry.has_store(topology, store) {
            return Err(Error::UnknownStateStore(format!(
                "Cannot get state store {store} from NamedTopology {topology} because no such store \
                 is registered in the topology"
            )));
        }
        Ok(())
    }

    pub(crate) fn store(&self, params: &StoreQueryParameters) -> Result<Arc<dyn ReadOnlyStore>> {
        self.verify_topology_store(params.topology(), params.store_name())?;
        self.queries.store(params)
    }

    pub(crate) fn metadata_for_store(
        &self,
        store: &str,
        topology: &str,
    ) -> Result<Vec<NodeMetadata>> {
        self.verify_topology_store(topology, store)?;
        self.lifecycle.validate_running_or_rebalancing()?;
        self.queries.metadata_for_store(store, topology)
    }

    pub(crate) fn metadata_for_key(
        &self,
        store: &str,
        key: &[u8],
        topology: &str,
    ) -> Result<KeyQueryMetadata> {
        self.verify_topology_store(topology, store)?;
        self.lifecycle.validate_running_or_rebalancing()?;
        self.queries.metadata_for_key(store, key, topology)
    }

    pub(crate) fn local_store_partition_lags(&self, topology: &str) -> Result<StorePartitionLags> {
        self.verify_topology_exists(topology)?;
        let tasks = self.inspector.all_local_tasks_for(topology);
        debug!(topology, tasks = tasks.len(), "Computing local store lags");
        self.queries.partition_lags(&tasks)
    }
}
