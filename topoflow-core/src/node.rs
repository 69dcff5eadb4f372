use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::cleanup::{CleanupController, PersistedStateStore};
use crate::config::NodeConfig;
use crate::error::Result;
use crate::lifecycle::{Lifecycle, NodeState};
use crate::offsets::{OffsetDeletionClient, OffsetResetCoordinator};
use crate::query::{
    KeyQueryMetadata, NodeMetadata, QueryRouter, ReadOnlyStore, StorePartitionLags,
    StoreQueryParameters, StoreQueryService,
};
use crate::registry::{
    AddTopologyResult, RegistrationPhase, Registrations, RegistryFacade, RemoveTopologyResult,
    TopologyRegistry,
};
use crate::tasks::TaskInspector;
use crate::topology::{NamedTopology, NamedTopologyBuilder};

/// The parts of the node that build, run and persist topologies and talk to the cluster.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn TopologyRegistry>,
    pub inspector: Arc<dyn TaskInspector>,
    pub offsets: Arc<dyn OffsetDeletionClient>,
    pub state: Arc<dyn PersistedStateStore>,
    pub queries: Arc<dyn StoreQueryService>,
}

/// A stream-processing node hosting any number of named topologies. Topologies can be added and
/// removed while the others keep processing.
///
/// Adding and removing spawn background tasks, so both fail when called outside of a tokio
/// runtime.
pub struct TopologyNode {
    config: NodeConfig,
    lifecycle: Arc<Lifecycle>,
    facade: RegistryFacade,
    router: QueryRouter,
    cleanup: CleanupController,
    offsets: Arc<dyn OffsetDeletionClient>,
    cancellation_token: CancellationToken,
    tracker: TaskTracker,
}

impl TopologyNode {
    pub fn new(config: NodeConfig, collaborators: Collaborators) -> Self {
        let lifecycle = Arc::new(Lifecycle::new());
        let registrations = Arc::new(Registrations::default());
        let tracker = TaskTracker::new();
        let cancellation_token = CancellationToken::new();

        let facade = RegistryFacade::new(
            Arc::clone(&registrations),
            Arc::clone(&collaborators.registry),
            Arc::clone(&collaborators.inspector),
            tracker.clone(),
            cancellation_token.child_token(),
        );
        let router = QueryRouter::new(
            Arc::clone(&registrations),
            collaborators.registry,
            collaborators.inspector,
            collaborators.queries,
            Arc::clone(&lifecycle),
        );
        let cleanup = CleanupController::new(registrations, collaborators.state);

        TopologyNode {
            config,
            lifecycle,
            facade,
            router,
            cleanup,
            offsets: collaborators.offsets,
            cancellation_token,
            tracker,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> NodeState {
        self.lifecycle.state()
    }

    /// Moves the node to `state`, returning the previous state. Driven by the thread layer as
    /// it rebalances.
    pub fn transition_to(&self, state: NodeState) -> Result<NodeState> {
        self.lifecycle.transition_to(state)
    }

    /// Adds the initial topologies and starts processing. The returned handles resolve as the
    /// topologies finish building.
    pub fn start(
        &self,
        initial_topologies: impl IntoIterator<Item = NamedTopology>,
    ) -> Result<Vec<AddTopologyResult>> {
        self.lifecycle.transition_to(NodeState::Starting)?;

        let mut added = Vec::new();
        for topology in initial_topologies {
            match self.add_topology(topology) {
                Ok(result) => added.push(result),
                Err(e) => {
                    error!(?e, "Failed to add initial topology");
                    self.lifecycle.transition_to(NodeState::Error)?;
                    return Err(e);
                }
            }
        }

        self.lifecycle.transition_to(NodeState::Rebalancing)?;
        info!(topologies = added.len(), "Node started");
        Ok(added)
    }

    /// Builder for a topology inheriting the node's application configs.
    pub fn new_topology_builder(&self, name: impl Into<String>) -> Result<NamedTopologyBuilder> {
        self.new_topology_builder_with_overrides(name, HashMap::new())
    }

    /// Builder for a topology whose `overrides` take precedence over the node's application
    /// configs.
    pub fn new_topology_builder_with_overrides(
        &self,
        name: impl Into<String>,
        overrides: HashMap<String, String>,
    ) -> Result<NamedTopologyBuilder> {
        NamedTopologyBuilder::new(name, &self.config.application_configs, overrides)
    }

    pub fn get_topology_by_name(&self, name: &str) -> Option<Arc<NamedTopology>> {
        self.facade.lookup(name)
    }

    /// Names of the registered topologies, excluding those being removed.
    pub fn topology_names(&self) -> BTreeSet<String> {
        self.facade.names()
    }

    /// Where the topology's registration is, including while it is being removed.
    pub fn registration_phase(&self, name: &str) -> Option<RegistrationPhase> {
        self.facade.phase(name)
    }

    /// Adds a topology to the running node. If several instances of the application are
    /// running, each of them has to add it to process all of its partitions.
    pub fn add_topology(&self, topology: NamedTopology) -> Result<AddTopologyResult> {
        info!(topology = topology.name(), "Adding topology");
        self.lifecycle.check_can_add()?;
        self.facade.add(topology)
    }

    /// Removes a topology from the running node. With `reset_offsets`, the committed offsets of
    /// its local source partitions are deleted once every instance of the application has
    /// removed it, which keeps retrying until then.
    pub fn remove_topology(&self, name: &str, reset_offsets: bool) -> Result<RemoveTopologyResult> {
        info!(topology = name, reset_offsets, "Removing topology");
        self.lifecycle.check_can_remove()?;

        let offset_reset = reset_offsets.then(|| {
            OffsetResetCoordinator::new(
                Arc::clone(&self.offsets),
                self.config.application_id.clone(),
                self.config.offset_reset_backoff,
                self.config.offset_reset_timeout,
                self.cancellation_token.child_token(),
            )
        });
        self.facade.remove(name, offset_reset)
    }

    /// Deletes the local state of a removed topology. Allowed in any node state. Re-adding the
    /// topology later restores its stores from scratch.
    pub fn cleanup_topology(&self, name: &str) -> Result<()> {
        self.cleanup.cleanup(name)
    }

    pub fn full_description(&self) -> String {
        self.facade.describe()
    }

    pub fn query_store(&self, params: &StoreQueryParameters) -> Result<Arc<dyn ReadOnlyStore>> {
        self.router.store(params)
    }

    pub fn metadata_for_store(&self, store: &str, topology: &str) -> Result<Vec<NodeMetadata>> {
        self.router.metadata_for_store(store, topology)
    }

    pub fn metadata_for_key(
        &self,
        store: &str,
        key: &[u8],
        topology: &str,
    ) -> Result<KeyQueryMetadata> {
        self.router.metadata_for_key(store, key, topology)
    }

    pub fn local_store_partition_lags(&self, topology: &str) -> Result<StorePartitionLags> {
        self.router.local_store_partition_lags(topology)
    }

    /// Abandons pending builds, removals and offset resets, and waits for every background task
    /// of the node. Concurrent calls all wait for the same background tasks.
    pub async fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.lifecycle.transition_to(NodeState::PendingShutdown) {
            return match self.lifecycle.state() {
                NodeState::PendingShutdown | NodeState::Shutdown => {
                    self.tracker.wait().await;
                    Ok(())
                }
                _ => Err(e),
            };
        }

        self.cancellation_token.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        self.lifecycle.transition_to(NodeState::Shutdown)?;
        info!("Node shut down");
        Ok(())
    }
}
