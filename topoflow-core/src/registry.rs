//! Every named topology on the node holds a reservation in [Registrations] from the moment it is
//! added until its removal has completely finished. The reservation is what makes add and remove
//! of the same name atomic: both are a check-and-set on the table under its write lock, and the
//! lock is always released before the registry collaborator is called.
//!
//! ```text
//!   add ──> Building ──(build ok)──> Active ──┐
//!              │                              ├── remove ──> Removing ──(unregistered and
//!              └──(build failed)──> BuildFailed ┘                        offsets reset)──> (free)
//!
//!   cleanup ──> Cleaning ──(local state cleared)──> (free)
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::offsets::{OffsetResetCoordinator, ResetOutcome};
use crate::tasks::{TaskInspector, partitions_to_reset};
use crate::topology::NamedTopology;

/// Resolves when the registry has finished an asynchronous build or teardown.
pub type Completion = BoxFuture<'static, Result<()>>;

/// Builds, runs and tears down the processing graphs of named topologies. Implemented by the
/// task/thread layer of the node.
pub trait TopologyRegistry: Send + Sync {
    /// Registers the topology and starts building it. The returned completion fails with
    /// [Error::TopologyBuild] if the graph turns out to be invalid.
    fn register_and_build(&self, topology: Arc<NamedTopology>) -> Completion;

    /// Stops processing the topology. The completion resolves once every thread has dropped
    /// the topology's tasks.
    fn unregister(&self, name: &str) -> Completion;

    /// Source topics of the topology, including ones resolved from its pattern at build time.
    fn source_topics_for(&self, name: &str) -> BTreeSet<String>;

    fn has_store(&self, name: &str, store: &str) -> bool;

    /// Description of every registered topology.
    fn describe(&self) -> String;
}

/// Where a registration is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationPhase {
    Building,
    Active,
    BuildFailed,
    Removing,
    /// Not registered; the local state of the name is being deleted.
    Cleaning,
}

impl RegistrationPhase {
    /// Whether callers can see the topology.
    fn is_visible(self) -> bool {
        !matches!(self, RegistrationPhase::Removing | RegistrationPhase::Cleaning)
    }
}

#[derive(Debug)]
struct Registration {
    /// None while `Cleaning`.
    topology: Option<Arc<NamedTopology>>,
    phase: RegistrationPhase,
}

/// Reservation table of the node's named topologies, keyed by name.
#[derive(Debug, Default)]
pub(crate) struct Registrations {
    entries: RwLock<HashMap<String, Registration>>,
}

impl Registrations {
    /// The registered topology, unless it is being removed.
    pub(crate) fn lookup(&self, name: &str) -> Option<Arc<NamedTopology>> {
        self.entries
            .read()
            .get(name)
            .filter(|r| r.phase.is_visible())
            .and_then(|r| r.topology.as_ref().map(Arc::clone))
    }

    pub(crate) fn phase(&self, name: &str) -> Option<RegistrationPhase> {
        self.entries.read().get(name).map(|r| r.phase)
    }

    /// Names visible to callers, i.e. not being removed.
    pub(crate) fn names(&self) -> BTreeSet<String> {
        self.entries
            .read()
            .iter()
            .filter(|(_, r)| r.phase.is_visible())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Reserves a name that holds no reservation for clearing its local state. The name is free
    /// again once the returned guard is dropped.
    pub(crate) fn begin_cleanup(self: &Arc<Self>, name: &str) -> Option<ReleaseOnDrop> {
        let mut entries = self.entries.write();
        if entries.contains_key(name) {
            return None;
        }
        entries.insert(
            name.to_string(),
            Registration {
                topology: None,
                phase: RegistrationPhase::Cleaning,
            },
        );
        Some(ReleaseOnDrop::new(Arc::clone(self), name))
    }

    pub(crate) fn reserve(&self, topology: Arc<NamedTopology>) -> Result<()> {
        let mut entries = self.entries.write();
        let name = topology.name();
        if let Some(existing) = entries.get(name) {
            let reason = match existing.phase {
                RegistrationPhase::Removing => "is still being removed",
                RegistrationPhase::Cleaning => "is having its local state cleaned up",
                _ => "already exists",
            };
            return Err(Error::DuplicateTopologyName(format!(
                "Unable to add the new NamedTopology {name} as another of the same name {reason}"
            )));
        }
        entries.insert(
            name.to_string(),
            Registration {
                topology: Some(Arc::clone(&topology)),
                phase: RegistrationPhase::Building,
            },
        );
        Ok(())
    }

    /// Moves a `Building` registration to `phase`. A build finishing after removal started
    /// leaves the registration `Removing`.
    fn finish_build(&self, name: &str, phase: RegistrationPhase) {
        let mut entries = self.entries.write();
        if let Some(registration) = entries.get_mut(name) {
            if registration.phase == RegistrationPhase::Building {
                registration.phase = phase;
            }
        }
    }

    pub(crate) fn begin_removal(&self, name: &str) -> Result<Arc<NamedTopology>> {
        let mut entries = self.entries.write();
        let not_found = || {
            Error::UnknownTopologyName(format!(
                "Unable to locate for removal a NamedTopology called {name}"
            ))
        };
        let registration = entries.get_mut(name).ok_or_else(not_found)?;
        match (registration.phase, &registration.topology) {
            (RegistrationPhase::Removing, _) => Err(Error::UnknownTopologyName(format!(
                "NamedTopology {name} is already being removed"
            ))),
            (RegistrationPhase::Cleaning, _) | (_, None) => Err(not_found()),
            (_, Some(topology)) => {
                let topology = Arc::clone(topology);
                registration.phase = RegistrationPhase::Removing;
                Ok(topology)
            }
        }
    }

    fn release(&self, name: &str) {
        self.entries.write().remove(name);
    }
}

/// Frees a reservation when dropped, also when the task holding it panics or is aborted.
pub(crate) struct ReleaseOnDrop {
    registrations: Arc<Registrations>,
    name: String,
}

impl ReleaseOnDrop {
    fn new(registrations: Arc<Registrations>, name: &str) -> Self {
        ReleaseOnDrop {
            registrations,
            name: name.to_string(),
        }
    }
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.registrations.release(&self.name);
    }
}

/// Handle on an added topology.
#[derive(Debug)]
pub struct AddTopologyResult {
    topology: String,
    build: JoinHandle<Result<()>>,
}

impl AddTopologyResult {
    pub fn topology(&self) -> &str {
        &self.topology
    }

    /// Resolves once the topology is built and processing, or fails with
    /// [Error::TopologyBuild]. Also fails if the node shuts down first.
    pub async fn all(self) -> Result<()> {
        self.build.await?
    }
}

/// Handle on a removal. The topology is unregistered and its offsets reset independently;
/// [RemoveTopologyResult::all] waits for both.
pub struct RemoveTopologyResult {
    topology: String,
    unregistered: Shared<Completion>,
    removal: JoinHandle<Result<ResetOutcome>>,
}

impl RemoveTopologyResult {
    pub fn topology(&self) -> &str {
        &self.topology
    }

    /// Resolves when the registry has unregistered the topology, regardless of the offset reset.
    pub async fn unregistered(&self) -> Result<()> {
        self.unregistered.clone().await
    }

    /// Resolves when the topology is unregistered and, if requested, its offsets are reset. The
    /// name can be added again once this has resolved. Fails if the node shuts down first.
    pub async fn all(self) -> Result<ResetOutcome> {
        // the removal task waits for unregistration on every path
        self.removal.await?
    }
}

/// Add/remove/lookup of named topologies on top of the registry collaborator.
pub(crate) struct RegistryFacade {
    registrations: Arc<Registrations>,
    registry: Arc<dyn TopologyRegistry>,
    inspector: Arc<dyn TaskInspector>,
    tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl RegistryFacade {
    pub(crate) fn new(
        registrations: Arc<Registrations>,
        registry: Arc<dyn TopologyRegistry>,
        inspector: Arc<dyn TaskInspector>,
        tracker: TaskTracker,
        cancellation_token: CancellationToken,
    ) -> Self {
        RegistryFacade {
            registrations,
            registry,
            inspector,
            tracker,
            cancellation_token,
        }
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Arc<NamedTopology>> {
        self.registrations.lookup(name)
    }

    pub(crate) fn names(&self) -> BTreeSet<String> {
        self.registrations.names()
    }

    pub(crate) fn phase(&self, name: &str) -> Option<RegistrationPhase> {
        self.registrations.phase(name)
    }

    pub(crate) fn describe(&self) -> String {
        self.registry.describe()
    }

    /// Reserves the name and hands the topology to the registry. Fails without reserving
    /// anything when called outside of a tokio runtime.
    pub(crate) fn add(&self, topology: NamedTopology) -> Result<AddTopologyResult> {
        let runtime = current_runtime("add", topology.name())?;
        let topology = Arc::new(topology);
        let name = topology.name().to_string();
        self.registrations.reserve(Arc::clone(&topology))?;

        let build = self.registry.register_and_build(topology);
        let registrations = Arc::clone(&self.registrations);
        let cancellation_token = self.cancellation_token.clone();
        let topology_name = name.clone();
        let build = self.tracker.spawn_on(
            async move {
                let built = tokio::select! {
                    biased;
                    _ = cancellation_token.cancelled() => Err(Error::TopologyBuild(format!(
                        "Node shut down before NamedTopology {topology_name} finished building"
                    ))),
                    result = build => result,
                };
                match built {
                    Ok(()) => {
                        registrations.finish_build(&topology_name, RegistrationPhase::Active);
                        info!(topology = %topology_name, "Topology is built and processing");
                        Ok(())
                    }
                    Err(e) => {
                        registrations.finish_build(&topology_name, RegistrationPhase::BuildFailed);
                        error!(topology = %topology_name, ?e, "Failed to build topology");
                        Err(match e {
                            Error::TopologyBuild(_) => e,
                            other => Error::TopologyBuild(other.to_string()),
                        })
                    }
                }
            },
            &runtime,
        );

        Ok(AddTopologyResult {
            topology: name,
            build,
        })
    }

    /// Marks the topology as being removed, snapshots its local source partitions, and asks the
    /// registry to unregister it. The offset reset, when given, starts once unregistration
    /// completes. Fails without touching the registration when called outside of a tokio
    /// runtime.
    pub(crate) fn remove(
        &self,
        name: &str,
        offset_reset: Option<OffsetResetCoordinator>,
    ) -> Result<RemoveTopologyResult> {
        let runtime = current_runtime("remove", name)?;
        let topology = self.registrations.begin_removal(name)?;
        let reservation = ReleaseOnDrop::new(Arc::clone(&self.registrations), name);

        // task metadata of the topology is gone once it is unregistered
        let partitions = partitions_to_reset(
            &self.inspector.all_local_tasks_for(name),
            &self.registry.source_topics_for(name),
            &topology,
        );

        let unregistered = self.registry.unregister(name).shared();

        let offset_reset = match offset_reset {
            Some(_) if partitions.is_empty() => {
                info!(
                    topology = name,
                    "No local source partitions, skipping offset reset"
                );
                None
            }
            other => other,
        };

        let cancellation_token = self.cancellation_token.clone();
        let topology_name = name.to_string();
        let unregister_signal = unregistered.clone();
        let removal = self.tracker.spawn_on(
            async move {
                let result = match offset_reset {
                    Some(coordinator) => {
                        coordinator
                            .run(&topology_name, unregister_signal, partitions)
                            .await
                    }
                    None => tokio::select! {
                        biased;
                        _ = cancellation_token.cancelled() => Err(Error::Other(format!(
                            "Node shut down before NamedTopology {topology_name} was unregistered"
                        ))),
                        result = unregister_signal => result.map(|()| ResetOutcome::Skipped),
                    },
                };
                drop(reservation);
                match &result {
                    Ok(outcome) => info!(topology = %topology_name, ?outcome, "Topology removed"),
                    Err(e) => {
                        warn!(topology = %topology_name, ?e, "Topology removal did not complete")
                    }
                }
                result
            },
            &runtime,
        );

        Ok(RemoveTopologyResult {
            topology: name.to_string(),
            unregistered,
            removal,
        })
    }
}

fn current_runtime(operation: &str, topology: &str) -> Result<Handle> {
    Handle::try_current().map_err(|e| {
        Error::Other(format!(
            "Cannot {operation} NamedTopology {topology} outside of a tokio runtime: {e}"
        ))
    })
}
