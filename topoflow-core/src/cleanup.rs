use std::io;
use std::sync::Arc;

use tracing::{error, info};

use crate::error::{Error, Result};
use crate::registry::Registrations;
use crate::topology::validate_topology_name;

mod state_dir;
pub use state_dir::StateDirectory;

/// Local persisted state of named topologies.
pub trait PersistedStateStore: Send + Sync {
    /// Deletes all local state of the topology. Clearing a topology without state is a no-op.
    fn clear_state(&self, topology: &str) -> io::Result<()>;
}

/// Clears the local state of topologies that are no longer registered.
pub(crate) struct CleanupController {
    registrations: Arc<Registrations>,
    state: Arc<dyn PersistedStateStore>,
}

impl CleanupController {
    pub(crate) fn new(registrations: Arc<Registrations>, state: Arc<dyn PersistedStateStore>) -> Self {
        CleanupController {
            registrations,
            state,
        }
    }

    /// Fails if the topology is still registered, including while its removal is in flight.
    /// The name stays reserved until the state is cleared, so it cannot be added meanwhile.
    pub(crate) fn cleanup(&self, topology: &str) -> Result<()> {
        validate_topology_name(topology)?;
        let _cleaning = self.registrations.begin_cleanup(topology).ok_or_else(|| {
            Error::ActiveTopologyCleanup(format!(
                "Cannot clean up the local state of NamedTopology {topology} as it is still active"
            ))
        })?;

        match self.state.clear_state(topology) {
            Ok(()) => {
                info!(topology, "Cleared local state");
                Ok(())
            }
            Err(e) => {
                error!(topology, ?e, "Failed to clear local state");
                Err(Error::Cleanup(format!(
                    "Failed to clear the local state of NamedTopology {topology}: {e}"
                )))
            }
        }
    }
}
