use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::info;

use crate::error::{Error, Result};

/// Coarse phase of the node's life.
/// ```text
/// Created -> Starting -> Rebalancing <-> Running
///    |          |             |             |
///    +----------+---> PendingShutdown <-----+ <- Error
///                          |
///                       Shutdown
/// ```
/// `Starting`, `Rebalancing` and `Running` can also move to `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeState {
    Created = 0,
    Starting = 1,
    Running = 2,
    Rebalancing = 3,
    PendingShutdown = 4,
    Shutdown = 5,
    Error = 6,
}

impl NodeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => NodeState::Created,
            1 => NodeState::Starting,
            2 => NodeState::Running,
            3 => NodeState::Rebalancing,
            4 => NodeState::PendingShutdown,
            5 => NodeState::Shutdown,
            _ => NodeState::Error,
        }
    }

    pub fn is_running_or_rebalancing(self) -> bool {
        matches!(self, NodeState::Running | NodeState::Rebalancing)
    }

    /// True once shutdown has begun, including after a fatal error.
    pub fn has_started_or_finished_shutting_down(self) -> bool {
        matches!(
            self,
            NodeState::PendingShutdown | NodeState::Shutdown | NodeState::Error
        )
    }

    fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::{Created, Error, PendingShutdown, Rebalancing, Running, Shutdown, Starting};
        matches!(
            (self, next),
            (Created, Starting | PendingShutdown)
                | (Starting, Running | Rebalancing | PendingShutdown | Error)
                | (Running, Rebalancing | PendingShutdown | Error)
                | (Rebalancing, Running | PendingShutdown | Error)
                | (Error, PendingShutdown)
                | (PendingShutdown, Shutdown)
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            NodeState::Created => "CREATED",
            NodeState::Starting => "STARTING",
            NodeState::Running => "RUNNING",
            NodeState::Rebalancing => "REBALANCING",
            NodeState::PendingShutdown => "PENDING_SHUTDOWN",
            NodeState::Shutdown => "SHUTDOWN",
            NodeState::Error => "ERROR",
        };
        f.write_str(state)
    }
}

/// Holds the node state in an atomic so guards can read a snapshot without locking.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Lifecycle {
            state: AtomicU8::new(NodeState::Created as u8),
        }
    }

    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves to `next` if the edge is legal from the current state and returns the previous state.
    pub fn transition_to(&self, next: NodeState) -> Result<NodeState> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = NodeState::from_u8(current);
            if !from.can_transition_to(next) {
                return Err(Error::IllegalLifecycleState(format!(
                    "Cannot transition from {from} to {next}"
                )));
            }
            match self.state.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    info!(%from, to = %next, "Node state transition");
                    return Ok(from);
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Topologies can be added until shutdown begins.
    pub fn check_can_add(&self) -> Result<()> {
        let state = self.state();
        if state.has_started_or_finished_shutting_down() {
            return Err(Error::IllegalLifecycleState(format!(
                "Cannot add a NamedTopology while the state is {state}"
            )));
        }
        Ok(())
    }

    /// Topologies can only be removed while the node is processing.
    pub fn check_can_remove(&self) -> Result<()> {
        let state = self.state();
        if !state.is_running_or_rebalancing() {
            return Err(Error::IllegalLifecycleState(format!(
                "Cannot remove a NamedTopology while the state is {state}"
            )));
        }
        Ok(())
    }

    pub fn validate_running_or_rebalancing(&self) -> Result<()> {
        let state = self.state();
        if !state.is_running_or_rebalancing() {
            return Err(Error::IllegalLifecycleState(format!(
                "Node is not running or rebalancing, current state is {state}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_and_shutdown_path() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), NodeState::Created);

        for next in [
            NodeState::Starting,
            NodeState::Rebalancing,
            NodeState::Running,
            NodeState::Rebalancing,
            NodeState::PendingShutdown,
            NodeState::Shutdown,
        ] {
            lifecycle.transition_to(next).unwrap();
            assert_eq!(lifecycle.state(), next);
        }
    }

    #[test]
    fn test_illegal_transitions() {
        let lifecycle = Lifecycle::new();
        assert!(matches!(
            lifecycle.transition_to(NodeState::Running),
            Err(Error::IllegalLifecycleState(_))
        ));

        lifecycle.transition_to(NodeState::PendingShutdown).unwrap();
        lifecycle.transition_to(NodeState::Shutdown).unwrap();
        assert!(lifecycle.transition_to(NodeState::Starting).is_err());
        assert!(lifecycle.transition_to(NodeState::PendingShutdown).is_err());
        assert_eq!(lifecycle.state(), NodeState::Shutdown);
    }

    #[test]
    fn test_add_guard() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.check_can_add().is_ok());

        lifecycle.transition_to(NodeState::Starting).unwrap();
        lifecycle.transition_to(NodeState::Running).unwrap();
        assert!(lifecycle.check_can_add().is_ok());

        lifecycle.transition_to(NodeState::Error).unwrap();
        assert!(lifecycle.check_can_add().is_err());

        lifecycle.transition_to(NodeState::PendingShutdown).unwrap();
        assert!(lifecycle.check_can_add().is_err());
    }

    #[test]
    fn test_remove_guard() {
        let lifecycle = Lifecycle::new();
        let err = lifecycle.check_can_remove().unwrap_err();
        assert_eq!(
            err,
            Error::IllegalLifecycleState(
                "Cannot remove a NamedTopology while the state is CREATED".to_string()
            )
        );

        lifecycle.transition_to(NodeState::Starting).unwrap();
        assert!(lifecycle.check_can_remove().is_err());

        lifecycle.transition_to(NodeState::Rebalancing).unwrap();
        assert!(lifecycle.check_can_remove().is_ok());
        assert!(lifecycle.validate_running_or_rebalancing().is_ok());

        lifecycle.transition_to(NodeState::Running).unwrap();
        assert!(lifecycle.check_can_remove().is_ok());

        lifecycle.transition_to(NodeState::PendingShutdown).unwrap();
        assert!(lifecycle.check_can_remove().is_err());
        assert!(lifecycle.validate_running_or_rebalancing().is_err());
    }
}
