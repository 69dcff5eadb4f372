use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid Topology Name - {0}")]
    InvalidTopologyName(String),

    #[error("Duplicate Topology Name - {0}")]
    DuplicateTopologyName(String),

    #[error("Unknown Topology Name - {0}")]
    UnknownTopologyName(String),

    #[error("Unknown State Store - {0}")]
    UnknownStateStore(String),

    #[error("Illegal Lifecycle State - {0}")]
    IllegalLifecycleState(String),

    #[error("Topology Build Error - {0}")]
    TopologyBuild(String),

    /// The consumer group is still subscribed to a topic whose offsets we are deleting. Retried
    /// by the offset reset and never returned to callers.
    #[error("Offset Reset Conflict - {0}")]
    OffsetResetConflict(String),

    #[error("Offset Reset Error - {0}")]
    OffsetResetFatal(String),

    #[error("Offset Reset Cancelled - {0}")]
    OffsetResetCancelled(String),

    #[error("Active Topology Cleanup - {0}")]
    ActiveTopologyCleanup(String),

    #[error("Cleanup Error - {0}")]
    Cleanup(String),

    #[error("Not Running - {0}")]
    NotRunning(String),

    #[error("Config Error - {0}")]
    Config(String),

    #[error("Error - {0}")]
    Other(String),
}

impl From<tokio::task::JoinError> for Error {
    fn from(value: tokio::task::JoinError) -> Self {
        Error::Other(format!("Background task failed: {value}"))
    }
}
