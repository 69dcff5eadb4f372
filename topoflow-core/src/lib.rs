//! Live lifecycle of named topologies inside a single stream-processing node.
//!
//! A named topology is an independently addressable processing sub-graph. The [TopologyNode]
//! lets an operator add and remove named topologies while the node keeps processing the others,
//! resets the committed offsets of a removed topology's source partitions, clears its local
//! state, and routes interactive queries to the right topology's stores.
//!
//! Building the processing graph, assigning tasks, running them, persisting stores and talking
//! to the cluster are all done by collaborators behind the traits in [registry], [tasks],
//! [offsets], [cleanup] and [query].

mod error;
pub use crate::error::{Error, Result};

/// Node configuration, loaded from environment variables.
pub mod config;

/// Node lifecycle state machine and the guards that gate mutating operations.
pub mod lifecycle;

/// Named topologies, their builder, task ids and topic-partitions.
pub mod topology;

/// Locally owned tasks and the inspector that reports them.
pub mod tasks;

/// Registration table for named topologies and the registry collaborator that builds them.
pub mod registry;

/// Deletes the committed offsets of a removed topology, retrying while the consumer group is
/// still subscribed.
pub mod offsets;

/// Interactive queries against a named topology's state stores.
pub mod query;

/// Local state cleanup for removed topologies.
pub mod cleanup;

mod node;
pub use node::{Collaborators, TopologyNode};

#[cfg(test)]
mod test_utils;
