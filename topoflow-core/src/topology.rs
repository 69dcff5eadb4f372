use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::error::{Error, Result};

/// Separates the topology name from the rest of a task id, and brackets the topology's state
/// directory. Topology names must not contain it.
pub const NAMED_TOPOLOGY_DELIMITER: &str = "__";

/// A partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        TopicPartition {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Identifies a task: one partition of one sub-topology, optionally namespaced by the named
/// topology it belongs to. Renders as `<topology>__<subtopology>_<partition>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId {
    pub subtopology: u32,
    pub partition: i32,
    pub topology_name: Option<String>,
}

impl TaskId {
    pub fn new(subtopology: u32, partition: i32) -> Self {
        TaskId {
            subtopology,
            partition,
            topology_name: None,
        }
    }

    pub fn named(topology: impl Into<String>, subtopology: u32, partition: i32) -> Self {
        TaskId {
            subtopology,
            partition,
            topology_name: Some(topology.into()),
        }
    }

    pub fn topology_name(&self) -> Option<&str> {
        self.topology_name.as_deref()
    }

    /// True if the task belongs to the named topology.
    pub fn belongs_to(&self, topology: &str) -> bool {
        self.topology_name() == Some(topology)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.topology_name {
            Some(name) => write!(
                f,
                "{name}{NAMED_TOPOLOGY_DELIMITER}{}_{}",
                self.subtopology, self.partition
            ),
            None => write!(f, "{}_{}", self.subtopology, self.partition),
        }
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Other(format!("Unable to parse task id {s:?}"));

        let (topology_name, rest) = match s.rsplit_once(NAMED_TOPOLOGY_DELIMITER) {
            Some((name, rest)) if !name.is_empty() => (Some(name.to_string()), rest),
            Some(_) => return Err(invalid()),
            None => (None, s),
        };
        let (subtopology, partition) = rest.split_once('_').ok_or_else(invalid)?;

        Ok(TaskId {
            subtopology: subtopology.parse().map_err(|_| invalid())?,
            partition: partition.parse().map_err(|_| invalid())?,
            topology_name,
        })
    }
}

/// Rejects names the node cannot namespace tasks and state directories with.
pub fn validate_topology_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidTopologyName(
            "A NamedTopology name must not be empty".to_string(),
        ));
    }
    if name.contains(NAMED_TOPOLOGY_DELIMITER) {
        return Err(Error::InvalidTopologyName(format!(
            "The character sequence '{NAMED_TOPOLOGY_DELIMITER}' is not allowed in a NamedTopology, \
             please select a new name: {name}"
        )));
    }
    if name.contains(['/', '\\']) {
        return Err(Error::InvalidTopologyName(format!(
            "A NamedTopology name must not contain path separators: {name}"
        )));
    }
    Ok(())
}

/// A named, immutable processing graph definition. Only what the node needs to manage its
/// lifecycle is kept here; the graph itself is owned by the registry collaborator.
#[derive(Debug, Clone)]
pub struct NamedTopology {
    name: String,
    source_topics: BTreeSet<String>,
    source_pattern: Option<Regex>,
    stores: BTreeSet<String>,
    config: HashMap<String, String>,
}

impl NamedTopology {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_topics(&self) -> &BTreeSet<String> {
        &self.source_topics
    }

    pub fn source_pattern(&self) -> Option<&Regex> {
        self.source_pattern.as_ref()
    }

    pub fn stores(&self) -> &BTreeSet<String> {
        &self.stores
    }

    pub fn has_store(&self, store: &str) -> bool {
        self.stores.contains(store)
    }

    /// Application configs with this topology's overrides applied.
    pub fn config(&self) -> &HashMap<String, String> {
        &self.config
    }

    /// True if records of `topic` flow into this topology.
    pub fn subscribes_to(&self, topic: &str) -> bool {
        self.source_topics.contains(topic)
            || self
                .source_pattern
                .as_ref()
                .is_some_and(|pattern| pattern.is_match(topic))
    }

    /// Human-readable summary used in node descriptions.
    pub fn describe(&self) -> String {
        let mut description = format!("Topology: {}:\n", self.name);
        let topics: Vec<&str> = self.source_topics.iter().map(String::as_str).collect();
        description.push_str(&format!("    Sources: [{}]\n", topics.join(", ")));
        if let Some(pattern) = &self.source_pattern {
            description.push_str(&format!("    Source pattern: {}\n", pattern.as_str()));
        }
        let stores: Vec<&str> = self.stores.iter().map(String::as_str).collect();
        description.push_str(&format!("    Stores: [{}]\n", stores.join(", ")));
        description
    }
}

/// Collects the definition of a [NamedTopology]. Created through the node so the topology
/// inherits the application configs.
#[derive(Debug, Clone)]
pub struct NamedTopologyBuilder {
    name: String,
    source_topics: BTreeSet<String>,
    source_pattern: Option<String>,
    stores: BTreeSet<String>,
    config: HashMap<String, String>,
}

impl NamedTopologyBuilder {
    pub(crate) fn new(
        name: impl Into<String>,
        application_configs: &HashMap<String, String>,
        overrides: HashMap<String, String>,
    ) -> Result<Self> {
        let name = name.into();
        validate_topology_name(&name)?;

        let mut config = application_configs.clone();
        config.extend(overrides);

        Ok(NamedTopologyBuilder {
            name,
            source_topics: BTreeSet::new(),
            source_pattern: None,
            stores: BTreeSet::new(),
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(mut self, topic: impl Into<String>) -> Self {
        self.source_topics.insert(topic.into());
        self
    }

    /// Subscribes to every topic matching the regular expression.
    pub fn source_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.source_pattern = Some(pattern.into());
        self
    }

    pub fn state_store(mut self, store: impl Into<String>) -> Self {
        self.stores.insert(store.into());
        self
    }

    pub fn build(self) -> Result<NamedTopology> {
        let source_pattern = self
            .source_pattern
            .map(|pattern| {
                Regex::new(&pattern).map_err(|e| {
                    Error::TopologyBuild(format!(
                        "Invalid source pattern {pattern:?} in NamedTopology {}: {e}",
                        self.name
                    ))
                })
            })
            .transpose()?;

        if self.source_topics.is_empty() && source_pattern.is_none() {
            return Err(Error::TopologyBuild(format!(
                "NamedTopology {} has no source topics",
                self.name
            )));
        }

        Ok(NamedTopology {
            name: self.name,
            source_topics: self.source_topics,
            source_pattern,
            stores: self.stores,
            config: self.config,
        })
    }
}
