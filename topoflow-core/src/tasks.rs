use std::collections::BTreeSet;

use crate::topology::{NamedTopology, TaskId, TopicPartition};

/// A task owned by one of this node's threads, and the input partitions assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMetadata {
    pub task_id: TaskId,
    pub topic_partitions: BTreeSet<TopicPartition>,
}

impl TaskMetadata {
    pub fn new(
        task_id: TaskId,
        topic_partitions: impl IntoIterator<Item = TopicPartition>,
    ) -> Self {
        TaskMetadata {
            task_id,
            topic_partitions: topic_partitions.into_iter().collect(),
        }
    }
}

/// Reports the tasks this node currently owns. Implemented by the thread/task layer.
pub trait TaskInspector: Send + Sync {
    /// Every locally owned task of the topology, across all threads.
    fn all_local_tasks_for(&self, topology: &str) -> Vec<TaskMetadata>;
}

/// Partitions of `tasks` that feed the topology, either through one of `source_topics` or
/// through the topology's own subscription.
pub(crate) fn partitions_to_reset(
    tasks: &[TaskMetadata],
    source_topics: &BTreeSet<String>,
    topology: &NamedTopology,
) -> BTreeSet<TopicPartition> {
    tasks
        .iter()
        .flat_map(|task| task.topic_partitions.iter())
        .filter(|tp| source_topics.contains(&tp.topic) || topology.subscribes_to(&tp.topic))
        .cloned()
        .collect()
}
