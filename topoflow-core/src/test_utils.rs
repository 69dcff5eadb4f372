//! In-memory collaborators with fault injection for unit tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::cleanup::PersistedStateStore;
use crate::error::{Error, Result};
use crate::offsets::{DeleteOffsetsError, OffsetDeletionClient};
use crate::query::{
    HostInfo, KeyQueryMetadata, LagInfo, NodeMetadata, ReadOnlyStore, StorePartitionLags,
    StoreQueryParameters, StoreQueryService,
};
use crate::registry::{Completion, TopologyRegistry};
use crate::tasks::{TaskInspector, TaskMetadata};
use crate::topology::{NamedTopology, NamedTopologyBuilder, TopicPartition};

pub(crate) fn topology(name: &str, sources: &[&str], stores: &[&str]) -> NamedTopology {
    let mut builder = NamedTopologyBuilder::new(name, &HashMap::new(), HashMap::new()).unwrap();
    for source in sources {
        builder = builder.source(*source);
    }
    for store in stores {
        builder = builder.state_store(*store);
    }
    builder.build().unwrap()
}

/// Completions resolve once the gate is open.
struct Gate(watch::Sender<bool>);

impl Gate {
    fn open() -> Self {
        Gate(watch::channel(true).0)
    }

    fn set(&self, open: bool) {
        self.0.send_modify(|gate| *gate = open);
    }

    fn completion(&self, result: Result<()>) -> Completion {
        let mut open = self.0.subscribe();
        async move {
            open.wait_for(|open| *open)
                .await
                .map_err(|_| Error::Other("registry dropped".to_string()))?;
            result
        }
        .boxed()
    }
}

/// Registry that "builds" a topology by remembering it.
pub(crate) struct InMemoryRegistry {
    topologies: Mutex<BTreeMap<String, Arc<NamedTopology>>>,
    failing_builds: Mutex<HashSet<String>>,
    failing_unregisters: Mutex<HashSet<String>>,
    builds: Gate,
    unregistrations: Gate,
    build_calls: AtomicUsize,
    unregister_calls: AtomicUsize,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        InMemoryRegistry {
            topologies: Mutex::new(BTreeMap::new()),
            failing_builds: Mutex::new(HashSet::new()),
            failing_unregisters: Mutex::new(HashSet::new()),
            builds: Gate::open(),
            unregistrations: Gate::open(),
            build_calls: AtomicUsize::new(0),
            unregister_calls: AtomicUsize::new(0),
        }
    }
}

impl InMemoryRegistry {
    pub(crate) fn fail_build(&self, name: &str) {
        self.failing_builds.lock().insert(name.to_string());
    }

    pub(crate) fn fail_unregister(&self, name: &str) {
        self.failing_unregisters.lock().insert(name.to_string());
    }

    /// Builds stay pending until [Self::release_builds].
    pub(crate) fn hold_builds(&self) {
        self.builds.set(false);
    }

    pub(crate) fn release_builds(&self) {
        self.builds.set(true);
    }

    /// Unregistrations stay pending until [Self::release_unregistrations].
    pub(crate) fn hold_unregistrations(&self) {
        self.unregistrations.set(false);
    }

    pub(crate) fn release_unregistrations(&self) {
        self.unregistrations.set(true);
    }

    pub(crate) fn registered_names(&self) -> Vec<String> {
        self.topologies.lock().keys().cloned().collect()
    }

    pub(crate) fn build_calls(&self) -> usize {
        self.build_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn unregister_calls(&self) -> usize {
        self.unregister_calls.load(Ordering::SeqCst)
    }
}

impl TopologyRegistry for InMemoryRegistry {
    fn register_and_build(&self, topology: Arc<NamedTopology>) -> Completion {
        self.build_calls.fetch_add(1, Ordering::SeqCst);
        let name = topology.name().to_string();
        let result = if self.failing_builds.lock().contains(&name) {
            Err(Error::TopologyBuild(format!("Invalid topology {name}")))
        } else {
            Ok(())
        };
        self.topologies.lock().insert(name, topology);
        self.builds.completion(result)
    }

    fn unregister(&self, name: &str) -> Completion {
        self.unregister_calls.fetch_add(1, Ordering::SeqCst);
        self.topologies.lock().remove(name);
        let result = if self.failing_unregisters.lock().contains(name) {
            Err(Error::Other(format!("Failed to unregister {name}")))
        } else {
            Ok(())
        };
        self.unregistrations.completion(result)
    }

    fn source_topics_for(&self, name: &str) -> BTreeSet<String> {
        self.topologies
            .lock()
            .get(name)
            .map(|t| t.source_topics().clone())
            .unwrap_or_default()
    }

    fn has_store(&self, name: &str, store: &str) -> bool {
        self.topologies
            .lock()
            .get(name)
            .is_some_and(|t| t.has_store(store))
    }

    fn describe(&self) -> String {
        self.topologies
            .lock()
            .values()
            .map(|t| t.describe())
            .collect()
    }
}

#[derive(Default)]
pub(crate) struct StaticTaskInspector {
    tasks: Mutex<HashMap<String, Vec<TaskMetadata>>>,
}

impl StaticTaskInspector {
    pub(crate) fn set_tasks(&self, topology: &str, tasks: Vec<TaskMetadata>) {
        self.tasks.lock().insert(topology.to_string(), tasks);
    }
}

impl TaskInspector for StaticTaskInspector {
    fn all_local_tasks_for(&self, topology: &str) -> Vec<TaskMetadata> {
        self.tasks.lock().get(topology).cloned().unwrap_or_default()
    }
}

type DeleteResult = std::result::Result<(), DeleteOffsetsError>;

/// Answers offset deletions from a script, then with a fallback once the script runs out.
pub(crate) struct ScriptedOffsetClient {
    script: Mutex<VecDeque<DeleteResult>>,
    fallback: DeleteResult,
    requests: Mutex<Vec<(String, BTreeSet<TopicPartition>)>>,
    panics: bool,
}

impl ScriptedOffsetClient {
    /// Succeeds once the script is exhausted.
    pub(crate) fn new(script: impl IntoIterator<Item = DeleteResult>) -> Self {
        ScriptedOffsetClient {
            script: Mutex::new(script.into_iter().collect()),
            fallback: Ok(()),
            requests: Mutex::new(Vec::new()),
            panics: false,
        }
    }

    pub(crate) fn always(result: DeleteResult) -> Self {
        ScriptedOffsetClient {
            script: Mutex::new(VecDeque::new()),
            fallback: result,
            requests: Mutex::new(Vec::new()),
            panics: false,
        }
    }

    /// Panics on every deletion.
    pub(crate) fn panicking() -> Self {
        ScriptedOffsetClient {
            panics: true,
            ..Self::new([])
        }
    }

    pub(crate) fn attempts(&self) -> usize {
        self.requests.lock().len()
    }

    pub(crate) fn requests(&self) -> Vec<(String, BTreeSet<TopicPartition>)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl OffsetDeletionClient for ScriptedOffsetClient {
    async fn delete_committed_offsets(
        &self,
        group_id: &str,
        partitions: &BTreeSet<TopicPartition>,
    ) -> DeleteResult {
        self.requests
            .lock()
            .push((group_id.to_string(), partitions.clone()));
        if self.panics {
            panic!("offset deletion for {group_id} panicked");
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

struct MemoryStore {
    name: String,
    entries: HashMap<Vec<u8>, Bytes>,
}

impl ReadOnlyStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.entries.get(key).cloned())
    }
}

/// Query service reporting the given stores for every topology, counting every call.
pub(crate) struct RecordingQueryService {
    stores: Vec<String>,
    running: AtomicBool,
    calls: AtomicUsize,
}

impl RecordingQueryService {
    pub(crate) fn new<const N: usize>(stores: [&str; N]) -> Self {
        RecordingQueryService {
            stores: stores.iter().map(|s| s.to_string()).collect(),
            running: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn call(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::NotRunning(
                "Node is not running or rebalancing".to_string(),
            ));
        }
        Ok(())
    }

    fn host() -> HostInfo {
        HostInfo::new("localhost", 8080)
    }
}

impl StoreQueryService for RecordingQueryService {
    fn store(&self, params: &StoreQueryParameters) -> Result<Arc<dyn ReadOnlyStore>> {
        self.call()?;
        Ok(Arc::new(MemoryStore {
            name: params.store_name().to_string(),
            entries: HashMap::new(),
        }))
    }

    fn metadata_for_store(&self, store: &str, _topology: &str) -> Result<Vec<NodeMetadata>> {
        self.call()?;
        Ok(vec![NodeMetadata {
            host_info: Self::host(),
            state_stores: BTreeSet::from([store.to_string()]),
            topic_partitions: BTreeSet::new(),
        }])
    }

    fn metadata_for_key(
        &self,
        _store: &str,
        _key: &[u8],
        _topology: &str,
    ) -> Result<KeyQueryMetadata> {
        self.call()?;
        Ok(KeyQueryMetadata {
            active_host: Self::host(),
            standby_hosts: BTreeSet::new(),
            partition: 0,
        })
    }

    fn partition_lags(&self, tasks: &[TaskMetadata]) -> Result<StorePartitionLags> {
        self.call()?;
        let mut lags = StorePartitionLags::new();
        for task in tasks {
            for store in &self.stores {
                lags.entry(store.clone()).or_default().insert(
                    task.task_id.partition,
                    LagInfo {
                        current_offset_position: 0,
                        end_offset_position: 10,
                    },
                );
            }
        }
        Ok(lags)
    }
}

/// Records which topologies had their state cleared.
#[derive(Default)]
pub(crate) struct RecordingStateStore {
    cleared: Mutex<Vec<String>>,
    failure: Mutex<Option<io::ErrorKind>>,
}

impl RecordingStateStore {
    pub(crate) fn fail_with(&self, kind: io::ErrorKind) {
        *self.failure.lock() = Some(kind);
    }

    pub(crate) fn cleared(&self) -> Vec<String> {
        self.cleared.lock().clone()
    }
}

impl PersistedStateStore for RecordingStateStore {
    fn clear_state(&self, topology: &str) -> io::Result<()> {
        if let Some(kind) = *self.failure.lock() {
            return Err(io::Error::new(kind, "injected failure"));
        }
        self.cleared.lock().push(topology.to_string());
        Ok(())
    }
}

/// Clears state only once the test lets it, reporting when it has started.
pub(crate) struct BlockingStateStore {
    started: Mutex<mpsc::Sender<String>>,
    proceed: Mutex<mpsc::Receiver<()>>,
}

impl BlockingStateStore {
    /// Returns the store, a receiver of the topologies it started clearing, and a sender that
    /// lets one clear finish.
    pub(crate) fn new() -> (Self, mpsc::Receiver<String>, mpsc::Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (proceed_tx, proceed_rx) = mpsc::channel();
        let store = BlockingStateStore {
            started: Mutex::new(started_tx),
            proceed: Mutex::new(proceed_rx),
        };
        (store, started_rx, proceed_tx)
    }
}

impl PersistedStateStore for BlockingStateStore {
    fn clear_state(&self, topology: &str) -> io::Result<()> {
        self.started
            .lock()
            .send(topology.to_string())
            .map_err(|e| io::Error::other(e.to_string()))?;
        self.proceed
            .lock()
            .recv()
            .map_err(|e| io::Error::other(e.to_string()))
    }
}
