//! Layout of the local state of an application:
//!
//! ```text
//! <state_dir>/<application_id>/
//!     __orders__/
//!         0_0/
//!         0_1/
//!     __clicks__/
//!         1_3/
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::PersistedStateStore;
use crate::config::NodeConfig;
use crate::topology::{NAMED_TOPOLOGY_DELIMITER, TaskId, validate_topology_name};

/// Filesystem backed [PersistedStateStore].
#[derive(Debug, Clone)]
pub struct StateDirectory {
    app_dir: PathBuf,
}

impl StateDirectory {
    pub fn new(state_dir: impl AsRef<Path>, application_id: &str) -> Self {
        StateDirectory {
            app_dir: state_dir.as_ref().join(application_id),
        }
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(&config.state_dir, &config.application_id)
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    /// Directory holding every task of the topology. Fails with [io::ErrorKind::InvalidInput]
    /// for names that could resolve outside of the application directory.
    pub fn named_topology_dir(&self, topology: &str) -> io::Result<PathBuf> {
        validate_topology_name(topology)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        Ok(self.app_dir.join(format!(
            "{NAMED_TOPOLOGY_DELIMITER}{topology}{NAMED_TOPOLOGY_DELIMITER}"
        )))
    }

    /// Directory of the task, created if missing. Tasks of unnamed topologies live directly
    /// under the application directory.
    pub fn task_dir(&self, task_id: &TaskId) -> io::Result<PathBuf> {
        let parent = match task_id.topology_name() {
            Some(topology) => self.named_topology_dir(topology)?,
            None => self.app_dir.clone(),
        };
        let dir = parent.join(format!("{}_{}", task_id.subtopology, task_id.partition));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Named topologies with a state directory on this node.
    pub fn topologies_with_state(&self) -> io::Result<BTreeSet<String>> {
        let entries = match fs::read_dir(&self.app_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e),
        };

        let mut topologies = BTreeSet::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(topology) = name
                .strip_prefix(NAMED_TOPOLOGY_DELIMITER)
                .and_then(|rest| rest.strip_suffix(NAMED_TOPOLOGY_DELIMITER))
                .filter(|topology| !topology.is_empty())
            {
                topologies.insert(topology.to_string());
            }
        }
        Ok(topologies)
    }

    /// Tasks of the topology that have a state directory. Entries that are not task
    /// directories are ignored.
    pub fn task_ids(&self, topology: &str) -> io::Result<BTreeSet<TaskId>> {
        let entries = match fs::read_dir(self.named_topology_dir(topology)?) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e),
        };

        let mut task_ids = BTreeSet::new();
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Ok(task_id) =
                format!("{topology}{NAMED_TOPOLOGY_DELIMITER}{name}").parse::<TaskId>()
            {
                task_ids.insert(task_id);
            }
        }
        Ok(task_ids)
    }
}

impl PersistedStateStore for StateDirectory {
    fn clear_state(&self, topology: &str) -> io::Result<()> {
        let dir = self.named_topology_dir(topology)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(topology, dir = %dir.display(), "Deleted state directory");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
