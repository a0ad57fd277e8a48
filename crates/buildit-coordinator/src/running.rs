//! Set of builds currently in flight, keyed by build identity.

use buildit_core::{BuildIdentity, Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::task::BuildTask;

/// At most one task per identity is ever present.
///
/// Every change bumps a generation counter so dependency waiters can wake up
/// without polling.
pub struct RunningTaskSet {
    tasks: Mutex<HashMap<BuildIdentity, Arc<BuildTask>>>,
    generation: watch::Sender<u64>,
}

impl RunningTaskSet {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            tasks: Mutex::new(HashMap::new()),
            generation,
        }
    }

    /// Add a task, failing if one with the same identity is already running.
    pub fn submit(&self, task: Arc<BuildTask>) -> Result<()> {
        let identity = task.identity();
        {
            let mut tasks = self.tasks.lock();
            if tasks.contains_key(&identity) {
                return Err(Error::DuplicateTask(identity));
            }
            tasks.insert(identity, task);
        }
        debug!(build = %identity, "Task entered running set");
        self.bump();
        Ok(())
    }

    /// Remove exactly this task instance.
    ///
    /// A newer task that reuses the identity is left alone.
    pub fn remove(&self, task: &BuildTask) -> bool {
        let identity = task.identity();
        let removed = {
            let mut tasks = self.tasks.lock();
            let same = tasks
                .get(&identity)
                .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), task));
            if same {
                tasks.remove(&identity);
            }
            same
        };
        if removed {
            debug!(build = %identity, "Task left running set");
            self.bump();
        }
        removed
    }

    pub fn contains(&self, identity: &BuildIdentity) -> bool {
        self.tasks.lock().contains_key(identity)
    }

    pub fn get(&self, identity: &BuildIdentity) -> Option<Arc<BuildTask>> {
        self.tasks.lock().get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Copy of the current members; safe to iterate while the set changes.
    pub fn snapshot(&self) -> Vec<Arc<BuildTask>> {
        self.tasks.lock().values().cloned().collect()
    }

    /// Receiver that changes whenever a task enters or leaves the set.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    fn bump(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }
}

impl Default for RunningTaskSet {
    fn default() -> Self {
        Self::new()
    }
}
