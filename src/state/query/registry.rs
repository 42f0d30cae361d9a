use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use super::runner::QueryRunner;
use crate::state::Listeners;

#[derive(Default, Clone)]
struct RegistryState {
    active: Option<Arc<QueryRunner>>,
    launched: Vec<Arc<QueryRunner>>,
    saved: HashSet<Uuid>,
}

/// Runners launched from one source (an editor tab or file). Saved runners
/// accumulate; unsaved ones are replaced by the next launch.
#[derive(Default)]
pub struct QueryRunnerRegistry {
    state: RwLock<RegistryState>,
    on_launch: Listeners<Arc<QueryRunner>>,
}

impl QueryRunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<Arc<QueryRunner>> {
        self.state.read().active.clone()
    }

    pub fn set_active(&self, runner: &Arc<QueryRunner>) {
        let mut state = self.state.write();
        if state.launched.iter().any(|r| Arc::ptr_eq(r, runner)) {
            state.active = Some(runner.clone());
        }
    }

    pub fn runners(&self) -> Vec<Arc<QueryRunner>> {
        self.state.read().launched.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().launched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().launched.is_empty()
    }

    pub fn is_saved(&self, runner: &QueryRunner) -> bool {
        self.state.read().saved.contains(&runner.id())
    }

    /// Pin a runner so the next launch does not replace it.
    pub fn save(&self, runner: &QueryRunner) {
        let mut state = self.state.write();
        if state.launched.iter().any(|r| r.id() == runner.id()) {
            state.saved.insert(runner.id());
        }
    }

    pub fn unsave(&self, runner: &QueryRunner) {
        self.state.write().saved.remove(&runner.id());
    }

    pub fn on_launch(&self, listener: impl Fn(&Arc<QueryRunner>) + Send + Sync + 'static) {
        self.on_launch.add(listener);
    }

    /// Record a freshly launched runner and make it active. It takes the
    /// place of the first unsaved runner, if any.
    pub fn launched(&self, runner: Arc<QueryRunner>) {
        {
            let mut state = self.state.write();
            state.active = Some(runner.clone());
            let saved = &state.saved;
            let replace_at = state.launched.iter().position(|r| !saved.contains(&r.id()));
            match replace_at {
                Some(index) => state.launched[index] = runner.clone(),
                None => state.launched.push(runner.clone()),
            }
        }
        tracing::debug!(runner = %runner.id(), "query runner launched");
        self.on_launch.fire(&runner);
    }

    /// Close a runner and forget it. If it was active, its previous
    /// neighbour (or else the next one) becomes active.
    pub fn close(&self, runner: &Arc<QueryRunner>) {
        runner.close();

        let mut state = self.state.write();
        let Some(index) = state.launched.iter().position(|r| Arc::ptr_eq(r, runner)) else {
            return;
        };

        let was_active = state
            .active
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, runner));
        if was_active {
            state.active = if index > 0 {
                state.launched.get(index - 1).cloned()
            } else {
                state.launched.get(1).cloned()
            };
        }

        state.launched.remove(index);
        state.saved.remove(&runner.id());
    }

    pub fn close_all(&self) {
        for runner in self.runners() {
            self.close(&runner);
        }
    }
}

impl Clone for QueryRunnerRegistry {
    /// Independent registry with the same runners, saved set, active runner
    /// and launch listeners. Runners are shared, not re-executed.
    fn clone(&self) -> Self {
        Self {
            state: RwLock::new(self.state.read().clone()),
            on_launch: self.on_launch.snapshot(),
        }
    }
}
