use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::models::{
    CoreError, IterationResult, NewSubtaskRecord, NewWorkloadRecord, ResultChunk, SubtaskId,
    SubtaskRecord, SubtaskStatus, TaskFailure, TaskId, TaskRecord, TaskStatus, WorkloadId,
    WorkloadRecord, WorkloadResults,
};
use crate::persistence::{
    PersistenceResult, SubtaskStore, TaskStore, WorkloadStore, check_transition,
};

#[derive(Default)]
pub struct InMemoryBenchmarkStore {
    state: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    next_id: u64,
    tasks: BTreeMap<TaskId, TaskRecord>,
    subtasks: BTreeMap<SubtaskId, SubtaskRecord>,
    workloads: BTreeMap<WorkloadId, WorkloadRecord>,
    chunks: BTreeMap<WorkloadId, Vec<ResultChunk>>,
}

impl StoreState {
    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    fn task_mut(&mut self, task: TaskId) -> PersistenceResult<&mut TaskRecord> {
        self.tasks
            .get_mut(&task)
            .ok_or_else(|| unknown("task", task.0))
    }
}

impl InMemoryBenchmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> PersistenceResult<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| CoreError::internal("benchmark store mutex poisoned"))
    }
}

impl TaskStore for InMemoryBenchmarkStore {
    fn create_task(&self, title: &str) -> PersistenceResult<TaskRecord> {
        let mut state = self.lock_state()?;
        let record = TaskRecord {
            id: TaskId(state.allocate_id()),
            title: title.to_string(),
            status: TaskStatus::Init,
            failure: None,
        };
        state.tasks.insert(record.id, record.clone());
        Ok(record)
    }

    fn task(&self, task: TaskId) -> PersistenceResult<TaskRecord> {
        let state = self.lock_state()?;
        state
            .tasks
            .get(&task)
            .cloned()
            .ok_or_else(|| unknown("task", task.0))
    }

    fn task_status(&self, task: TaskId) -> PersistenceResult<TaskStatus> {
        Ok(self.task(task)?.status)
    }

    fn update_task_status(&self, task: TaskId, status: TaskStatus) -> PersistenceResult<()> {
        let mut state = self.lock_state()?;
        let record = state.task_mut(task)?;
        check_transition(task, record.status, status)?;
        record.status = status;
        Ok(())
    }

    fn set_task_failed(&self, task: TaskId, failure: TaskFailure) -> PersistenceResult<()> {
        let mut state = self.lock_state()?;
        let record = state.task_mut(task)?;
        check_transition(task, record.status, TaskStatus::Failed)?;
        record.status = TaskStatus::Failed;
        record.failure = Some(failure);
        Ok(())
    }
}

impl SubtaskStore for InMemoryBenchmarkStore {
    fn create_subtask(
        &self,
        task: TaskId,
        subtask: &NewSubtaskRecord,
    ) -> PersistenceResult<SubtaskId> {
        let mut state = self.lock_state()?;
        if !state.tasks.contains_key(&task) {
            return Err(unknown("task", task.0));
        }

        let id = SubtaskId(state.allocate_id());
        state.subtasks.insert(
            id,
            SubtaskRecord {
                id,
                task,
                title: subtask.title.clone(),
                description: subtask.description.clone(),
                context: subtask.context.clone(),
                status: SubtaskStatus::Running,
            },
        );
        Ok(id)
    }

    fn update_subtask_status(
        &self,
        subtask: SubtaskId,
        status: SubtaskStatus,
    ) -> PersistenceResult<()> {
        let mut state = self.lock_state()?;
        let record = state
            .subtasks
            .get_mut(&subtask)
            .ok_or_else(|| unknown("subtask", subtask.0))?;
        record.status = status;
        Ok(())
    }

    fn list_subtasks(&self, task: TaskId) -> PersistenceResult<Vec<SubtaskRecord>> {
        let state = self.lock_state()?;
        Ok(state
            .subtasks
            .values()
            .filter(|record| record.task == task)
            .cloned()
            .collect())
    }
}

impl WorkloadStore for InMemoryBenchmarkStore {
    fn create_workload(
        &self,
        subtask: SubtaskId,
        workload: &NewWorkloadRecord,
    ) -> PersistenceResult<WorkloadId> {
        let mut state = self.lock_state()?;
        if !state.subtasks.contains_key(&subtask) {
            return Err(unknown("subtask", subtask.0));
        }

        let id = WorkloadId(state.allocate_id());
        state.workloads.insert(
            id,
            WorkloadRecord {
                id,
                subtask,
                name: workload.name.clone(),
                description: workload.description.clone(),
                position: workload.position,
                runner: workload.runner.clone(),
                sla: workload.sla.clone(),
                hooks: workload.hooks.clone(),
                context: workload.context.clone(),
                args: workload.args.clone(),
                results: None,
            },
        );
        Ok(id)
    }

    fn add_workload_chunk(
        &self,
        workload: WorkloadId,
        index: usize,
        raw: &[IterationResult],
    ) -> PersistenceResult<()> {
        let mut state = self.lock_state()?;
        if !state.workloads.contains_key(&workload) {
            return Err(unknown("workload", workload.0));
        }

        let chunks = state.chunks.entry(workload).or_default();
        if chunks.iter().any(|chunk| chunk.index == index) {
            return Err(CoreError::storage(format!(
                "chunk {index} of workload '{}' was already stored",
                workload.0
            )));
        }
        chunks.push(ResultChunk {
            index,
            raw: raw.to_vec(),
        });
        Ok(())
    }

    fn set_workload_results(
        &self,
        workload: WorkloadId,
        results: &WorkloadResults,
    ) -> PersistenceResult<()> {
        let mut state = self.lock_state()?;
        let record = state
            .workloads
            .get_mut(&workload)
            .ok_or_else(|| unknown("workload", workload.0))?;
        record.results = Some(results.clone());
        Ok(())
    }

    fn workload_chunks(&self, workload: WorkloadId) -> PersistenceResult<Vec<ResultChunk>> {
        let state = self.lock_state()?;
        let mut chunks = state.chunks.get(&workload).cloned().unwrap_or_default();
        chunks.sort_by_key(|chunk| chunk.index);
        Ok(chunks)
    }

    fn workload_results(&self, workload: WorkloadId) -> PersistenceResult<Option<WorkloadResults>> {
        let state = self.lock_state()?;
        state
            .workloads
            .get(&workload)
            .map(|record| record.results.clone())
            .ok_or_else(|| unknown("workload", workload.0))
    }

    fn list_workloads(&self, subtask: SubtaskId) -> PersistenceResult<Vec<WorkloadRecord>> {
        let state = self.lock_state()?;
        let mut workloads: Vec<WorkloadRecord> = state
            .workloads
            .values()
            .filter(|record| record.subtask == subtask)
            .cloned()
            .collect();
        workloads.sort_by_key(|record| record.position);
        Ok(workloads)
    }
}

fn unknown(what: &str, id: u64) -> CoreError {
    CoreError::invalid_input(format!("unknown {what} id '{id}'"))
}
