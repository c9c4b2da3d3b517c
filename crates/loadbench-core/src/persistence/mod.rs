pub mod in_memory;

pub use in_memory::InMemoryBenchmarkStore;

use crate::models::{
    CoreError, IterationResult, NewSubtaskRecord, NewWorkloadRecord, ResultChunk, SubtaskId,
    SubtaskRecord, SubtaskStatus, TaskFailure, TaskId, TaskRecord, TaskStatus, WorkloadId,
    WorkloadRecord, WorkloadResults,
};

pub type PersistenceResult<T> = Result<T, CoreError>;

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

pub trait TaskStore: Send + Sync {
    fn create_task(&self, title: &str) -> PersistenceResult<TaskRecord>;

    fn task(&self, task: TaskId) -> PersistenceResult<TaskRecord>;

    fn task_status(&self, task: TaskId) -> PersistenceResult<TaskStatus>;

    /// Moves the task to `status`. Writing the current status again is a
    /// no-op; transitions the status machine forbids fail with `InvalidInput`.
    fn update_task_status(&self, task: TaskId, status: TaskStatus) -> PersistenceResult<()>;

    fn set_task_failed(&self, task: TaskId, failure: TaskFailure) -> PersistenceResult<()>;
}

pub trait SubtaskStore: Send + Sync {
    fn create_subtask(
        &self,
        task: TaskId,
        subtask: &NewSubtaskRecord,
    ) -> PersistenceResult<SubtaskId>;

    fn update_subtask_status(
        &self,
        subtask: SubtaskId,
        status: SubtaskStatus,
    ) -> PersistenceResult<()>;

    fn list_subtasks(&self, task: TaskId) -> PersistenceResult<Vec<SubtaskRecord>>;
}

pub trait WorkloadStore: Send + Sync {
    fn create_workload(
        &self,
        subtask: SubtaskId,
        workload: &NewWorkloadRecord,
    ) -> PersistenceResult<WorkloadId>;

    fn add_workload_chunk(
        &self,
        workload: WorkloadId,
        index: usize,
        raw: &[IterationResult],
    ) -> PersistenceResult<()>;

    fn set_workload_results(
        &self,
        workload: WorkloadId,
        results: &WorkloadResults,
    ) -> PersistenceResult<()>;

    fn workload_chunks(&self, workload: WorkloadId) -> PersistenceResult<Vec<ResultChunk>>;

    fn workload_results(&self, workload: WorkloadId) -> PersistenceResult<Option<WorkloadResults>>;

    fn list_workloads(&self, subtask: SubtaskId) -> PersistenceResult<Vec<WorkloadRecord>>;
}

/// Everything the task engine persists.
pub trait BenchmarkStore: TaskStore + SubtaskStore + WorkloadStore {}

impl<T: TaskStore + SubtaskStore + WorkloadStore> BenchmarkStore for T {}

pub(crate) fn check_transition(
    task: TaskId,
    current: TaskStatus,
    next: TaskStatus,
) -> PersistenceResult<()> {
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(CoreError::invalid_input(format!(
            "task '{}' cannot transition from '{}' to '{}'",
            task.0,
            current.as_str(),
            next.as_str()
        )))
    }
}
