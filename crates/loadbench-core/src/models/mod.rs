pub mod error;
pub mod task;
pub mod workload;

pub use error::{CoreError, CoreErrorKind};
pub use task::{
    NewSubtaskRecord, SubtaskId, SubtaskRecord, SubtaskStatus, TaskFailure, TaskId, TaskRecord,
    TaskStatus, WorkloadId,
};
pub use workload::{
    HookReport, HookRunResult, HookRunStatus, HookSpec, IterationResult, NewWorkloadRecord,
    ResultChunk, RunnerEvent, SlaOutcome, TriggerSpec, WorkloadRecord, WorkloadResults,
};
