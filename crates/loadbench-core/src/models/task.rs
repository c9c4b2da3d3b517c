use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TaskId(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SubtaskId(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct WorkloadId(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Init,
    Validating,
    Running,
    SoftAborting,
    Aborting,
    Aborted,
    Finished,
    Crashed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 9] = [
        TaskStatus::Init,
        TaskStatus::Validating,
        TaskStatus::Running,
        TaskStatus::SoftAborting,
        TaskStatus::Aborting,
        TaskStatus::Aborted,
        TaskStatus::Finished,
        TaskStatus::Crashed,
        TaskStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Init => "init",
            TaskStatus::Validating => "validating",
            TaskStatus::Running => "running",
            TaskStatus::SoftAborting => "soft_aborting",
            TaskStatus::Aborting => "aborting",
            TaskStatus::Aborted => "aborted",
            TaskStatus::Finished => "finished",
            TaskStatus::Crashed => "crashed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Aborted | TaskStatus::Finished | TaskStatus::Crashed | TaskStatus::Failed
        )
    }

    /// Whether an operator (or an SLA breach, when `check_soft` is set) has
    /// asked the task to stop.
    pub fn is_abort_requested(self, check_soft: bool) -> bool {
        match self {
            TaskStatus::Aborting | TaskStatus::Aborted => true,
            TaskStatus::SoftAborting => check_soft,
            _ => false,
        }
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        if self == next {
            return true;
        }

        match self {
            Init => matches!(next, Validating | Running | Failed | Aborting | Aborted),
            Validating => matches!(next, Running | Failed | Aborting | Aborted),
            Running => matches!(
                next,
                SoftAborting | Aborting | Aborted | Finished | Crashed
            ),
            SoftAborting => matches!(next, Aborting | Aborted),
            Aborting => next == Aborted,
            Aborted | Finished | Crashed | Failed => false,
        }
    }
}

impl FromStr for TaskStatus {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == raw)
            .ok_or(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Running,
    Finished,
    Aborted,
    Crashed,
}

impl SubtaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubtaskStatus::Running => "running",
            SubtaskStatus::Finished => "finished",
            SubtaskStatus::Aborted => "aborted",
            SubtaskStatus::Crashed => "crashed",
        }
    }
}

impl FromStr for SubtaskStatus {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "running" => Ok(SubtaskStatus::Running),
            "finished" => Ok(SubtaskStatus::Finished),
            "aborted" => Ok(SubtaskStatus::Aborted),
            "crashed" => Ok(SubtaskStatus::Crashed),
            _ => Err(()),
        }
    }
}

/// Diagnostic persisted on a task that failed validation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub error_type: String,
    pub message: String,
    pub trace: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    pub failure: Option<TaskFailure>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewSubtaskRecord {
    pub title: String,
    pub description: Option<String>,
    pub context: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubtaskRecord {
    pub id: SubtaskId,
    pub task: TaskId,
    pub title: String,
    pub description: Option<String>,
    pub context: serde_json::Map<String, serde_json::Value>,
    pub status: SubtaskStatus,
}
