use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::models::{
    CoreError, IterationResult, NewSubtaskRecord, NewWorkloadRecord, ResultChunk, SubtaskId,
    SubtaskRecord, SubtaskStatus, TaskFailure, TaskId, TaskRecord, TaskStatus, WorkloadId,
    WorkloadRecord, WorkloadResults,
};
use crate::persistence::{
    MigrationStore, PersistenceResult, SubtaskStore, TaskStore, WorkloadStore, check_transition,
};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration, migrations};

const MIGRATIONS_TABLE: &str = "loadbench_schema_migrations";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStore {
    database_path: PathBuf,
}

impl SqliteStore {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn planned_migrations(&self, from_version: i64) -> Vec<&'static SqliteMigration> {
        migrations()
            .iter()
            .filter(|entry| entry.version > from_version)
            .collect()
    }

    pub fn migrate_to_latest(&self) -> PersistenceResult<()> {
        self.apply_migration(current_schema_version())
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = open_connection(&self.database_path)
            .map_err(|error| storage_error(operation_name, error))?;
        operation(&mut connection).map_err(|error| storage_error(operation_name, error))
    }
}

impl MigrationStore for SqliteStore {
    fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error_text(
                "apply_migration",
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        let mut steps = Vec::new();
        let current_version = self.current_version()?;
        if target_version > current_version {
            for version in (current_version + 1)..=target_version {
                steps.push((true, lookup_migration(version)?));
            }
        } else {
            for version in ((target_version + 1)..=current_version).rev() {
                steps.push((false, lookup_migration(version)?));
            }
        }

        self.with_connection("apply_migration", |connection| {
            for (up, migration) in steps {
                if up {
                    apply_up_migration(connection, migration)?;
                } else {
                    apply_down_migration(connection, migration)?;
                }
            }
            Ok(())
        })
    }
}

impl TaskStore for SqliteStore {
    fn create_task(&self, title: &str) -> PersistenceResult<TaskRecord> {
        self.with_connection("create_task", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "INSERT INTO tasks (title, status, created_at_unix) VALUES (?1, ?2, ?3)",
                params![title, TaskStatus::Init.as_str(), now_unix()?],
            )?;
            Ok(TaskRecord {
                id: TaskId(i64_to_u64(connection.last_insert_rowid())?),
                title: title.to_string(),
                status: TaskStatus::Init,
                failure: None,
            })
        })
    }

    fn task(&self, task: TaskId) -> PersistenceResult<TaskRecord> {
        let record = self.with_connection("task", |connection| {
            ensure_schema_ready(connection)?;
            connection
                .query_row(
                    "SELECT task_id, title, status, failure_json FROM tasks WHERE task_id = ?1",
                    params![id_to_i64(task.0)?],
                    |row| {
                        let failure_json: Option<String> = row.get(3)?;
                        Ok(TaskRecord {
                            id: TaskId(i64_to_u64(row.get(0)?)?),
                            title: row.get(1)?,
                            status: parse_task_status(&row.get::<_, String>(2)?)?,
                            failure: failure_json.as_deref().map(from_json).transpose()?,
                        })
                    },
                )
                .optional()
        })?;

        record.ok_or_else(|| unknown("task", task.0))
    }

    fn task_status(&self, task: TaskId) -> PersistenceResult<TaskStatus> {
        let status = self.with_connection("task_status", |connection| {
            ensure_schema_ready(connection)?;
            read_task_status(connection, task)
        })?;

        status.ok_or_else(|| unknown("task", task.0))
    }

    fn update_task_status(&self, task: TaskId, status: TaskStatus) -> PersistenceResult<()> {
        self.transition_task(task, status, None)
    }

    fn set_task_failed(&self, task: TaskId, failure: TaskFailure) -> PersistenceResult<()> {
        self.transition_task(task, TaskStatus::Failed, Some(failure))
    }
}

impl SqliteStore {
    fn transition_task(
        &self,
        task: TaskId,
        status: TaskStatus,
        failure: Option<TaskFailure>,
    ) -> PersistenceResult<()> {
        self.with_connection("update_task_status", |connection| {
            ensure_schema_ready(connection)?;
            let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(current) = read_task_status(&transaction, task)? else {
                return Ok(Err(unknown("task", task.0)));
            };
            if let Err(error) = check_transition(task, current, status) {
                return Ok(Err(error));
            }

            match &failure {
                Some(failure) => transaction.execute(
                    "UPDATE tasks SET status = ?2, failure_json = ?3 WHERE task_id = ?1",
                    params![id_to_i64(task.0)?, status.as_str(), to_json(failure)?],
                )?,
                None => transaction.execute(
                    "UPDATE tasks SET status = ?2 WHERE task_id = ?1",
                    params![id_to_i64(task.0)?, status.as_str()],
                )?,
            };
            transaction.commit()?;
            Ok(Ok(()))
        })?
    }
}

impl SubtaskStore for SqliteStore {
    fn create_subtask(
        &self,
        task: TaskId,
        subtask: &NewSubtaskRecord,
    ) -> PersistenceResult<SubtaskId> {
        self.with_connection("create_subtask", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
INSERT INTO subtasks (task_id, title, description, context_json, status)
VALUES (?1, ?2, ?3, ?4, ?5)
",
                params![
                    id_to_i64(task.0)?,
                    subtask.title,
                    subtask.description,
                    to_json(&subtask.context)?,
                    SubtaskStatus::Running.as_str(),
                ],
            )?;
            Ok(SubtaskId(i64_to_u64(connection.last_insert_rowid())?))
        })
    }

    fn update_subtask_status(
        &self,
        subtask: SubtaskId,
        status: SubtaskStatus,
    ) -> PersistenceResult<()> {
        self.with_connection("update_subtask_status", |connection| {
            ensure_schema_ready(connection)?;
            let updated = connection.execute(
                "UPDATE subtasks SET status = ?2 WHERE subtask_id = ?1",
                params![id_to_i64(subtask.0)?, status.as_str()],
            )?;
            if updated == 0 {
                return Err(storage_error_sqlite("subtask id was not found for update"));
            }
            Ok(())
        })
    }

    fn list_subtasks(&self, task: TaskId) -> PersistenceResult<Vec<SubtaskRecord>> {
        self.with_connection("list_subtasks", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT subtask_id, task_id, title, description, context_json, status
FROM subtasks
WHERE task_id = ?1
ORDER BY subtask_id
",
            )?;
            let rows = statement.query_map(params![id_to_i64(task.0)?], |row| {
                Ok(SubtaskRecord {
                    id: SubtaskId(i64_to_u64(row.get(0)?)?),
                    task: TaskId(i64_to_u64(row.get(1)?)?),
                    title: row.get(2)?,
                    description: row.get(3)?,
                    context: from_json(&row.get::<_, String>(4)?)?,
                    status: parse_subtask_status(&row.get::<_, String>(5)?)?,
                })
            })?;

            rows.collect()
        })
    }
}

impl WorkloadStore for SqliteStore {
    fn create_workload(
        &self,
        subtask: SubtaskId,
        workload: &NewWorkloadRecord,
    ) -> PersistenceResult<WorkloadId> {
        self.with_connection("create_workload", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
INSERT INTO workloads (
    subtask_id, name, description, position,
    runner_json, sla_json, hooks_json, context_json, args_json
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
",
                params![
                    id_to_i64(subtask.0)?,
                    workload.name,
                    workload.description,
                    to_i64(workload.position)?,
                    to_json(&workload.runner)?,
                    to_json(&workload.sla)?,
                    to_json(&workload.hooks)?,
                    to_json(&workload.context)?,
                    to_json(&workload.args)?,
                ],
            )?;
            Ok(WorkloadId(i64_to_u64(connection.last_insert_rowid())?))
        })
    }

    fn add_workload_chunk(
        &self,
        workload: WorkloadId,
        index: usize,
        raw: &[IterationResult],
    ) -> PersistenceResult<()> {
        self.with_connection("add_workload_chunk", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
INSERT INTO workload_chunks (workload_id, chunk_index, iteration_count, raw_json)
VALUES (?1, ?2, ?3, ?4)
",
                params![
                    id_to_i64(workload.0)?,
                    to_i64(index)?,
                    to_i64(raw.len())?,
                    to_json(raw)?,
                ],
            )?;
            Ok(())
        })
    }

    fn set_workload_results(
        &self,
        workload: WorkloadId,
        results: &WorkloadResults,
    ) -> PersistenceResult<()> {
        self.with_connection("set_workload_results", |connection| {
            ensure_schema_ready(connection)?;
            let updated = connection.execute(
                "UPDATE workloads SET results_json = ?2 WHERE workload_id = ?1",
                params![id_to_i64(workload.0)?, to_json(results)?],
            )?;
            if updated == 0 {
                return Err(storage_error_sqlite("workload id was not found for update"));
            }
            Ok(())
        })
    }

    fn workload_chunks(&self, workload: WorkloadId) -> PersistenceResult<Vec<ResultChunk>> {
        self.with_connection("workload_chunks", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT chunk_index, raw_json
FROM workload_chunks
WHERE workload_id = ?1
ORDER BY chunk_index
",
            )?;
            let rows = statement.query_map(params![id_to_i64(workload.0)?], |row| {
                Ok(ResultChunk {
                    index: i64_to_usize(row.get(0)?)?,
                    raw: from_json(&row.get::<_, String>(1)?)?,
                })
            })?;

            rows.collect()
        })
    }

    fn workload_results(&self, workload: WorkloadId) -> PersistenceResult<Option<WorkloadResults>> {
        let results = self.with_connection("workload_results", |connection| {
            ensure_schema_ready(connection)?;
            connection
                .query_row(
                    "SELECT results_json FROM workloads WHERE workload_id = ?1",
                    params![id_to_i64(workload.0)?],
                    |row| {
                        let results_json: Option<String> = row.get(0)?;
                        results_json.as_deref().map(from_json).transpose()
                    },
                )
                .optional()
        })?;

        results.ok_or_else(|| unknown("workload", workload.0))
    }

    fn list_workloads(&self, subtask: SubtaskId) -> PersistenceResult<Vec<WorkloadRecord>> {
        self.with_connection("list_workloads", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT workload_id, subtask_id, name, description, position,
       runner_json, sla_json, hooks_json, context_json, args_json, results_json
FROM workloads
WHERE subtask_id = ?1
ORDER BY position
",
            )?;
            let rows = statement.query_map(params![id_to_i64(subtask.0)?], |row| {
                let results_json: Option<String> = row.get(10)?;
                Ok(WorkloadRecord {
                    id: WorkloadId(i64_to_u64(row.get(0)?)?),
                    subtask: SubtaskId(i64_to_u64(row.get(1)?)?),
                    name: row.get(2)?,
                    description: row.get(3)?,
                    position: i64_to_usize(row.get(4)?)?,
                    runner: from_json(&row.get::<_, String>(5)?)?,
                    sla: from_json(&row.get::<_, String>(6)?)?,
                    hooks: from_json(&row.get::<_, String>(7)?)?,
                    context: from_json(&row.get::<_, String>(8)?)?,
                    args: from_json(&row.get::<_, String>(9)?)?,
                    results: results_json.as_deref().map(from_json).transpose()?,
                })
            })?;

            rows.collect()
        })
    }
}

fn open_connection(database_path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    let connection = Connection::open(database_path)?;
    connection.busy_timeout(BUSY_TIMEOUT)?;
    Ok(connection)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
"
    ))
}

fn ensure_schema_ready(connection: &Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(connection)?;
    let version = read_current_version(connection)?;
    if version < current_schema_version() {
        return Err(storage_error_sqlite(
            "database schema is not up to date; apply migrations before task operations",
        ));
    }
    Ok(())
}

fn read_current_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn read_task_status(connection: &Connection, task: TaskId) -> rusqlite::Result<Option<TaskStatus>> {
    connection
        .query_row(
            "SELECT status FROM tasks WHERE task_id = ?1",
            params![id_to_i64(task.0)?],
            |row| parse_task_status(&row.get::<_, String>(0)?),
        )
        .optional()
}

fn lookup_migration(version: i64) -> PersistenceResult<&'static SqliteMigration> {
    migration(version).ok_or_else(|| {
        storage_error_text(
            "apply_migration",
            format!("migration version '{version}' is not defined"),
        )
    })
}

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.up_sql)?;
    transaction.execute(
        &format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
             VALUES (?1, ?2, strftime('%s', 'now'))"
        ),
        (migration.version, migration.name),
    )?;
    transaction.commit()
}

fn apply_down_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()
}

fn parse_task_status(raw: &str) -> rusqlite::Result<TaskStatus> {
    raw.parse::<TaskStatus>().map_err(|_| {
        storage_error_sqlite(&format!("unknown task status '{raw}' in sqlite record"))
    })
}

fn parse_subtask_status(raw: &str) -> rusqlite::Result<SubtaskStatus> {
    raw.parse::<SubtaskStatus>().map_err(|_| {
        storage_error_sqlite(&format!("unknown subtask status '{raw}' in sqlite record"))
    })
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value)
        .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))
}

fn from_json<T: DeserializeOwned>(raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|error| storage_error_sqlite(&format!("malformed json column: {error}")))
}

fn now_unix() -> rusqlite::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| {
            storage_error_sqlite(&format!("time before unix epoch is not supported: {error}"))
        })?;
    i64::try_from(duration.as_secs())
        .map_err(|_| storage_error_sqlite("unix timestamp seconds exceed i64 range"))
}

fn id_to_i64(value: u64) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|_| storage_error_sqlite("record id exceeds i64 range"))
}

fn i64_to_u64(value: i64) -> rusqlite::Result<u64> {
    u64::try_from(value).map_err(|_| storage_error_sqlite("negative record id in sqlite record"))
}

fn i64_to_usize(value: i64) -> rusqlite::Result<usize> {
    usize::try_from(value).map_err(|_| storage_error_sqlite("negative index in sqlite record"))
}

fn to_i64(value: usize) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|_| storage_error_sqlite("value exceeds i64 range"))
}

fn storage_error(operation: &str, error: rusqlite::Error) -> CoreError {
    storage_error_text(operation, error.to_string())
}

fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

fn storage_error_text(operation: &str, message: impl AsRef<str>) -> CoreError {
    CoreError::storage(format!(
        "sqlite store '{operation}' failed: {}",
        message.as_ref()
    ))
}

fn unknown(what: &str, id: u64) -> CoreError {
    CoreError::invalid_input(format!("unknown {what} id '{id}'"))
}
