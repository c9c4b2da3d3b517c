#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "initial_task_schema",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS tasks (
    task_id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    status TEXT NOT NULL,
    failure_json TEXT,
    created_at_unix INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS subtasks (
    subtask_id INTEGER PRIMARY KEY,
    task_id INTEGER NOT NULL REFERENCES tasks (task_id),
    title TEXT NOT NULL,
    description TEXT,
    context_json TEXT NOT NULL,
    status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS workloads (
    workload_id INTEGER PRIMARY KEY,
    subtask_id INTEGER NOT NULL REFERENCES subtasks (subtask_id),
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    position INTEGER NOT NULL,
    runner_json TEXT NOT NULL,
    sla_json TEXT NOT NULL,
    hooks_json TEXT NOT NULL,
    context_json TEXT NOT NULL,
    args_json TEXT NOT NULL,
    results_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_subtasks_task ON subtasks (task_id);
CREATE INDEX IF NOT EXISTS idx_workloads_subtask ON workloads (subtask_id, position);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_workloads_subtask;
DROP INDEX IF EXISTS idx_subtasks_task;
DROP TABLE IF EXISTS workloads;
DROP TABLE IF EXISTS subtasks;
DROP TABLE IF EXISTS tasks;
"#,
};

const MIGRATION_0002: SqliteMigration = SqliteMigration {
    version: 2,
    name: "add_workload_result_chunks",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS workload_chunks (
    workload_id INTEGER NOT NULL REFERENCES workloads (workload_id),
    chunk_index INTEGER NOT NULL,
    iteration_count INTEGER NOT NULL,
    raw_json TEXT NOT NULL,
    PRIMARY KEY (workload_id, chunk_index)
);
"#,
    down_sql: r#"
DROP TABLE IF EXISTS workload_chunks;
"#,
};

const MIGRATIONS: [SqliteMigration; 2] = [MIGRATION_0001, MIGRATION_0002];

pub fn migrations() -> &'static [SqliteMigration] {
    &MIGRATIONS
}

pub fn migration(version: i64) -> Option<&'static SqliteMigration> {
    MIGRATIONS.iter().find(|entry| entry.version == version)
}

pub fn current_schema_version() -> i64 {
    MIGRATIONS.last().map(|entry| entry.version).unwrap_or(0)
}
