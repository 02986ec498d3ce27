//! Archive schema shared by every store backend.
//!
//! The memory store enforces the same unique keys, required columns and foreign keys that the
//! SQL DDL declares, so both backends report integrity violations for the same inputs.

pub const TEST_RUN: &str = "test_run";
pub const TEST_SERIES: &str = "test_series";
pub const TEST_SERIES_MAPPING: &str = "test_series_mapping";
pub const SUITE: &str = "suite";
pub const TEST_CASE: &str = "test_case";
pub const SUITE_RESULT: &str = "suite_result";
pub const TEST_RESULT: &str = "test_result";
pub const SUITE_METADATA: &str = "suite_metadata";
pub const TEST_TAG: &str = "test_tag";
pub const KEYWORD_TREE: &str = "keyword_tree";
pub const TREE_HIERARCHY: &str = "tree_hierarchy";
pub const KEYWORD_STATISTICS: &str = "keyword_statistics";
pub const LOG_MESSAGE: &str = "log_message";
pub const SCHEMA_UPDATES: &str = "schema_updates";

#[derive(Clone, Copy, Debug)]
pub struct TableSpec {
    pub name: &'static str,
    pub unique_keys: &'static [&'static [&'static str]],
    pub required: &'static [&'static str],
    /// `(column, parent table)` pairs; a non-null value must name an existing parent row id.
    pub references: &'static [(&'static str, &'static str)],
}

pub const TABLES: &[TableSpec] = &[
    TableSpec {
        name: TEST_RUN,
        unique_keys: &[],
        required: &["schema_version"],
        references: &[],
    },
    TableSpec {
        name: TEST_SERIES,
        unique_keys: &[&["team", "name"]],
        required: &["team", "name"],
        references: &[],
    },
    TableSpec {
        name: TEST_SERIES_MAPPING,
        unique_keys: &[&["series", "test_run_id"]],
        required: &["series", "test_run_id", "build_number"],
        references: &[("series", TEST_SERIES), ("test_run_id", TEST_RUN)],
    },
    TableSpec {
        name: SUITE,
        unique_keys: &[&["repository", "full_name"]],
        required: &["full_name"],
        references: &[],
    },
    TableSpec {
        name: TEST_CASE,
        unique_keys: &[&["suite_id", "full_name"]],
        required: &["full_name", "suite_id"],
        references: &[("suite_id", SUITE)],
    },
    TableSpec {
        name: SUITE_RESULT,
        unique_keys: &[&["suite_id", "test_run_id"]],
        required: &["suite_id", "test_run_id"],
        references: &[("suite_id", SUITE), ("test_run_id", TEST_RUN)],
    },
    TableSpec {
        name: TEST_RESULT,
        unique_keys: &[&["test_id", "test_run_id"]],
        required: &["test_id", "test_run_id"],
        references: &[("test_id", TEST_CASE), ("test_run_id", TEST_RUN)],
    },
    TableSpec {
        name: SUITE_METADATA,
        unique_keys: &[&["test_run_id", "suite_id", "name"]],
        required: &["suite_id", "test_run_id", "name"],
        references: &[("suite_id", SUITE), ("test_run_id", TEST_RUN)],
    },
    TableSpec {
        name: TEST_TAG,
        unique_keys: &[],
        required: &["test_id", "test_run_id", "tag"],
        references: &[("test_id", TEST_CASE), ("test_run_id", TEST_RUN)],
    },
    TableSpec {
        name: KEYWORD_TREE,
        unique_keys: &[&["fingerprint"]],
        required: &["fingerprint"],
        references: &[],
    },
    TableSpec {
        name: TREE_HIERARCHY,
        unique_keys: &[&["fingerprint", "subtree", "call_index"]],
        required: &["fingerprint", "subtree", "call_index"],
        references: &[],
    },
    TableSpec {
        name: KEYWORD_STATISTICS,
        unique_keys: &[&["test_run_id", "fingerprint"]],
        required: &["test_run_id", "fingerprint"],
        references: &[("test_run_id", TEST_RUN)],
    },
    TableSpec {
        name: LOG_MESSAGE,
        unique_keys: &[],
        required: &["test_run_id", "suite_id", "log_level"],
        references: &[("test_run_id", TEST_RUN), ("test_id", TEST_CASE), ("suite_id", SUITE)],
    },
    TableSpec {
        name: SCHEMA_UPDATES,
        unique_keys: &[&["schema_version"]],
        required: &["schema_version"],
        references: &[],
    },
];

pub fn table_spec(name: &str) -> Option<&'static TableSpec> {
    TABLES.iter().find(|spec| spec.name == name)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchemaUpdate {
    pub version: u32,
    /// Minor updates are backwards compatible with older archivers.
    pub minor: bool,
    pub description: &'static str,
    pub sql: &'static str,
}

/// Baseline tables. Applied as update 1.
pub const BASELINE_SCHEMA_SQL: &str = r#"
CREATE TABLE test_run (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    imported_at TEXT DEFAULT CURRENT_TIMESTAMP,
    archived_using TEXT,
    archiver_version TEXT,
    generator TEXT,
    generated TEXT,
    rpa INTEGER,
    dryrun INTEGER,
    schema_version INTEGER NOT NULL
);

CREATE TABLE test_series (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    team TEXT NOT NULL,
    UNIQUE (team, name)
);

CREATE TABLE test_series_mapping (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    series INTEGER NOT NULL REFERENCES test_series(id),
    test_run_id INTEGER NOT NULL REFERENCES test_run(id) ON DELETE CASCADE,
    build_number INTEGER NOT NULL,
    build_id TEXT,
    UNIQUE (series, test_run_id)
);

CREATE TABLE suite (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    full_name TEXT NOT NULL,
    repository TEXT,
    UNIQUE (repository, full_name)
);

CREATE TABLE test_case (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    full_name TEXT NOT NULL,
    suite_id INTEGER NOT NULL REFERENCES suite(id),
    UNIQUE (suite_id, full_name)
);

CREATE TABLE suite_result (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    suite_id INTEGER NOT NULL REFERENCES suite(id),
    test_run_id INTEGER NOT NULL REFERENCES test_run(id) ON DELETE CASCADE,
    status TEXT,
    setup_status TEXT,
    execution_status TEXT,
    teardown_status TEXT,
    start_time TEXT,
    elapsed INTEGER,
    setup_elapsed INTEGER,
    execution_elapsed INTEGER,
    teardown_elapsed INTEGER,
    fingerprint TEXT,
    setup_fingerprint TEXT,
    execution_fingerprint TEXT,
    teardown_fingerprint TEXT,
    UNIQUE (suite_id, test_run_id)
);

CREATE TABLE test_result (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    test_id INTEGER NOT NULL REFERENCES test_case(id),
    test_run_id INTEGER NOT NULL REFERENCES test_run(id) ON DELETE CASCADE,
    status TEXT,
    setup_status TEXT,
    execution_status TEXT,
    teardown_status TEXT,
    start_time TEXT,
    elapsed INTEGER,
    setup_elapsed INTEGER,
    execution_elapsed INTEGER,
    teardown_elapsed INTEGER,
    fingerprint TEXT,
    setup_fingerprint TEXT,
    execution_fingerprint TEXT,
    teardown_fingerprint TEXT,
    critical INTEGER,
    UNIQUE (test_id, test_run_id)
);

CREATE TABLE suite_metadata (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    suite_id INTEGER NOT NULL REFERENCES suite(id),
    test_run_id INTEGER NOT NULL REFERENCES test_run(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    value TEXT,
    UNIQUE (test_run_id, suite_id, name)
);

CREATE TABLE test_tag (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    test_id INTEGER NOT NULL REFERENCES test_case(id),
    test_run_id INTEGER NOT NULL REFERENCES test_run(id) ON DELETE CASCADE,
    tag TEXT NOT NULL
);

CREATE TABLE keyword_tree (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL,
    keyword TEXT,
    library TEXT,
    status TEXT,
    arguments TEXT,
    UNIQUE (fingerprint)
);

CREATE TABLE tree_hierarchy (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL,
    subtree TEXT NOT NULL,
    call_index INTEGER NOT NULL,
    UNIQUE (fingerprint, subtree, call_index)
);

CREATE TABLE keyword_statistics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    test_run_id INTEGER NOT NULL REFERENCES test_run(id) ON DELETE CASCADE,
    fingerprint TEXT NOT NULL,
    calls INTEGER,
    max_execution_time INTEGER,
    min_execution_time INTEGER,
    cumulative_execution_time INTEGER,
    max_call_depth INTEGER,
    UNIQUE (test_run_id, fingerprint)
);

CREATE TABLE log_message (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    test_run_id INTEGER NOT NULL REFERENCES test_run(id) ON DELETE CASCADE,
    test_id INTEGER REFERENCES test_case(id),
    suite_id INTEGER NOT NULL REFERENCES suite(id),
    timestamp TEXT,
    log_level TEXT NOT NULL,
    message TEXT
);
"#;

/// Applied in order. Version numbers are never reused.
pub const SCHEMA_UPDATES_LIST: &[SchemaUpdate] = &[
    SchemaUpdate {
        version: 1,
        minor: false,
        description: "baseline archive tables",
        sql: BASELINE_SCHEMA_SQL,
    },
    SchemaUpdate {
        version: 2,
        minor: true,
        description: "execution paths for results and log messages",
        sql: r#"
ALTER TABLE suite_result ADD COLUMN execution_path TEXT;
ALTER TABLE test_result ADD COLUMN execution_path TEXT;
ALTER TABLE log_message ADD COLUMN execution_path TEXT;
"#,
    },
    SchemaUpdate {
        version: 3,
        minor: true,
        description: "log message lookup index",
        sql: r#"
CREATE INDEX IF NOT EXISTS log_message_index
    ON log_message (test_run_id, suite_id, test_id);
"#,
    },
];

pub const SCHEMA_UPDATES_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_updates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    schema_version INTEGER NOT NULL UNIQUE,
    applied_at TEXT DEFAULT CURRENT_TIMESTAMP,
    initial_update INTEGER,
    applied_by TEXT
);
"#;

pub fn current_schema_version() -> u32 {
    SCHEMA_UPDATES_LIST
        .last()
        .map(|update| update.version)
        .unwrap_or(0)
}

/// Permission to run pending schema updates. Allowing major updates implies minor ones.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchemaPolicy {
    pub allow_minor_updates: bool,
    pub allow_major_updates: bool,
}

impl SchemaPolicy {
    pub fn permits(&self, update: &SchemaUpdate) -> bool {
        self.allow_major_updates || (update.minor && self.allow_minor_updates)
    }
}
