use testvault_store::{
    ArchiveStore, MemoryArchiveStore, Record, SchemaPolicy, SqlValue, SqliteArchiveStore,
    StoreResult,
};

fn sqlite_store() -> SqliteArchiveStore {
    let store = SqliteArchiveStore::open_in_memory().expect("sqlite store should open");
    store
        .check_and_update_schema(SchemaPolicy::default(), "testvault-tests")
        .expect("schema should be created");
    store
}

fn exercise_identity_lookup(store: &dyn ArchiveStore) -> StoreResult<()> {
    let suite = Record::new()
        .with("full_name", "Root.Login")
        .with("name", "Login")
        .with("repository", "default repo");
    let first = store.return_id_or_insert_and_return_id("suite", &suite, &["repository", "full_name"])?;
    let second = store.return_id_or_insert_and_return_id("suite", &suite, &["repository", "full_name"])?;
    assert_eq!(first, second);

    let other_repository = suite.clone().with("repository", "other repo");
    let third = store.return_id_or_insert_and_return_id(
        "suite",
        &other_repository,
        &["repository", "full_name"],
    )?;
    assert_ne!(first, third);

    let test = Record::new()
        .with("full_name", "Root.Login.Valid Password")
        .with("name", "Valid Password")
        .with("suite_id", first);
    let test_id = store.return_id_or_insert_and_return_id("test_case", &test, &["suite_id", "full_name"])?;
    assert_eq!(
        store.fetch_one_value("test_case", "id", &Record::new().with("full_name", "Root.Login.Valid Password"))?,
        Some(SqlValue::Integer(test_id))
    );
    Ok(())
}

fn exercise_insert_or_ignore(store: &dyn ArchiveStore) -> StoreResult<()> {
    let keyword = Record::new()
        .with("fingerprint", "abc")
        .with("keyword", "Log")
        .with("library", "BuiltIn")
        .with("status", "PASS")
        .with("arguments", "[]");
    store.insert_or_ignore("keyword_tree", &keyword, &["fingerprint"])?;
    store.insert_or_ignore(
        "keyword_tree",
        &keyword.clone().with("status", "FAIL"),
        &["fingerprint"],
    )?;

    let rows = store.fetch_rows(
        "keyword_tree",
        &["status"],
        &Record::new().with("fingerprint", "abc"),
        None,
    )?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("status"), Some(&SqlValue::from("PASS")));
    Ok(())
}

fn exercise_integrity_violation(store: &dyn ArchiveStore) -> StoreResult<()> {
    let suite_id = store.insert("suite", &Record::new().with("full_name", "Root"))?;
    let test_id = store.insert(
        "test_case",
        &Record::new()
            .with("full_name", "Root.Case")
            .with("suite_id", suite_id),
    )?;
    let run_id = store.insert("test_run", &Record::new().with("schema_version", 3_i64))?;
    let result = Record::new()
        .with("test_id", test_id)
        .with("test_run_id", run_id)
        .with("status", "PASS");
    store.insert("test_result", &result)?;
    let error = store
        .insert("test_result", &result)
        .expect_err("second result for the same run should be rejected");
    assert!(error.is_integrity());
    Ok(())
}

#[test]
fn memory_store_identity_lookup_expected_stable_ids() {
    exercise_identity_lookup(&MemoryArchiveStore::new()).expect("memory identity lookup");
}

#[test]
fn sqlite_store_identity_lookup_expected_stable_ids() {
    exercise_identity_lookup(&sqlite_store()).expect("sqlite identity lookup");
}

#[test]
fn memory_and_sqlite_insert_or_ignore_expected_first_row_kept() {
    exercise_insert_or_ignore(&MemoryArchiveStore::new()).expect("memory insert_or_ignore");
    exercise_insert_or_ignore(&sqlite_store()).expect("sqlite insert_or_ignore");
}

#[test]
fn memory_and_sqlite_duplicate_result_expected_integrity_error() {
    exercise_integrity_violation(&MemoryArchiveStore::new()).expect("memory integrity");
    exercise_integrity_violation(&sqlite_store()).expect("sqlite integrity");
}

fn exercise_missing_parent(store: &dyn ArchiveStore) -> StoreResult<()> {
    let run_id = store.insert("test_run", &Record::new().with("schema_version", 3_i64))?;
    let error = store
        .insert(
            "log_message",
            &Record::new()
                .with("test_run_id", run_id)
                .with("suite_id", 99_i64)
                .with("log_level", "INFO")
                .with("message", "orphan"),
        )
        .expect_err("log message without its suite should be rejected");
    assert!(error.is_integrity());
    Ok(())
}

#[test]
fn memory_and_sqlite_missing_parent_row_expected_integrity_error() {
    exercise_missing_parent(&MemoryArchiveStore::new()).expect("memory foreign key");
    exercise_missing_parent(&sqlite_store()).expect("sqlite foreign key");
}
