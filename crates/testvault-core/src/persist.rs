//! Per-kind persistence of closed nodes through the archive store.

use crate::config::ArchiveConfig;
use crate::errors::{ALREADY_ARCHIVED, ArchiveError, ArchiveResult};
use crate::events::Persisted;
use crate::node::{ItemState, KeywordNode, LogMessageNode, SuiteNode, TestNode};
use crate::numbering::SeriesRegistry;
use crate::statistics::KeywordStatistics;
use crate::status::Status;
use crate::timestamps::adjusted_timestamp;
use std::collections::BTreeSet;
use testvault_store::schema::{
    KEYWORD_TREE, LOG_MESSAGE, SUITE_METADATA, SUITE_RESULT, TEST_RESULT, TEST_TAG,
    TREE_HIERARCHY,
};
use testvault_store::{ArchiveStore, Record, RowId, StoreError, encode_list};

/// Suite and test ids already stored for the current run.
#[derive(Clone, Debug, Default)]
pub(crate) struct ArchivedIds {
    pub suites: BTreeSet<RowId>,
    pub tests: BTreeSet<RowId>,
}

pub(crate) struct PersistContext<'a> {
    pub store: &'a dyn ArchiveStore,
    pub config: &'a ArchiveConfig,
    pub run_id: RowId,
    pub time_adjust_secs: i64,
    pub statistics: &'a mut KeywordStatistics,
    pub series: &'a mut SeriesRegistry,
    pub archived: &'a mut ArchivedIds,
}

fn already_archived(error: StoreError) -> ArchiveError {
    if error.is_integrity() {
        ArchiveError::AlreadyArchived(format!("{ALREADY_ARCHIVED} ({error})"))
    } else {
        ArchiveError::Store(error)
    }
}

fn status_text(status: Option<Status>) -> Option<&'static str> {
    status.map(Status::as_str)
}

fn result_values(ctx: &PersistContext<'_>, item: &ItemState, record: Record) -> ArchiveResult<Record> {
    let start_time = item
        .start_time
        .as_deref()
        .map(|start| adjusted_timestamp(start, ctx.time_adjust_secs))
        .transpose()?;
    Ok(record
        .with("status", status_text(item.status))
        .with("setup_status", status_text(item.setup_status))
        .with("execution_status", status_text(item.execution_status))
        .with("teardown_status", status_text(item.teardown_status))
        .with("start_time", start_time)
        .with("elapsed", item.elapsed)
        .with("setup_elapsed", item.setup_elapsed)
        .with("execution_elapsed", item.execution_elapsed)
        .with("teardown_elapsed", item.teardown_elapsed)
        .with("fingerprint", item.fingerprint.clone())
        .with("setup_fingerprint", item.setup_fingerprint.clone())
        .with("execution_fingerprint", item.execution_fingerprint.clone())
        .with("teardown_fingerprint", item.teardown_fingerprint.clone()))
}

fn insert_subtrees(ctx: &PersistContext<'_>, fingerprint: &str, subtrees: &[String]) -> ArchiveResult<()> {
    for (call_index, subtree) in subtrees.iter().enumerate() {
        let record = Record::new()
            .with("fingerprint", fingerprint)
            .with("subtree", subtree.as_str())
            .with("call_index", call_index as i64);
        ctx.store
            .insert_or_ignore(TREE_HIERARCHY, &record, &["fingerprint", "subtree", "call_index"])?;
    }
    Ok(())
}

/// Flips every already persisted descendant result of `item` to `FAIL`.
fn fail_children(ctx: &PersistContext<'_>, item: &ItemState) -> ArchiveResult<()> {
    let failed = Record::new().with("status", Status::Fail.as_str());
    for suite_id in &item.child_suite_ids {
        ctx.store.update(
            SUITE_RESULT,
            &failed,
            &Record::new()
                .with("suite_id", *suite_id)
                .with("test_run_id", ctx.run_id),
        )?;
    }
    for test_id in &item.child_test_ids {
        ctx.store.update(
            TEST_RESULT,
            &failed,
            &Record::new()
                .with("test_id", *test_id)
                .with("test_run_id", ctx.run_id),
        )?;
    }
    tracing::debug!(
        suites = item.child_suite_ids.len(),
        tests = item.child_test_ids.len(),
        "teardown failure propagated to persisted children"
    );
    Ok(())
}

pub(crate) fn persist_suite(
    ctx: &mut PersistContext<'_>,
    suite: &mut SuiteNode,
    parent: &mut ItemState,
    top_level: bool,
) -> ArchiveResult<Persisted> {
    if !ctx.archived.suites.insert(suite.id) {
        tracing::warn!(suite = %suite.item.full_name, "duplicate results for suite are ignored");
        return Ok(Persisted::Duplicate);
    }

    let record = Record::new()
        .with("suite_id", suite.id)
        .with("test_run_id", ctx.run_id)
        .with("execution_path", suite.item.execution_path.as_str());
    let record = result_values(ctx, &suite.item, record)?;
    ctx.store
        .insert(SUITE_RESULT, &record)
        .map_err(already_archived)?;
    insert_metadata(ctx, suite, top_level)?;
    if suite.item.failed_by_teardown {
        fail_children(ctx, &suite.item)?;
    }

    parent.child_suite_ids.push(suite.id);
    parent
        .child_suite_ids
        .extend(suite.item.child_suite_ids.iter().copied());
    parent
        .child_test_ids
        .extend(suite.item.child_test_ids.iter().copied());
    tracing::debug!(suite = %suite.item.full_name, path = %suite.item.execution_path, "suite result stored");
    Ok(Persisted::Stored)
}

fn insert_metadata(
    ctx: &mut PersistContext<'_>,
    suite: &mut SuiteNode,
    top_level: bool,
) -> ArchiveResult<()> {
    if top_level {
        for (name, value) in &ctx.config.metadata {
            suite.set_metadata(name, value);
        }
        if ctx.config.time_adjust_secs != 0 {
            suite.set_metadata("time_adjust_secs", &ctx.config.time_adjust_secs.to_string());
        }
        if ctx.config.time_adjust_with_system_timezone {
            suite.set_metadata("time_adjust_secs_total", &ctx.time_adjust_secs.to_string());
        }
    }

    for (name, value) in &suite.metadata {
        let record = Record::new()
            .with("name", name.as_str())
            .with("value", value.as_str())
            .with("suite_id", suite.id)
            .with("test_run_id", ctx.run_id);
        ctx.store
            .insert(SUITE_METADATA, &record)
            .map_err(already_archived)?;
        if name.starts_with("series") {
            ctx.series.register(value);
        } else if name == "team" {
            ctx.series.set_team(value);
        }
    }
    Ok(())
}

pub(crate) fn persist_test(
    ctx: &mut PersistContext<'_>,
    test: &TestNode,
    parent: &mut ItemState,
) -> ArchiveResult<Persisted> {
    if !ctx.archived.tests.insert(test.id) {
        tracing::warn!(test = %test.item.full_name, "duplicate results for test are ignored");
        return Ok(Persisted::Duplicate);
    }

    let record = Record::new()
        .with("test_id", test.id)
        .with("test_run_id", ctx.run_id)
        .with("critical", test.item.critical)
        .with("execution_path", test.item.execution_path.as_str());
    let record = result_values(ctx, &test.item, record)?;
    ctx.store
        .insert(TEST_RESULT, &record)
        .map_err(already_archived)?;

    if ctx.config.archive_keywords {
        if let Some(execution_fingerprint) = test.item.execution_fingerprint.as_deref() {
            let body = Record::new()
                .with("fingerprint", execution_fingerprint)
                .with("keyword", None::<String>)
                .with("library", None::<String>)
                .with("status", status_text(test.item.execution_status))
                .with("arguments", encode_list(&test.item.arguments));
            ctx.store
                .insert_or_ignore(KEYWORD_TREE, &body, &["fingerprint"])?;
            insert_subtrees(ctx, execution_fingerprint, &test.item.subtree_fingerprints)?;
        }
    }

    for tag in &test.tags {
        let record = Record::new()
            .with("tag", tag.as_str())
            .with("test_id", test.id)
            .with("test_run_id", ctx.run_id);
        ctx.store.insert(TEST_TAG, &record)?;
    }

    parent.child_test_ids.push(test.id);
    tracing::debug!(test = %test.item.full_name, path = %test.item.execution_path, "test result stored");
    Ok(Persisted::Stored)
}

pub(crate) fn persist_keyword(
    ctx: &mut PersistContext<'_>,
    keyword: &KeywordNode,
) -> ArchiveResult<Persisted> {
    if !ctx.config.archive_keywords {
        return Ok(Persisted::Skipped);
    }
    let Some(fingerprint) = keyword.item.fingerprint.as_deref() else {
        return Ok(Persisted::Skipped);
    };

    let record = Record::new()
        .with("fingerprint", fingerprint)
        .with("keyword", keyword.item.name.as_str())
        .with("library", keyword.library.as_str())
        .with("status", status_text(keyword.item.status))
        .with("arguments", encode_list(&keyword.item.arguments));
    ctx.store
        .insert_or_ignore(KEYWORD_TREE, &record, &["fingerprint"])?;
    insert_subtrees(ctx, fingerprint, &keyword.item.subtree_fingerprints)?;

    if ctx.config.archive_keyword_statistics {
        ctx.statistics
            .record(fingerprint, keyword.item.elapsed, keyword.item.call_depth);
    }
    Ok(Persisted::Stored)
}

pub(crate) fn persist_log_message(
    ctx: &mut PersistContext<'_>,
    message: &LogMessageNode,
    content: &str,
    suite_id: Option<RowId>,
    test_id: Option<RowId>,
) -> ArchiveResult<Persisted> {
    if ctx.config.ignore_logs || ctx.config.log_level_ignored(&message.level) {
        return Ok(Persisted::Skipped);
    }
    let Some(suite_id) = suite_id else {
        tracing::warn!(level = %message.level, "log message outside of any suite is ignored");
        return Ok(Persisted::Skipped);
    };

    let timestamp = message
        .timestamp
        .as_deref()
        .map(|stamp| adjusted_timestamp(stamp, ctx.time_adjust_secs))
        .transpose()?;
    let record = Record::new()
        .with("test_run_id", ctx.run_id)
        .with("timestamp", timestamp)
        .with("log_level", message.level.as_str())
        .with("message", ctx.config.truncate_log_message(content))
        .with("test_id", test_id)
        .with("suite_id", suite_id)
        .with("execution_path", message.execution_path.as_str());
    ctx.store.insert(LOG_MESSAGE, &record)?;
    Ok(Persisted::Stored)
}
