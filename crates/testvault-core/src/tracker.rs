//! The archiving session: an explicit stack of open nodes driven by begin/end events.
//!
//! Every `begin_*` pushes a node whose parent is the current top. Every `end_*` pops the node,
//! resolves its fingerprints and status, hands the result up to the parent and persists it,
//! in that order.

use crate::config::ArchiveConfig;
use crate::errors::{ArchiveError, ArchiveResult, RUN_SCHEMA_HINT, StructuralError};
use crate::events::{ArchiveEvent, ArchiveEventSink, Persisted};
use crate::node::{
    ItemState, KeywordNode, KeywordRole, LogMessageNode, Node, NodeKind, RunNode, SuiteNode,
    TestNode,
};
use crate::numbering::{
    ALL_BUILDS_SERIES, BuildNumberCache, DEFAULT_SERIES, SeriesBuild, SeriesRegistry,
    report_series,
};
use crate::persist::{self, ArchivedIds, PersistContext};
use crate::propagation::{closed_node, finish_item, propagate};
use crate::stack::ExecutionStack;
use crate::statistics::KeywordStatistics;
use crate::status::{Status, is_not_run};
use crate::timestamps::elapsed_ms;
use testvault_store::schema::{SUITE, TEST_CASE, TEST_RUN};
use testvault_store::{Record, RowId, SharedArchiveStore};

pub const ARCHIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run-level attributes recorded when a session starts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunInfo {
    pub archived_using: String,
    pub generated: Option<String>,
    pub generator: Option<String>,
    pub rpa: bool,
    pub dryrun: bool,
}

impl RunInfo {
    pub fn new(archived_using: &str) -> Self {
        Self {
            archived_using: archived_using.to_string(),
            ..Self::default()
        }
    }
}

/// Outcome and timing reported by the producer for the node on top of the stack.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub status: Option<Status>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    /// Used only when the start and end timestamps are not both present.
    pub elapsed: Option<i64>,
    pub critical: Option<bool>,
}

impl StatusReport {
    pub fn new(status: Option<Status>) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn timed(mut self, start_time: Option<&str>, end_time: Option<&str>) -> Self {
        self.start_time = start_time.map(str::to_string);
        self.end_time = end_time.map(str::to_string);
        self
    }

    pub fn elapsed(mut self, elapsed: Option<i64>) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn critical(mut self, critical: Option<bool>) -> Self {
        self.critical = critical;
        self
    }
}

pub struct Tracker {
    store: SharedArchiveStore,
    config: ArchiveConfig,
    time_adjust_secs: i64,
    stack: ExecutionStack,
    statistics: KeywordStatistics,
    series: SeriesRegistry,
    build_numbers: BuildNumberCache,
    events: ArchiveEventSink,
    archived: ArchivedIds,
    dryrun: bool,
}

impl Tracker {
    pub fn new(store: SharedArchiveStore, config: ArchiveConfig) -> Self {
        let time_adjust_secs = config.time_adjust().total_secs();
        let series = SeriesRegistry::new(config.team.clone());
        Self {
            store,
            config,
            time_adjust_secs,
            stack: ExecutionStack::new(),
            statistics: KeywordStatistics::new(),
            series,
            build_numbers: BuildNumberCache::new(),
            events: ArchiveEventSink::default(),
            archived: ArchivedIds::default(),
            dryrun: false,
        }
    }

    /// Continues numbering from an earlier session of the same invocation.
    pub fn with_build_numbers(mut self, build_numbers: BuildNumberCache) -> Self {
        self.build_numbers = build_numbers;
        self
    }

    pub fn with_events(mut self, events: ArchiveEventSink) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub fn stack(&self) -> &ExecutionStack {
        &self.stack
    }

    pub fn has_run(&self) -> bool {
        self.stack.run().is_some()
    }

    pub fn run_id(&self) -> ArchiveResult<RowId> {
        self.stack
            .run()
            .map(|run| run.id)
            .ok_or(ArchiveError::Structural(StructuralError::NoActiveRun))
    }

    pub fn is_dryrun(&self) -> bool {
        self.dryrun
    }

    pub fn mark_dryrun(&mut self) {
        self.dryrun = true;
    }

    /// The node on top of the stack, optionally checked against `expected`.
    pub fn current(&self, expected: Option<NodeKind>) -> ArchiveResult<&Node> {
        let node = match expected {
            Some(kind) => self.stack.expect_kind(kind)?,
            None => self.stack.top()?,
        };
        Ok(node)
    }

    pub fn current_is(&self, kind: NodeKind) -> bool {
        self.stack.top().is_ok_and(|node| node.kind() == kind)
    }

    /// The innermost open suite.
    pub fn current_suite(&self) -> Option<&SuiteNode> {
        self.stack.suites().last()
    }

    pub fn open_suite_names(&self) -> Vec<String> {
        self.stack
            .suites()
            .map(|suite| suite.item.name.clone())
            .collect()
    }

    pub fn ensure_balanced(&self) -> ArchiveResult<()> {
        self.stack.ensure_balanced()?;
        Ok(())
    }

    /// Maps a producer status word. Not-run words also flag the run as a dry run.
    pub fn status_from_vendor(&mut self, raw: &str) -> Option<Status> {
        if is_not_run(raw) {
            self.dryrun = true;
        }
        let status = Status::from_vendor(raw);
        if status.is_none() {
            tracing::debug!(status = raw, "unrecognized status word");
        }
        status
    }

    pub fn begin_test_run(&mut self, info: RunInfo) -> ArchiveResult<RowId> {
        if !self.stack.is_empty() {
            return Err(StructuralError::RunAlreadyStarted.into());
        }
        self.store.begin()?;
        let run_id = match self.insert_run(&info) {
            Ok(run_id) => run_id,
            Err(error) => {
                // Nothing is on the stack yet, so `abort` would not release the transaction.
                if let Err(rollback) = self.store.rollback() {
                    tracing::warn!(error = %rollback, "rollback after failed run insert failed");
                }
                return Err(error);
            }
        };

        self.dryrun |= info.dryrun;
        self.stack.push(Node::Run(RunNode {
            id: run_id,
            item: ItemState::default(),
        }));
        tracing::info!(run_id, archived_using = %info.archived_using, "test run started");
        Ok(run_id)
    }

    fn insert_run(&self, info: &RunInfo) -> ArchiveResult<RowId> {
        let record = Record::new()
            .with("archived_using", info.archived_using.as_str())
            .with("archiver_version", ARCHIVER_VERSION)
            .with("generator", info.generator.clone())
            .with("generated", info.generated.clone())
            .with("rpa", info.rpa)
            .with("dryrun", info.dryrun)
            .with("schema_version", self.store.schema_version()?);
        self.store.insert(TEST_RUN, &record).map_err(|error| {
            if error.is_integrity() {
                ArchiveError::AlreadyArchived(format!("{RUN_SCHEMA_HINT} ({error})"))
            } else {
                ArchiveError::Store(error)
            }
        })
    }

    /// Maps the run into its series, flushes keyword statistics and commits.
    ///
    /// Returns the build-number cache for the next session of the same invocation.
    pub fn end_test_run(&mut self) -> ArchiveResult<BuildNumberCache> {
        self.stack.ensure_balanced()?;
        let run_id = self.run_id()?;

        for content in &self.config.series {
            self.series.register(content);
        }
        let builds = self.report_builds(run_id)?;

        if self.config.archive_keywords && self.config.archive_keyword_statistics {
            let flushed = self.statistics.flush(self.store.as_ref(), run_id)?;
            tracing::debug!(run_id, keywords = flushed, "keyword statistics stored");
        }
        self.store.update(
            TEST_RUN,
            &Record::new().with("dryrun", self.dryrun),
            &Record::new().with("id", run_id),
        )?;
        self.store.commit()?;
        self.stack.clear();
        self.archived = ArchivedIds::default();

        tracing::info!(run_id, dryrun = self.dryrun, "test run archived");
        self.events.emit(ArchiveEvent::RunFinished {
            run_id,
            dryrun: self.dryrun,
            builds,
        });
        Ok(self.build_numbers.clone())
    }

    fn report_builds(&mut self, run_id: RowId) -> ArchiveResult<Vec<SeriesBuild>> {
        let mut requested: Vec<(String, Option<String>)> = self.series.entries().to_vec();
        if requested.is_empty() {
            requested.push((DEFAULT_SERIES.to_string(), None));
        }
        requested.push((ALL_BUILDS_SERIES.to_string(), None));

        let team = self.series.team().map(str::to_string);
        requested
            .iter()
            .map(|(name, build_id)| {
                report_series(
                    self.store.as_ref(),
                    &mut self.build_numbers,
                    run_id,
                    team.as_deref(),
                    name,
                    build_id.as_deref(),
                )
            })
            .collect()
    }

    /// Drops the open session without committing anything it wrote.
    pub fn abort(&mut self) -> ArchiveResult<()> {
        if self.stack.is_empty() {
            return Ok(());
        }
        tracing::warn!(stack = ?self.stack.describe(), "aborting test run");
        self.stack.clear();
        self.archived = ArchivedIds::default();
        self.store.rollback()?;
        Ok(())
    }

    pub fn begin_suite(&mut self, name: &str, execution_path: Option<&str>) -> ArchiveResult<RowId> {
        let parent = self.stack.top()?;
        if !matches!(parent.kind(), NodeKind::Run | NodeKind::Suite) {
            return Err(self.unexpected(NodeKind::Suite).into());
        }
        let full_name = parent
            .item()
            .map(|item| item.child_full_name(name, None))
            .unwrap_or_else(|| name.to_string());
        let execution_path = self
            .stack
            .child_execution_path(NodeKind::Suite, execution_path)?;

        let record = Record::new()
            .with("name", name)
            .with("full_name", full_name.as_str())
            .with("repository", self.config.repository.as_str());
        let suite_id = self.store.return_id_or_insert_and_return_id(
            SUITE,
            &record,
            &["repository", "full_name"],
        )?;

        let mut item = ItemState::new(name, full_name);
        item.execution_path = execution_path;
        tracing::trace!(suite = %item.full_name, path = %item.execution_path, "suite opened");
        self.stack.push(Node::Suite(SuiteNode::new(suite_id, item)));
        Ok(suite_id)
    }

    pub fn end_suite(&mut self) -> ArchiveResult<Persisted> {
        let mut suite = self.stack.pop_suite()?;
        let hashing_name = suite.item.full_name.clone();
        let status = finish_item(&mut suite.item, &hashing_name);
        let top_level = self.stack.len() == 1;
        let run_id = self.run_id()?;

        let Self {
            store,
            config,
            time_adjust_secs,
            stack,
            statistics,
            series,
            events,
            archived,
            ..
        } = self;
        let parent = stack.top_item_mut()?;
        propagate(closed_node(&suite.item, KeywordRole::Step), parent);
        let mut ctx = PersistContext {
            store: store.as_ref(),
            config,
            run_id,
            time_adjust_secs: *time_adjust_secs,
            statistics,
            series,
            archived,
        };
        let persisted = persist::persist_suite(&mut ctx, &mut suite, parent, top_level)?;

        events.emit(ArchiveEvent::SuiteFinished {
            run_id,
            suite_id: suite.id,
            full_name: suite.item.full_name,
            status,
            execution_path: suite.item.execution_path,
            fingerprint: suite.item.fingerprint,
            elapsed: suite.item.elapsed,
            persisted,
        });
        Ok(persisted)
    }

    /// Applies the producer's final report and metadata, then closes the suite.
    pub fn end_suite_with(
        &mut self,
        report: StatusReport,
        metadata: &[(String, String)],
    ) -> ArchiveResult<Persisted> {
        self.stack.expect_kind(NodeKind::Suite)?;
        self.begin_status(report)?;
        for (name, value) in metadata {
            self.metadata(name, value)?;
        }
        self.end_suite()
    }

    pub fn begin_test(
        &mut self,
        name: &str,
        class_name: Option<&str>,
        execution_path: Option<&str>,
    ) -> ArchiveResult<RowId> {
        let suite = match self.stack.top()? {
            Node::Suite(suite) => suite,
            _ => return Err(self.unexpected(NodeKind::Suite).into()),
        };
        let suite_id = suite.id;
        let full_name = suite.item.child_full_name(name, class_name);
        let execution_path = self
            .stack
            .child_execution_path(NodeKind::Test, execution_path)?;

        let record = Record::new()
            .with("name", name)
            .with("full_name", full_name.as_str())
            .with("suite_id", suite_id);
        let test_id = self.store.return_id_or_insert_and_return_id(
            TEST_CASE,
            &record,
            &["suite_id", "full_name"],
        )?;

        let mut item = ItemState::new(name, full_name);
        item.execution_path = execution_path;
        tracing::trace!(test = %item.full_name, path = %item.execution_path, "test opened");
        self.stack.push(Node::Test(TestNode {
            id: test_id,
            item,
            tags: Vec::new(),
        }));
        Ok(test_id)
    }

    pub fn end_test(&mut self) -> ArchiveResult<Persisted> {
        let mut test = self.stack.pop_test()?;
        let hashing_name = test.item.full_name.clone();
        let status = finish_item(&mut test.item, &hashing_name);
        let run_id = self.run_id()?;

        let Self {
            store,
            config,
            time_adjust_secs,
            stack,
            statistics,
            series,
            events,
            archived,
            ..
        } = self;
        let parent = stack.top_item_mut()?;
        propagate(closed_node(&test.item, KeywordRole::Step), parent);
        let mut ctx = PersistContext {
            store: store.as_ref(),
            config,
            run_id,
            time_adjust_secs: *time_adjust_secs,
            statistics,
            series,
            archived,
        };
        let persisted = persist::persist_test(&mut ctx, &test, parent)?;

        events.emit(ArchiveEvent::TestFinished {
            run_id,
            test_id: test.id,
            full_name: test.item.full_name,
            status,
            execution_path: test.item.execution_path,
            fingerprint: test.item.fingerprint,
            elapsed: test.item.elapsed,
            tags: test.tags,
            persisted,
        });
        Ok(persisted)
    }

    pub fn end_test_with(&mut self, report: StatusReport, tags: &[String]) -> ArchiveResult<Persisted> {
        self.stack.expect_kind(NodeKind::Test)?;
        self.begin_status(report)?;
        for tag in tags {
            self.add_tag(tag)?;
        }
        self.end_test()
    }

    pub fn begin_keyword(
        &mut self,
        name: &str,
        library: &str,
        kind: &str,
        arguments: &[String],
    ) -> ArchiveResult<()> {
        let parent = self.stack.top()?;
        let parent_depth = match parent {
            Node::Suite(_) | Node::Test(_) | Node::Keyword(_) => {
                parent.item().map_or(0, |item| item.call_depth)
            }
            _ => return Err(self.unexpected(NodeKind::Test).into()),
        };
        let execution_path = self.stack.child_execution_path(NodeKind::Keyword, None)?;

        let mut keyword = KeywordNode {
            item: ItemState::new(name, format!("{library}.{name}")),
            library: library.to_string(),
            kind: kind.to_ascii_lowercase(),
        };
        keyword.item.arguments = arguments.to_vec();
        keyword.item.execution_path = execution_path;
        keyword.item.call_depth = parent_depth + 1;
        self.stack.push(Node::Keyword(keyword));
        Ok(())
    }

    pub fn end_keyword(&mut self) -> ArchiveResult<Persisted> {
        let mut keyword = self.stack.pop_keyword()?;
        let hashing_name = keyword.hashing_name();
        finish_item(&mut keyword.item, &hashing_name);
        let run_id = self.run_id()?;

        let Self {
            store,
            config,
            time_adjust_secs,
            stack,
            statistics,
            series,
            archived,
            ..
        } = self;
        let parent = stack.top_item_mut()?;
        propagate(closed_node(&keyword.item, keyword.role()), parent);
        let mut ctx = PersistContext {
            store: store.as_ref(),
            config,
            run_id,
            time_adjust_secs: *time_adjust_secs,
            statistics,
            series,
            archived,
        };
        persist::persist_keyword(&mut ctx, &keyword)
    }

    pub fn end_keyword_with(&mut self, report: StatusReport) -> ArchiveResult<Persisted> {
        self.stack.expect_kind(NodeKind::Keyword)?;
        self.begin_status(report)?;
        self.end_keyword()
    }

    /// Opens and closes a childless keyword with the given outcome.
    pub fn keyword(
        &mut self,
        name: &str,
        library: &str,
        kind: &str,
        status: Status,
        arguments: &[String],
    ) -> ArchiveResult<Persisted> {
        self.begin_keyword(name, library, kind, arguments)?;
        self.update_status(status)?;
        self.end_keyword()
    }

    pub fn begin_log_message(&mut self, level: &str, timestamp: Option<&str>) -> ArchiveResult<()> {
        let execution_path = self
            .stack
            .child_execution_path(NodeKind::LogMessage, None)?;
        self.stack.push(Node::LogMessage(LogMessageNode {
            level: level.to_string(),
            timestamp: timestamp.map(str::to_string),
            execution_path,
        }));
        Ok(())
    }

    pub fn end_log_message(&mut self, content: &str) -> ArchiveResult<Persisted> {
        let message = self.stack.pop_log_message()?;
        let suite_id = self.stack.nearest_suite_id();
        let test_id = self.stack.nearest_test_id();
        let run_id = self.run_id()?;

        let Self {
            store,
            config,
            time_adjust_secs,
            statistics,
            series,
            archived,
            ..
        } = self;
        let mut ctx = PersistContext {
            store: store.as_ref(),
            config,
            run_id,
            time_adjust_secs: *time_adjust_secs,
            statistics,
            series,
            archived,
        };
        persist::persist_log_message(&mut ctx, &message, content, suite_id, test_id)
    }

    /// Records a complete message without a timestamp.
    pub fn log_message(&mut self, level: &str, content: &str) -> ArchiveResult<Persisted> {
        self.begin_log_message(level, None)?;
        self.end_log_message(content)
    }

    /// Sets the outcome and timing of the node on top of the stack.
    ///
    /// Elapsed time comes from the timestamps when both are present, otherwise from the
    /// explicit value.
    pub fn begin_status(&mut self, report: StatusReport) -> ArchiveResult<()> {
        let elapsed = match (report.start_time.as_deref(), report.end_time.as_deref()) {
            (Some(start), Some(end)) => Some(elapsed_ms(start, end)?),
            _ => report.elapsed,
        };
        let item = self.stack.top_item_mut()?;
        item.status = report.status;
        item.start_time = report.start_time;
        item.end_time = report.end_time;
        item.elapsed = elapsed;
        if report.critical.is_some() {
            item.critical = report.critical;
        }
        Ok(())
    }

    pub fn update_status(&mut self, status: Status) -> ArchiveResult<()> {
        self.stack.top_item_mut()?.status = Some(status);
        Ok(())
    }

    pub fn add_argument(&mut self, argument: &str) -> ArchiveResult<()> {
        self.stack
            .expect_keyword_mut()?
            .item
            .arguments
            .push(argument.to_string());
        Ok(())
    }

    /// Reclassifies the open keyword, e.g. once a stack trace reveals it was a setup.
    pub fn set_keyword_kind(&mut self, kind: &str) -> ArchiveResult<()> {
        self.stack.expect_keyword_mut()?.kind = kind.to_ascii_lowercase();
        Ok(())
    }

    pub fn add_tag(&mut self, tag: &str) -> ArchiveResult<()> {
        self.stack.expect_test_mut()?.tags.push(tag.to_string());
        Ok(())
    }

    pub fn begin_metadata(&mut self, name: &str) -> ArchiveResult<()> {
        self.stack.expect_suite_mut()?.begin_metadata(name);
        Ok(())
    }

    /// Completes the pending metadata entry; an empty value leaves it unset.
    pub fn end_metadata(&mut self, value: &str) -> ArchiveResult<()> {
        self.stack.expect_suite_mut()?.end_metadata(value);
        Ok(())
    }

    pub fn metadata(&mut self, name: &str, value: &str) -> ArchiveResult<()> {
        self.stack.expect_suite_mut()?.set_metadata(name, value);
        Ok(())
    }

    fn unexpected(&self, expected: NodeKind) -> StructuralError {
        match self.stack.top() {
            Ok(top) => StructuralError::UnexpectedKind {
                expected,
                found: top.kind(),
                stack: self.stack.describe(),
            },
            Err(error) => error,
        }
    }
}
