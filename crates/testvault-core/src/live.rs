//! Listener interface for runners that report execution as it happens.
//!
//! Attribute structs deserialize from the dictionaries a Robot Framework style listener
//! receives, so a runner bridge can forward them as JSON.

use crate::errors::ArchiveResult;
use crate::events::Persisted;
use crate::numbering::BuildNumberCache;
use crate::tracker::{RunInfo, StatusReport, Tracker};
use serde::Deserialize;
use std::collections::BTreeMap;

pub const LIVE_ARCHIVED_USING: &str = "ArchiverListener";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EndAttributes {
    pub status: String,
    #[serde(rename = "starttime")]
    pub start_time: Option<String>,
    #[serde(rename = "endtime")]
    pub end_time: Option<String>,
    /// `yes` or `no`; only reported for tests.
    pub critical: Option<String>,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeywordAttributes {
    pub kwname: String,
    pub libname: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub args: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogRecord {
    pub level: String,
    pub timestamp: Option<String>,
    pub message: String,
}

pub struct LiveListener {
    tracker: Tracker,
    generator: Option<String>,
    rpa: bool,
    dry_run: bool,
}

impl LiveListener {
    pub fn new(tracker: Tracker) -> Self {
        Self {
            tracker,
            generator: None,
            rpa: false,
            dry_run: false,
        }
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Starts the run on the first suite.
    pub fn start_suite(&mut self, name: &str) -> ArchiveResult<()> {
        if !self.tracker.has_run() {
            self.tracker.begin_test_run(RunInfo {
                archived_using: LIVE_ARCHIVED_USING.to_string(),
                generated: None,
                generator: self.generator.clone(),
                rpa: self.rpa,
                dryrun: self.dry_run,
            })?;
        }
        self.tracker.begin_suite(name, None)?;
        Ok(())
    }

    pub fn end_suite(&mut self, attributes: &EndAttributes) -> ArchiveResult<Persisted> {
        let report = self.report(attributes);
        let metadata: Vec<(String, String)> = attributes
            .metadata
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        self.tracker.end_suite_with(report, &metadata)
    }

    pub fn start_test(&mut self, name: &str) -> ArchiveResult<()> {
        self.tracker.begin_test(name, None, None)?;
        Ok(())
    }

    pub fn end_test(&mut self, attributes: &EndAttributes) -> ArchiveResult<Persisted> {
        let critical = attributes
            .critical
            .as_deref()
            .map(|critical| critical == "yes");
        let report = self.report(attributes).critical(critical);
        self.tracker.end_test_with(report, &attributes.tags)
    }

    pub fn start_keyword(&mut self, attributes: &KeywordAttributes) -> ArchiveResult<()> {
        self.tracker.begin_keyword(
            &attributes.kwname,
            &attributes.libname,
            &attributes.kind,
            &attributes.args,
        )
    }

    pub fn end_keyword(&mut self, attributes: &EndAttributes) -> ArchiveResult<Persisted> {
        let report = self.report(attributes);
        self.tracker.end_keyword_with(report)
    }

    pub fn log_message(&mut self, record: &LogRecord) -> ArchiveResult<Persisted> {
        self.tracker
            .begin_log_message(&record.level, record.timestamp.as_deref())?;
        self.tracker.end_log_message(&record.message)
    }

    /// Runner system messages. The first one names the generator; a `Settings:` block carries
    /// the RPA and dry-run switches.
    pub fn message(&mut self, text: &str) {
        if self.generator.is_none() {
            self.generator = Some(text.to_string());
        } else if text.starts_with("Settings:") {
            self.process_settings(text);
        }
    }

    fn process_settings(&mut self, text: &str) {
        let settings: BTreeMap<&str, &str> = text
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim(), value.trim()))
            .collect();
        self.rpa = settings.get("RPA").is_some_and(|value| *value == "True");
        self.dry_run = settings.get("DryRun").is_some_and(|value| *value == "True");
        tracing::debug!(rpa = self.rpa, dry_run = self.dry_run, "runner settings received");
    }

    pub fn close(&mut self) -> ArchiveResult<BuildNumberCache> {
        self.tracker.end_test_run()
    }

    fn report(&mut self, attributes: &EndAttributes) -> StatusReport {
        let status = self.tracker.status_from_vendor(&attributes.status);
        StatusReport::new(status).timed(
            attributes.start_time.as_deref(),
            attributes.end_time.as_deref(),
        )
    }
}
