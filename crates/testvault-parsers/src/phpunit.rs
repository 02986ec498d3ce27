//! PHPUnit's JUnit XML. Suites are named after their class or file, and a failing
//! `tearDownAfterClass` is recorded as a teardown on the enclosing suite.

use crate::driver::{
    DEFAULT_SUITE_NAME, ReportHandler, XmlAttributes, junit_suite_status, log_content,
};
use crate::errors::ParseResult;
use testvault_core::{NodeKind, RunInfo, Status, StatusReport, Tracker};

const LIBRARY: &str = "phpunit";

#[derive(Debug, Default)]
pub struct PhpUnitHandler {
    pending_metadata: Vec<(String, String)>,
    /// Set when a failure trace shows the class teardown failed; applied once the test closes.
    class_teardown_failed: bool,
}

impl PhpUnitHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin_run(tracker: &mut Tracker) -> ParseResult<()> {
        let mut info = RunInfo::new("php JUnit parser");
        info.generator = Some(LIBRARY.to_string());
        tracker.begin_test_run(info)?;
        Ok(())
    }

    fn suite_name<'a>(element: &str, attributes: &'a XmlAttributes) -> &'a str {
        match attributes.get("name") {
            Some(name) if !attributes.contains("file") => name.rsplit('/').next().unwrap_or(name),
            _ if element == "testsuites" => LIBRARY,
            name => name.unwrap_or(DEFAULT_SUITE_NAME),
        }
    }
}

impl ReportHandler for PhpUnitHandler {
    fn start_element(
        &mut self,
        tracker: &mut Tracker,
        name: &str,
        attributes: &XmlAttributes,
    ) -> ParseResult<()> {
        match name {
            "testrun" => {
                Self::begin_run(tracker)?;
                if let Some(project) = attributes.get("project") {
                    self.pending_metadata
                        .push(("project".to_string(), project.to_string()));
                }
                if let Some(run_name) = attributes.get("name") {
                    self.pending_metadata
                        .push(("test run name".to_string(), run_name.to_string()));
                }
            }
            "testsuite" | "testsuites" => {
                if !tracker.has_run() {
                    Self::begin_run(tracker)?;
                }
                tracker.begin_suite(Self::suite_name(name, attributes), None)?;
                for (name, value) in self.pending_metadata.drain(..) {
                    tracker.metadata(&name, &value)?;
                }
                let status = junit_suite_status(attributes)?;
                tracker.begin_status(
                    StatusReport::new(Some(status))
                        .timed(attributes.get("timestamp"), None)
                        .elapsed(attributes.millis("time")?),
                )?;
            }
            "testcase" => {
                let class_name = attributes
                    .get("classname")
                    .or_else(|| attributes.get("class"));
                tracker.begin_test(attributes.require(name, "name")?, class_name, None)?;
                tracker.begin_status(
                    StatusReport::new(Some(Status::Pass)).elapsed(attributes.millis("time")?),
                )?;
            }
            "failure" => {
                tracker.update_status(Status::Fail)?;
                if let Some(kind) = attributes.get("type") {
                    tracker.log_message("FAIL", kind)?;
                    tracker.keyword(kind, LIBRARY, "kw", Status::Fail, &[])?;
                }
            }
            "error" => {
                tracker.update_status(Status::Fail)?;
                if let Some(kind) = attributes.get("type") {
                    tracker.log_message("ERROR", kind)?;
                }
            }
            "skipped" => {
                tracker.update_status(Status::Skipped)?;
                if let Some(message) = attributes.get("message") {
                    tracker.log_message("INFO", message)?;
                }
            }
            "property" => {
                if tracker.current_is(NodeKind::Suite) {
                    tracker.metadata(
                        attributes.require(name, "name")?,
                        attributes.get("value").unwrap_or_default(),
                    )?;
                }
            }
            "system-out" | "system-err" | "properties" => {}
            unknown => tracing::warn!(element = unknown, "begin unknown item"),
        }
        Ok(())
    }

    fn end_element(&mut self, tracker: &mut Tracker, name: &str, content: &str) -> ParseResult<()> {
        match name {
            "testrun" | "properties" | "property" | "skipped" => {}
            "testsuite" | "testsuites" => {
                tracker.end_suite()?;
            }
            "testcase" => {
                tracker.end_test()?;
                if std::mem::take(&mut self.class_teardown_failed) {
                    tracker.keyword("tearDownClass", LIBRARY, "teardown", Status::Fail, &[])?;
                }
            }
            "failure" => {
                if content.contains("tearDownAfterClass") {
                    self.class_teardown_failed = true;
                }
                log_content(tracker, "FAIL", content)?;
            }
            "error" | "system-err" => log_content(tracker, "ERROR", content)?,
            "system-out" => log_content(tracker, "INFO", content)?,
            unknown => tracing::warn!(element = unknown, "ending unknown item"),
        }
        Ok(())
    }
}
