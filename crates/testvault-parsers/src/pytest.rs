//! pytest's JUnit XML.
//!
//! pytest flattens everything into one `testsuite`; the suite hierarchy is rebuilt from each
//! test case's dotted `classname`. Setup and teardown failures are reported as extra test
//! cases (or extra failure elements) for the same test and are recognized from their message
//! or stack trace.

use crate::driver::{
    DEFAULT_SUITE_NAME, ReportHandler, XmlAttributes, junit_suite_status, log_content,
};
use crate::errors::ParseResult;
use testvault_core::{Node, NodeKind, RunInfo, Status, StatusReport, Tracker};

const LIBRARY: &str = "python";

#[derive(Debug, Default)]
pub struct PytestHandler {
    current_class_name: Option<String>,
}

impl PytestHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ends the suites that are not shared with `class_name` and opens the missing ones.
    fn align_suites(tracker: &mut Tracker, class_name: &str) -> ParseResult<()> {
        let current = tracker.open_suite_names();
        let Some(root) = current.first() else {
            return Ok(());
        };
        let mut next = vec![root.clone()];
        next.extend(
            class_name
                .split('.')
                .filter(|part| !part.is_empty())
                .map(str::to_string),
        );
        let common = current
            .iter()
            .zip(&next)
            .take_while(|(open, wanted)| open == wanted)
            .count();
        for _ in common..current.len() {
            tracker.end_suite()?;
        }
        for name in &next[common..] {
            tracker.begin_suite(name, None)?;
        }
        Ok(())
    }

    fn begin_new_test(
        &mut self,
        tracker: &mut Tracker,
        class_name: &str,
        test_name: &str,
    ) -> ParseResult<()> {
        Self::align_suites(tracker, class_name)?;
        self.current_class_name = Some(class_name.to_string());
        tracker.begin_test(test_name, None, None)?;
        Ok(())
    }

    fn close_keywords(tracker: &mut Tracker) -> ParseResult<()> {
        while tracker.current_is(NodeKind::Keyword) {
            tracker.end_keyword()?;
        }
        Ok(())
    }

    /// Turns a failure message into a keyword where it names an exception or a setup phase.
    fn error_to_keyword(tracker: &mut Tracker, message: &str, level: &str) -> ParseResult<()> {
        if let Some((exception, detail)) = message.split_once(": ") {
            tracker.begin_keyword(exception, LIBRARY, "kw", &[detail.to_string()])?;
            tracker.update_status(Status::Fail)?;
        } else if message == "test setup failure" {
            tracker.keyword("failed by class setUp", LIBRARY, "kw", Status::Fail, &[])?;
            tracker.end_test()?;
            let setup_pending = tracker
                .current_suite()
                .is_some_and(|suite| suite.item.setup_status.is_none());
            if setup_pending {
                tracker.begin_keyword("setUpClass", LIBRARY, "setup", &[])?;
                tracker.update_status(Status::Fail)?;
            }
        } else if message == "test teardown failure" {
            tracing::debug!("teardown failure resolved from the stack trace");
        } else {
            log_content(tracker, level, message)?;
        }
        Ok(())
    }

    fn setup_or_teardown_from_trace(tracker: &mut Tracker, trace: &str) -> ParseResult<()> {
        if trace.contains("def tearDown(self") {
            tracker.keyword("test", LIBRARY, "teardown", Status::Fail, &[])?;
        } else if trace.contains("def tearDownClass(cls") {
            Self::close_keywords(tracker)?;
            if tracker.current_is(NodeKind::Test) {
                tracker.end_test()?;
            }
            tracker.keyword("tearDownClass", LIBRARY, "teardown", Status::Fail, &[])?;
        } else if trace.contains("def setUp(self") && tracker.current_is(NodeKind::Keyword) {
            tracker.set_keyword_kind("setup")?;
            tracker.end_keyword()?;
        }
        Ok(())
    }
}

impl ReportHandler for PytestHandler {
    fn start_element(
        &mut self,
        tracker: &mut Tracker,
        name: &str,
        attributes: &XmlAttributes,
    ) -> ParseResult<()> {
        match name {
            "testsuites" | "system-out" | "system-err" | "properties" => {}
            "testsuite" => {
                if !tracker.has_run() {
                    let mut info = RunInfo::new("pytest JUnit parser");
                    info.generator = Some("pytest".to_string());
                    tracker.begin_test_run(info)?;
                }
                tracker.begin_suite(attributes.get("name").unwrap_or(DEFAULT_SUITE_NAME), None)?;
                let status = junit_suite_status(attributes)?;
                tracker.begin_status(
                    StatusReport::new(Some(status))
                        .timed(attributes.get("timestamp"), None)
                        .elapsed(attributes.millis("time")?),
                )?;
            }
            "testcase" => {
                let class_name = attributes.get("classname").unwrap_or_default();
                let test_name = attributes.require(name, "name")?;
                let same_test = match tracker.current(None)? {
                    Node::Test(test) => {
                        test.item.name == test_name
                            && self.current_class_name.as_deref() == Some(class_name)
                    }
                    _ => false,
                };
                if !same_test {
                    if tracker.current_is(NodeKind::Test) {
                        tracker.end_test()?;
                    }
                    self.begin_new_test(tracker, class_name, test_name)?;
                }
                tracker.begin_status(
                    StatusReport::new(Some(Status::Pass)).elapsed(attributes.millis("time")?),
                )?;
            }
            "failure" | "error" => {
                let level = if name == "failure" { "FAIL" } else { "ERROR" };
                tracker.update_status(Status::Fail)?;
                Self::error_to_keyword(tracker, attributes.get("message").unwrap_or_default(), level)?;
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
                } else {
                    tracing::debug!(
                        property = attributes.get("name"),
                        "test level property not archived"
                    );
                }
            }
            unknown => tracing::warn!(element = unknown, "begin unknown item"),
        }
        Ok(())
    }

    fn end_element(&mut self, tracker: &mut Tracker, name: &str, content: &str) -> ParseResult<()> {
        match name {
            "testsuites" | "properties" | "property" => {}
            "testsuite" => {
                Self::close_keywords(tracker)?;
                if tracker.current_is(NodeKind::Test) {
                    tracker.end_test()?;
                }
                while tracker.current_is(NodeKind::Suite) {
                    tracker.end_suite()?;
                }
                self.current_class_name = None;
            }
            "testcase" => Self::close_keywords(tracker)?,
            "failure" | "error" => {
                Self::setup_or_teardown_from_trace(tracker, content)?;
                log_content(tracker, if name == "failure" { "FAIL" } else { "ERROR" }, content)?;
            }
            "system-out" | "skipped" => log_content(tracker, "INFO", content)?,
            "system-err" => log_content(tracker, "ERROR", content)?,
            unknown => tracing::warn!(element = unknown, "ending unknown item"),
        }
        Ok(())
    }
}
