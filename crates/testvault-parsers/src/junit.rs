//! JUnit and xUnit XML. Suites nest as written; test full names come from `classname`.

use crate::driver::{
    DEFAULT_SUITE_NAME, ReportHandler, XmlAttributes, junit_suite_status, log_content,
};
use crate::errors::ParseResult;
use testvault_core::{NodeKind, RunInfo, Status, StatusReport, Tracker};

#[derive(Debug)]
pub struct JUnitHandler {
    archived_using: &'static str,
    generator: &'static str,
    /// Run-level attributes waiting for the first suite.
    pending_metadata: Vec<(String, String)>,
}

impl JUnitHandler {
    pub fn junit() -> Self {
        Self {
            archived_using: "JUnit parser",
            generator: "JUnit",
            pending_metadata: Vec::new(),
        }
    }

    pub fn xunit() -> Self {
        Self {
            archived_using: "xUnit parser",
            generator: "xUnit",
            pending_metadata: Vec::new(),
        }
    }

    fn begin_run(&self, tracker: &mut Tracker) -> ParseResult<()> {
        let mut info = RunInfo::new(self.archived_using);
        info.generator = Some(self.generator.to_string());
        tracker.begin_test_run(info)?;
        Ok(())
    }

    fn begin_suite(&mut self, tracker: &mut Tracker, attributes: &XmlAttributes) -> ParseResult<()> {
        if !tracker.has_run() {
            self.begin_run(tracker)?;
        }
        tracker.begin_suite(attributes.get("name").unwrap_or(DEFAULT_SUITE_NAME), None)?;
        for (name, value) in self.pending_metadata.drain(..) {
            tracker.metadata(&name, &value)?;
        }
        let status = junit_suite_status(attributes)?;
        tracker.begin_status(
            StatusReport::new(Some(status))
                .timed(attributes.get("timestamp"), None)
                .elapsed(attributes.millis("time")?),
        )?;
        Ok(())
    }
}

impl ReportHandler for JUnitHandler {
    fn start_element(
        &mut self,
        tracker: &mut Tracker,
        name: &str,
        attributes: &XmlAttributes,
    ) -> ParseResult<()> {
        match name {
            "testrun" => {
                self.begin_run(tracker)?;
                if let Some(project) = attributes.get("project") {
                    self.pending_metadata
                        .push(("project".to_string(), project.to_string()));
                }
                if let Some(run_name) = attributes.get("name") {
                    self.pending_metadata
                        .push(("test run name".to_string(), run_name.to_string()));
                }
            }
            "testsuite" | "testsuites" => self.begin_suite(tracker, attributes)?,
            "testcase" => {
                tracker.begin_test(
                    attributes.require(name, "name")?,
                    attributes.get("classname"),
                    None,
                )?;
                tracker.begin_status(
                    StatusReport::new(Some(Status::Pass)).elapsed(attributes.millis("time")?),
                )?;
            }
            "failure" => {
                tracker.update_status(Status::Fail)?;
                match attributes.get("message") {
                    Some(message) => {
                        tracker.log_message("FAIL", message)?;
                    }
                    // jest-junit writes failures without a message attribute
                    None => tracing::debug!("failure element without message attribute"),
                }
            }
            "error" => {
                tracker.update_status(Status::Fail)?;
                if let Some(message) = attributes.get("message") {
                    tracker.log_message("ERROR", message)?;
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
            }
            "failure" => log_content(tracker, "FAIL", content)?,
            "error" | "system-err" => log_content(tracker, "ERROR", content)?,
            "system-out" => log_content(tracker, "INFO", content)?,
            unknown => tracing::warn!(element = unknown, "ending unknown item"),
        }
        Ok(())
    }
}
