//! Visual Studio `.trx` results. Every unit test result lands in a single root suite.

use crate::driver::{ReportHandler, XmlAttributes};
use crate::errors::ParseResult;
use testvault_core::{RunInfo, Status, StatusReport, Tracker};

const EXCLUDED_SECTIONS: &[&str] = &[
    "TestSettings",
    "ResultSummary",
    "TestDefinitions",
    "TestLists",
    "TestEntries",
];

const ROOT_SUITE_NAME: &str = "Root suite";

#[derive(Debug, Default)]
pub struct MsTestHandler;

impl MsTestHandler {
    pub fn new() -> Self {
        Self
    }

    fn log_level(element: &str) -> Option<&'static str> {
        match element {
            "StdOut" => Some("INFO"),
            "DebugTrace" => Some("DEBUG"),
            "TraceInfo" => Some("TRACE"),
            "StdErr" | "Message" | "StackTrace" => Some("ERROR"),
            _ => None,
        }
    }
}

impl ReportHandler for MsTestHandler {
    fn start_element(
        &mut self,
        tracker: &mut Tracker,
        name: &str,
        attributes: &XmlAttributes,
    ) -> ParseResult<()> {
        match name {
            "TestRun" => {
                let mut info = RunInfo::new("MSTest parser");
                info.generator = attributes.get("name").map(str::to_string);
                tracker.begin_test_run(info)?;
                tracker.begin_suite(ROOT_SUITE_NAME, None)?;
            }
            "Times" => tracker.begin_status(
                StatusReport::new(Some(Status::Pass))
                    .timed(attributes.get("start"), attributes.get("finish")),
            )?,
            "UnitTestResult" => {
                tracker.begin_test(attributes.require(name, "testName")?, None, None)?;
                let status = match attributes.get("outcome") {
                    Some("Passed") => Some(Status::Pass),
                    Some("Failed") => Some(Status::Fail),
                    Some(other) => tracker.status_from_vendor(other),
                    None => None,
                };
                tracker.begin_status(
                    StatusReport::new(status)
                        .timed(attributes.get("startTime"), attributes.get("endTime")),
                )?;
            }
            "Results" | "Output" | "ErrorInfo" => {}
            other => match Self::log_level(other) {
                Some(level) => tracker.begin_log_message(level, None)?,
                None => tracing::warn!(element = other, "begin unknown item"),
            },
        }
        Ok(())
    }

    fn end_element(&mut self, tracker: &mut Tracker, name: &str, content: &str) -> ParseResult<()> {
        match name {
            "TestRun" => {
                tracker.end_suite()?;
            }
            "UnitTestResult" => {
                tracker.end_test()?;
            }
            "Times" | "Results" | "Output" | "ErrorInfo" => {}
            other => match Self::log_level(other) {
                Some(_) => {
                    tracker.end_log_message(content)?;
                }
                None => tracing::warn!(element = other, "ending unknown item"),
            },
        }
        Ok(())
    }

    fn excluded_section(&self, name: &str) -> bool {
        EXCLUDED_SECTIONS.contains(&name)
    }
}
