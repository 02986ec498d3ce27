//! mocha-junit-reporter output.
//!
//! Suites arrive flat with dotted names and are rebuilt into a hierarchy. Test cases are left
//! open until the next one starts so that hook failures reported as separate test cases can
//! attach to them. `"<hook> hook for <test>"` test cases become setup/teardown keywords.

use crate::driver::{ReportHandler, XmlAttributes, log_content};
use crate::errors::ParseResult;
use testvault_core::{NodeKind, RunInfo, Status, StatusReport, Tracker};

const ROOT_SUITE_NAME: &str = "Root Suite";
const LIBRARY: &str = "mocha";

#[derive(Debug, Default)]
pub struct MochaHandler {
    in_hook: bool,
}

impl MochaHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn end_previous_test(tracker: &mut Tracker) -> ParseResult<()> {
        if tracker.current_is(NodeKind::Test) {
            tracker.end_test()?;
        }
        Ok(())
    }

    /// Test case names carry the full mocha title, hooks only the test's own title.
    fn open_test_is(tracker: &Tracker, title: &str) -> bool {
        !title.is_empty()
            && tracker
                .current(Some(NodeKind::Test))
                .ok()
                .and_then(|test| test.item())
                .is_some_and(|item| item.name.ends_with(title))
    }

    /// Closes the current suite, failing it when any child did not pass.
    fn end_suite(tracker: &mut Tracker) -> ParseResult<()> {
        let children_failed = tracker.current_suite().is_some_and(|suite| {
            Status::aggregate(&suite.item.subtree_statuses).is_some_and(|status| status != Status::Pass)
        });
        if children_failed {
            tracker.update_status(Status::Fail)?;
        }
        tracker.end_suite()?;
        Ok(())
    }

    fn begin_suite(tracker: &mut Tracker, attributes: &XmlAttributes) -> ParseResult<()> {
        let raw_name = attributes
            .get("name")
            .filter(|name| !name.is_empty())
            .unwrap_or(ROOT_SUITE_NAME);
        while let Some(parent) = tracker.current_suite() {
            if raw_name.starts_with(&format!("{}.", parent.item.full_name)) {
                break;
            }
            Self::end_suite(tracker)?;
        }
        let name = match tracker.current_suite() {
            Some(_) => raw_name.rsplit('.').next().unwrap_or(raw_name),
            None => raw_name,
        };
        tracker.begin_suite(name, None)?;
        tracker.begin_status(
            StatusReport::new(Some(Status::Pass))
                .timed(attributes.get("timestamp"), None)
                .elapsed(attributes.millis("time")?),
        )?;
        Ok(())
    }

    fn begin_hook(&mut self, tracker: &mut Tracker, class_name: &str) -> ParseResult<()> {
        self.in_hook = true;
        let (hook, hooked) = class_name.split_once(" hook for ").unwrap_or((class_name, ""));
        let hooked = hooked.trim_matches('"');
        if hook.contains("before all") {
            tracker.update_status(Status::Fail)?;
            tracker.begin_keyword("before all hook", LIBRARY, "setup", &[])?;
        } else if hook.contains("after all") {
            Self::end_previous_test(tracker)?;
            tracker.update_status(Status::Fail)?;
            tracker.begin_keyword("after all hook", LIBRARY, "teardown", &[])?;
        } else if hook.contains("before each") {
            Self::end_previous_test(tracker)?;
            tracker.begin_test(hooked, None, None)?;
            tracker.update_status(Status::Fail)?;
            tracker.begin_keyword("before each hook", LIBRARY, "setup", &[])?;
        } else if hook.contains("after each") {
            if !Self::open_test_is(tracker, hooked) {
                Self::end_previous_test(tracker)?;
                tracker.begin_test(hooked, None, None)?;
            }
            tracker.update_status(Status::Fail)?;
            tracker.begin_keyword("after each hook", LIBRARY, "teardown", &[])?;
        } else {
            tracing::warn!(hook, "unrecognized mocha hook");
            tracker.begin_keyword(hook, LIBRARY, "kw", &[])?;
        }
        Ok(())
    }
}

impl ReportHandler for MochaHandler {
    fn start_element(
        &mut self,
        tracker: &mut Tracker,
        name: &str,
        attributes: &XmlAttributes,
    ) -> ParseResult<()> {
        match name {
            "testsuites" => {
                let mut info = RunInfo::new("Mocha-JUnit parser");
                info.generator = attributes.get("name").map(str::to_string);
                tracker.begin_test_run(info)?;
            }
            "testsuite" => Self::begin_suite(tracker, attributes)?,
            "testcase" => {
                let class_name = attributes.get("classname").unwrap_or_default();
                if class_name.contains("hook for") {
                    self.begin_hook(tracker, class_name)?;
                } else {
                    Self::end_previous_test(tracker)?;
                    tracker.begin_test(attributes.require(name, "name")?, None, None)?;
                    tracker.keyword("Passing execution", LIBRARY, "kw", Status::Pass, &[])?;
                    tracker.begin_status(
                        StatusReport::new(Some(Status::Pass)).elapsed(attributes.millis("time")?),
                    )?;
                }
            }
            "failure" | "error" => {
                let kind = if name == "failure" { "FAIL" } else { "ERROR" };
                tracker.begin_keyword(attributes.get("type").unwrap_or(name), name, name, &[])?;
                tracker.update_status(Status::Fail)?;
                if let Some(message) = attributes.get("message") {
                    tracker.log_message(kind, message)?;
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
            "testsuites" => {
                Self::end_previous_test(tracker)?;
                while tracker.current_is(NodeKind::Suite) {
                    Self::end_suite(tracker)?;
                }
            }
            "testsuite" => Self::end_previous_test(tracker)?,
            "testcase" => {
                if self.in_hook {
                    self.in_hook = false;
                    tracker.end_keyword()?;
                    Self::end_previous_test(tracker)?;
                }
            }
            "failure" | "error" => {
                log_content(tracker, if name == "failure" { "FAIL" } else { "ERROR" }, content)?;
                tracker.end_keyword()?;
                tracker.update_status(Status::Fail)?;
            }
            "system-out" => log_content(tracker, "INFO", content)?,
            "system-err" => log_content(tracker, "ERROR", content)?,
            "properties" | "property" | "skipped" => {}
            unknown => tracing::warn!(element = unknown, "ending unknown item"),
        }
        Ok(())
    }
}
