//! Robot Framework `output.xml`, both the classic (`starttime`/`endtime`) and the RF 7
//! (`start`/`elapsed`) status forms.

use crate::driver::{ReportHandler, XmlAttributes, seconds_to_millis};
use crate::errors::ParseResult;
use testvault_core::{NodeKind, RunInfo, StatusReport, Tracker};

const EXCLUDED_SECTIONS: &[&str] = &["statistics", "errors"];

/// Control structures archived as keywords of their own so their status lands on them and
/// not on the enclosing keyword.
const CONTROL_ELEMENTS: &[&str] = &[
    "for", "iter", "if", "branch", "try", "while", "group", "return", "break", "continue",
    "variable", "error",
];

const IGNORED_ELEMENTS: &[&str] = &["assign", "var", "timeout", "value"];

#[derive(Debug, Default)]
pub struct RobotHandler {
    skipping_content: bool,
}

impl RobotHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin_status(&mut self, tracker: &mut Tracker, attributes: &XmlAttributes) -> ParseResult<()> {
        let status = attributes
            .get("status")
            .and_then(|raw| tracker.status_from_vendor(raw));
        let critical = attributes.get("critical").map(|critical| critical == "yes");
        let report = match attributes.get("starttime") {
            Some(start) => StatusReport::new(status).timed(
                Some(start).filter(|start| *start != "N/A"),
                attributes.get("endtime").filter(|end| *end != "N/A"),
            ),
            None => StatusReport::new(status)
                .timed(attributes.get("start"), None)
                .elapsed(
                    attributes
                        .get("elapsed")
                        .map(|elapsed| seconds_to_millis("elapsed", elapsed))
                        .transpose()?,
                ),
        };
        tracker.begin_status(report.critical(critical))?;
        Ok(())
    }
}

impl ReportHandler for RobotHandler {
    fn start_element(
        &mut self,
        tracker: &mut Tracker,
        name: &str,
        attributes: &XmlAttributes,
    ) -> ParseResult<()> {
        match name {
            "robot" => {
                tracker.begin_test_run(RunInfo {
                    archived_using: "RF parser".to_string(),
                    generated: attributes.get("generated").map(str::to_string),
                    generator: attributes.get("generator").map(str::to_string),
                    rpa: attributes.get("rpa") == Some("true"),
                    dryrun: false,
                })?;
            }
            "suite" => {
                tracker.begin_suite(attributes.require(name, "name")?, attributes.get("id"))?;
            }
            "test" => {
                tracker.begin_test(attributes.require(name, "name")?, None, attributes.get("id"))?;
            }
            "kw" => {
                let keyword = attributes.get("name").unwrap_or("${EMPTY}");
                let library = attributes
                    .get("library")
                    .or_else(|| attributes.get("owner"))
                    .unwrap_or_default();
                let kind = attributes.get("type").unwrap_or("Keyword");
                tracker.begin_keyword(keyword, library, kind, &[])?;
            }
            control if CONTROL_ELEMENTS.contains(&control) => {
                let upper = control.to_ascii_uppercase();
                let kind = attributes.get("type").unwrap_or(control);
                let keyword = attributes
                    .get("name")
                    .or_else(|| attributes.get("flavor"))
                    .unwrap_or(kind);
                tracker.begin_keyword(keyword, &upper, kind, &[])?;
            }
            "msg" => {
                let level = attributes.get("level").unwrap_or("INFO");
                let timestamp = attributes.get("timestamp").or_else(|| attributes.get("time"));
                tracker.begin_log_message(level, timestamp)?;
                self.skipping_content = tracker.config().log_level_ignored(level);
            }
            "status" => self.begin_status(tracker, attributes)?,
            "item" | "meta" => tracker.begin_metadata(attributes.require(name, "name")?)?,
            "arg" | "tag" | "arguments" | "tags" | "metadata" | "doc" => {}
            ignored if IGNORED_ELEMENTS.contains(&ignored) => {}
            unknown => tracing::warn!(element = unknown, "begin unknown item"),
        }
        Ok(())
    }

    fn end_element(&mut self, tracker: &mut Tracker, name: &str, content: &str) -> ParseResult<()> {
        match name {
            "robot" | "status" | "arguments" | "tags" | "metadata" | "doc" => {}
            "suite" => {
                tracker.end_suite()?;
            }
            "test" => {
                tracker.end_test()?;
            }
            "kw" => {
                tracker.end_keyword()?;
            }
            control if CONTROL_ELEMENTS.contains(&control) => {
                tracker.end_keyword()?;
            }
            "arg" => {
                if tracker.current_is(NodeKind::Keyword) {
                    tracker.add_argument(content)?;
                }
            }
            "msg" => {
                tracker.end_log_message(content)?;
                self.skipping_content = false;
            }
            "tag" => {
                if tracker.current_is(NodeKind::Test) {
                    tracker.add_tag(content)?;
                }
            }
            "item" | "meta" => tracker.end_metadata(content)?,
            ignored if IGNORED_ELEMENTS.contains(&ignored) => {}
            unknown => tracing::warn!(element = unknown, "ending unknown item"),
        }
        Ok(())
    }

    fn excluded_section(&self, name: &str) -> bool {
        EXCLUDED_SECTIONS.contains(&name)
    }

    fn skipping_content(&self) -> bool {
        self.skipping_content
    }
}
