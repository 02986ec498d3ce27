use crate::fingerprint::Fingerprint;
use crate::status::Status;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use testvault_store::RowId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Run,
    Suite,
    Test,
    Keyword,
    LogMessage,
}

impl NodeKind {
    /// Prefix used for execution path segments. Runs and log messages take no segment.
    pub fn path_identifier(self) -> Option<char> {
        match self {
            Self::Suite => Some('s'),
            Self::Test => Some('t'),
            Self::Keyword => Some('k'),
            Self::Run | Self::LogMessage => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Run => "run",
            Self::Suite => "suite",
            Self::Test => "test",
            Self::Keyword => "keyword",
            Self::LogMessage => "log message",
        })
    }
}

/// The role a keyword plays for its parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeywordRole {
    Setup,
    Teardown,
    Step,
}

impl KeywordRole {
    pub fn from_kind(kind: &str) -> Self {
        match kind.trim().to_ascii_lowercase().as_str() {
            "setup" => Self::Setup,
            "teardown" => Self::Teardown,
            _ => Self::Step,
        }
    }
}

/// State shared by every fingerprinted node.
#[derive(Clone, Debug, Default)]
pub struct ItemState {
    pub name: String,
    pub full_name: String,

    pub status: Option<Status>,
    pub setup_status: Option<Status>,
    pub execution_status: Option<Status>,
    pub teardown_status: Option<Status>,
    pub failed_by_teardown: bool,

    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub elapsed: Option<i64>,
    pub setup_elapsed: Option<i64>,
    pub execution_elapsed: Option<i64>,
    pub teardown_elapsed: Option<i64>,
    pub critical: Option<bool>,

    pub arguments: Vec<String>,
    pub subtree_fingerprints: Vec<Fingerprint>,
    pub subtree_statuses: Vec<Status>,
    pub fingerprint: Option<Fingerprint>,
    pub setup_fingerprint: Option<Fingerprint>,
    pub execution_fingerprint: Option<Fingerprint>,
    pub teardown_fingerprint: Option<Fingerprint>,

    pub child_test_ids: Vec<RowId>,
    pub child_suite_ids: Vec<RowId>,

    pub execution_path: String,
    /// Keyword nesting depth; suites and tests sit at 0.
    pub call_depth: u32,
    child_counters: BTreeMap<char, u32>,
}

impl ItemState {
    pub fn new(name: &str, full_name: String) -> Self {
        Self {
            name: name.to_string(),
            full_name,
            ..Self::default()
        }
    }

    /// Derives a child's full name: an explicit class name wins, otherwise the parent's full
    /// name is prefixed when it has one.
    pub fn child_full_name(&self, name: &str, class_name: Option<&str>) -> String {
        match class_name.filter(|class| !class.is_empty()) {
            Some(class) => format!("{class}.{name}"),
            None if self.full_name.is_empty() => name.to_string(),
            None => format!("{}.{name}", self.full_name),
        }
    }

    pub(crate) fn next_child_index(&mut self, identifier: char) -> u32 {
        let counter = self.child_counters.entry(identifier).or_insert(0);
        *counter += 1;
        *counter
    }
}

#[derive(Clone, Debug)]
pub struct RunNode {
    pub id: RowId,
    pub item: ItemState,
}

#[derive(Clone, Debug)]
pub struct SuiteNode {
    pub id: RowId,
    pub item: ItemState,
    pub metadata: Vec<(String, String)>,
    pending_metadata_name: Option<String>,
}

impl SuiteNode {
    pub fn new(id: RowId, item: ItemState) -> Self {
        Self {
            id,
            item,
            metadata: Vec::new(),
            pending_metadata_name: None,
        }
    }

    /// Inserts or replaces a metadata entry, keeping first-seen order.
    pub fn set_metadata(&mut self, name: &str, value: &str) {
        match self.metadata.iter_mut().find(|(existing, _)| existing == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.metadata.push((name.to_string(), value.to_string())),
        }
    }

    pub(crate) fn begin_metadata(&mut self, name: &str) {
        self.pending_metadata_name = Some(name.to_string());
    }

    pub(crate) fn end_metadata(&mut self, value: &str) {
        if value.is_empty() {
            return;
        }
        if let Some(name) = self.pending_metadata_name.clone() {
            self.set_metadata(&name, value);
        }
    }
}

#[derive(Clone, Debug)]
pub struct TestNode {
    pub id: RowId,
    pub item: ItemState,
    pub tags: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct KeywordNode {
    pub item: ItemState,
    pub library: String,
    /// Producer-supplied kind (`kw`, `setup`, `teardown`, `for`, ...), lowercased.
    pub kind: String,
}

impl KeywordNode {
    pub fn role(&self) -> KeywordRole {
        KeywordRole::from_kind(&self.kind)
    }

    pub fn hashing_name(&self) -> String {
        format!("{}.{}", self.library, self.item.name)
    }
}

#[derive(Clone, Debug)]
pub struct LogMessageNode {
    pub level: String,
    pub timestamp: Option<String>,
    pub execution_path: String,
}

#[derive(Clone, Debug)]
pub enum Node {
    Run(RunNode),
    Suite(SuiteNode),
    Test(TestNode),
    Keyword(KeywordNode),
    LogMessage(LogMessageNode),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Run(_) => NodeKind::Run,
            Self::Suite(_) => NodeKind::Suite,
            Self::Test(_) => NodeKind::Test,
            Self::Keyword(_) => NodeKind::Keyword,
            Self::LogMessage(_) => NodeKind::LogMessage,
        }
    }

    pub fn item(&self) -> Option<&ItemState> {
        match self {
            Self::Run(run) => Some(&run.item),
            Self::Suite(suite) => Some(&suite.item),
            Self::Test(test) => Some(&test.item),
            Self::Keyword(keyword) => Some(&keyword.item),
            Self::LogMessage(_) => None,
        }
    }

    pub fn item_mut(&mut self) -> Option<&mut ItemState> {
        match self {
            Self::Run(run) => Some(&mut run.item),
            Self::Suite(suite) => Some(&mut suite.item),
            Self::Test(test) => Some(&mut test.item),
            Self::Keyword(keyword) => Some(&mut keyword.item),
            Self::LogMessage(_) => None,
        }
    }

    pub fn execution_path(&self) -> &str {
        match self {
            Self::LogMessage(message) => &message.execution_path,
            other => other
                .item()
                .map(|item| item.execution_path.as_str())
                .unwrap_or_default(),
        }
    }

    /// Short label used in structural error reports.
    pub fn label(&self) -> String {
        match self {
            Self::Run(run) => format!("run #{}", run.id),
            Self::LogMessage(message) => format!("log message [{}]", message.level),
            other => format!(
                "{} '{}'",
                other.kind(),
                other.item().map(|item| item.name.as_str()).unwrap_or_default()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_full_name_with_class_name_expected_override() {
        let parent = ItemState::new("Root", "Root".to_string());

        assert_eq!(parent.child_full_name("Case", Some("pkg.Class")), "pkg.Class.Case");
        assert_eq!(parent.child_full_name("Case", None), "Root.Case");
        assert_eq!(ItemState::default().child_full_name("Top", None), "Top");
    }

    #[test]
    fn keyword_role_from_kind_expected_case_insensitive() {
        assert_eq!(KeywordRole::from_kind("SETUP"), KeywordRole::Setup);
        assert_eq!(KeywordRole::from_kind("teardown"), KeywordRole::Teardown);
        assert_eq!(KeywordRole::from_kind("for"), KeywordRole::Step);
    }

    #[test]
    fn suite_metadata_pending_name_expected_value_attached() {
        let mut suite = SuiteNode::new(1, ItemState::new("Root", "Root".to_string()));
        suite.begin_metadata("team");
        suite.end_metadata("");
        suite.end_metadata("Blue");
        suite.set_metadata("team", "Red");

        assert_eq!(suite.metadata, vec![("team".to_string(), "Red".to_string())]);
    }
}
