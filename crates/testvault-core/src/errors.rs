use crate::node::NodeKind;
use testvault_store::StoreError;
use thiserror::Error;

/// Malformed begin/end sequences from a producer. Always aborts the session.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("execution stack is empty")]
    EmptyStack,
    #[error("expected '{expected}' on top of the stack but found '{found}' (stack: {})", stack.join(" > "))]
    UnexpectedKind {
        expected: NodeKind,
        found: NodeKind,
        stack: Vec<String>,
    },
    #[error("unbalanced begin/end events: {depth} node(s) open (stack: {})", stack.join(" > "))]
    Unbalanced { depth: usize, stack: Vec<String> },
    #[error("no test run has been started")]
    NoActiveRun,
    #[error("a test run is already in progress")]
    RunAlreadyStarted,
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Structural(#[from] StructuralError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    AlreadyArchived(String),
    #[error("timestamp error: {0}")]
    Timestamp(String),
    #[error("config error: {0}")]
    Config(String),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

pub(crate) const ALREADY_ARCHIVED: &str =
    "results already archived; check archiver version compatibility";

pub(crate) const RUN_SCHEMA_HINT: &str = "unable to insert results: the test archive schema is \
     probably not compatible with this archiver version";
