use crate::errors::StructuralError;
use crate::node::{
    ItemState, KeywordNode, LogMessageNode, Node, NodeKind, RunNode, SuiteNode, TestNode,
};
use testvault_store::RowId;

/// The currently open nesting path, root first.
#[derive(Clone, Debug, Default)]
pub struct ExecutionStack {
    nodes: Vec<Node>,
}

impl ExecutionStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn push(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn top(&self) -> Result<&Node, StructuralError> {
        self.nodes.last().ok_or(StructuralError::EmptyStack)
    }

    pub fn top_mut(&mut self) -> Result<&mut Node, StructuralError> {
        self.nodes.last_mut().ok_or(StructuralError::EmptyStack)
    }

    /// Fails unless the top of the stack is a node of `expected` kind.
    pub fn expect_kind(&self, expected: NodeKind) -> Result<&Node, StructuralError> {
        let top = self.top()?;
        if top.kind() != expected {
            return Err(self.unexpected(expected, top.kind()));
        }
        Ok(top)
    }

    /// Pops the top node after checking its kind. The stack is untouched on error.
    pub fn pop_expect(&mut self, expected: NodeKind) -> Result<Node, StructuralError> {
        self.expect_kind(expected)?;
        self.nodes.pop().ok_or(StructuralError::EmptyStack)
    }

    pub fn pop_suite(&mut self) -> Result<SuiteNode, StructuralError> {
        match self.pop_expect(NodeKind::Suite)? {
            Node::Suite(suite) => Ok(suite),
            _ => Err(StructuralError::EmptyStack),
        }
    }

    pub fn pop_test(&mut self) -> Result<TestNode, StructuralError> {
        match self.pop_expect(NodeKind::Test)? {
            Node::Test(test) => Ok(test),
            _ => Err(StructuralError::EmptyStack),
        }
    }

    pub fn pop_keyword(&mut self) -> Result<KeywordNode, StructuralError> {
        match self.pop_expect(NodeKind::Keyword)? {
            Node::Keyword(keyword) => Ok(keyword),
            _ => Err(StructuralError::EmptyStack),
        }
    }

    pub fn pop_log_message(&mut self) -> Result<LogMessageNode, StructuralError> {
        match self.pop_expect(NodeKind::LogMessage)? {
            Node::LogMessage(message) => Ok(message),
            _ => Err(StructuralError::EmptyStack),
        }
    }

    /// Drops every open node, including the run.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub fn expect_suite_mut(&mut self) -> Result<&mut SuiteNode, StructuralError> {
        self.expect_kind(NodeKind::Suite)?;
        match self.nodes.last_mut() {
            Some(Node::Suite(suite)) => Ok(suite),
            _ => Err(StructuralError::EmptyStack),
        }
    }

    pub fn expect_test_mut(&mut self) -> Result<&mut TestNode, StructuralError> {
        self.expect_kind(NodeKind::Test)?;
        match self.nodes.last_mut() {
            Some(Node::Test(test)) => Ok(test),
            _ => Err(StructuralError::EmptyStack),
        }
    }

    pub fn expect_keyword_mut(&mut self) -> Result<&mut KeywordNode, StructuralError> {
        self.expect_kind(NodeKind::Keyword)?;
        match self.nodes.last_mut() {
            Some(Node::Keyword(keyword)) => Ok(keyword),
            _ => Err(StructuralError::EmptyStack),
        }
    }

    /// The fingerprinted node on top of the stack; log messages carry no item state.
    pub fn top_item_mut(&mut self) -> Result<&mut ItemState, StructuralError> {
        let top = self.top()?;
        if top.item().is_none() {
            return Err(self.unexpected(NodeKind::Keyword, top.kind()));
        }
        self.nodes
            .last_mut()
            .and_then(Node::item_mut)
            .ok_or(StructuralError::EmptyStack)
    }

    pub fn run(&self) -> Option<&RunNode> {
        match self.nodes.first() {
            Some(Node::Run(run)) => Some(run),
            _ => None,
        }
    }

    /// Open suites, outermost first.
    pub fn suites(&self) -> impl Iterator<Item = &SuiteNode> {
        self.nodes.iter().filter_map(|node| match node {
            Node::Suite(suite) => Some(suite),
            _ => None,
        })
    }

    pub fn nearest_suite_id(&self) -> Option<RowId> {
        self.nodes.iter().rev().find_map(|node| match node {
            Node::Suite(suite) => Some(suite.id),
            _ => None,
        })
    }

    pub fn nearest_test_id(&self) -> Option<RowId> {
        self.nodes.iter().rev().find_map(|node| match node {
            Node::Test(test) => Some(test.id),
            _ => None,
        })
    }

    /// Assigns the execution path of a child about to be pushed under the current top.
    ///
    /// An explicit path is used as-is and reserves no counter. Log messages share the path of
    /// their parent.
    pub fn child_execution_path(
        &mut self,
        kind: NodeKind,
        explicit: Option<&str>,
    ) -> Result<String, StructuralError> {
        if let Some(path) = explicit.filter(|path| !path.is_empty()) {
            return Ok(path.to_string());
        }
        let parent = self.top_mut()?;
        let Some(identifier) = kind.path_identifier() else {
            return Ok(parent.execution_path().to_string());
        };
        let Some(parent_item) = parent.item_mut() else {
            return Ok(String::new());
        };
        let segment = format!("{identifier}{}", parent_item.next_child_index(identifier));
        if parent_item.execution_path.is_empty() {
            Ok(segment)
        } else {
            Ok(format!("{}-{segment}", parent_item.execution_path))
        }
    }

    /// Checks the stack holds only the run, as it must between documents.
    pub fn ensure_balanced(&self) -> Result<(), StructuralError> {
        match self.nodes.as_slice() {
            [Node::Run(_)] => Ok(()),
            [] => Err(StructuralError::NoActiveRun),
            nodes => Err(StructuralError::Unbalanced {
                depth: nodes.len(),
                stack: self.describe(),
            }),
        }
    }

    pub fn describe(&self) -> Vec<String> {
        self.nodes.iter().map(Node::label).collect()
    }

    fn unexpected(&self, expected: NodeKind, found: NodeKind) -> StructuralError {
        StructuralError::UnexpectedKind {
            expected,
            found,
            stack: self.describe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack_with_run() -> ExecutionStack {
        let mut stack = ExecutionStack::new();
        stack.push(Node::Run(RunNode {
            id: 1,
            item: ItemState::default(),
        }));
        stack
    }

    fn keyword(path: String) -> Node {
        let mut item = ItemState::new("Log", "Log".to_string());
        item.execution_path = path;
        Node::Keyword(KeywordNode {
            item,
            library: "BuiltIn".to_string(),
            kind: "kw".to_string(),
        })
    }

    #[test]
    fn pop_expect_wrong_kind_expected_structural_error_and_stack_intact() {
        let mut stack = stack_with_run();

        let error = stack
            .pop_expect(NodeKind::Test)
            .expect_err("run is not a test");

        assert!(matches!(
            error,
            StructuralError::UnexpectedKind {
                expected: NodeKind::Test,
                found: NodeKind::Run,
                ..
            }
        ));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn child_execution_path_siblings_expected_sequential_counters() {
        let mut stack = stack_with_run();
        let suite_path = stack
            .child_execution_path(NodeKind::Suite, None)
            .expect("suite path");
        let mut suite_item = ItemState::new("Root", "Root".to_string());
        suite_item.execution_path = suite_path.clone();
        stack.push(Node::Suite(SuiteNode::new(1, suite_item)));

        let paths: Vec<String> = (0..3)
            .map(|_| {
                let path = stack
                    .child_execution_path(NodeKind::Keyword, None)
                    .expect("keyword path");
                stack.push(keyword(path.clone()));
                stack.pop_expect(NodeKind::Keyword).expect("pop keyword");
                path
            })
            .collect();

        assert_eq!(suite_path, "s1");
        assert_eq!(paths, vec!["s1-k1", "s1-k2", "s1-k3"]);
    }

    #[test]
    fn child_execution_path_explicit_expected_no_counter_reserved() {
        let mut stack = stack_with_run();

        let explicit = stack
            .child_execution_path(NodeKind::Suite, Some("s9"))
            .expect("explicit path");
        let generated = stack
            .child_execution_path(NodeKind::Suite, None)
            .expect("generated path");

        assert_eq!(explicit, "s9");
        assert_eq!(generated, "s1");
    }

    #[test]
    fn ensure_balanced_open_suite_expected_unbalanced() {
        let mut stack = stack_with_run();
        stack.push(Node::Suite(SuiteNode::new(
            3,
            ItemState::new("Root", "Root".to_string()),
        )));

        assert_eq!(
            stack.ensure_balanced(),
            Err(StructuralError::Unbalanced {
                depth: 2,
                stack: vec!["run #1".to_string(), "suite 'Root'".to_string()],
            })
        );
        assert_eq!(
            ExecutionStack::new().ensure_balanced(),
            Err(StructuralError::NoActiveRun)
        );
    }
}
