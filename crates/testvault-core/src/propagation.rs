//! Status, timing and fingerprint flow from a closing node into its parent.

use crate::fingerprint::{self, Fingerprint, FingerprintInput};
use crate::node::{ItemState, KeywordRole};
use crate::status::Status;

/// What a closed node hands up to its parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClosedNode {
    pub fingerprint: Fingerprint,
    pub status: Status,
    pub elapsed: Option<i64>,
    pub role: KeywordRole,
}

/// Resolves a node's own status, elapsed time and fingerprints once all children have closed.
///
/// `execution_status` comes from direct children only. The final status is the explicit one,
/// else the execution status, else `PASS`.
pub fn finish_item(item: &mut ItemState, hashing_name: &str) -> Status {
    item.execution_status = Status::aggregate(&item.subtree_statuses);
    let status = item.status.or(item.execution_status).unwrap_or(Status::Pass);
    item.status = Some(status);

    if matches!(item.elapsed, None | Some(0)) {
        let phases = [item.setup_elapsed, item.execution_elapsed, item.teardown_elapsed];
        item.elapsed = Some(phases.iter().map(|phase| phase.unwrap_or(0)).sum());
    }

    item.execution_fingerprint = fingerprint::execution_fingerprint(&item.subtree_fingerprints);
    item.fingerprint = Some(fingerprint::item_fingerprint(FingerprintInput {
        hashing_name,
        setup: item.setup_fingerprint.as_deref(),
        execution: item.execution_fingerprint.as_deref(),
        teardown: item.teardown_fingerprint.as_deref(),
        status,
        arguments: &item.arguments,
    }));
    status
}

/// Snapshot of a finished item for propagation. `finish_item` must have run first.
pub fn closed_node(item: &ItemState, role: KeywordRole) -> ClosedNode {
    ClosedNode {
        fingerprint: item.fingerprint.clone().unwrap_or_default(),
        status: item.status.unwrap_or(Status::Pass),
        elapsed: item.elapsed,
        role,
    }
}

/// Setup and teardown children write the parent's phase fields; every other child joins the
/// execution subtree. A failing teardown marks the parent as failed by teardown.
pub fn propagate(child: ClosedNode, parent: &mut ItemState) {
    match child.role {
        KeywordRole::Setup => {
            parent.setup_fingerprint = Some(child.fingerprint);
            parent.setup_status = Some(child.status);
            parent.setup_elapsed = child.elapsed;
        }
        KeywordRole::Teardown => {
            if child.status == Status::Fail {
                parent.failed_by_teardown = true;
            }
            parent.teardown_fingerprint = Some(child.fingerprint);
            parent.teardown_status = Some(child.status);
            parent.teardown_elapsed = child.elapsed;
        }
        KeywordRole::Step => {
            parent.subtree_fingerprints.push(child.fingerprint);
            parent.subtree_statuses.push(child.status);
            if let Some(elapsed) = child.elapsed.filter(|elapsed| *elapsed != 0) {
                parent.execution_elapsed = Some(parent.execution_elapsed.unwrap_or(0) + elapsed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(role: KeywordRole, status: Status, elapsed: i64) -> ClosedNode {
        ClosedNode {
            fingerprint: format!("{role:?}-{status}"),
            status,
            elapsed: Some(elapsed),
            role,
        }
    }

    #[test]
    fn finish_item_no_children_expected_pass_and_no_execution_fingerprint() {
        let mut item = ItemState::new("Empty", "Root.Empty".to_string());

        let status = finish_item(&mut item, "Root.Empty");

        assert_eq!(status, Status::Pass);
        assert_eq!(item.execution_status, None);
        assert_eq!(item.execution_fingerprint, None);
        assert!(item.fingerprint.is_some());
        assert_eq!(item.elapsed, Some(0));
    }

    #[test]
    fn finish_item_explicit_status_expected_kept_over_children() {
        let mut item = ItemState::new("Case", "Root.Case".to_string());
        item.status = Some(Status::Skipped);
        propagate(child(KeywordRole::Step, Status::Fail, 5), &mut item);

        assert_eq!(finish_item(&mut item, "Root.Case"), Status::Skipped);
        assert_eq!(item.execution_status, Some(Status::Fail));
    }

    #[test]
    fn propagate_phases_expected_split_fields_and_elapsed_sum() {
        let mut parent = ItemState::new("Case", "Root.Case".to_string());
        propagate(child(KeywordRole::Setup, Status::Pass, 3), &mut parent);
        propagate(child(KeywordRole::Step, Status::Pass, 10), &mut parent);
        propagate(child(KeywordRole::Step, Status::Pass, 0), &mut parent);
        propagate(child(KeywordRole::Step, Status::Pass, 7), &mut parent);
        propagate(child(KeywordRole::Teardown, Status::Fail, 2), &mut parent);

        assert_eq!(parent.setup_fingerprint.as_deref(), Some("Setup-PASS"));
        assert_eq!(parent.subtree_fingerprints.len(), 3);
        assert_eq!(parent.execution_elapsed, Some(17));
        assert!(parent.failed_by_teardown);

        finish_item(&mut parent, "Root.Case");
        assert_eq!(parent.elapsed, Some(22));
    }
}
