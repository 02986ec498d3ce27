//! Read-side reconstruction of keyword call trees from the flat adjacency tables.

use crate::schema::{KEYWORD_TREE, TREE_HIERARCHY};
use crate::store::{ArchiveStore, StoreError, StoreResult};
use crate::types::{Record, SqlValue, decode_list};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeywordTree {
    Call(KeywordCall),
    /// The fingerprint already appears on the path from the root.
    Cycle { fingerprint: String },
    /// The node lies deeper than the requested maximum depth.
    Truncated { fingerprint: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct KeywordCall {
    pub fingerprint: String,
    pub keyword: Option<String>,
    pub library: Option<String>,
    pub status: Option<String>,
    pub arguments: Vec<String>,
    pub children: Vec<KeywordTree>,
}

/// Rebuilds the call tree rooted at `fingerprint`, children ordered by call index.
///
/// A root without a keyword tree row is [`StoreError::NotFound`].
pub fn load_keyword_tree(
    store: &dyn ArchiveStore,
    fingerprint: &str,
    max_depth: usize,
) -> StoreResult<KeywordTree> {
    let exists = store
        .fetch_one_value(
            KEYWORD_TREE,
            "fingerprint",
            &Record::new().with("fingerprint", fingerprint),
        )?
        .is_some();
    if !exists {
        return Err(StoreError::NotFound {
            resource: "keyword tree",
            id: fingerprint.to_string(),
        });
    }
    let mut path = Vec::new();
    load_node(store, fingerprint, 0, max_depth, &mut path)
}

fn load_node(
    store: &dyn ArchiveStore,
    fingerprint: &str,
    depth: usize,
    max_depth: usize,
    path: &mut Vec<String>,
) -> StoreResult<KeywordTree> {
    if path.iter().any(|seen| seen == fingerprint) {
        tracing::warn!(fingerprint, depth, "cycle in stored keyword hierarchy");
        return Ok(KeywordTree::Cycle {
            fingerprint: fingerprint.to_string(),
        });
    }
    if depth > max_depth {
        return Ok(KeywordTree::Truncated {
            fingerprint: fingerprint.to_string(),
        });
    }

    let key = Record::new().with("fingerprint", fingerprint);
    let row = store
        .fetch_rows(
            KEYWORD_TREE,
            &["keyword", "library", "status", "arguments"],
            &key,
            None,
        )?
        .into_iter()
        .next()
        .unwrap_or_default();
    let text = |column: &str| row.get(column).and_then(SqlValue::as_str).map(str::to_string);

    let subtrees = store.fetch_rows(
        TREE_HIERARCHY,
        &["subtree", "call_index"],
        &key,
        Some("call_index"),
    )?;

    path.push(fingerprint.to_string());
    let mut children = Vec::with_capacity(subtrees.len());
    for subtree in &subtrees {
        if let Some(child) = subtree.get("subtree").and_then(SqlValue::as_str) {
            children.push(load_node(store, child, depth + 1, max_depth, path)?);
        }
    }
    path.pop();

    Ok(KeywordTree::Call(KeywordCall {
        fingerprint: fingerprint.to_string(),
        keyword: text("keyword"),
        library: text("library"),
        status: text("status"),
        arguments: text("arguments")
            .map(|raw| decode_list(&raw))
            .transpose()?
            .unwrap_or_default(),
        children,
    }))
}
