// ABOUTME: Data models for the remote journal tree, identity records and reports
// ABOUTME: Tolerant serde parsing of relay responses plus the node table used for mapping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tracing::warn;

use crate::{Error, Result};

/// Stable identifier of a remote folder or document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        RemoteId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Up to eight alphanumeric characters of the id, for disambiguating names.
    pub fn short(&self) -> String {
        let short: String = self
            .0
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(8)
            .collect();
        if short.is_empty() {
            "x".into()
        } else {
            short
        }
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(s: &str) -> Self {
        RemoteId(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Folder,
    Document { body: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNode {
    pub id: RemoteId,
    pub name: String,
    pub parent: Option<RemoteId>,
    pub sort: i64,
    pub kind: NodeKind,
}

impl RemoteNode {
    pub fn folder(id: &str, name: &str, parent: Option<&str>) -> Self {
        RemoteNode {
            id: id.into(),
            name: name.into(),
            parent: parent.map(RemoteId::from),
            sort: 0,
            kind: NodeKind::Folder,
        }
    }

    pub fn document(id: &str, name: &str, parent: Option<&str>, body: &str) -> Self {
        RemoteNode {
            id: id.into(),
            name: name.into(),
            parent: parent.map(RemoteId::from),
            sort: 0,
            kind: NodeKind::Document {
                body: Some(body.into()),
            },
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder)
    }

    pub fn body(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Document { body } => body.as_deref(),
            NodeKind::Folder => None,
        }
    }
}

/// Flat node table keyed by remote id; hierarchy lives in parent pointers.
#[derive(Debug, Clone, Default)]
pub struct RemoteTree {
    nodes: BTreeMap<RemoteId, RemoteNode>,
}

impl RemoteTree {
    pub fn from_nodes(nodes: Vec<RemoteNode>) -> Result<Self> {
        let mut table = BTreeMap::new();
        for node in nodes {
            let id = node.id.clone();
            if table.insert(id.clone(), node).is_some() {
                return Err(Error::InvalidTree(format!("duplicate remote id {}", id)));
            }
        }
        Ok(RemoteTree { nodes: table })
    }

    pub fn get(&self, id: &RemoteId) -> Option<&RemoteNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &RemoteNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of documents whose body was not part of the listing.
    pub fn documents_missing_body(&self) -> Vec<RemoteId> {
        self.nodes
            .values()
            .filter(|n| matches!(n.kind, NodeKind::Document { body: None }))
            .map(|n| n.id.clone())
            .collect()
    }

    pub fn set_body(&mut self, id: &RemoteId, body: String) {
        if let Some(node) = self.nodes.get_mut(id) {
            if let NodeKind::Document { body: slot } = &mut node.kind {
                *slot = Some(body);
            }
        }
    }

    /// Children grouped by parent id (`None` for top-level nodes).
    pub fn children_index(&self) -> BTreeMap<Option<RemoteId>, Vec<&RemoteNode>> {
        let mut index: BTreeMap<Option<RemoteId>, Vec<&RemoteNode>> = BTreeMap::new();
        for node in self.nodes.values() {
            index.entry(node.parent.clone()).or_default().push(node);
        }
        for siblings in index.values_mut() {
            siblings.sort_by(|a, b| {
                (a.sort, &a.name, &a.id).cmp(&(b.sort, &b.name, &b.id))
            });
        }
        index
    }

    /// Ids of the node and all its descendants.
    pub fn subtree(&self, root: &RemoteId) -> Vec<RemoteId> {
        let index = self.children_index();
        let mut out = Vec::new();
        let mut stack = vec![root.clone()];
        while let Some(id) = stack.pop() {
            if out.contains(&id) {
                continue;
            }
            if let Some(children) = index.get(&Some(id.clone())) {
                stack.extend(children.iter().map(|c| c.id.clone()));
            }
            out.push(id);
        }
        out
    }

    /// Parent chain of a node, nearest first.
    pub fn ancestors(&self, id: &RemoteId) -> Vec<RemoteId> {
        let mut out = Vec::new();
        let mut current = self.get(id).and_then(|n| n.parent.clone());
        while let Some(parent) = current {
            if out.contains(&parent) {
                break;
            }
            current = self.get(&parent).and_then(|n| n.parent.clone());
            out.push(parent);
        }
        out
    }
}

#[cfg(test)]
mod tree_tests {
    use super::*;

    #[test]
    fn test_remote_id_short() {
        assert_eq!(RemoteId::new("42").short(), "42");
        assert_eq!(RemoteId::new("kXb3Lq9zP0aa11bb").short(), "kXb3Lq9z");
        assert_eq!(RemoteId::new("JournalEntry.abc").short(), "JournalE");
    }

    #[test]
    fn test_from_nodes_rejects_duplicates() {
        let result = RemoteTree::from_nodes(vec![
            RemoteNode::folder("1", "a", None),
            RemoteNode::folder("1", "b", None),
        ]);
        assert!(matches!(result, Err(Error::InvalidTree(_))));
    }

    #[test]
    fn test_subtree_and_ancestors() {
        let tree = RemoteTree::from_nodes(vec![
            RemoteNode::folder("1", "root", None),
            RemoteNode::folder("2", "sub", Some("1")),
            RemoteNode::document("3", "doc", Some("2"), ""),
            RemoteNode::document("4", "other", None, ""),
        ])
        .unwrap();

        let mut subtree = tree.subtree(&"2".into());
        subtree.sort();
        assert_eq!(subtree, vec![RemoteId::new("2"), RemoteId::new("3")]);
        assert_eq!(
            tree.ancestors(&"3".into()),
            vec![RemoteId::new("2"), RemoteId::new("1")]
        );
    }
}

/// Tree listing as returned by the relay API.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TreeListing {
    #[serde(default)]
    pub folders: Vec<FolderEntry>,
    #[serde(default)]
    pub documents: Vec<DocumentEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderEntry {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default, alias = "parent")]
    pub folder: Option<String>,
    #[serde(default)]
    pub sort: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEntry {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub sort: i64,
    #[serde(default)]
    pub content: Option<String>,
    /// Foundry v10+ journal pages. Only a lone text page stands in for `content`.
    #[serde(default)]
    pub pages: Vec<PageEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<PageText>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    #[serde(default)]
    pub content: Option<String>,
}

impl DocumentEntry {
    /// The single HTML body this document syncs as.
    fn body(&mut self) -> Option<String> {
        if let Some(content) = self.content.take() {
            return Some(content);
        }
        match self.pages.as_mut_slice() {
            [] => None,
            [page] if page.kind.as_deref().unwrap_or("text") == "text" => {
                page.text.as_mut().and_then(|t| t.content.take())
            }
            pages => {
                warn!(
                    document = %self.id,
                    pages = pages.len(),
                    "journal pages are not synced one by one; using the relay body"
                );
                None
            }
        }
    }
}

impl TreeListing {
    pub fn into_tree(self) -> Result<RemoteTree> {
        let folders = self.folders.into_iter().map(|f| RemoteNode {
            id: RemoteId(f.id),
            name: f.name,
            parent: non_empty(f.folder),
            sort: f.sort,
            kind: NodeKind::Folder,
        });
        let documents = self.documents.into_iter().map(|mut d| {
            let body = d.body();
            RemoteNode {
                id: RemoteId(d.id),
                name: d.name,
                parent: non_empty(d.folder),
                sort: d.sort,
                kind: NodeKind::Document { body },
            }
        });
        RemoteTree::from_nodes(folders.chain(documents).collect())
    }
}

// Foundry serializes "no folder" as either null or "".
fn non_empty(id: Option<String>) -> Option<RemoteId> {
    id.filter(|s| !s.is_empty()).map(RemoteId)
}

#[cfg(test)]
mod listing_tests {
    use super::*;

    #[test]
    fn test_tree_listing_deserialize_minimal() {
        let json = r#"{"folders": [{"_id": "f1", "name": "Bestiary"}]}"#;
        let listing: TreeListing = serde_json::from_str(json).unwrap();
        assert_eq!(listing.folders.len(), 1);
        assert!(listing.documents.is_empty());
        assert!(listing.folders[0].folder.is_none());
    }

    #[test]
    fn test_tree_listing_into_tree() {
        let json = r##"{
            "folders": [
                {"_id": "f1", "name": "Bestiary", "folder": null, "sort": 100, "color": "#fff"},
                {"_id": "f2", "name": "Undead", "parent": "f1"}
            ],
            "documents": [
                {"_id": "42", "name": "Goblin", "folder": "f1", "content": "<p>Small</p>"},
                {"_id": "43", "name": "Intro", "folder": ""}
            ]
        }"##;
        let listing: TreeListing = serde_json::from_str(json).unwrap();
        let tree = listing.into_tree().unwrap();

        assert_eq!(tree.len(), 4);
        let goblin = tree.get(&"42".into()).unwrap();
        assert_eq!(goblin.parent, Some(RemoteId::new("f1")));
        assert_eq!(goblin.body(), Some("<p>Small</p>"));
        assert_eq!(tree.get(&"43".into()).unwrap().parent, None);
        assert_eq!(tree.get(&"f2".into()).unwrap().parent, Some(RemoteId::new("f1")));
        assert_eq!(tree.documents_missing_body(), vec![RemoteId::new("43")]);
    }

    #[test]
    fn test_single_text_page_becomes_body() {
        let json = r#"{
            "documents": [
                {"_id": "1", "name": "Inn", "pages": [
                    {"name": "Inn", "type": "text", "text": {"content": "<p>Warm</p>"}}
                ]},
                {"_id": "2", "name": "Atlas", "pages": [
                    {"name": "North", "type": "text", "text": {"content": "<p>N</p>"}},
                    {"name": "Map", "type": "image"}
                ]},
                {"_id": "3", "name": "Portrait", "pages": [{"name": "Face", "type": "image"}]},
                {"_id": "4", "name": "Both", "content": "<p>Relay</p>", "pages": [
                    {"name": "Other", "type": "text", "text": {"content": "<p>Page</p>"}}
                ]}
            ]
        }"#;
        let listing: TreeListing = serde_json::from_str(json).unwrap();
        let tree = listing.into_tree().unwrap();

        assert_eq!(tree.get(&"1".into()).unwrap().body(), Some("<p>Warm</p>"));
        assert_eq!(tree.get(&"4".into()).unwrap().body(), Some("<p>Relay</p>"));
        assert_eq!(
            tree.documents_missing_body(),
            vec![RemoteId::new("2"), RemoteId::new("3")]
        );
    }
}

/// Local binding of a materialized document to its remote identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Path relative to the sync root.
    pub path: PathBuf,
    pub remote_id: RemoteId,
    #[serde(default)]
    pub remote_parent_id: Option<RemoteId>,
    /// Hash of the remote rich body last synced.
    pub content_hash: String,
    /// Hash of the markup last written or uploaded.
    #[serde(default)]
    pub markup_hash: Option<String>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub path: PathBuf,
    pub remote_id: RemoteId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    pub path: PathBuf,
    pub error_kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportWarning {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub succeeded: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<FailedItem>,
    pub warnings: Vec<ReportWarning>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty() && (!self.succeeded.is_empty() || !self.skipped.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UploadOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadReport {
    pub path: PathBuf,
    pub remote_id: RemoteId,
    pub action: UploadOutcome,
    pub warnings: Vec<String>,
}

/// Uploads of every modified file in path order. The batch stops at the first failure.
#[derive(Debug, Default)]
pub struct UploadBatch {
    pub uploaded: Vec<UploadReport>,
    pub failed: Option<(PathBuf, Error)>,
}

impl UploadBatch {
    pub fn is_empty(&self) -> bool {
        self.uploaded.is_empty() && self.failed.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileState {
    Synced,
    Modified,
    Untracked,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileStatus {
    pub path: PathBuf,
    pub state: FileState,
    pub remote_id: Option<RemoteId>,
}
