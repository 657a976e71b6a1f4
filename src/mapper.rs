// ABOUTME: Maps the remote folder/document tree onto local paths and plans sync actions
// ABOUTME: Deterministic naming with collision suffixes, move detection and upload planning

use crate::model::{IdentityRecord, RemoteId, RemoteNode, RemoteTree};
use crate::storage::IdentityStore;
use crate::util::{clip_name, collision_key, content_hash, fs_safe_name};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadAction {
    CreateDir {
        path: PathBuf,
        folder_id: RemoteId,
    },
    CreateFile {
        path: PathBuf,
        remote_id: RemoteId,
    },
    UpdateFile {
        path: PathBuf,
        remote_id: RemoteId,
    },
    SkipFile {
        path: PathBuf,
        remote_id: RemoteId,
    },
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        remote_id: RemoteId,
        rewrite: bool,
    },
}

impl DownloadAction {
    /// Path the action leaves in place.
    pub fn path(&self) -> &Path {
        match self {
            DownloadAction::CreateDir { path, .. }
            | DownloadAction::CreateFile { path, .. }
            | DownloadAction::UpdateFile { path, .. }
            | DownloadAction::SkipFile { path, .. } => path,
            DownloadAction::MoveFile { to, .. } => to,
        }
    }

    pub fn remote_id(&self) -> &RemoteId {
        match self {
            DownloadAction::CreateDir { folder_id, .. } => folder_id,
            DownloadAction::CreateFile { remote_id, .. }
            | DownloadAction::UpdateFile { remote_id, .. }
            | DownloadAction::SkipFile { remote_id, .. }
            | DownloadAction::MoveFile { remote_id, .. } => remote_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadAction {
    CreateRemote {
        parent_id: Option<RemoteId>,
        name: String,
        body: String,
    },
    UpdateRemote {
        remote_id: RemoteId,
        body: String,
    },
}

/// Plans the local materialization of a remote tree.
///
/// Folders come before anything inside them. At each level documents are
/// listed before subfolders, siblings in `(sort, name, id)` order. Fails with
/// `InvalidTree` before planning anything when parents are missing, point at
/// documents, or form a cycle.
pub fn plan_download(tree: &RemoteTree, store: &IdentityStore) -> Result<Vec<DownloadAction>> {
    validate(tree)?;

    let children = tree.children_index();
    let mut planner = Planner {
        children: &children,
        store,
        actions: Vec::with_capacity(tree.len()),
    };
    planner.level(None, Path::new(""));
    Ok(planner.actions)
}

fn validate(tree: &RemoteTree) -> Result<()> {
    for node in tree.nodes() {
        let Some(parent_id) = &node.parent else {
            continue;
        };
        match tree.get(parent_id) {
            None => {
                return Err(Error::InvalidTree(format!(
                    "{} ({}) refers to missing parent {}",
                    node.name, node.id, parent_id
                )))
            }
            Some(parent) if !parent.is_folder() => {
                return Err(Error::InvalidTree(format!(
                    "{} ({}) has document {} as its parent",
                    node.name, node.id, parent_id
                )))
            }
            Some(_) => {}
        }
    }

    for node in tree.nodes() {
        let mut seen = BTreeSet::new();
        let mut current = node.parent.clone();
        while let Some(parent_id) = current {
            if parent_id == node.id || !seen.insert(parent_id.clone()) {
                return Err(Error::InvalidTree(format!(
                    "folder cycle through {} ({})",
                    node.name, node.id
                )));
            }
            current = tree.get(&parent_id).and_then(|p| p.parent.clone());
        }
    }

    Ok(())
}

struct Planner<'a> {
    children: &'a BTreeMap<Option<RemoteId>, Vec<&'a RemoteNode>>,
    store: &'a IdentityStore,
    actions: Vec<DownloadAction>,
}

impl Planner<'_> {
    fn level(&mut self, parent: Option<&RemoteId>, dir: &Path) {
        let children = self.children;
        let Some(siblings) = children.get(&parent.cloned()) else {
            return;
        };
        let (folders, documents): (Vec<&RemoteNode>, Vec<&RemoteNode>) =
            siblings.iter().copied().partition(|n| n.is_folder());

        let names = sibling_names(&documents, &folders);
        for doc in &documents {
            self.document(doc, dir.join(&names[&doc.id]));
        }

        for folder in &folders {
            let path = dir.join(&names[&folder.id]);
            self.actions.push(DownloadAction::CreateDir {
                path: path.clone(),
                folder_id: folder.id.clone(),
            });
            self.level(Some(&folder.id), &path);
        }
    }

    fn document(&mut self, doc: &RemoteNode, path: PathBuf) {
        let hash = content_hash(doc.body().unwrap_or_default());
        let remote_id = doc.id.clone();
        let root = &self.store.paths().root;

        let action = match self.store.by_remote_id(&doc.id) {
            None => DownloadAction::CreateFile { path, remote_id },
            Some(record) if record.path == path => {
                if record.content_hash != hash || !root.join(&path).exists() {
                    DownloadAction::UpdateFile { path, remote_id }
                } else {
                    DownloadAction::SkipFile { path, remote_id }
                }
            }
            Some(record) => DownloadAction::MoveFile {
                from: record.path.clone(),
                to: path,
                remote_id,
                rewrite: record.content_hash != hash,
            },
        };
        self.actions.push(action);
    }
}

/// Directory entry names for the children of one folder, keyed by remote id.
///
/// Within documents and within folders, names that share a collision key are
/// renamed as a group: in remote id order the first takes the key, the rest
/// take `<key>-<short id>`. Documents and folders then share one
/// case-insensitive set of entries, so `Notes.org` the file and `Notes.org`
/// the folder cannot both exist; a numeric suffix settles what is still taken.
fn sibling_names(documents: &[&RemoteNode], folders: &[&RemoteNode]) -> BTreeMap<RemoteId, String> {
    let (doc_preferred, doc_suffixed) = wanted_names(documents);
    let (folder_preferred, folder_suffixed) = wanted_names(folders);

    let queue = doc_preferred
        .into_iter()
        .map(|(id, stem)| (id, stem, ".org"))
        .chain(folder_preferred.into_iter().map(|(id, stem)| (id, stem, "")))
        .chain(doc_suffixed.into_iter().map(|(id, stem)| (id, stem, ".org")))
        .chain(folder_suffixed.into_iter().map(|(id, stem)| (id, stem, "")));

    let mut taken = BTreeSet::new();
    let mut names = BTreeMap::new();
    for (id, stem, extension) in queue {
        let mut name = format!("{}{}", stem, extension);
        let mut counter = 2;
        while !taken.insert(name.to_lowercase()) {
            name = format!("{}-{}{}", stem, counter, extension);
            counter += 1;
        }
        names.insert(id.clone(), name);
    }
    names
}

type Wanted<'a> = Vec<(&'a RemoteId, String)>;

/// Splits siblings of one kind into names kept as projected and short-id suffixed names.
fn wanted_names<'a>(siblings: &[&'a RemoteNode]) -> (Wanted<'a>, Wanted<'a>) {
    let mut groups: BTreeMap<String, Wanted<'a>> = BTreeMap::new();
    for node in siblings {
        let projected = fs_safe_name(&node.name);
        groups
            .entry(clip_name(&collision_key(&projected)).to_string())
            .or_default()
            .push((&node.id, projected));
    }

    let mut preferred = Vec::new();
    let mut suffixed = Vec::new();
    for (key, mut members) in groups {
        if members.len() == 1 {
            preferred.push(members.remove(0));
            continue;
        }
        members.sort_by(|a, b| a.0.cmp(b.0));
        for (idx, (id, _)) in members.into_iter().enumerate() {
            if idx == 0 {
                preferred.push((id, key.clone()));
            } else {
                suffixed.push((id, format!("{}-{}", key, id.short())));
            }
        }
    }
    (preferred, suffixed)
}

/// Plans the remote mutation for a local file.
///
/// A recorded file updates its remote document. An unrecorded file creates a
/// document under the folder recorded for its directory; files directly under
/// the root create top-level documents.
pub fn plan_upload(
    relative_path: &Path,
    record: Option<&IdentityRecord>,
    store: &IdentityStore,
    body: String,
) -> Result<UploadAction> {
    if let Some(record) = record {
        return Ok(UploadAction::UpdateRemote {
            remote_id: record.remote_id.clone(),
            body,
        });
    }

    let parent_id = match relative_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => match store.folder_by_path(dir) {
            Some(folder) => Some(folder.remote_id.clone()),
            None => {
                return Err(Error::UnresolvedParent {
                    path: relative_path.to_path_buf(),
                })
            }
        },
        _ => None,
    };

    let name = relative_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(UploadAction::CreateRemote {
        parent_id,
        name,
        body,
    })
}
