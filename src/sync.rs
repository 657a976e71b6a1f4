// ABOUTME: Sync orchestration between the remote journal and the local Org tree
// ABOUTME: Download with per-document failure isolation, upload, and local status

use crate::{
    api::RemoteStore,
    convert::{to_markup, to_rich, ConversionResult},
    mapper::{plan_download, plan_upload, DownloadAction, UploadAction},
    model::{
        FailedItem, FileState, FileStatus, IdentityRecord, RemoteId, RemoteNode, RemoteTree,
        ReportWarning, SyncReport, UploadBatch, UploadOutcome, UploadReport,
    },
    storage::{write_atomic, IdentityStore, Paths},
    util::content_hash,
    Error, Result,
};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Picks the node `download_one` starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Id(RemoteId),
    /// Exact display name; must match exactly one folder or document.
    Name(String),
}

pub fn download_all<R: RemoteStore + ?Sized>(remote: &R, paths: &Paths) -> Result<SyncReport> {
    info!(root = %paths.root.display(), "downloading journal");
    let mut tree = remote.fetch_tree()?;
    fetch_missing_bodies(remote, &mut tree, None)?;

    let mut store = IdentityStore::load(paths)?;
    let actions = plan_download(&tree, &store)?;
    materialize(&tree, &mut store, actions)
}

/// Downloads the selected node, its subtree and the directories above it.
///
/// Paths are planned against the whole tree so they match a full download.
pub fn download_one<R: RemoteStore + ?Sized>(
    remote: &R,
    paths: &Paths,
    selector: &Selector,
) -> Result<SyncReport> {
    let mut tree = remote.fetch_tree()?;
    let target = resolve_selector(&tree, selector)?;
    info!(target = %target, "downloading subtree");

    let mut wanted: BTreeSet<RemoteId> = tree.subtree(&target).into_iter().collect();
    wanted.extend(tree.ancestors(&target));
    fetch_missing_bodies(remote, &mut tree, Some(&wanted))?;

    let mut store = IdentityStore::load(paths)?;
    let actions = plan_download(&tree, &store)?
        .into_iter()
        .filter(|action| wanted.contains(action.remote_id()))
        .collect();
    materialize(&tree, &mut store, actions)
}

fn resolve_selector(tree: &RemoteTree, selector: &Selector) -> Result<RemoteId> {
    match selector {
        Selector::Id(id) => tree
            .get(id)
            .map(|node| node.id.clone())
            .ok_or_else(|| Error::NotFound(format!("remote id {}", id))),
        Selector::Name(name) => {
            let matches: Vec<&RemoteNode> = tree.nodes().filter(|n| &n.name == name).collect();
            match matches.as_slice() {
                [] => Err(Error::NotFound(format!("name {:?}", name))),
                [node] => Ok(node.id.clone()),
                _ => Err(Error::Ambiguous(format!("name {:?}", name))),
            }
        }
    }
}

fn fetch_missing_bodies<R: RemoteStore + ?Sized>(
    remote: &R,
    tree: &mut RemoteTree,
    only: Option<&BTreeSet<RemoteId>>,
) -> Result<()> {
    let missing: Vec<RemoteId> = tree
        .documents_missing_body()
        .into_iter()
        .filter(|id| only.map_or(true, |wanted| wanted.contains(id)))
        .collect();
    if !missing.is_empty() {
        debug!(count = missing.len(), "fetching document bodies");
    }
    for id in missing {
        let body = remote.fetch_document_body(&id)?;
        tree.set_body(&id, body);
    }
    Ok(())
}

fn materialize(
    tree: &RemoteTree,
    store: &mut IdentityStore,
    actions: Vec<DownloadAction>,
) -> Result<SyncReport> {
    store.paths().ensure_dirs()?;
    let mut report = SyncReport::default();

    let (dirs, documents): (Vec<DownloadAction>, Vec<DownloadAction>) = actions
        .into_iter()
        .partition(|a| matches!(a, DownloadAction::CreateDir { .. }));

    for action in &dirs {
        if let DownloadAction::CreateDir { path, folder_id } = action {
            match fs::create_dir_all(store.paths().absolute(path)) {
                Ok(()) => store.bind_folder(path.clone(), folder_id.clone()),
                Err(e) => record_failure(&mut report, path, &Error::from(e)),
            }
        }
    }
    store.save()?;

    let (skips, work): (Vec<DownloadAction>, Vec<DownloadAction>) = documents
        .into_iter()
        .partition(|a| matches!(a, DownloadAction::SkipFile { .. }));
    for action in &skips {
        debug!(path = %action.path().display(), "unchanged");
        report.skipped.push(action.path().to_path_buf());
    }

    let converted: Vec<(DownloadAction, ConversionResult)> = work
        .into_par_iter()
        .map(|action| {
            let body = tree
                .get(action.remote_id())
                .and_then(RemoteNode::body)
                .unwrap_or_default();
            let result = to_markup(body);
            (action, result)
        })
        .collect();

    let pb = ProgressBar::new(converted.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40}] {pos}/{len} docs")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );

    for (action, conversion) in converted {
        let path = action.path().to_path_buf();
        let Some(node) = tree.get(action.remote_id()) else {
            pb.inc(1);
            continue;
        };

        match write_document(store, node, &action, &conversion.body) {
            Ok(overwrites) => {
                debug!(path = %path.display(), "written");
                report.succeeded.push(path.clone());
                for message in overwrites.into_iter().chain(conversion.warnings) {
                    report.warnings.push(ReportWarning {
                        path: path.clone(),
                        message,
                    });
                }
            }
            Err(e) => record_failure(&mut report, &path, &e),
        }
        pb.inc(1);
    }

    pb.finish_with_message(format!(
        "{} written, {} unchanged, {} failed",
        report.succeeded.len(),
        report.skipped.len(),
        report.failed.len()
    ));
    info!(
        succeeded = report.succeeded.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "download finished"
    );
    Ok(report)
}

fn record_failure(report: &mut SyncReport, path: &Path, error: &Error) {
    warn!(path = %path.display(), error = %error, "document failed");
    report.failed.push(FailedItem {
        path: path.to_path_buf(),
        error_kind: error.kind().to_string(),
        message: error.to_string(),
    });
}

/// Writes one converted document, binds it and flushes the store.
///
/// Returns warnings for local content that was replaced.
fn write_document(
    store: &mut IdentityStore,
    node: &RemoteNode,
    action: &DownloadAction,
    markup: &str,
) -> Result<Vec<String>> {
    let paths = store.paths().clone();
    let mut warnings = Vec::new();
    let mut markup_hash = Some(content_hash(markup));

    let path = match action {
        DownloadAction::CreateFile { path, .. } | DownloadAction::UpdateFile { path, .. } => {
            warn_on_overwrite(store, path, markup, &mut warnings);
            write_atomic(&paths.absolute(path), markup.as_bytes(), &paths.tmp_dir)?;
            path
        }
        DownloadAction::MoveFile {
            from, to, rewrite, ..
        } => {
            let previous = store
                .by_path(from)
                .filter(|r| r.remote_id == node.id)
                .cloned();
            let from_abs = paths.absolute(from);
            let to_abs = paths.absolute(to);

            let renamed = !rewrite && previous.is_some() && from_abs.exists() && !to_abs.exists();
            if renamed {
                if let Some(parent) = to_abs.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::rename(&from_abs, &to_abs)?;
                markup_hash = previous.as_ref().and_then(|r| r.markup_hash.clone());
                debug!(from = %from.display(), to = %to.display(), "renamed");
            } else {
                warn_on_overwrite(store, to, markup, &mut warnings);
                write_atomic(&to_abs, markup.as_bytes(), &paths.tmp_dir)?;
                if let Some(record) = &previous {
                    if from_abs.exists() {
                        if has_local_edits(&from_abs, record) {
                            warnings.push(format!(
                                "local edits in {} were replaced by the remote version",
                                from.display()
                            ));
                        }
                        fs::remove_file(&from_abs)?;
                    }
                }
            }
            to
        }
        DownloadAction::CreateDir { .. } | DownloadAction::SkipFile { .. } => return Ok(warnings),
    };

    store.bind(IdentityRecord {
        path: path.clone(),
        remote_id: node.id.clone(),
        remote_parent_id: node.parent.clone(),
        content_hash: content_hash(node.body().unwrap_or_default()),
        markup_hash,
        synced_at: Utc::now(),
    });
    store.save()?;

    if let DownloadAction::MoveFile { from, .. } = action {
        if let Some(dir) = from.parent() {
            prune_empty_dirs(store, dir);
        }
    }
    Ok(warnings)
}

fn warn_on_overwrite(store: &IdentityStore, path: &Path, markup: &str, warnings: &mut Vec<String>) {
    let absolute = store.paths().absolute(path);
    let Ok(existing) = fs::read_to_string(&absolute) else {
        return;
    };
    if existing == markup {
        return;
    }
    match store.by_path(path) {
        Some(record) if has_local_edits(&absolute, record) => warnings.push(format!(
            "local edits in {} were overwritten by the remote version",
            path.display()
        )),
        Some(_) => {}
        None => warnings.push(format!(
            "untracked local file {} was overwritten",
            path.display()
        )),
    }
}

fn has_local_edits(absolute: &Path, record: &IdentityRecord) -> bool {
    match (&record.markup_hash, fs::read_to_string(absolute)) {
        (Some(hash), Ok(content)) => &content_hash(&content) != hash,
        _ => false,
    }
}

/// Removes `dir` and then each parent it leaves empty, stopping at the root or
/// at a directory that has a folder record.
fn prune_empty_dirs(store: &IdentityStore, dir: &Path) {
    let mut current = Some(dir);
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() || store.folder_by_path(dir).is_some() {
            return;
        }
        let absolute = store.paths().absolute(dir);
        let empty = fs::read_dir(&absolute)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !empty {
            return;
        }
        if let Err(e) = fs::remove_dir(&absolute) {
            debug!(dir = %dir.display(), error = %e, "could not remove old directory");
            return;
        }
        current = dir.parent();
    }
}

/// Uploads one local Org file, creating or updating its remote document.
///
/// Nothing is sent when the file cannot be converted or its folder is unknown.
pub fn upload_one<R: RemoteStore + ?Sized>(
    remote: &R,
    paths: &Paths,
    local_path: &Path,
) -> Result<UploadReport> {
    let relative = paths.relative_document(local_path)?;
    let markup = fs::read_to_string(paths.absolute(&relative))?;
    let mut store = IdentityStore::load(paths)?;

    let converted = to_rich(&markup)?;
    let record = store.by_path(&relative).cloned();
    let action = plan_upload(&relative, record.as_ref(), &store, converted.body)?;

    let (remote_id, outcome, parent_id, body) = match action {
        UploadAction::UpdateRemote { remote_id, body } => {
            info!(path = %relative.display(), id = %remote_id, "updating remote document");
            remote.update_document(&remote_id, &body)?;
            let parent = record.and_then(|r| r.remote_parent_id);
            (remote_id, UploadOutcome::Updated, parent, body)
        }
        UploadAction::CreateRemote {
            parent_id,
            name,
            body,
        } => {
            info!(path = %relative.display(), name = %name, "creating remote document");
            let remote_id = remote.create_document(parent_id.as_ref(), &name, &body)?;
            (remote_id, UploadOutcome::Created, parent_id, body)
        }
    };

    store.bind(IdentityRecord {
        path: relative.clone(),
        remote_id: remote_id.clone(),
        remote_parent_id: parent_id,
        content_hash: content_hash(&body),
        markup_hash: Some(content_hash(&markup)),
        synced_at: Utc::now(),
    });
    store.save()?;

    Ok(UploadReport {
        path: relative,
        remote_id,
        action: outcome,
        warnings: converted.warnings,
    })
}

/// Uploads every untracked or locally modified file in path order, stopping at the first error.
pub fn upload_all<R: RemoteStore + ?Sized>(remote: &R, paths: &Paths) -> Result<UploadBatch> {
    let pending: Vec<PathBuf> = status(paths)?
        .into_iter()
        .filter(|s| s.state != FileState::Synced)
        .map(|s| s.path)
        .collect();
    info!(count = pending.len(), "uploading local changes");

    let mut batch = UploadBatch::default();
    for path in pending {
        match upload_one(remote, paths, &path) {
            Ok(report) => batch.uploaded.push(report),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "upload stopped");
                batch.failed = Some((path, e));
                break;
            }
        }
    }
    Ok(batch)
}

pub fn status(paths: &Paths) -> Result<Vec<FileStatus>> {
    let store = IdentityStore::load(paths)?;
    paths
        .document_files()?
        .into_iter()
        .map(|path| {
            let (state, remote_id) = match store.by_path(&path) {
                None => (FileState::Untracked, None),
                Some(record) if has_local_edits(&paths.absolute(&path), record) => {
                    (FileState::Modified, Some(record.remote_id.clone()))
                }
                Some(record) if record.markup_hash.is_none() => {
                    (FileState::Modified, Some(record.remote_id.clone()))
                }
                Some(record) => (FileState::Synced, Some(record.remote_id.clone())),
            };
            Ok(FileStatus {
                path,
                state,
                remote_id,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    struct StaticRemote {
        tree: RemoteTree,
        created: RefCell<Vec<String>>,
    }

    impl RemoteStore for StaticRemote {
        fn fetch_tree(&self) -> Result<RemoteTree> {
            Ok(self.tree.clone())
        }

        fn fetch_document_body(&self, id: &RemoteId) -> Result<String> {
            Err(Error::NotFound(id.to_string()))
        }

        fn create_document(
            &self,
            _parent: Option<&RemoteId>,
            name: &str,
            _body: &str,
        ) -> Result<RemoteId> {
            self.created.borrow_mut().push(name.to_string());
            Ok(RemoteId::new(format!("new-{}", name)))
        }

        fn update_document(&self, _id: &RemoteId, _body: &str) -> Result<()> {
            Ok(())
        }
    }

    fn remote(nodes: Vec<RemoteNode>) -> StaticRemote {
        StaticRemote {
            tree: RemoteTree::from_nodes(nodes).unwrap(),
            created: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn test_resolve_selector() {
        let tree = RemoteTree::from_nodes(vec![
            RemoteNode::document("1", "Goblin", None, ""),
            RemoteNode::document("2", "Twin", None, ""),
            RemoteNode::document("3", "Twin", None, ""),
        ])
        .unwrap();

        assert_eq!(
            resolve_selector(&tree, &Selector::Name("Goblin".into())).unwrap(),
            RemoteId::new("1")
        );
        assert!(matches!(
            resolve_selector(&tree, &Selector::Name("Twin".into())),
            Err(Error::Ambiguous(_))
        ));
        assert!(matches!(
            resolve_selector(&tree, &Selector::Id("9".into())),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_remote_rename_moves_file_and_prunes_directory() {
        let temp = TempDir::new().unwrap();
        let paths = Paths::new(temp.path().to_path_buf());

        let before = remote(vec![
            RemoteNode::folder("f1", "Bestiary", None),
            RemoteNode::document("42", "Goblin", Some("f1"), "<p>Small</p>"),
        ]);
        download_all(&before, &paths).unwrap();
        assert!(temp.path().join("Bestiary/Goblin.org").exists());

        let after = remote(vec![
            RemoteNode::folder("f1", "Monsters", None),
            RemoteNode::document("42", "Goblin", Some("f1"), "<p>Small</p>"),
        ]);
        let report = download_all(&after, &paths).unwrap();

        assert_eq!(report.succeeded, vec![PathBuf::from("Monsters/Goblin.org")]);
        assert!(temp.path().join("Monsters/Goblin.org").exists());
        assert!(!temp.path().join("Bestiary").exists());

        let store = IdentityStore::load(&paths).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.by_remote_id(&"42".into()).unwrap().path,
            PathBuf::from("Monsters/Goblin.org")
        );
    }

    #[test]
    fn test_nested_rename_prunes_every_emptied_ancestor() {
        let temp = TempDir::new().unwrap();
        let paths = Paths::new(temp.path().to_path_buf());

        let before = remote(vec![
            RemoteNode::folder("f1", "Campaign", None),
            RemoteNode::folder("f2", "Act I", Some("f1")),
            RemoteNode::folder("f3", "Scenes", Some("f2")),
            RemoteNode::document("42", "Ambush", Some("f3"), "<p>Arrows</p>"),
        ]);
        download_all(&before, &paths).unwrap();
        assert!(temp.path().join("Campaign/Act I/Scenes/Ambush.org").exists());
        fs::write(temp.path().join("Stray.org"), "* kept\n").unwrap();

        let after = remote(vec![
            RemoteNode::folder("f1", "Saga", None),
            RemoteNode::folder("f2", "Act I", Some("f1")),
            RemoteNode::folder("f3", "Scenes", Some("f2")),
            RemoteNode::document("42", "Ambush", Some("f3"), "<p>Arrows</p>"),
        ]);
        let report = download_all(&after, &paths).unwrap();

        assert_eq!(
            report.succeeded,
            vec![PathBuf::from("Saga/Act I/Scenes/Ambush.org")]
        );
        assert!(temp.path().join("Saga/Act I/Scenes/Ambush.org").exists());
        assert!(!temp.path().join("Campaign").exists());
        assert!(temp.path().join("Stray.org").exists());
    }

    #[test]
    fn test_local_edits_overwritten_are_reported() {
        let temp = TempDir::new().unwrap();
        let paths = Paths::new(temp.path().to_path_buf());

        download_all(
            &remote(vec![RemoteNode::document("1", "Lore", None, "<p>Old</p>")]),
            &paths,
        )
        .unwrap();
        fs::write(temp.path().join("Lore.org"), "My edit\n").unwrap();

        let report = download_all(
            &remote(vec![RemoteNode::document("1", "Lore", None, "<p>New</p>")]),
            &paths,
        )
        .unwrap();

        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].message.contains("local edits"));
        assert_eq!(fs::read_to_string(temp.path().join("Lore.org")).unwrap(), "New\n");
    }

    #[test]
    fn test_status_classifies_files() {
        let temp = TempDir::new().unwrap();
        let paths = Paths::new(temp.path().to_path_buf());
        download_all(
            &remote(vec![
                RemoteNode::document("1", "Kept", None, "<p>a</p>"),
                RemoteNode::document("2", "Edited", None, "<p>b</p>"),
            ]),
            &paths,
        )
        .unwrap();
        fs::write(temp.path().join("Edited.org"), "changed\n").unwrap();
        fs::write(temp.path().join("Fresh.org"), "new\n").unwrap();

        let states: Vec<(String, FileState)> = status(&paths)
            .unwrap()
            .into_iter()
            .map(|s| (s.path.to_string_lossy().into_owned(), s.state))
            .collect();
        assert_eq!(
            states,
            vec![
                ("Edited.org".to_string(), FileState::Modified),
                ("Fresh.org".to_string(), FileState::Untracked),
                ("Kept.org".to_string(), FileState::Synced),
            ]
        );
    }

    #[test]
    fn test_upload_rejects_paths_outside_root() {
        let temp = TempDir::new().unwrap();
        let paths = Paths::new(temp.path().join("world"));
        let remote = remote(vec![]);

        let err = upload_one(&remote, &paths, Path::new("../escape.org")).unwrap_err();
        assert!(matches!(err, Error::InvalidPath { .. }));
        assert!(remote.created.borrow().is_empty());
    }
}
