// ABOUTME: Sync root layout, atomic writes and the persisted identity index
// ABOUTME: Keeps document and folder bindings one-to-one between paths and remote ids

use crate::model::{FolderRecord, IdentityRecord, RemoteId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const STATE_DIR: &str = ".orgfoundry";
const INDEX_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub identity_file: PathBuf,
    pub tmp_dir: PathBuf,
}

impl Paths {
    pub fn new(root: PathBuf) -> Self {
        let state_dir = root.join(STATE_DIR);
        Paths {
            identity_file: state_dir.join("identity.json"),
            tmp_dir: state_dir.join("tmp"),
            state_dir,
            root,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        for dir in &[&self.state_dir, &self.tmp_dir] {
            fs::create_dir_all(dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = fs::Permissions::from_mode(0o700);
                fs::set_permissions(dir, perms)?;
            }
        }
        Ok(())
    }

    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Resolves a user-supplied document path to one relative to the root.
    ///
    /// The path must name a `.org` file inside the root and outside the state directory.
    pub fn relative_document(&self, path: &Path) -> Result<PathBuf> {
        let invalid = |reason: &str| Error::InvalidPath {
            path: path.to_path_buf(),
            reason: reason.into(),
        };

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else if path.starts_with(&self.root) {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        let relative = absolute
            .strip_prefix(&self.root)
            .map_err(|_| invalid("not under the sync root"))?;

        let mut clean = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                _ => return Err(invalid("not under the sync root")),
            }
        }

        if clean.extension().and_then(|e| e.to_str()) != Some("org") {
            return Err(invalid("not an .org file"));
        }
        if clean.starts_with(STATE_DIR) {
            return Err(invalid("inside the sync state directory"));
        }
        Ok(clean)
    }

    /// All `.org` files under the root, relative and sorted.
    pub fn document_files(&self) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        if self.root.exists() {
            collect_documents(&self.root, Path::new(""), &mut out)?;
        }
        out.sort();
        Ok(out)
    }
}

fn collect_documents(dir: &Path, relative: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if relative.as_os_str().is_empty() && name == STATE_DIR {
            continue;
        }
        let child = relative.join(&name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_documents(&entry.path(), &child, out)?;
        } else if file_type.is_file() && child.extension().and_then(|e| e.to_str()) == Some("org")
        {
            out.push(child);
        }
    }
    Ok(())
}

pub fn write_atomic(path: &Path, content: &[u8], tmp_dir: &Path) -> Result<()> {
    use rand::Rng;

    let random: u32 = rand::thread_rng().gen();
    let tmp_path = tmp_dir.join(format!("{:x}.part", random));

    fs::write(&tmp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(&tmp_path, perms)?;
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
struct IdentityIndex {
    version: u32,
    #[serde(default)]
    documents: Vec<IdentityRecord>,
    #[serde(default)]
    folders: Vec<FolderRecord>,
}

/// Identity records for one sync root, loaded once per invocation and saved after each confirmed step.
#[derive(Debug)]
pub struct IdentityStore {
    paths: Paths,
    documents: BTreeMap<PathBuf, IdentityRecord>,
    folders: BTreeMap<PathBuf, FolderRecord>,
    // Remote id -> path, kept in step with the two maps above.
    document_ids: BTreeMap<RemoteId, PathBuf>,
    folder_ids: BTreeMap<RemoteId, PathBuf>,
}

impl IdentityStore {
    /// Loads the index for the root; a missing index means nothing has been synced yet.
    pub fn load(paths: &Paths) -> Result<Self> {
        let mut store = IdentityStore {
            paths: paths.clone(),
            documents: BTreeMap::new(),
            folders: BTreeMap::new(),
            document_ids: BTreeMap::new(),
            folder_ids: BTreeMap::new(),
        };

        if !paths.identity_file.exists() {
            return Ok(store);
        }

        let content = fs::read_to_string(&paths.identity_file)?;
        let index: IdentityIndex = serde_json::from_str(&content)?;
        if index.version != INDEX_VERSION {
            return Err(Error::Config(format!(
                "{} has unsupported version {}",
                paths.identity_file.display(),
                index.version
            )));
        }

        for record in index.documents {
            store.bind(record);
        }
        for folder in index.folders {
            store.bind_folder(folder.path, folder.remote_id);
        }
        Ok(store)
    }

    pub fn save(&self) -> Result<()> {
        self.paths.ensure_dirs()?;
        let index = IdentityIndex {
            version: INDEX_VERSION,
            documents: self.documents.values().cloned().collect(),
            folders: self.folders.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&index)?;
        write_atomic(&self.paths.identity_file, json.as_bytes(), &self.paths.tmp_dir)
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn by_path(&self, path: &Path) -> Option<&IdentityRecord> {
        self.documents.get(path)
    }

    pub fn by_remote_id(&self, id: &RemoteId) -> Option<&IdentityRecord> {
        self.document_ids
            .get(id)
            .and_then(|path| self.documents.get(path))
    }

    /// Binds a document. Any record at the same path, or for the same remote id, is replaced.
    pub fn bind(&mut self, record: IdentityRecord) {
        let path = record.path.clone();
        let id = record.remote_id.clone();
        if let Some(old_path) = self.document_ids.insert(id.clone(), path.clone()) {
            if old_path != path {
                self.documents.remove(&old_path);
            }
        }
        if let Some(displaced) = self.documents.insert(path, record) {
            if displaced.remote_id != id {
                self.document_ids.remove(&displaced.remote_id);
            }
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &IdentityRecord> {
        self.documents.values()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn folder_by_path(&self, path: &Path) -> Option<&FolderRecord> {
        self.folders.get(path)
    }

    pub fn folder_by_remote_id(&self, id: &RemoteId) -> Option<&FolderRecord> {
        self.folder_ids.get(id).and_then(|path| self.folders.get(path))
    }

    pub fn bind_folder(&mut self, path: PathBuf, remote_id: RemoteId) {
        if let Some(old_path) = self.folder_ids.insert(remote_id.clone(), path.clone()) {
            if old_path != path {
                self.folders.remove(&old_path);
            }
        }
        let record = FolderRecord {
            path: path.clone(),
            remote_id: remote_id.clone(),
        };
        if let Some(displaced) = self.folders.insert(path, record) {
            if displaced.remote_id != remote_id {
                self.folder_ids.remove(&displaced.remote_id);
            }
        }
    }
}



#[cfg(test)]
mod identity_tests {
    use super::*;

    fn record(path: &str, id: &str) -> IdentityRecord {
        IdentityRecord {
            path: PathBuf::from(path),
            remote_id: id.into(),
            remote_parent_id: None,
            content_hash: "h".into(),
            markup_hash: None,
            synced_at: "2025-10-28T15:04:05Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_bind_keeps_one_path_per_remote_id() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut store = IdentityStore::load(&Paths::new(temp.path().to_path_buf())).unwrap();

        store.bind(record("Goblin.org", "42"));
        store.bind(record("Bestiary/Goblin.org", "42"));

        assert_eq!(store.len(), 1);
        assert!(store.by_path(Path::new("Goblin.org")).is_none());
        assert_eq!(
            store.by_remote_id(&"42".into()).unwrap().path,
            PathBuf::from("Bestiary/Goblin.org")
        );
    }

    #[test]
    fn test_bind_keeps_one_remote_id_per_path() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut store = IdentityStore::load(&Paths::new(temp.path().to_path_buf())).unwrap();

        store.bind(record("Notes.org", "1"));
        store.bind(record("Notes.org", "2"));

        assert_eq!(store.len(), 1);
        assert!(store.by_remote_id(&"1".into()).is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = tempfile::TempDir::new().unwrap();
        let paths = Paths::new(temp.path().to_path_buf());

        let mut store = IdentityStore::load(&paths).unwrap();
        assert!(store.is_empty());
        store.bind(record("Bestiary/Goblin.org", "42"));
        store.bind_folder(PathBuf::from("Bestiary"), "f1".into());
        store.save().unwrap();

        let loaded = IdentityStore::load(&paths).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            loaded.folder_by_path(Path::new("Bestiary")).unwrap().remote_id,
            RemoteId::new("f1")
        );
        assert_eq!(
            loaded.by_path(Path::new("Bestiary/Goblin.org")).unwrap().remote_id,
            RemoteId::new("42")
        );
    }

    #[test]
    fn test_bind_folder_moves_binding() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut store = IdentityStore::load(&Paths::new(temp.path().to_path_buf())).unwrap();

        store.bind_folder(PathBuf::from("Monsters"), "f1".into());
        store.bind_folder(PathBuf::from("Bestiary"), "f1".into());

        assert!(store.folder_by_path(Path::new("Monsters")).is_none());
        assert_eq!(
            store.folder_by_remote_id(&"f1".into()).unwrap().path,
            PathBuf::from("Bestiary")
        );
    }

    #[test]
    fn test_remote_id_index_follows_rebinds() {
        let temp = tempfile::TempDir::new().unwrap();
        let paths = Paths::new(temp.path().to_path_buf());
        let mut store = IdentityStore::load(&paths).unwrap();

        for n in 0..50 {
            store.bind(record(&format!("Lore/{}.org", n), &format!("id{}", n)));
        }
        // id7 moves, id8 is displaced from its path by id9.
        store.bind(record("Moved.org", "id7"));
        store.bind(record("Lore/8.org", "id9"));
        store.bind_folder(PathBuf::from("Lore"), "f1".into());
        store.bind_folder(PathBuf::from("Lore"), "f2".into());
        store.save().unwrap();

        let loaded = IdentityStore::load(&paths).unwrap();
        assert_eq!(loaded.len(), 49);
        assert_eq!(
            loaded.by_remote_id(&"id7".into()).unwrap().path,
            PathBuf::from("Moved.org")
        );
        assert!(loaded.by_path(Path::new("Lore/7.org")).is_none());
        assert!(loaded.by_remote_id(&"id8".into()).is_none());
        assert_eq!(
            loaded.by_remote_id(&"id9".into()).unwrap().path,
            PathBuf::from("Lore/8.org")
        );
        assert!(loaded.by_path(Path::new("Lore/9.org")).is_none());
        assert!(loaded.folder_by_remote_id(&"f1".into()).is_none());
        assert_eq!(
            loaded.folder_by_remote_id(&"f2".into()).unwrap().path,
            PathBuf::from("Lore")
        );
    }

    #[test]
    fn test_load_rejects_unknown_version() {
        let temp = tempfile::TempDir::new().unwrap();
        let paths = Paths::new(temp.path().to_path_buf());
        paths.ensure_dirs().unwrap();
        fs::write(&paths.identity_file, r#"{"version": 9}"#).unwrap();

        assert!(matches!(IdentityStore::load(&paths), Err(Error::Config(_))));
    }
}
