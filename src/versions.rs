//! Per-script version backups.
//!
//! Layout under the store root:
//! ```text
//! <root>/.gitignore
//! <root>/<stem>/versions.json
//! <root>/<stem>/v<N>_<YYYYmmdd_HHMMSS>.py
//! ```

use anyhow::{anyhow, Context};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Backups kept per script; older ones are pruned.
pub const MAX_VERSIONS: usize = 10;

const METADATA_FILE: &str = "versions.json";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Who made the change a backup precedes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditorKind {
    Manual,
    Llm,
    External,
    Auto,
}

impl fmt::Display for EditorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EditorKind::Manual => "manual",
            EditorKind::Llm => "llm",
            EditorKind::External => "external",
            EditorKind::Auto => "auto",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct VersionMeta {
    timestamp: String,
    #[serde(default)]
    change_description: String,
    editor_type: EditorKind,
    backup_file: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VersionIndex {
    #[serde(default)]
    versions: BTreeMap<u32, VersionMeta>,
}

/// One stored backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptVersion {
    pub number: u32,
    pub path: PathBuf,
    pub timestamp: String,
    pub change_description: String,
    pub editor: EditorKind,
}

impl ScriptVersion {
    fn from_meta(number: u32, dir: &Path, meta: &VersionMeta) -> Self {
        Self {
            number,
            path: dir.join(&meta.backup_file),
            timestamp: meta.timestamp.clone(),
            change_description: meta.change_description.clone(),
            editor: meta.editor_type,
        }
    }

    pub fn created_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT).ok()
    }
}

#[derive(Debug, Clone)]
pub struct VersionStore {
    root: PathBuf,
}

impl VersionStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create versions directory {}", root.display()))?;
        let gitignore = root.join(".gitignore");
        if !gitignore.exists() {
            fs::write(&gitignore, "*\n")
                .with_context(|| format!("Failed to write {}", gitignore.display()))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn script_dir(&self, stem: &str) -> PathBuf {
        self.root.join(stem)
    }

    fn load_index(&self, stem: &str) -> VersionIndex {
        let path = self.script_dir(stem).join(METADATA_FILE);
        let Ok(content) = fs::read_to_string(&path) else {
            return VersionIndex::default();
        };
        serde_json::from_str(&content).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "ignoring unreadable version index");
            VersionIndex::default()
        })
    }

    fn save_index(&self, stem: &str, index: &VersionIndex) -> anyhow::Result<()> {
        let dir = self.script_dir(stem);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let content =
            serde_json::to_string_pretty(index).context("Failed to serialize version index")?;
        fs::write(dir.join(METADATA_FILE), content)
            .with_context(|| format!("Failed to write version index for {}", stem))
    }

    /// Copy `script_path` into the store. Returns `None` when the script does not exist.
    pub fn create_backup(
        &self,
        script_path: &Path,
        change_description: &str,
        editor: EditorKind,
    ) -> anyhow::Result<Option<ScriptVersion>> {
        if !script_path.is_file() {
            return Ok(None);
        }
        let stem = script_stem(script_path)?;
        let dir = self.script_dir(&stem);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut index = self.load_index(&stem);
        let number = index.versions.keys().next_back().copied().unwrap_or(0) + 1;
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let backup_file = format!("v{}_{}.py", number, timestamp);

        fs::copy(script_path, dir.join(&backup_file))
            .with_context(|| format!("Failed to back up {}", script_path.display()))?;

        let meta = VersionMeta {
            timestamp,
            change_description: change_description.to_string(),
            editor_type: editor,
            backup_file,
        };
        let version = ScriptVersion::from_meta(number, &dir, &meta);
        index.versions.insert(number, meta);

        while index.versions.len() > MAX_VERSIONS {
            let Some((old, meta)) = index.versions.pop_first() else {
                break;
            };
            let _ = fs::remove_file(dir.join(&meta.backup_file));
            debug!(script = %stem, version = old, "pruned backup");
        }

        self.save_index(&stem, &index)?;
        Ok(Some(version))
    }

    /// Stored versions of `stem`, newest first. Entries whose file is gone are skipped.
    pub fn versions(&self, stem: &str) -> Vec<ScriptVersion> {
        let dir = self.script_dir(stem);
        self.load_index(stem)
            .versions
            .iter()
            .rev()
            .map(|(number, meta)| ScriptVersion::from_meta(*number, &dir, meta))
            .filter(|v| v.path.is_file())
            .collect()
    }

    /// Replace `script_path` with backup `number`, backing up the current file first.
    pub fn restore(&self, script_path: &Path, number: u32) -> anyhow::Result<ScriptVersion> {
        let stem = script_stem(script_path)?;
        let version = self
            .versions(&stem)
            .into_iter()
            .find(|v| v.number == number)
            .ok_or_else(|| anyhow!("No version {} for '{}'", number, stem))?;
        // Read first: the pre-restore backup may prune this version.
        let content = fs::read(&version.path)
            .with_context(|| format!("Failed to read {}", version.path.display()))?;

        self.create_backup(
            script_path,
            &format!("Before reverting to v{}", number),
            EditorKind::Auto,
        )?;
        fs::write(script_path, content)
            .with_context(|| format!("Failed to restore {}", script_path.display()))?;
        Ok(version)
    }

    pub fn delete_all(&self, stem: &str) -> anyhow::Result<()> {
        let dir = self.script_dir(stem);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to delete {}", dir.display()))?;
        }
        Ok(())
    }
}

fn script_stem(path: &Path) -> anyhow::Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid script path: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_new_writes_gitignore() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path().join(".script_versions")).unwrap();
        assert_eq!(
            fs::read_to_string(store.root().join(".gitignore")).unwrap(),
            "*\n"
        );
    }

    #[test]
    fn test_backup_of_missing_script_is_none() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path().join("v")).unwrap();
        let result = store
            .create_backup(&dir.path().join("nope.py"), "x", EditorKind::Manual)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_backups_are_numbered_and_listed_newest_first() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path().join("v")).unwrap();
        let script = dir.path().join("grain.py");

        fs::write(&script, "one").unwrap();
        let first = store
            .create_backup(&script, "first", EditorKind::Manual)
            .unwrap()
            .unwrap();
        fs::write(&script, "two").unwrap();
        store.create_backup(&script, "second", EditorKind::Llm).unwrap();

        assert_eq!(first.number, 1);
        assert!(first.created_at().is_some());
        let versions = store.versions("grain");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].number, 2);
        assert_eq!(versions[0].editor, EditorKind::Llm);
        assert_eq!(fs::read_to_string(&versions[1].path).unwrap(), "one");

        let index = fs::read_to_string(store.root().join("grain").join(METADATA_FILE)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&index).unwrap();
        assert_eq!(json["versions"]["2"]["editor_type"], "llm");
        assert_eq!(json["versions"]["1"]["change_description"], "first");
    }

    #[test]
    fn test_prunes_to_max_versions() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path().join("v")).unwrap();
        let script = dir.path().join("s.py");
        for i in 0..(MAX_VERSIONS + 2) {
            fs::write(&script, i.to_string()).unwrap();
            store.create_backup(&script, "", EditorKind::Manual).unwrap();
        }
        let versions = store.versions("s");
        assert_eq!(versions.len(), MAX_VERSIONS);
        assert_eq!(versions[0].number as usize, MAX_VERSIONS + 2);
        assert_eq!(versions.last().unwrap().number, 3);
    }

    #[test]
    fn test_missing_backup_file_is_skipped() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path().join("v")).unwrap();
        let script = dir.path().join("s.py");
        fs::write(&script, "x").unwrap();
        let v = store
            .create_backup(&script, "", EditorKind::Manual)
            .unwrap()
            .unwrap();
        fs::remove_file(&v.path).unwrap();
        assert!(store.versions("s").is_empty());
    }

    #[test]
    fn test_restore_backs_up_current_first() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path().join("v")).unwrap();
        let script = dir.path().join("s.py");
        fs::write(&script, "original").unwrap();
        store.create_backup(&script, "", EditorKind::Manual).unwrap();
        fs::write(&script, "edited").unwrap();

        store.restore(&script, 1).unwrap();
        assert_eq!(fs::read_to_string(&script).unwrap(), "original");

        let newest = &store.versions("s")[0];
        assert_eq!(newest.editor, EditorKind::Auto);
        assert_eq!(newest.change_description, "Before reverting to v1");
        assert_eq!(fs::read_to_string(&newest.path).unwrap(), "edited");
        assert!(store.restore(&script, 42).is_err());
    }

    #[test]
    fn test_restore_oldest_when_full() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path().join("v")).unwrap();
        let script = dir.path().join("s.py");
        for i in 0..MAX_VERSIONS {
            fs::write(&script, format!("rev{}", i)).unwrap();
            store.create_backup(&script, "", EditorKind::Manual).unwrap();
        }
        store.restore(&script, 1).unwrap();
        assert_eq!(fs::read_to_string(&script).unwrap(), "rev0");
    }

    #[test]
    fn test_delete_all() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path().join("v")).unwrap();
        let script = dir.path().join("s.py");
        fs::write(&script, "x").unwrap();
        store.create_backup(&script, "", EditorKind::External).unwrap();
        store.delete_all("s").unwrap();
        assert!(store.versions("s").is_empty());
        store.delete_all("s").unwrap();
    }
}
