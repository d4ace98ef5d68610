//! Workspace store
//!
//! A workspace is a directory holding one session:
//!
//! ```text
//! <workspace>/
//!   session.json
//!   results/      <resultId>.parquet + <resultId>.json
//!   artifacts/    <artifactId>.<ext> + <artifactId>.json
//!   notebooks/    <notebookId>.json + <notebookId>/revisions/<timestamp>.json
//! ```

use crate::error::{Error, Result};
use crate::types::Session;
use chrono::Utc;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

const SESSION_FILE: &str = "session.json";
const RESULTS_DIR: &str = "results";
const ARTIFACTS_DIR: &str = "artifacts";
const NOTEBOOKS_DIR: &str = "notebooks";

/// Handle to an initialized workspace directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Workspace {
    root: PathBuf,
    session: Session,
}

impl Workspace {
    /// Resolve the workspace path without touching the filesystem.
    ///
    /// The override (or `default_root` when none is given) is used as-is when
    /// absolute and joined onto the working directory `cwd` otherwise.
    pub fn resolve_path(cwd: &Path, default_root: &Path, override_path: Option<&Path>) -> PathBuf {
        let chosen = override_path.unwrap_or(default_root);
        let path = if chosen.is_absolute() {
            chosen.to_path_buf()
        } else {
            cwd.join(chosen)
        };
        normalize_lexically(&path)
    }

    /// Create the directory tree and write a fresh session record, replacing any existing one.
    pub fn create(path: &Path, profile: Option<String>, description: Option<String>) -> Result<Self> {
        for dir in [
            path.to_path_buf(),
            path.join(RESULTS_DIR),
            path.join(ARTIFACTS_DIR),
            path.join(NOTEBOOKS_DIR),
        ] {
            std::fs::create_dir_all(&dir)?;
        }

        let session = Session {
            session_id: format!("s_{}", Uuid::new_v4().simple()),
            workspace_path: path.to_path_buf(),
            profile,
            description,
            created_at: Utc::now(),
        };
        write_json(&path.join(SESSION_FILE), &session)?;

        tracing::info!(
            workspace = %path.display(),
            session_id = %session.session_id,
            "Created workspace session"
        );

        Ok(Self {
            root: path.to_path_buf(),
            session,
        })
    }

    /// Load an existing session; NotFound if the record is absent or malformed.
    pub fn load(path: &Path) -> Result<Self> {
        let session_path = path.join(SESSION_FILE);
        let content = std::fs::read_to_string(&session_path)
            .map_err(|_| Error::not_found("session", path.display().to_string()))?;
        let session: Session = serde_json::from_str(&content).map_err(|e| {
            tracing::warn!(path = %session_path.display(), error = %e, "Malformed session record");
            Error::not_found("session", path.display().to_string())
        })?;

        Ok(Self {
            root: path.to_path_buf(),
            session,
        })
    }

    /// Load the workspace, creating it when no valid session exists yet.
    pub fn ensure(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(workspace) => Ok(workspace),
            Err(Error::NotFound { .. }) => {
                tracing::debug!(workspace = %path.display(), "No session found, creating one");
                Self::create(path, None, None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join(ARTIFACTS_DIR)
    }

    pub fn notebooks_dir(&self) -> PathBuf {
        self.root.join(NOTEBOOKS_DIR)
    }

    /// Resolve a caller-supplied path against the workspace root.
    ///
    /// Relative paths must stay inside the root after `..` segments are
    /// applied; absolute paths are taken as an explicit override.
    pub fn resolve_inside(&self, requested: &Path) -> Result<PathBuf> {
        if requested.is_absolute() {
            return Ok(normalize_lexically(requested));
        }
        let resolved = normalize_lexically(&self.root.join(requested));
        if !resolved.starts_with(normalize_lexically(&self.root)) {
            return Err(Error::Security(format!(
                "path {} escapes the workspace root {}",
                requested.display(),
                self.root.display()
            )));
        }
        Ok(resolved)
    }

    /// Resolve an export destination.
    ///
    /// On top of [`Workspace::resolve_inside`], the destination must not
    /// exist yet and must not land on workspace state: the session record or
    /// anything under `results/` or `notebooks/`.
    pub fn export_destination(&self, requested: &Path) -> Result<PathBuf> {
        let resolved = self.resolve_inside(requested)?;
        let root = normalize_lexically(&self.root);

        let protected = resolved == root.join(SESSION_FILE)
            || resolved.starts_with(root.join(RESULTS_DIR))
            || resolved.starts_with(root.join(NOTEBOOKS_DIR));
        if protected {
            return Err(Error::Security(format!(
                "path {} would overwrite workspace state",
                requested.display()
            )));
        }
        if resolved.exists() {
            return Err(Error::Security(format!(
                "path {} already exists",
                requested.display()
            )));
        }
        Ok(resolved)
    }
}

/// Apply `.` and `..` components without consulting the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `/..` is `/`
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(Component::ParentDir),
            },
            other => out.push(other),
        }
    }
    out
}

/// `<prefix>_` followed by ten hex characters of a v4 UUID.
pub(crate) fn short_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &hex[..10])
}

/// Pretty-print a record to disk.
pub(crate) fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Read a record, mapping a missing file to NotFound.
pub(crate) fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
    kind: &'static str,
    id: &str,
) -> Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::not_found(kind, id))
        }
        Err(e) => return Err(Error::Io(e)),
    };
    Ok(serde_json::from_str(&content)?)
}

/// Read every `*.json` record in `dir` (non-recursive).
pub(crate) fn read_json_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Io(e)),
    };

    let mut records = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
            let content = std::fs::read_to_string(&path)?;
            records.push(serde_json::from_str(&content)?);
        }
    }
    Ok(records)
}

/// Reject identifiers that could address files outside their directory.
pub(crate) fn check_id(kind: &'static str, id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid {} id: {:?}", kind, id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_path_without_override_uses_default_root() {
        let cwd = Path::new("/home/me/project");
        assert_eq!(
            Workspace::resolve_path(cwd, Path::new(".pi-data"), None),
            PathBuf::from("/home/me/project/.pi-data")
        );
    }

    #[test]
    fn test_resolve_path_with_relative_and_absolute_override() {
        let cwd = Path::new("/home/me/project");
        let default_root = Path::new(".pi-data");
        assert_eq!(
            Workspace::resolve_path(cwd, default_root, Some(Path::new("./analysis/../ws"))),
            PathBuf::from("/home/me/project/ws")
        );
        assert_eq!(
            Workspace::resolve_path(cwd, default_root, Some(Path::new("/tmp/ws"))),
            PathBuf::from("/tmp/ws")
        );
    }

    #[test]
    fn test_create_builds_layout() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("ws");

        let ws = Workspace::create(&root, Some("prod".into()), Some("Q3 review".into())).unwrap();

        assert!(root.join("session.json").is_file());
        assert!(ws.results_dir().is_dir());
        assert!(ws.artifacts_dir().is_dir());
        assert!(ws.notebooks_dir().is_dir());
        assert_eq!(ws.session().profile.as_deref(), Some("prod"));
        assert!(ws.session().session_id.starts_with("s_"));
    }

    #[test]
    fn test_load_missing_session_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = Workspace::load(dir.path()).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_load_malformed_session_is_not_found() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("session.json"), "{not json").unwrap();
        let err = Workspace::load(dir.path()).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_create_overwrites_existing_session() {
        let dir = TempDir::new().unwrap();
        let first = Workspace::create(dir.path(), None, None).unwrap();
        let second = Workspace::create(dir.path(), Some("dev".into()), None).unwrap();

        assert_ne!(first.session().session_id, second.session().session_id);
        let loaded = Workspace::load(dir.path()).unwrap();
        assert_eq!(loaded.session(), second.session());
    }

    #[test]
    fn test_ensure_creates_then_reuses() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("lazy");

        let created = Workspace::ensure(&root).unwrap();
        let reused = Workspace::ensure(&root).unwrap();
        assert_eq!(created.session(), reused.session());
    }

    #[test]
    fn test_resolve_inside_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::create(dir.path(), None, None).unwrap();

        let err = ws.resolve_inside(Path::new("../../etc/evil.csv")).unwrap_err();
        assert_eq!(err.kind(), "security");

        let ok = ws.resolve_inside(Path::new("exports/../out.csv")).unwrap();
        assert_eq!(ok, normalize_lexically(&dir.path().join("out.csv")));
    }

    #[test]
    fn test_export_destination_protects_workspace_state() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::create(dir.path(), None, None).unwrap();
        std::fs::write(ws.artifacts_dir().join("taken.csv"), "x\n").unwrap();

        for path in [
            "session.json",
            "results/r_0a1b2c3d4e.parquet",
            "results/r_0a1b2c3d4e.json",
            "exports/../notebooks/nb_0a1b2c3d4e.json",
            "artifacts/taken.csv",
        ] {
            let err = ws.export_destination(Path::new(path)).unwrap_err();
            assert_eq!(err.kind(), "security", "{path}");
        }

        let ok = ws.export_destination(Path::new("exports/out.csv")).unwrap();
        assert_eq!(ok, normalize_lexically(&dir.path().join("exports/out.csv")));
    }

    #[test]
    fn test_check_id() {
        assert!(check_id("result", "r_0a1b2c3d4e").is_ok());
        assert!(check_id("result", "../r_1").is_err());
        assert!(check_id("result", "").is_err());
    }
}
