//! Artifact store
//!
//! Generated files (chart images, HTML documents, exports) follow the same
//! id + metadata pattern as results:
//!
//! ```text
//! artifacts/<artifactId>.<ext>
//! artifacts/<artifactId>.json
//! ```

use crate::error::{Error, Result};
use crate::types::{Artifact, ArtifactKind};
use crate::workspace::{self, Workspace};
use chrono::Utc;
use std::path::{Path, PathBuf};

const MAX_ID_ATTEMPTS: usize = 8;

/// Records artifacts in a workspace.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactStore;

impl ArtifactStore {
    /// Allocate an id whose metadata record does not exist yet.
    pub fn allocate_id(&self, ws: &Workspace, kind: ArtifactKind) -> Result<String> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let candidate = workspace::short_id(kind.id_prefix());
            if !Self::metadata_path(ws, &candidate).exists()
                && !Self::default_file_path(ws, &candidate, kind).exists()
            {
                return Ok(candidate);
            }
            tracing::warn!(artifact_id = %candidate, "Artifact id collision, retrying");
        }
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "could not allocate a unique artifact id",
        )))
    }

    /// `artifacts/<artifactId>.<ext>`
    pub fn default_file_path(ws: &Workspace, artifact_id: &str, kind: ArtifactKind) -> PathBuf {
        ws.artifacts_dir()
            .join(format!("{}.{}", artifact_id, kind.extension()))
    }

    /// `artifacts/<artifactId>.json`
    pub fn metadata_path(ws: &Workspace, artifact_id: &str) -> PathBuf {
        ws.artifacts_dir().join(format!("{}.json", artifact_id))
    }

    pub fn save(&self, ws: &Workspace, artifact: &Artifact) -> Result<()> {
        workspace::write_json(&Self::metadata_path(ws, &artifact.artifact_id), artifact)
    }

    /// Record an already-written file as an artifact.
    pub fn register(
        &self,
        ws: &Workspace,
        artifact_id: String,
        kind: ArtifactKind,
        path: &Path,
    ) -> Result<Artifact> {
        let bytes = std::fs::metadata(path).ok().map(|m| m.len());
        let artifact = Artifact {
            artifact_id,
            kind,
            path: path.to_path_buf(),
            created_at: Utc::now(),
            bytes,
        };
        self.save(ws, &artifact)?;

        tracing::info!(
            artifact_id = %artifact.artifact_id,
            kind = %kind,
            path = %path.display(),
            "Saved artifact"
        );
        Ok(artifact)
    }

    pub fn read(&self, ws: &Workspace, artifact_id: &str) -> Result<Artifact> {
        workspace::check_id("artifact", artifact_id)?;
        workspace::read_json(
            &Self::metadata_path(ws, artifact_id),
            "artifact",
            artifact_id,
        )
    }

    /// All artifacts, oldest first.
    pub fn list(&self, ws: &Workspace) -> Result<Vec<Artifact>> {
        let mut artifacts: Vec<Artifact> = workspace::read_json_dir(&ws.artifacts_dir())?;
        artifacts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_register_records_size_and_reads_back() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::create(dir.path(), None, None).unwrap();
        let store = ArtifactStore;

        let id = store.allocate_id(&ws, ArtifactKind::Csv).unwrap();
        assert!(id.starts_with("csv_"));
        let path = ArtifactStore::default_file_path(&ws, &id, ArtifactKind::Csv);
        std::fs::write(&path, "a,b\n1,2\n").unwrap();

        let saved = store.register(&ws, id.clone(), ArtifactKind::Csv, &path).unwrap();
        assert_eq!(saved.bytes, Some(8));

        let loaded = store.read(&ws, &id).unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(store.list(&ws).unwrap(), vec![saved]);
    }

    #[test]
    fn test_read_unknown_artifact_is_not_found() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::create(dir.path(), None, None).unwrap();
        let err = ArtifactStore.read(&ws, "chart_0000000000").unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_metadata_uses_type_tag() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::create(dir.path(), None, None).unwrap();
        let path = ws.artifacts_dir().join("html_1.html");
        std::fs::write(&path, "<html></html>").unwrap();

        ArtifactStore
            .register(&ws, "html_1".to_string(), ArtifactKind::Html, &path)
            .unwrap();

        let raw = std::fs::read_to_string(ArtifactStore::metadata_path(&ws, "html_1")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["type"], "html");
        assert_eq!(json["artifactId"], "html_1");
    }
}
