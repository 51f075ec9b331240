//! Per-submission workspaces
//!
//! Every submission gets its own directory `<root>/<submission id>`. The
//! `Workspace` handle is the only way to touch it, and it is passed through
//! the pipeline explicitly; nothing else knows the path.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::{JudgeError, Result};

/// Marker file flagging a workspace kept after an internal fault
pub const RETAINED_MARKER: &str = ".retained";

const MAX_ID_LEN: usize = 128;

/// Allocates and reclaims workspace directories under one root
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    /// Create the manager, creating the root directory if needed
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| JudgeError::io(format!("create workspace root {:?}", root), e))?;
        // Run commands reference artifacts by absolute path
        let root = fs::canonicalize(&root)
            .await
            .map_err(|e| JudgeError::io(format!("resolve workspace root {:?}", root), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the workspace for `id`. An existing directory is a conflict,
    /// never reused.
    pub async fn acquire(&self, id: &str) -> Result<Workspace> {
        if !is_safe_id(id) {
            return Err(JudgeError::InvalidSubmissionId(id.to_string()));
        }

        let path = self.root.join(id);
        match fs::create_dir(&path).await {
            Ok(()) => {
                debug!("Acquired workspace {:?}", path);
                Ok(Workspace {
                    id: id.to_string(),
                    path,
                    state: WorkspaceState::Active,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(JudgeError::WorkspaceConflict {
                    id: id.to_string(),
                    path,
                })
            }
            Err(e) => Err(JudgeError::io(format!("create workspace {:?}", path), e)),
        }
    }

    /// `acquire`, retrying once under a freshly generated name on conflict
    pub async fn acquire_with_retry(&self, id: &str) -> Result<Workspace> {
        match self.acquire(id).await {
            Err(JudgeError::WorkspaceConflict { path, .. }) => {
                let fresh = format!("{}-{}", id, Uuid::new_v4().simple());
                warn!(
                    "Workspace {:?} already exists, retrying as {}",
                    path, fresh
                );
                self.acquire(&fresh).await
            }
            other => other,
        }
    }

    /// Delete retained workspaces whose marker is older than `max_age`
    pub async fn reclaim_retained(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut reclaimed = 0;
        for dir in self.subdirectories().await? {
            let marker = dir.join(RETAINED_MARKER);
            let Ok(metadata) = fs::metadata(&marker).await else {
                continue;
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age >= max_age {
                remove_dir(&dir).await?;
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            info!("Reclaimed {} retained workspaces", reclaimed);
        }
        Ok(reclaimed)
    }

    /// Delete unmarked leftovers. Only safe before any pipeline starts.
    pub async fn reclaim_stale(&self) -> Result<usize> {
        let mut reclaimed = 0;
        for dir in self.subdirectories().await? {
            if fs::metadata(dir.join(RETAINED_MARKER)).await.is_ok() {
                continue;
            }
            remove_dir(&dir).await?;
            reclaimed += 1;
        }
        if reclaimed > 0 {
            warn!("Removed {} stale workspaces left by a previous run", reclaimed);
        }
        Ok(reclaimed)
    }

    /// Workspace directories currently on disk
    pub async fn subdirectories(&self) -> Result<Vec<PathBuf>> {
        let read_err = |e: std::io::Error| JudgeError::io(format!("read workspace root {:?}", self.root), e);
        let mut entries = fs::read_dir(&self.root).await.map_err(read_err)?;
        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkspaceState {
    Active,
    Released,
    Retained,
}

/// Handle to one submission's directory
///
/// Dropping an active handle deletes the directory as a last resort; the
/// pipeline releases explicitly on every terminal state.
#[derive(Debug)]
pub struct Workspace {
    id: String,
    path: PathBuf,
    state: WorkspaceState,
}

impl Workspace {
    /// Directory name; differs from the submission id after a conflict retry
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one file into the workspace
    pub async fn materialize(&self, filename: &str, content: &[u8]) -> Result<PathBuf> {
        if !is_plain_file_name(filename) {
            return Err(JudgeError::io(
                format!("materialize {:?}", filename),
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "file name must not contain path components",
                ),
            ));
        }
        let path = self.path.join(filename);
        fs::write(&path, content)
            .await
            .map_err(|e| JudgeError::io(format!("write {:?}", path), e))?;
        Ok(path)
    }

    /// Whether `filename` exists in the workspace
    pub async fn contains(&self, filename: &str) -> bool {
        is_plain_file_name(filename) && fs::metadata(self.path.join(filename)).await.is_ok()
    }

    /// Recursively delete the directory. Idempotent.
    pub async fn release(&mut self) -> Result<()> {
        if self.state == WorkspaceState::Released {
            return Ok(());
        }
        remove_dir(&self.path).await?;
        self.state = WorkspaceState::Released;
        debug!("Released workspace {:?}", self.path);
        Ok(())
    }

    /// Keep the directory for post-mortem, flagged with `reason`
    pub async fn retain(&mut self, reason: &str) -> Result<()> {
        if self.state != WorkspaceState::Active {
            return Ok(());
        }
        self.state = WorkspaceState::Retained;
        let marker = self.path.join(RETAINED_MARKER);
        fs::write(&marker, reason)
            .await
            .map_err(|e| JudgeError::io(format!("write {:?}", marker), e))?;
        warn!("Retained workspace {:?} for inspection: {}", self.path, reason);
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.state != WorkspaceState::Active {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => warn!("Workspace {:?} released on drop", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove workspace {:?} on drop: {}", self.path, e),
        }
    }
}

async fn remove_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(JudgeError::io(format!("remove workspace {:?}", path), e)),
    }
}

/// Ids become directory names: no separators, no dot-names
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    async fn manager() -> (tempfile::TempDir, WorkspaceManager) {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path().join("ws")).await.unwrap();
        (root, manager)
    }

    #[tokio::test]
    async fn test_acquire_materialize_release() {
        let (_root, manager) = manager().await;
        let mut ws = manager.acquire("1684d576-9866").await.unwrap();
        assert_eq!(ws.path(), manager.root().join("1684d576-9866"));

        let source = ws.materialize("Main.java", b"class Main {}").await.unwrap();
        assert_eq!(std::fs::read(&source).unwrap(), b"class Main {}");
        assert!(ws.contains("Main.java").await);

        assert_ok!(ws.release().await);
        assert!(!ws.path().exists());
        // idempotent
        assert_ok!(ws.release().await);
    }

    #[tokio::test]
    async fn test_conflict_and_retry() {
        let (_root, manager) = manager().await;
        let _first = manager.acquire("dup").await.unwrap();

        let err = manager.acquire("dup").await.unwrap_err();
        assert!(matches!(err, JudgeError::WorkspaceConflict { .. }));

        let second = manager.acquire_with_retry("dup").await.unwrap();
        assert!(second.id().starts_with("dup-"));
        assert_ne!(second.path(), manager.root().join("dup"));
    }

    #[tokio::test]
    async fn test_rejects_unsafe_ids_and_names() {
        let (_root, manager) = manager().await;
        for id in ["", "..", "../etc", "a/b", ".hidden"] {
            assert!(matches!(
                manager.acquire(id).await,
                Err(JudgeError::InvalidSubmissionId(_))
            ));
        }
        let ws = manager.acquire("ok").await.unwrap();
        assert_err!(ws.materialize("../escape.txt", b"x").await);
    }

    #[tokio::test]
    async fn test_drop_removes_active_workspace() {
        let (_root, manager) = manager().await;
        let path = {
            let ws = manager.acquire("dropped").await.unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_retained_workspace_survives_until_reclaimed() {
        let (_root, manager) = manager().await;
        let path = {
            let mut ws = manager.acquire("broken").await.unwrap();
            ws.retain("disk full").await.unwrap();
            ws.path().to_path_buf()
        };
        assert!(path.join(RETAINED_MARKER).exists());

        // stale sweep leaves flagged workspaces alone
        assert_eq!(manager.reclaim_stale().await.unwrap(), 0);
        assert_eq!(
            manager
                .reclaim_retained(Duration::from_secs(3600))
                .await
                .unwrap(),
            0
        );
        assert_eq!(manager.reclaim_retained(Duration::ZERO).await.unwrap(), 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_reclaim_stale() {
        let (_root, manager) = manager().await;
        std::fs::create_dir(manager.root().join("leftover")).unwrap();
        assert_eq!(manager.reclaim_stale().await.unwrap(), 1);
        assert!(manager.subdirectories().await.unwrap().is_empty());
    }
}
