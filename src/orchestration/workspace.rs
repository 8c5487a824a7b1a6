// Request-scoped workspace: one directory tree per request, removed on every exit path
//
// Layout under `<base>/<request id>/`:
//   INPUT/IMG/<name>.jpg       uploaded image (RGB JPEG)
//   INPUT/TXT/<name>.txt       detected boxes
//   INPUT/MASK/<name>.png      binary mask
//   OUTPUT/IMG/<name>.jpg      cleaned image
//   OUTPUT/COR/<name>_Cor.txt  boxes with recognized text

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::errors::WorkspaceError;

const SUBDIRS: [&str; 5] = [
    "INPUT/IMG",
    "INPUT/TXT",
    "INPUT/MASK",
    "OUTPUT/IMG",
    "OUTPUT/COR",
];

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    image_name: String,
    request_id: String,
}

impl Workspace {
    /// Create a fresh workspace keyed by a new request id under `base_dir`
    pub fn create(base_dir: &Path, image_name: &str) -> Result<Self, WorkspaceError> {
        let request_id = Uuid::new_v4().to_string();
        let root = base_dir.join(&request_id);
        build_tree(&root)?;
        debug!("Created workspace {}", root.display());

        Ok(Self {
            root,
            image_name: image_name.to_string(),
            request_id,
        })
    }

    /// Use an existing directory as a workspace root without creating anything
    pub fn at(root: impl Into<PathBuf>, image_name: &str) -> Self {
        let root = root.into();
        let request_id = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            root,
            image_name: image_name.to_string(),
            request_id,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn input_image(&self) -> PathBuf {
        self.root
            .join("INPUT/IMG")
            .join(format!("{}.jpg", self.image_name))
    }

    pub fn coordinates(&self) -> PathBuf {
        self.root
            .join("INPUT/TXT")
            .join(format!("{}.txt", self.image_name))
    }

    pub fn mask(&self) -> PathBuf {
        self.root
            .join("INPUT/MASK")
            .join(format!("{}.png", self.image_name))
    }

    pub fn cleaned_image(&self) -> PathBuf {
        self.root
            .join("OUTPUT/IMG")
            .join(format!("{}.jpg", self.image_name))
    }

    pub fn annotated_coordinates(&self) -> PathBuf {
        self.root
            .join("OUTPUT/COR")
            .join(format!("{}_Cor.txt", self.image_name))
    }

    /// Remove the whole tree. A tree that is already gone is not an error.
    pub fn purge(&self) -> Result<(), WorkspaceError> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {
                debug!("Purged workspace {}", self.root.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(WorkspaceError::PurgeFailed {
                path: self.root.clone(),
                source,
            }),
        }
    }
}

/// Create every subdirectory, removing the partial tree if one fails
fn build_tree(root: &Path) -> Result<(), WorkspaceError> {
    for sub in SUBDIRS {
        let dir = root.join(sub);
        if let Err(source) = fs::create_dir_all(&dir) {
            let _ = fs::remove_dir_all(root);
            return Err(WorkspaceError::CreateFailed { path: dir, source });
        }
    }
    Ok(())
}

/// Purges its workspace exactly once: explicitly, or on drop (including unwinding)
pub struct WorkspaceGuard {
    workspace: Option<Workspace>,
}

impl WorkspaceGuard {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace: Some(workspace),
        }
    }

    pub fn purge(mut self) -> Result<(), WorkspaceError> {
        match self.workspace.take() {
            Some(ws) => ws.purge(),
            None => Ok(()),
        }
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        if let Some(ws) = self.workspace.take() {
            if let Err(e) = ws.purge() {
                warn!("Workspace cleanup failed: {}", e);
            }
        }
    }
}
