use sdk::errors::EngineError;
use std::path::{Path, PathBuf};

/// FileSystemGuard confines every capability read to the analyzed repository.
///
/// Capabilities never receive raw paths from the request. They hand the guard a
/// path relative to the repository (or an absolute one) and get back a
/// canonical path that is known to be inside the repository and not on the
/// deny list.
///
/// # Validation gates
///
/// 1. Check deny list before canonicalization
/// 2. Canonicalize path to resolve symlinks and .. patterns
/// 3. Check deny list after canonicalization
/// 4. Verify path is within the repository root
#[derive(Debug, Clone)]
pub struct FileSystemGuard {
    workspace: PathBuf,
    deny_list: Vec<PathBuf>,
}

impl FileSystemGuard {
    /// Creates a guard rooted at `workspace`.
    ///
    /// The deny list covers credential material that an analysis never needs:
    /// SSH and GPG keys, cloud credentials, `.env` files and package-registry
    /// tokens.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::PathCanonicalization` when the root does not exist
    /// or cannot be resolved.
    pub fn new(workspace: impl AsRef<Path>) -> Result<Self, EngineError> {
        let workspace = workspace.as_ref();
        // Canonicalize to handle symlinks (e.g., /var -> /private/var on macOS)
        let workspace = workspace
            .canonicalize()
            .map_err(|e| EngineError::PathCanonicalization(workspace.to_path_buf(), e.to_string()))?;

        let deny_list = [
            ".ssh",
            ".env",
            ".aws/credentials",
            ".config/gcloud",
            "id_rsa",
            "id_ed25519",
            "id_dsa",
            ".gnupg",
            ".kube/config",
            "credentials",
            "private_key",
            ".npmrc",
            ".pypirc",
        ]
        .into_iter()
        .map(PathBuf::from)
        .collect();

        Ok(Self {
            workspace,
            deny_list,
        })
    }

    /// Resolve a repository-relative path and validate it.
    ///
    /// Absolute inputs are validated as given; relative inputs are joined onto
    /// the repository root first.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, EngineError> {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            self.validate_path(candidate)
        } else {
            self.validate_path(&self.workspace.join(candidate))
        }
    }

    /// Validates a path through the four gates.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::PathDenied` if the path matches the deny list.
    /// Returns `EngineError::PathCanonicalization` if canonicalization fails.
    /// Returns `EngineError::PathOutsideWorkspace` if the path escapes the root.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use warden_engine::fs_guard::FileSystemGuard;
    ///
    /// let guard = FileSystemGuard::new("/home/user/project").unwrap();
    ///
    /// assert!(guard.validate_path(Path::new("/home/user/project/src/main.rs")).is_ok());
    /// assert!(guard.validate_path(Path::new("/home/user/project/../.ssh/id_rsa")).is_err());
    /// ```
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf, EngineError> {
        if self.is_denied(path) {
            return Err(EngineError::PathDenied(path.to_path_buf()));
        }

        let canonical = path
            .canonicalize()
            .map_err(|e| EngineError::PathCanonicalization(path.to_path_buf(), e.to_string()))?;

        // Catches symlinks that point at denied material
        if self.is_denied(&canonical) {
            return Err(EngineError::PathDenied(canonical));
        }

        if !canonical.starts_with(&self.workspace) {
            return Err(EngineError::PathOutsideWorkspace(canonical));
        }

        Ok(canonical)
    }

    /// True when the path ends with, or has a component equal to, a denied entry.
    pub fn is_denied(&self, path: &Path) -> bool {
        self.deny_list.iter().any(|denied| {
            path.ends_with(denied)
                || path.components().any(|c| {
                    c.as_os_str()
                        .to_str()
                        .zip(denied.to_str())
                        .is_some_and(|(component, d)| component == d)
                })
        })
    }

    /// Canonical repository root
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Path relative to the repository root, with `/` separators, for reporting.
    pub fn display_relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.workspace)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}
