//! Project-root path resolution for tool arguments.

use std::path::{Component, Path, PathBuf};

use super::ToolError;

/// Canonical project root. Every path a tool touches resolves inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRoot {
    root: PathBuf,
}

impl ProjectRoot {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ToolError> {
        let path = path.as_ref();
        let root = std::fs::canonicalize(path).map_err(|e| ToolError::Configuration {
            message: format!("Could not locate project root {}: {e}", path.display()),
        })?;
        if !root.is_dir() {
            return Err(ToolError::Configuration {
                message: format!("Project root {} is not a directory", root.display()),
            });
        }
        Ok(Self { root })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve a path that must already exist.
    pub fn resolve_existing(&self, path: &str) -> Result<PathBuf, ToolError> {
        let joined = self.join_checked(path)?;
        if !joined.exists() {
            return Err(ToolError::BadArgs {
                message: format!(
                    "Path not found at '{path}' (relative to: {})",
                    self.root.display()
                ),
            });
        }
        let canonical = std::fs::canonicalize(&joined).map_err(|e| ToolError::BadArgs {
            message: format!("Could not resolve '{path}': {e}"),
        })?;
        self.check_inside(path, canonical)
    }

    /// Resolve a path that may not exist yet. Missing parent directories are
    /// allowed as long as the deepest existing ancestor is inside the root.
    pub fn resolve_for_create(&self, path: &str) -> Result<PathBuf, ToolError> {
        let joined = self.join_checked(path)?;
        if joined.exists() {
            return self.resolve_existing(path);
        }

        let mut existing = joined.as_path();
        let mut missing = Vec::new();
        while !existing.exists() {
            let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
                return Err(outside_root(path));
            };
            missing.push(name.to_os_string());
            existing = parent;
        }
        let mut canonical = std::fs::canonicalize(existing).map_err(|e| ToolError::BadArgs {
            message: format!("Could not resolve '{path}': {e}"),
        })?;
        for name in missing.into_iter().rev() {
            canonical.push(name);
        }
        self.check_inside(path, canonical)
    }

    /// Display form of a path relative to the root, with `/` separators.
    #[must_use]
    pub fn relative_display(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn join_checked(&self, path: &str) -> Result<PathBuf, ToolError> {
        if path.chars().any(char::is_control) {
            return Err(ToolError::BadArgs {
                message: "path contains invalid control characters".to_string(),
            });
        }
        let input = PathBuf::from(path);
        if input.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(outside_root(path));
        }
        if input.is_absolute() {
            if input.starts_with(&self.root) {
                Ok(input)
            } else {
                Err(outside_root(path))
            }
        } else {
            Ok(self.root.join(input))
        }
    }

    fn check_inside(&self, path: &str, canonical: PathBuf) -> Result<PathBuf, ToolError> {
        if canonical.starts_with(&self.root) {
            Ok(canonical)
        } else {
            Err(outside_root(path))
        }
    }
}

fn outside_root(path: &str) -> ToolError {
    ToolError::BadArgs {
        message: format!("Path '{path}' is outside the project root"),
    }
}
