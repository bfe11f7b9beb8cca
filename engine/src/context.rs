//! Project context supplied to each agentic loop.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use bif_types::QueryContext;

/// Source of project-wide editor context, consulted at the start of every
/// agentic loop and merged into the conversation's accumulated context.
pub trait ContextCollector: Send + Sync {
    fn collect_project_context(&self) -> QueryContext;
}

/// Collector that never contributes context.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContext;

impl ContextCollector for NoContext {
    fn collect_project_context(&self) -> QueryContext {
        QueryContext::default()
    }
}

/// Recently opened files, most recent last. The front end records files as
/// the user opens them.
#[derive(Debug, Default)]
pub struct RecentFiles {
    files: Mutex<Vec<PathBuf>>,
}

impl RecentFiles {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a file. Re-opening a file moves it to the end.
    pub fn open(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.retain(|existing| existing != &path);
        files.push(path);
    }

    pub fn clear(&self) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl ContextCollector for RecentFiles {
    fn collect_project_context(&self) -> QueryContext {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        QueryContext::with_recent_files(files.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{ContextCollector, NoContext, RecentFiles};

    #[test]
    fn reopening_moves_file_to_the_end() {
        let recent = RecentFiles::new();
        recent.open("a.rs");
        recent.open("b.rs");
        recent.open("a.rs");
        assert_eq!(
            recent.collect_project_context().recent_files,
            vec![PathBuf::from("b.rs"), PathBuf::from("a.rs")]
        );
    }

    #[test]
    fn no_context_is_empty() {
        assert!(NoContext.collect_project_context().is_empty());
    }
}
