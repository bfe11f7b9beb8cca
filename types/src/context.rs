//! IDE context attached to a conversation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Context gathered from the editor: recently opened files, the active
/// selection and the symbols the selection resolves to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryContext {
    pub recent_files: Vec<PathBuf>,
    pub selection: Option<String>,
    /// Files declaring the symbols referenced in the selection.
    pub resolved_selection: Vec<PathBuf>,
}

impl QueryContext {
    #[must_use]
    pub fn with_recent_files(recent_files: Vec<PathBuf>) -> Self {
        Self {
            recent_files,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recent_files.is_empty() && self.selection.is_none() && self.resolved_selection.is_empty()
    }

    /// Merge another context into this one.
    ///
    /// Lists are unioned preserving first-seen order; the existing selection
    /// wins over the incoming one.
    #[must_use]
    pub fn merge(&self, other: Option<&QueryContext>) -> QueryContext {
        let Some(other) = other else {
            return self.clone();
        };
        QueryContext {
            recent_files: distinct_union(&self.recent_files, &other.recent_files),
            selection: self.selection.clone().or_else(|| other.selection.clone()),
            resolved_selection: distinct_union(&self.resolved_selection, &other.resolved_selection),
        }
    }

    /// Distinct files worth showing to the model: recent files first, then
    /// files behind the resolved selection.
    #[must_use]
    pub fn relevant_files(&self) -> Vec<PathBuf> {
        distinct_union(&self.recent_files, &self.resolved_selection)
    }
}

fn distinct_union(first: &[PathBuf], second: &[PathBuf]) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::with_capacity(first.len() + second.len());
    for path in first.iter().chain(second) {
        if !out.contains(path) {
            out.push(path.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::QueryContext;

    #[test]
    fn merge_unions_files_without_duplicates() {
        let a = QueryContext::with_recent_files(vec![PathBuf::from("a.rs"), PathBuf::from("b.rs")]);
        let b = QueryContext::with_recent_files(vec![PathBuf::from("b.rs"), PathBuf::from("c.rs")]);

        let merged = a.merge(Some(&b));
        assert_eq!(
            merged.recent_files,
            vec![
                PathBuf::from("a.rs"),
                PathBuf::from("b.rs"),
                PathBuf::from("c.rs")
            ]
        );
    }

    #[test]
    fn merge_keeps_existing_selection() {
        let a = QueryContext {
            selection: Some("first".to_string()),
            ..QueryContext::default()
        };
        let b = QueryContext {
            selection: Some("second".to_string()),
            ..QueryContext::default()
        };
        assert_eq!(a.merge(Some(&b)).selection.as_deref(), Some("first"));
        assert_eq!(
            QueryContext::default().merge(Some(&b)).selection.as_deref(),
            Some("second")
        );
    }

    #[test]
    fn merge_with_none_is_identity() {
        let a = QueryContext::with_recent_files(vec![PathBuf::from("a.rs")]);
        assert_eq!(a.merge(None), a);
    }
}
