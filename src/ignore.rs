//! Ignore-rule evaluation.
//!
//! Rules live in the relational store as (path, kind) pairs and match by
//! exact byte comparison on canonical absolute paths. A directory rule
//! covers the directory and everything under it at any depth; a file rule
//! covers exactly that file. Any path with a dot-prefixed component is
//! ignored unconditionally, no rule required.

use std::path::{Component, Path, PathBuf};

use crate::error::{IndexError, Result};
use crate::store::{MetadataStore, RuleKind};

pub struct PathFilter<'a> {
    store: &'a MetadataStore,
    /// When set, the hidden-component check only applies to components
    /// below this root, so a walk rooted under a dot-directory still
    /// works.
    root: Option<PathBuf>,
}

impl<'a> PathFilter<'a> {
    pub fn new(store: &'a MetadataStore) -> Self {
        Self { store, root: None }
    }

    pub fn scoped(store: &'a MetadataStore, root: &Path) -> Self {
        Self {
            store,
            root: Some(root.to_path_buf()),
        }
    }

    /// Register an ignore rule for a path that exists on disk. The path is
    /// canonicalized first so later lookups compare like with like; the
    /// kind is taken from what is actually on disk, not from the caller.
    pub async fn add(&self, path: &Path) -> Result<PathBuf> {
        let canonical = std::fs::canonicalize(path).map_err(|e| IndexError::io(path, e))?;
        let kind = if canonical.is_dir() {
            RuleKind::Directory
        } else {
            RuleKind::File
        };
        self.store.add_rule(&canonical.to_string_lossy(), kind).await?;
        Ok(canonical)
    }

    pub async fn remove(&self, path: &Path) -> Result<u64> {
        let canonical = std::fs::canonicalize(path).map_err(|e| IndexError::io(path, e))?;
        self.store.remove_rule(&canonical.to_string_lossy()).await
    }

    /// Should this path be skipped? `path` must already be canonical; the
    /// walk hands us canonical paths so we do not touch the filesystem
    /// again here.
    pub async fn is_ignored(&self, path: &Path) -> Result<bool> {
        let hidden_scope = match &self.root {
            Some(root) => path.strip_prefix(root).unwrap_or(path),
            None => path,
        };
        if has_hidden_component(hidden_scope) {
            return Ok(true);
        }

        let kind = if path.is_dir() {
            RuleKind::Directory
        } else {
            RuleKind::File
        };
        if self.store.has_rule(&path.to_string_lossy(), kind).await? {
            return Ok(true);
        }

        // Inherited directory rules: walk ancestors, nearest first. The
        // path's own entry was checked above, so start from the parent.
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir.parent().is_none() {
                break;
            }
            if self
                .store
                .has_rule(&dir.to_string_lossy(), RuleKind::Directory)
                .await?
            {
                return Ok(true);
            }
            current = dir.parent();
        }

        Ok(false)
    }
}

/// True if any component of the path starts with a dot. The root itself
/// has no normal components, so `/` never counts as hidden.
fn has_hidden_component(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::has_hidden_component;
    use std::path::Path;

    #[test]
    fn dot_components_are_hidden() {
        assert!(has_hidden_component(Path::new("/home/u/.git/config")));
        assert!(has_hidden_component(Path::new("/home/u/.env")));
        assert!(!has_hidden_component(Path::new("/home/u/notes.txt")));
        assert!(!has_hidden_component(Path::new("/")));
    }
}
