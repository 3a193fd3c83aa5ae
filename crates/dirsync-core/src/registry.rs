//! Subscription handle to watched-path registry.
//!
//! Owned by the dispatcher and passed by `&mut` to whoever needs it; there
//! is no process-wide table. A directory is registered at most once.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("watch limit of {limit} reached, cannot watch {path}")]
    Full { limit: usize, path: PathBuf },
    #[error("{path} is already watched")]
    AlreadyWatched { path: PathBuf },
}

/// Bidirectional `handle <-> path` map with an optional capacity bound.
#[derive(Debug)]
pub struct SubscriptionRegistry<H> {
    by_handle: HashMap<H, PathBuf>,
    by_path: HashMap<PathBuf, H>,
    limit: Option<usize>,
}

impl<H> Default for SubscriptionRegistry<H> {
    fn default() -> Self {
        Self {
            by_handle: HashMap::new(),
            by_path: HashMap::new(),
            limit: None,
        }
    }
}

impl<H: Clone + Eq + Hash> SubscriptionRegistry<H> {
    /// Unbounded registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry refusing entries beyond `limit` (`None` = unbounded)
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Check that `path` can be added, without adding it.
    pub fn check_capacity(&self, path: &Path) -> Result<(), RegistryError> {
        if self.by_path.contains_key(path) {
            return Err(RegistryError::AlreadyWatched {
                path: path.to_path_buf(),
            });
        }
        match self.limit {
            Some(limit) if self.by_handle.len() >= limit => Err(RegistryError::Full {
                limit,
                path: path.to_path_buf(),
            }),
            _ => Ok(()),
        }
    }

    pub fn add(&mut self, handle: H, path: PathBuf) -> Result<(), RegistryError> {
        self.check_capacity(&path)?;
        // A reused handle now points somewhere else
        if let Some(old) = self.by_handle.remove(&handle) {
            self.by_path.remove(&old);
        }
        self.by_path.insert(path.clone(), handle.clone());
        self.by_handle.insert(handle, path);
        Ok(())
    }

    pub fn path_of(&self, handle: &H) -> Option<&Path> {
        self.by_handle.get(handle).map(PathBuf::as_path)
    }

    pub fn handle_of(&self, path: &Path) -> Option<&H> {
        self.by_path.get(path)
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.by_path.contains_key(path)
    }

    /// Drop exactly one entry, returning the path it watched.
    pub fn remove(&mut self, handle: &H) -> Option<PathBuf> {
        let path = self.by_handle.remove(handle)?;
        self.by_path.remove(&path);
        Some(path)
    }

    /// Drop every entry at or below `root`, returning their handles.
    pub fn remove_subtree(&mut self, root: &Path) -> Vec<H> {
        let doomed: Vec<PathBuf> = self
            .by_path
            .keys()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect();

        doomed
            .into_iter()
            .filter_map(|path| {
                let handle = self.by_path.remove(&path)?;
                self.by_handle.remove(&handle);
                Some(handle)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.by_path.keys().map(PathBuf::as_path)
    }
}
