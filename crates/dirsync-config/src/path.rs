//! Path mapping between the source tree and its mirror.
//!
//! Every path the engine touches is derived from the source root: the
//! destination counterpart of a source path is `dest.join(relative)` where
//! `relative` is the path with the source root stripped.

use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("{path} is not inside source root {root}")]
    Escapes { path: PathBuf, root: PathBuf },
    #[error("destination {dest} is inside source {src_root}")]
    NestedDestination { src_root: PathBuf, dest: PathBuf },
    #[error("source {src_root} is inside destination {dest}")]
    NestedSource { src_root: PathBuf, dest: PathBuf },
}

/// The source/destination root pair, fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRoots {
    source: PathBuf,
    dest: PathBuf,
}

impl MirrorRoots {
    /// Resolve user-supplied roots to absolute paths.
    ///
    /// The source must exist and be a directory. The destination may not
    /// exist yet; neither root may contain the other.
    pub fn resolve(source: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<Self> {
        let source = source.as_ref();
        let source = source
            .canonicalize()
            .with_context(|| format!("Failed to resolve source directory: {}", source.display()))?;
        if !source.is_dir() {
            anyhow::bail!("Source is not a directory: {}", source.display());
        }

        let dest = normalize_nonexistent(dest.as_ref())?;
        Ok(Self::new(source, dest)?)
    }

    /// Build from paths that are already absolute and normalized.
    pub fn new(source: PathBuf, dest: PathBuf) -> Result<Self, PathError> {
        if dest.starts_with(&source) {
            return Err(PathError::NestedDestination {
                src_root: source,
                dest,
            });
        }
        // The prune pass must never see the source as a destination entry
        if source.starts_with(&dest) {
            return Err(PathError::NestedSource {
                src_root: source,
                dest,
            });
        }
        Ok(Self { source, dest })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Strip the source root from `path`.
    ///
    /// Fails if `path` is outside the source root or climbs out of it with
    /// `..` components.
    pub fn relative<'a>(&self, path: &'a Path) -> Result<&'a Path, PathError> {
        let escapes = || PathError::Escapes {
            path: path.to_path_buf(),
            root: self.source.clone(),
        };
        let rel = path.strip_prefix(&self.source).map_err(|_| escapes())?;
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(escapes());
        }
        Ok(rel)
    }

    /// Destination counterpart of a source path.
    pub fn dest_for(&self, path: &Path) -> Result<PathBuf, PathError> {
        let rel = self.relative(path)?;
        if rel.as_os_str().is_empty() {
            Ok(self.dest.clone())
        } else {
            Ok(self.dest.join(rel))
        }
    }
}

/// Normalize a path where the target may not exist yet.
///
/// Walks up to the nearest existing ancestor, canonicalizes it and
/// re-appends the missing tail.
pub fn normalize_nonexistent(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(path)
    };

    let mut existing = absolute.as_path();
    let mut tail = Vec::new();
    loop {
        if existing.exists() {
            break;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => anyhow::bail!("Path has no existing ancestor: {}", path.display()),
        }
    }

    let mut resolved = existing
        .canonicalize()
        .with_context(|| format!("Failed to resolve directory: {}", existing.display()))?;
    for name in tail.into_iter().rev() {
        if name == ".." {
            resolved.pop();
        } else if name != "." {
            resolved.push(name);
        }
    }
    Ok(resolved)
}
