//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - A temporary source tree
//! - A temporary destination tree (not created up front)
//! - Resolved `MirrorRoots` for the pair
//!
//! # Usage
//!
//! ```ignore
//! use dirsync_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     env.create_file("a.txt", b"hello").unwrap();
//!     // ... run a sync against env.roots ...
//!     assert_eq!(env.read_dest("a.txt").unwrap(), b"hello");
//! }
//! ```

use std::path::PathBuf;
use tempfile::TempDir;

use crate::path::MirrorRoots;

/// Isolated source/destination pair under one temporary directory
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    pub source_root: PathBuf,
    pub dest_root: PathBuf,
    pub roots: MirrorRoots,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().canonicalize()?;

        let source_root = root.join("source");
        let dest_root = root.join("dest");
        std::fs::create_dir_all(&source_root)?;

        let roots = MirrorRoots::new(source_root.clone(), dest_root.clone())?;

        Ok(Self {
            _temp_dir: temp_dir,
            source_root,
            dest_root,
            roots,
        })
    }

    /// Create a source file with content, creating parents as needed
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.source_root.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Create a source directory
    pub fn create_dir(&self, relative_path: &str) -> anyhow::Result<PathBuf> {
        let path = self.source_root.join(relative_path);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    pub fn source_path(&self, relative_path: &str) -> PathBuf {
        self.source_root.join(relative_path)
    }

    pub fn dest_path(&self, relative_path: &str) -> PathBuf {
        self.dest_root.join(relative_path)
    }

    /// Read a mirrored file
    pub fn read_dest(&self, relative_path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.dest_path(relative_path))
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
