//! Point-in-time metadata snapshots.

use filetime::FileTime;
use std::path::Path;

/// `{exists, size, mtime}` for a path at the moment it was queried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub exists: bool,
    pub size: u64,
    /// Modification time truncated to whole seconds
    pub mtime_secs: i64,
}

impl Snapshot {
    pub const MISSING: Snapshot = Snapshot {
        exists: false,
        size: 0,
        mtime_secs: 0,
    };

    /// True when no copy is needed: both sides exist with equal size and mtime.
    ///
    /// Two writes inside the same second that keep the size are
    /// indistinguishable here.
    pub fn matches(&self, other: &Snapshot) -> bool {
        self.exists && other.exists && self.size == other.size && self.mtime_secs == other.mtime_secs
    }
}

/// Metadata query used for diffing. Must not fail on missing paths.
pub trait StatProvider {
    fn snapshot(&self, path: &Path) -> Snapshot;
}

/// `StatProvider` backed by `std::fs::metadata` (follows symlinks).
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStat;

impl StatProvider for FsStat {
    fn snapshot(&self, path: &Path) -> Snapshot {
        match std::fs::metadata(path) {
            Ok(meta) => Snapshot {
                exists: true,
                size: meta.len(),
                mtime_secs: FileTime::from_last_modification_time(&meta).unix_seconds(),
            },
            Err(_) => Snapshot::MISSING,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_path_is_not_an_error() {
        let dir = tempdir().unwrap();
        let snap = FsStat.snapshot(&dir.path().join("ghost"));
        assert_eq!(snap, Snapshot::MISSING);
    }

    #[test]
    fn test_snapshot_reports_size_and_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello").unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(1_700_000_000, 999)).unwrap();

        let snap = FsStat.snapshot(&path);
        assert!(snap.exists);
        assert_eq!(snap.size, 5);
        assert_eq!(snap.mtime_secs, 1_700_000_000);
    }

    #[test]
    fn test_matches_requires_both_present() {
        let a = Snapshot {
            exists: true,
            size: 3,
            mtime_secs: 10,
        };
        assert!(a.matches(&a));
        assert!(!a.matches(&Snapshot::MISSING));
        assert!(!Snapshot::MISSING.matches(&Snapshot::MISSING));
        assert!(!a.matches(&Snapshot { size: 4, ..a }));
        assert!(!a.matches(&Snapshot { mtime_secs: 11, ..a }));
    }
}
