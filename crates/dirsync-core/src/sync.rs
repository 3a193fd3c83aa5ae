//! Full tree synchronization.
//!
//! `sync` walks a source/destination pair breadth-first. Per directory it
//! first creates or updates every source entry in the destination, then
//! prunes destination entries that no longer exist in the source. Files are
//! compared with a [`StatProvider`] snapshot (or by content digest in
//! [`CompareMode::ContentHash`]) and copied whole when they differ; the
//! copy carries the source modification time over so the next comparison
//! sees them as equal.
//!
//! Symlinks are followed. A linked directory that leads back into the
//! directories currently being walked (or above the root) is a loop and is
//! not mirrored.

use std::collections::{HashSet, VecDeque};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::ops::AddAssign;
use std::path::{Path, PathBuf};

use dirsync_config::{log_sync_debug, log_sync_info, log_sync_warn, CompareMode, SyncConfig};
use filetime::FileTime;
use thiserror::Error;

use crate::ignore::IgnoreMatcher;
use crate::stat::{FsStat, StatProvider};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SyncError {
    fn io<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> SyncError + 'a {
        move |source| SyncError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Counts of the actions a pass performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub files_copied: usize,
    pub dirs_created: usize,
    pub entries_removed: usize,
    pub failures: usize,
}

impl SyncReport {
    /// True when the pass changed nothing in the destination.
    pub fn is_noop(&self) -> bool {
        self.files_copied == 0 && self.dirs_created == 0 && self.entries_removed == 0
    }

    fn record(&mut self, outcome: EntryOutcome) {
        match outcome {
            EntryOutcome::Copied => self.files_copied += 1,
            EntryOutcome::DirCreated => self.dirs_created += 1,
            EntryOutcome::Removed => self.entries_removed += 1,
            EntryOutcome::Failed => self.failures += 1,
            EntryOutcome::Unchanged
            | EntryOutcome::DirPresent
            | EntryOutcome::Missing
            | EntryOutcome::Skipped => {}
        }
    }
}

impl AddAssign for SyncReport {
    fn add_assign(&mut self, rhs: Self) {
        self.files_copied += rhs.files_copied;
        self.dirs_created += rhs.dirs_created;
        self.entries_removed += rhs.entries_removed;
        self.failures += rhs.failures;
    }
}

/// Result of applying a single entry to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Copied,
    Unchanged,
    DirCreated,
    DirPresent,
    Removed,
    /// Source (for updates) or destination (for removals) was not there
    Missing,
    /// Neither a regular file nor a directory, or a symlink loop
    Skipped,
    Failed,
}

/// Compare/copy/prune engine shared by the full pass and incremental events.
#[derive(Debug, Clone)]
pub struct TreeSynchronizer<S = FsStat> {
    stat: S,
    compare: CompareMode,
    buffer_size: usize,
    ignore: IgnoreMatcher,
}

impl TreeSynchronizer<FsStat> {
    pub fn new(config: &SyncConfig) -> Self {
        Self::with_stat(FsStat, config)
    }
}

impl<S: StatProvider> TreeSynchronizer<S> {
    pub fn with_stat(stat: S, config: &SyncConfig) -> Self {
        Self {
            stat,
            compare: config.compare,
            buffer_size: config.copy_buffer_size.max(1),
            ignore: IgnoreMatcher::with_patterns(&config.ignore_patterns),
        }
    }

    pub fn ignore(&self) -> &IgnoreMatcher {
        &self.ignore
    }

    pub fn stat(&self) -> &S {
        &self.stat
    }

    /// Mirror `source` into `dest`, recursively.
    ///
    /// An unreadable directory skips only that subtree; a failed copy skips
    /// only that file. Both are logged and counted in `failures`.
    pub fn sync(&self, source: &Path, dest: &Path) -> SyncReport {
        let mut report = SyncReport::default();
        let mut pending = VecDeque::from([PendingDir {
            source: source.to_path_buf(),
            dest: dest.to_path_buf(),
            lineage: lineage(source),
        }]);

        while let Some(dir) = pending.pop_front() {
            self.sync_dir(dir, &mut pending, &mut report);
        }

        log_sync_debug!(
            source = %source.display(),
            copied = report.files_copied,
            dirs = report.dirs_created,
            removed = report.entries_removed,
            failures = report.failures,
            "Sync pass complete"
        );
        report
    }

    fn sync_dir(
        &self,
        dir: PendingDir,
        pending: &mut VecDeque<PendingDir>,
        report: &mut SyncReport,
    ) {
        let src_dir = dir.source.as_path();
        let dst_dir = dir.dest.as_path();
        let entries = match fs::read_dir(src_dir) {
            Ok(e) => e,
            Err(e) => {
                log_sync_warn!(path = %src_dir.display(), error = %e, "Failed to read directory");
                report.failures += 1;
                return;
            }
        };

        report.record(self.ensure_dir(dst_dir));
        if !dst_dir.is_dir() {
            return;
        }

        // Copy & update
        let mut seen: HashSet<OsString> = HashSet::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log_sync_warn!(path = %src_dir.display(), error = %e, "Failed to read directory entry");
                    report.failures += 1;
                    continue;
                }
            };
            let name = entry.file_name();
            if self.ignore.should_ignore(Path::new(&name)) {
                continue;
            }

            let src_path = entry.path();
            let dst_path = dst_dir.join(&name);

            // Follow symlinks: a link to a file is mirrored as the file
            let Ok(meta) = fs::metadata(&src_path) else {
                seen.insert(name);
                continue;
            };
            if meta.is_dir() {
                let real = canonical(&src_path);
                if dir.lineage.contains(&real) {
                    log_sync_warn!(
                        path = %src_path.display(),
                        target = %real.display(),
                        "Symlink loop, not mirrored"
                    );
                    // Left out of `seen` so an earlier mirror of it is pruned
                    continue;
                }
                let mut lineage = dir.lineage.clone();
                lineage.push(real);
                pending.push_back(PendingDir {
                    source: src_path,
                    dest: dst_path,
                    lineage,
                });
            } else if meta.is_file() {
                report.record(self.update_file(&src_path, &dst_path));
            }
            seen.insert(name);
        }

        // Delete extras
        let dest_entries = match fs::read_dir(dst_dir) {
            Ok(e) => e,
            Err(e) => {
                log_sync_warn!(path = %dst_dir.display(), error = %e, "Failed to read destination directory");
                report.failures += 1;
                return;
            }
        };
        for entry in dest_entries.flatten() {
            let name = entry.file_name();
            if seen.contains(&name) || self.ignore.should_ignore(Path::new(&name)) {
                continue;
            }
            report.record(self.remove_entry(&entry.path()));
        }
    }

    /// Apply one source entry to its destination counterpart.
    ///
    /// Directories are created (not descended into); regular files are
    /// compared and copied, creating missing destination parents first.
    pub fn sync_entry(&self, source: &Path, dest: &Path) -> EntryOutcome {
        let meta = match fs::metadata(source) {
            Ok(m) => m,
            Err(_) => return EntryOutcome::Missing,
        };

        if meta.is_dir() {
            let parent = source.parent().map(lineage).unwrap_or_default();
            if parent.contains(&canonical(source)) {
                log_sync_warn!(path = %source.display(), "Symlink loop, not mirrored");
                return EntryOutcome::Skipped;
            }
            self.ensure_dir(dest)
        } else if meta.is_file() {
            if let Some(parent) = dest.parent() {
                if let Err(e) = fs::create_dir_all(parent).map_err(SyncError::io("create", parent)) {
                    log_sync_warn!(error = %e, "Failed to create destination parent");
                    return EntryOutcome::Failed;
                }
            }
            self.update_file(source, dest)
        } else {
            EntryOutcome::Skipped
        }
    }

    /// Remove a destination entry; directories are removed recursively.
    pub fn remove_entry(&self, dest: &Path) -> EntryOutcome {
        match remove_mirror(dest) {
            Ok(true) => {
                log_sync_info!(path = %dest.display(), "Deleted");
                EntryOutcome::Removed
            }
            Ok(false) => EntryOutcome::Missing,
            Err(e) => {
                log_sync_warn!(error = %e, "Failed to delete");
                EntryOutcome::Failed
            }
        }
    }

    fn ensure_dir(&self, dest: &Path) -> EntryOutcome {
        match fs::symlink_metadata(dest) {
            Ok(meta) if meta.is_dir() => return EntryOutcome::DirPresent,
            // A file where a directory belongs: replace it
            Ok(_) => {
                if let Err(e) = fs::remove_file(dest).map_err(SyncError::io("remove", dest)) {
                    log_sync_warn!(error = %e, "Failed to replace file with directory");
                    return EntryOutcome::Failed;
                }
            }
            Err(_) => {}
        }

        match fs::create_dir_all(dest).map_err(SyncError::io("create", dest)) {
            Ok(()) => {
                log_sync_info!(path = %dest.display(), "Created directory");
                EntryOutcome::DirCreated
            }
            Err(e) => {
                log_sync_warn!(error = %e, "Failed to create directory");
                EntryOutcome::Failed
            }
        }
    }

    fn update_file(&self, source: &Path, dest: &Path) -> EntryOutcome {
        if !self.differs(source, dest) {
            return EntryOutcome::Unchanged;
        }

        if fs::symlink_metadata(dest).is_ok_and(|m| m.is_dir()) {
            if let Err(e) = remove_mirror(dest) {
                log_sync_warn!(error = %e, "Failed to replace directory with file");
                return EntryOutcome::Failed;
            }
        }

        match self.copy_file(source, dest) {
            Ok(bytes) => {
                log_sync_info!(src = %source.display(), dst = %dest.display(), bytes, "Copied");
                EntryOutcome::Copied
            }
            Err(e) => {
                log_sync_warn!(error = %e, "Copy failed");
                EntryOutcome::Failed
            }
        }
    }

    fn differs(&self, source: &Path, dest: &Path) -> bool {
        let src = self.stat.snapshot(source);
        let dst = self.stat.snapshot(dest);

        match self.compare {
            CompareMode::SizeMtime => !src.matches(&dst),
            CompareMode::ContentHash => {
                if !(src.exists && dst.exists && src.size == dst.size) {
                    return true;
                }
                match (self.digest(source), self.digest(dest)) {
                    (Ok(a), Ok(b)) => a != b,
                    _ => true,
                }
            }
        }
    }

    fn digest(&self, path: &Path) -> Result<blake3::Hash> {
        let mut file = File::open(path).map_err(SyncError::io("open", path))?;
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let n = file.read(&mut buf).map_err(SyncError::io("read", path))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    /// Truncate-create `dest`, stream `source` into it, then carry over the
    /// source modification time.
    fn copy_file(&self, source: &Path, dest: &Path) -> Result<u64> {
        let src = File::open(source).map_err(SyncError::io("open", source))?;
        let mut reader = BufReader::with_capacity(self.buffer_size, src);
        let mut writer = File::create(dest).map_err(SyncError::io("create", dest))?;

        let bytes = io::copy(&mut reader, &mut writer).map_err(SyncError::io("copy", dest))?;

        let meta = reader
            .get_ref()
            .metadata()
            .map_err(SyncError::io("stat", source))?;
        let mtime = FileTime::from_last_modification_time(&meta);
        filetime::set_file_handle_times(&writer, None, Some(mtime))
            .map_err(SyncError::io("set mtime", dest))?;

        Ok(bytes)
    }
}

/// A directory queued for the full pass.
struct PendingDir {
    source: PathBuf,
    dest: PathBuf,
    /// Canonical paths of this directory and everything above it in the walk
    lineage: Vec<PathBuf>,
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Canonical `dir` and all of its ancestors, outermost first.
pub(crate) fn lineage(dir: &Path) -> Vec<PathBuf> {
    let real = canonical(dir);
    let mut chain: Vec<PathBuf> = real.ancestors().map(Path::to_path_buf).collect();
    chain.reverse();
    chain
}

/// Delete `path` whatever it is. `Ok(false)` if it was already gone.
pub fn remove_mirror(path: &Path) -> Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(SyncError::io("stat", path)(e)),
    };

    let removed = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match removed {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SyncError::io("remove", path)(e)),
    }
}
