//! Recursive subscription setup.
//!
//! Walks a subtree and subscribes every directory individually, recording
//! each handle in the [`SubscriptionRegistry`]. Directories already in the
//! registry are skipped but still descended into, so calling `watch` again
//! on a covered tree only picks up what is new.

use std::path::Path;

use dirsync_config::{log_watch_debug, log_watch_info, log_watch_warn};
use walkdir::WalkDir;

use crate::ignore::IgnoreMatcher;
use crate::registry::SubscriptionRegistry;
use crate::source::ChangeSource;
use crate::sync::lineage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchReport {
    /// New subscriptions established
    pub added: usize,
    /// Directories left unwatched (limit reached or service refusal)
    pub refused: usize,
    /// Symlinked directories whose target is already watched under another path
    pub aliased: usize,
}

/// Establishes one subscription per directory below a path.
#[derive(Debug, Clone, Default)]
pub struct RecursiveWatcher {
    ignore: IgnoreMatcher,
}

impl RecursiveWatcher {
    pub fn new(ignore: IgnoreMatcher) -> Self {
        Self { ignore }
    }

    /// Subscribe `path` and every directory below it.
    ///
    /// A directory that cannot be subscribed is logged and its whole
    /// subtree is left unwatched until the next full sync.
    ///
    /// The notification service hands out one handle per directory, not per
    /// path. When a symlink leads to a directory that is already watched,
    /// the path without symlinks in it keeps the handle and the other one is
    /// left unwatched, along with its subtree.
    pub fn watch<C: ChangeSource>(
        &self,
        source: &mut C,
        registry: &mut SubscriptionRegistry<C::Handle>,
        path: &Path,
    ) -> WatchReport {
        let mut report = WatchReport::default();
        let above = lineage(path);
        let mut walker = WalkDir::new(path)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log_watch_warn!(error = %e, "Failed to traverse while adding watches");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            if entry.depth() > 0 && self.ignore.should_ignore(Path::new(entry.file_name())) {
                walker.skip_current_dir();
                continue;
            }

            let dir = entry.path();
            // Loops inside the walk are reported by walkdir; this catches
            // links back above the starting point
            if entry.depth() > 0 && entry.path_is_symlink() {
                let target = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
                if above.contains(&target) {
                    log_watch_debug!(path = %dir.display(), "Symlink loop, not watched");
                    walker.skip_current_dir();
                    continue;
                }
            }
            if registry.is_watched(dir) {
                continue;
            }

            if let Err(e) = registry.check_capacity(dir) {
                log_watch_warn!(error = %e, "Subtree left unwatched");
                report.refused += 1;
                walker.skip_current_dir();
                continue;
            }

            match source.subscribe(dir) {
                Ok(handle) => {
                    let owner = registry
                        .path_of(&handle)
                        .filter(|owner| *owner != dir && owner.is_dir())
                        .map(Path::to_path_buf);
                    if let Some(owner) = owner {
                        report.aliased += 1;
                        if is_canonical(&owner) || !is_canonical(dir) {
                            log_watch_warn!(
                                path = %dir.display(),
                                watched_as = %owner.display(),
                                "Directory already watched under another path, alias left unwatched"
                            );
                            walker.skip_current_dir();
                            continue;
                        }
                        // Reached the real directory after one of its aliases
                        log_watch_warn!(
                            path = %owner.display(),
                            watched_as = %dir.display(),
                            "Watch moved from symlinked path to real path, alias left unwatched"
                        );
                        registry.remove(&handle);
                    }
                    log_watch_info!(path = %dir.display(), handle = ?handle, "Watching");
                    if let Err(e) = registry.add(handle, dir.to_path_buf()) {
                        log_watch_warn!(error = %e, "Failed to register watch");
                    }
                    report.added += 1;
                }
                Err(e) => {
                    log_watch_warn!(path = %dir.display(), error = %e, "Subscription refused, subtree left unwatched");
                    report.refused += 1;
                    walker.skip_current_dir();
                }
            }
        }

        log_watch_debug!(
            path = %path.display(),
            added = report.added,
            refused = report.refused,
            aliased = report.aliased,
            total = registry.len(),
            "Watch pass complete"
        );
        report
    }
}

/// True if `path` contains no symlinks.
fn is_canonical(path: &Path) -> bool {
    path.canonicalize().is_ok_and(|real| real == path)
}
