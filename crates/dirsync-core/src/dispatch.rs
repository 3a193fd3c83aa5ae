//! The incremental synchronization loop.
//!
//! One thread, one blocking read per iteration, every record of a read
//! applied in delivery order before the next read. The dispatcher owns the
//! subscription registry outright, so no locking is involved.

use std::io;
use std::path::{Path, PathBuf};

use dirsync_config::path::MirrorRoots;
use dirsync_config::{
    log_dispatch_debug, log_dispatch_error, log_dispatch_info, log_dispatch_warn, Config,
};
use thiserror::Error;

use crate::event::{ChangeEvent, ChangeKind, EventTranslator, Translation};
use crate::registry::SubscriptionRegistry;
use crate::source::{ChangeSource, RawRecord};
use crate::stat::{FsStat, StatProvider};
use crate::sync::{EntryOutcome, SyncReport, TreeSynchronizer};
use crate::watch::{RecursiveWatcher, WatchReport};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("notification channel failed: {0}")]
    Channel(#[source] io::Error),
}

/// Running totals, mostly for tests and the shutdown log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub events_applied: usize,
    pub records_skipped: usize,
    pub unresolved: usize,
    pub resyncs: usize,
}

pub struct Dispatcher<C: ChangeSource, S = FsStat> {
    source: C,
    registry: SubscriptionRegistry<C::Handle>,
    sync: TreeSynchronizer<S>,
    watcher: RecursiveWatcher,
    roots: MirrorRoots,
    stats: DispatchStats,
}

impl<C: ChangeSource> Dispatcher<C, FsStat> {
    pub fn new(source: C, roots: MirrorRoots, config: &Config) -> Self {
        Self::with_synchronizer(
            source,
            roots,
            TreeSynchronizer::new(&config.sync),
            config.watch.max_watches,
        )
    }
}

impl<C: ChangeSource, S: StatProvider> Dispatcher<C, S> {
    pub fn with_synchronizer(
        source: C,
        roots: MirrorRoots,
        sync: TreeSynchronizer<S>,
        max_watches: Option<usize>,
    ) -> Self {
        let watcher = RecursiveWatcher::new(sync.ignore().clone());
        Self {
            source,
            registry: SubscriptionRegistry::with_limit(max_watches),
            sync,
            watcher,
            roots,
            stats: DispatchStats::default(),
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry<C::Handle> {
        &self.registry
    }

    pub fn source(&self) -> &C {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut C {
        &mut self.source
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn roots(&self) -> &MirrorRoots {
        &self.roots
    }

    /// Full pass over the root pair.
    pub fn full_sync(&self) -> SyncReport {
        self.sync.sync(self.roots.source(), self.roots.dest())
    }

    /// Subscribe the whole source tree.
    pub fn watch_root(&mut self) -> WatchReport {
        let root = self.roots.source().to_path_buf();
        self.watcher.watch(&mut self.source, &mut self.registry, &root)
    }

    /// Block on the source forever, applying every record.
    ///
    /// Interrupted reads are retried. Any other read failure is fatal.
    pub fn run(&mut self) -> Result<(), DispatchError> {
        log_dispatch_info!(
            source = %self.roots.source().display(),
            watches = self.registry.len(),
            "Watching for changes"
        );

        loop {
            let records = match self.source.read_records() {
                Ok(records) => records,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    log_dispatch_debug!("Read interrupted, retrying");
                    continue;
                }
                Err(e) => {
                    log_dispatch_error!(error = %e, stats = ?self.stats, "Notification channel failed");
                    return Err(DispatchError::Channel(e));
                }
            };
            self.process(records);
        }
    }

    /// Apply one batch strictly in order.
    pub fn process(&mut self, records: Vec<RawRecord<C::Handle>>) {
        for record in &records {
            self.process_record(record);
        }
    }

    fn process_record(&mut self, record: &RawRecord<C::Handle>) {
        match EventTranslator::translate(record, &self.registry) {
            Translation::Event(event) => self.apply(event),
            Translation::Skip => self.stats.records_skipped += 1,
            Translation::Unresolved(handle) => {
                log_dispatch_warn!(
                    handle = ?handle,
                    name = ?record.name,
                    "Could not find path for handle, record dropped"
                );
                self.stats.unresolved += 1;
            }
            Translation::Released(handle) => {
                if let Some(path) = self.registry.remove(&handle) {
                    log_dispatch_debug!(path = %path.display(), "Watch released by service");
                }
            }
            Translation::Overflow => self.resync(),
        }
    }

    fn apply(&mut self, event: ChangeEvent<C::Handle>) {
        let source_path = event.source_path();
        log_dispatch_debug!(kind = ?event.kind, path = %source_path.display(), "Event");

        if event.kind == ChangeKind::SelfDeleted {
            if let Some(path) = self.registry.remove(&event.handle) {
                log_dispatch_info!(path = %path.display(), "Directory deleted, watch removed");
            }
            // The service usually drops the watch itself first
            if let Err(e) = self.source.unsubscribe(event.handle) {
                log_dispatch_debug!(error = %e, "Unsubscribe after self-delete");
            }
            self.stats.events_applied += 1;
            return;
        }

        let dest_path = match self.mirror_path(&source_path) {
            Some(path) => path,
            None => {
                self.stats.records_skipped += 1;
                return;
            }
        };

        match event.kind {
            ChangeKind::Created | ChangeKind::Modified | ChangeKind::MovedTo => {
                let outcome = self.sync.sync_entry(&source_path, &dest_path);
                let is_dir = matches!(outcome, EntryOutcome::DirCreated | EntryOutcome::DirPresent);
                if is_dir && event.kind != ChangeKind::Modified {
                    self.extend_coverage(&source_path, &dest_path);
                }
            }
            ChangeKind::Deleted | ChangeKind::MovedFrom => {
                if event.kind == ChangeKind::MovedFrom && event.is_dir {
                    self.drop_coverage(&source_path);
                }
                if !self.sync.stat().snapshot(&source_path).exists {
                    self.sync.remove_entry(&dest_path);
                }
            }
            ChangeKind::SelfDeleted => {}
        }
        self.stats.events_applied += 1;
    }

    /// Destination counterpart, or `None` if the path is ignored or
    /// outside the source root.
    fn mirror_path(&self, source_path: &Path) -> Option<PathBuf> {
        let dest = match self.roots.dest_for(source_path) {
            Ok(dest) => dest,
            Err(e) => {
                log_dispatch_warn!(error = %e, "Event path outside source root");
                return None;
            }
        };
        let ignored = self
            .roots
            .relative(source_path)
            .is_ok_and(|rel| self.sync.ignore().should_ignore(rel));
        (!ignored).then_some(dest)
    }

    /// Watch a new directory, then mirror whatever landed in it before the
    /// subscription was in place (or came along with a move).
    fn extend_coverage(&mut self, source_path: &Path, dest_path: &Path) {
        self.watcher
            .watch(&mut self.source, &mut self.registry, source_path);
        self.sync.sync(source_path, dest_path);
    }

    /// Forget every watch under a directory that moved away.
    fn drop_coverage(&mut self, source_path: &Path) {
        for handle in self.registry.remove_subtree(source_path) {
            if let Err(e) = self.source.unsubscribe(handle) {
                log_dispatch_debug!(error = %e, "Unsubscribe of moved directory");
            }
        }
    }

    /// Recover from lost records: full pass, prune dead watches, re-watch.
    fn resync(&mut self) {
        log_dispatch_warn!("Notification queue overflowed, running full sync");
        self.stats.resyncs += 1;

        let dead: Vec<PathBuf> = self
            .registry
            .paths()
            .filter(|p| !p.is_dir())
            .map(Path::to_path_buf)
            .collect();
        for path in dead {
            self.drop_coverage(&path);
        }

        let report = self.full_sync();
        let watch = self.watch_root();
        log_dispatch_info!(
            copied = report.files_copied,
            removed = report.entries_removed,
            new_watches = watch.added,
            "Resync complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{RecordFlags, ScriptedSource};
    use dirsync_config::testing::TestEnvironment;

    fn dispatcher(env: &TestEnvironment) -> Dispatcher<ScriptedSource> {
        let mut d = Dispatcher::new(ScriptedSource::new(), env.roots.clone(), &Config::default());
        d.full_sync();
        d.watch_root();
        d
    }

    fn handle<S: StatProvider>(d: &Dispatcher<ScriptedSource, S>, path: &Path) -> u32 {
        *d.registry().handle_of(path).expect("watched")
    }

    #[test]
    fn test_modify_copies_file() {
        let env = TestEnvironment::new().unwrap();
        let mut d = dispatcher(&env);
        let root = handle(&d, &env.source_root);

        env.create_file("n.txt", b"new").unwrap();
        d.process(vec![RawRecord::new(root, Some("n.txt"), RecordFlags::MODIFY)]);

        assert_eq!(env.read_dest("n.txt").unwrap(), b"new");
        assert_eq!(d.stats().events_applied, 1);
    }

    #[test]
    fn test_delete_ignored_while_source_still_exists() {
        let env = TestEnvironment::new().unwrap();
        env.create_file("a.txt", b"a").unwrap();
        let mut d = dispatcher(&env);
        let root = handle(&d, &env.source_root);

        // Stale delete for a path that was recreated
        d.process(vec![RawRecord::new(root, Some("a.txt"), RecordFlags::DELETE)]);
        assert!(env.dest_path("a.txt").exists());
    }

    #[test]
    fn test_self_delete_drops_registry_entry() {
        let env = TestEnvironment::new().unwrap();
        env.create_dir("sub").unwrap();
        let mut d = dispatcher(&env);
        let sub = handle(&d, &env.source_path("sub"));

        std::fs::remove_dir(env.source_path("sub")).unwrap();
        d.process(vec![
            RawRecord::new(sub, None, RecordFlags::DELETE_SELF),
            RawRecord::new(sub, None, RecordFlags::IGNORED),
        ]);

        assert!(d.registry().path_of(&sub).is_none());
        assert_eq!(d.source().subscription_count(), 1);
        assert_eq!(d.stats().unresolved, 0);
        // Destination removal is left to the parent's DELETE record
        assert!(env.dest_path("sub").exists());
    }

    #[test]
    fn test_moved_out_directory_loses_coverage() {
        let env = TestEnvironment::new().unwrap();
        env.create_file("tree/leaf/f.txt", b"f").unwrap();
        let mut d = dispatcher(&env);
        let root = handle(&d, &env.source_root);
        assert_eq!(d.registry().len(), 3);

        let outside = tempfile::tempdir().unwrap();
        std::fs::rename(env.source_path("tree"), outside.path().join("tree")).unwrap();
        d.process(vec![RawRecord::new(
            root,
            Some("tree"),
            RecordFlags::MOVED_FROM | RecordFlags::IS_DIR,
        )]);

        assert_eq!(d.registry().len(), 1);
        assert!(!env.dest_path("tree").exists());
    }

    #[test]
    fn test_moved_in_directory_fully_mirrored() {
        let env = TestEnvironment::new().unwrap();
        let mut d = dispatcher(&env);
        let root = handle(&d, &env.source_root);

        let outside = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(outside.path().join("pkg/lib")).unwrap();
        std::fs::write(outside.path().join("pkg/lib/mod.rs"), b"mod").unwrap();
        std::fs::rename(outside.path().join("pkg"), env.source_path("pkg")).unwrap();

        d.process(vec![RawRecord::new(
            root,
            Some("pkg"),
            RecordFlags::MOVED_TO | RecordFlags::IS_DIR,
        )]);

        assert_eq!(env.read_dest("pkg/lib/mod.rs").unwrap(), b"mod");
        assert!(d.registry().is_watched(&env.source_path("pkg/lib")));
    }

    #[test]
    fn test_overflow_triggers_resync() {
        let env = TestEnvironment::new().unwrap();
        let mut d = dispatcher(&env);

        env.create_file("missed/one.txt", b"1").unwrap();
        d.process(vec![RawRecord::new(0, None, RecordFlags::OVERFLOW)]);

        assert_eq!(d.stats().resyncs, 1);
        assert_eq!(env.read_dest("missed/one.txt").unwrap(), b"1");
        assert!(d.registry().is_watched(&env.source_path("missed")));
    }

    #[test]
    fn test_ignored_paths_not_mirrored() {
        let env = TestEnvironment::new().unwrap();
        let mut config = Config::default();
        config.sync.ignore_patterns = vec!["*.tmp".to_string()];
        let mut d = Dispatcher::new(ScriptedSource::new(), env.roots.clone(), &config);
        d.full_sync();
        d.watch_root();
        let root = handle(&d, &env.source_root);

        env.create_file("scratch.tmp", b"t").unwrap();
        d.process(vec![RawRecord::new(root, Some("scratch.tmp"), RecordFlags::CREATE)]);
        assert!(!env.dest_path("scratch.tmp").exists());
    }

    #[test]
    fn test_run_retries_interrupt_and_fails_on_channel_error() {
        let env = TestEnvironment::new().unwrap();
        let mut d = dispatcher(&env);
        let root = handle(&d, &env.source_root);

        env.create_file("late.txt", b"late").unwrap();
        d.source_mut().push_error(io::ErrorKind::Interrupted);
        d.source_mut()
            .push_batch(vec![RawRecord::new(root, Some("late.txt"), RecordFlags::CREATE)]);
        d.source_mut().push_error(io::ErrorKind::Other);

        let err = d.run().unwrap_err();
        assert!(matches!(err, DispatchError::Channel(ref e) if e.kind() == io::ErrorKind::Other));
        assert_eq!(env.read_dest("late.txt").unwrap(), b"late");
    }

    /// Claims every path still exists.
    struct NeverGone;

    impl StatProvider for NeverGone {
        fn snapshot(&self, _path: &Path) -> crate::stat::Snapshot {
            crate::stat::Snapshot {
                exists: true,
                size: 1,
                mtime_secs: 1,
            }
        }
    }

    #[test]
    fn test_delete_consults_stat_provider() {
        let env = TestEnvironment::new().unwrap();
        env.create_file("a.txt", b"a").unwrap();
        let config = Config::default();
        let sync = TreeSynchronizer::with_stat(NeverGone, &config.sync);
        let mut d = Dispatcher::with_synchronizer(ScriptedSource::new(), env.roots.clone(), sync, None);
        d.watch_root();
        let root = handle(&d, &env.source_root);

        std::fs::create_dir_all(&env.dest_root).unwrap();
        std::fs::write(env.dest_path("a.txt"), b"a").unwrap();
        std::fs::remove_file(env.source_path("a.txt")).unwrap();
        d.process(vec![RawRecord::new(root, Some("a.txt"), RecordFlags::DELETE)]);

        assert!(env.dest_path("a.txt").exists());
        assert_eq!(d.stats().events_applied, 1);
    }
}
