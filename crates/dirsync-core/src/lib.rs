//! # dirsync-core
//!
//! One-way directory mirroring engine.
//!
//! ## Architecture
//!
//! A mirror runs in two phases:
//! - A full recursive pass ([`sync::TreeSynchronizer`]) brings the
//!   destination in line with the source.
//! - Every source directory is subscribed individually
//!   ([`watch::RecursiveWatcher`]) and a single-threaded loop
//!   ([`dispatch::Dispatcher`]) applies each change notification to the
//!   destination as it arrives.
//!
//! The dispatcher owns the [`registry::SubscriptionRegistry`] that maps
//! opaque subscription handles back to directory paths; raw records are
//! turned into path-resolved events by [`event::EventTranslator`].

pub mod dispatch;
pub mod event;
pub mod ignore;
pub mod registry;
pub mod source;
pub mod stat;
pub mod sync;
pub mod watch;

pub use dispatch::{DispatchError, DispatchStats, Dispatcher};
pub use event::{ChangeEvent, ChangeKind, EventTranslator, Translation};
pub use registry::{RegistryError, SubscriptionRegistry};
pub use source::{ChangeSource, RawRecord, RecordFlags, ScriptedSource};
pub use stat::{FsStat, Snapshot, StatProvider};
pub use sync::{EntryOutcome, SyncReport, TreeSynchronizer};
pub use watch::{RecursiveWatcher, WatchReport};

#[cfg(target_os = "linux")]
pub use source::InotifySource;

use dirsync_config::path::MirrorRoots;
use dirsync_config::Config;
use tracing::info;

/// Run the initial full pass only.
pub fn sync_once(roots: &MirrorRoots, config: &Config) -> SyncReport {
    info!(
        source = %roots.source().display(),
        dest = %roots.dest().display(),
        compare = %config.sync.compare,
        "Starting full sync"
    );
    let report = TreeSynchronizer::new(&config.sync).sync(roots.source(), roots.dest());
    info!(
        copied = report.files_copied,
        dirs = report.dirs_created,
        removed = report.entries_removed,
        failures = report.failures,
        "Full sync complete"
    );
    report
}

/// Main mirror entry point: full sync, then watch until the notification
/// channel fails.
#[cfg(target_os = "linux")]
pub fn run_mirror(roots: MirrorRoots, config: &Config) -> anyhow::Result<()> {
    use anyhow::Context;

    sync_once(&roots, config);

    let source = InotifySource::new().context("Failed to initialize inotify")?;
    let mut dispatcher = Dispatcher::new(source, roots, config);

    let watch = dispatcher.watch_root();
    info!(
        watches = watch.added,
        refused = watch.refused,
        "Watching directory. Press Ctrl+C to stop."
    );

    dispatcher.run()?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn run_mirror(_roots: MirrorRoots, _config: &Config) -> anyhow::Result<()> {
    anyhow::bail!("Continuous mirroring requires inotify (Linux); use --once")
}
