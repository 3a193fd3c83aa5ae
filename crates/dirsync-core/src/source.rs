//! Change-notification sources.
//!
//! Notification services of this kind are non-recursive: every directory
//! gets its own subscription, identified by an opaque handle. Records come
//! back in batches, each naming the handle it was raised on, the child
//! entry (if any) and a set of [`RecordFlags`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::OsString;
use std::fmt::Debug;
use std::hash::Hash;
use std::io;
use std::path::{Path, PathBuf};

use bitflags::bitflags;

bitflags! {
    /// What a raw notification record reports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RecordFlags: u32 {
        const CREATE = 1 << 0;
        const MODIFY = 1 << 1;
        const DELETE = 1 << 2;
        const MOVED_FROM = 1 << 3;
        const MOVED_TO = 1 << 4;
        /// The watched directory itself was removed
        const DELETE_SELF = 1 << 5;
        /// Subject of the record is a directory
        const IS_DIR = 1 << 6;
        const OPEN = 1 << 7;
        /// The service dropped the subscription
        const IGNORED = 1 << 8;
        /// The queue overflowed and records were lost
        const OVERFLOW = 1 << 9;
    }
}

/// One undecoded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord<H> {
    pub handle: H,
    pub name: Option<OsString>,
    pub flags: RecordFlags,
}

impl<H> RawRecord<H> {
    pub fn new(handle: H, name: Option<&str>, flags: RecordFlags) -> Self {
        Self {
            handle,
            name: name.map(OsString::from),
            flags,
        }
    }
}

/// A per-directory change-notification service.
pub trait ChangeSource {
    type Handle: Clone + Eq + Hash + Debug;

    /// Subscribe to create/modify/delete/move/self-delete for one directory.
    fn subscribe(&mut self, path: &Path) -> io::Result<Self::Handle>;

    fn unsubscribe(&mut self, handle: Self::Handle) -> io::Result<()>;

    /// Block until at least one record is available.
    ///
    /// An interrupted wait is reported as `io::ErrorKind::Interrupted`.
    fn read_records(&mut self) -> io::Result<Vec<RawRecord<Self::Handle>>>;
}

#[cfg(target_os = "linux")]
pub use self::inotify_source::InotifySource;

#[cfg(target_os = "linux")]
mod inotify_source {
    use super::*;
    use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};

    /// Room for 1024 records with short names
    const EVENT_BUF_LEN: usize = 1024 * (16 + 16);

    /// `ChangeSource` over a Linux inotify instance.
    pub struct InotifySource {
        inotify: Inotify,
        buffer: Vec<u8>,
    }

    impl InotifySource {
        pub fn new() -> io::Result<Self> {
            Ok(Self {
                inotify: Inotify::init()?,
                buffer: vec![0u8; EVENT_BUF_LEN],
            })
        }

        fn watch_mask() -> WatchMask {
            WatchMask::CREATE
                | WatchMask::MODIFY
                | WatchMask::DELETE
                | WatchMask::MOVED_FROM
                | WatchMask::MOVED_TO
                | WatchMask::DELETE_SELF
        }
    }

    fn flags_from_mask(mask: EventMask) -> RecordFlags {
        const MAP: [(EventMask, RecordFlags); 10] = [
            (EventMask::CREATE, RecordFlags::CREATE),
            (EventMask::MODIFY, RecordFlags::MODIFY),
            (EventMask::DELETE, RecordFlags::DELETE),
            (EventMask::MOVED_FROM, RecordFlags::MOVED_FROM),
            (EventMask::MOVED_TO, RecordFlags::MOVED_TO),
            (EventMask::DELETE_SELF, RecordFlags::DELETE_SELF),
            (EventMask::ISDIR, RecordFlags::IS_DIR),
            (EventMask::OPEN, RecordFlags::OPEN),
            (EventMask::IGNORED, RecordFlags::IGNORED),
            (EventMask::Q_OVERFLOW, RecordFlags::OVERFLOW),
        ];

        MAP.iter()
            .filter(|(m, _)| mask.contains(*m))
            .fold(RecordFlags::empty(), |acc, (_, f)| acc | *f)
    }

    impl ChangeSource for InotifySource {
        type Handle = WatchDescriptor;

        fn subscribe(&mut self, path: &Path) -> io::Result<WatchDescriptor> {
            self.inotify.watches().add(path, Self::watch_mask())
        }

        fn unsubscribe(&mut self, handle: WatchDescriptor) -> io::Result<()> {
            self.inotify.watches().remove(handle)
        }

        fn read_records(&mut self) -> io::Result<Vec<RawRecord<WatchDescriptor>>> {
            let events = self.inotify.read_events_blocking(&mut self.buffer)?;
            Ok(events
                .map(|event| RawRecord {
                    handle: event.wd,
                    name: event.name.map(|n| n.to_os_string()),
                    flags: flags_from_mask(event.mask),
                })
                .collect())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_mask_translation() {
            let flags = flags_from_mask(EventMask::CREATE | EventMask::ISDIR);
            assert_eq!(flags, RecordFlags::CREATE | RecordFlags::IS_DIR);
            assert_eq!(
                flags_from_mask(EventMask::Q_OVERFLOW),
                RecordFlags::OVERFLOW
            );
        }
    }
}

/// In-memory source replaying pre-recorded batches.
///
/// Handles are plain integers handed out in subscription order. Like an
/// inotify descriptor, a handle identifies the directory itself: paths that
/// resolve to the same directory (through symlinks) share one handle. When
/// the script runs dry `read_records` fails with `BrokenPipe`, which ends a
/// dispatcher loop the same way a dead notification channel would.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    next_handle: u32,
    subscriptions: HashMap<u32, PathBuf>,
    batches: VecDeque<io::Result<Vec<RawRecord<u32>>>>,
    refused: HashSet<PathBuf>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&mut self, records: Vec<RawRecord<u32>>) {
        self.batches.push_back(Ok(records));
    }

    pub fn push_error(&mut self, kind: io::ErrorKind) {
        self.batches.push_back(Err(io::Error::from(kind)));
    }

    /// Make subscriptions to `path` fail
    pub fn refuse(&mut self, path: impl Into<PathBuf>) {
        self.refused.insert(path.into());
    }

    /// Live handle for `path`, if subscribed
    pub fn handle_for(&self, path: &Path) -> Option<u32> {
        let target = resolved(path);
        self.subscriptions
            .iter()
            .find(|(_, p)| **p == target)
            .map(|(h, _)| *h)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

fn resolved(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

impl ChangeSource for ScriptedSource {
    type Handle = u32;

    fn subscribe(&mut self, path: &Path) -> io::Result<u32> {
        if self.refused.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("subscription refused: {}", path.display()),
            ));
        }
        // Same directory, same handle
        if let Some(handle) = self.handle_for(path) {
            return Ok(handle);
        }
        self.next_handle += 1;
        self.subscriptions.insert(self.next_handle, resolved(path));
        Ok(self.next_handle)
    }

    fn unsubscribe(&mut self, handle: u32) -> io::Result<()> {
        self.subscriptions
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))
    }

    fn read_records(&mut self) -> io::Result<Vec<RawRecord<u32>>> {
        self.batches
            .pop_front()
            .unwrap_or_else(|| Err(io::Error::from(io::ErrorKind::BrokenPipe)))
    }
}
