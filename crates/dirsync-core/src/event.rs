//! Decoding raw notification records into path-resolved change events.

use std::ffi::OsString;
use std::hash::Hash;
use std::path::PathBuf;

use crate::registry::SubscriptionRegistry;
use crate::source::{RawRecord, RecordFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    MovedFrom,
    MovedTo,
    /// The watched directory itself is gone
    SelfDeleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent<H> {
    pub kind: ChangeKind,
    pub handle: H,
    /// Path of the watched directory the record was raised on
    pub parent: PathBuf,
    pub name: Option<OsString>,
    pub is_dir: bool,
}

impl<H> ChangeEvent<H> {
    /// Absolute source path the event is about
    pub fn source_path(&self) -> PathBuf {
        match &self.name {
            Some(name) => self.parent.join(name),
            None => self.parent.clone(),
        }
    }
}

/// What to do with one raw record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translation<H> {
    Event(ChangeEvent<H>),
    /// Nothing sync-relevant (directory opens, nameless records)
    Skip,
    /// Handle not in the registry; the record cannot be applied
    Unresolved(H),
    /// The service dropped this subscription on its own
    Released(H),
    /// Records were lost; only a full pass can recover
    Overflow,
}

const CONTENT_FLAGS: RecordFlags = RecordFlags::CREATE
    .union(RecordFlags::MODIFY)
    .union(RecordFlags::DELETE)
    .union(RecordFlags::MOVED_FROM)
    .union(RecordFlags::MOVED_TO)
    .union(RecordFlags::DELETE_SELF);

/// Stateless decoder; the registry supplies the parent path.
pub struct EventTranslator;

impl EventTranslator {
    /// Decode one record.
    ///
    /// Each record maps to at most one event. If several change flags are
    /// set the first of DELETE_SELF, CREATE, MOVED_TO, MODIFY, DELETE,
    /// MOVED_FROM wins.
    pub fn translate<H: Clone + Eq + Hash>(
        record: &RawRecord<H>,
        registry: &SubscriptionRegistry<H>,
    ) -> Translation<H> {
        let flags = record.flags;

        if flags.contains(RecordFlags::OVERFLOW) {
            return Translation::Overflow;
        }
        if flags.contains(RecordFlags::IGNORED) {
            return Translation::Released(record.handle.clone());
        }
        if !flags.intersects(CONTENT_FLAGS) {
            return Translation::Skip;
        }

        let Some(parent) = registry.path_of(&record.handle) else {
            return Translation::Unresolved(record.handle.clone());
        };

        let kind = if flags.contains(RecordFlags::DELETE_SELF) {
            ChangeKind::SelfDeleted
        } else if record.name.is_none() {
            return Translation::Skip;
        } else if flags.contains(RecordFlags::CREATE) {
            ChangeKind::Created
        } else if flags.contains(RecordFlags::MOVED_TO) {
            ChangeKind::MovedTo
        } else if flags.contains(RecordFlags::MODIFY) {
            ChangeKind::Modified
        } else if flags.contains(RecordFlags::DELETE) {
            ChangeKind::Deleted
        } else {
            ChangeKind::MovedFrom
        };

        Translation::Event(ChangeEvent {
            kind,
            handle: record.handle.clone(),
            parent: parent.to_path_buf(),
            name: if kind == ChangeKind::SelfDeleted {
                None
            } else {
                record.name.clone()
            },
            is_dir: flags.contains(RecordFlags::IS_DIR) || kind == ChangeKind::SelfDeleted,
        })
    }
}
