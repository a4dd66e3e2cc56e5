//! Event kinds and kind sets
//!
//! Every kind maps to the inotify bit it stands for. Two kinds are derived
//! helpers spanning two bits (`close`, `move`); they are never decoded from a
//! raw mask, only requested or added during translation.

use crate::error::{Result, WatchError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Raw inotify mask bits (see `inotify(7)`)
pub mod mask {
    pub const ACCESS: u32 = 0x0000_0001;
    pub const MODIFY: u32 = 0x0000_0002;
    pub const ATTRIB: u32 = 0x0000_0004;
    pub const CLOSE_WRITE: u32 = 0x0000_0008;
    pub const CLOSE_NOWRITE: u32 = 0x0000_0010;
    pub const OPEN: u32 = 0x0000_0020;
    pub const MOVED_FROM: u32 = 0x0000_0040;
    pub const MOVED_TO: u32 = 0x0000_0080;
    pub const CREATE: u32 = 0x0000_0100;
    pub const DELETE: u32 = 0x0000_0200;
    pub const DELETE_SELF: u32 = 0x0000_0400;
    pub const MOVE_SELF: u32 = 0x0000_0800;
    pub const UNMOUNT: u32 = 0x0000_2000;
    pub const Q_OVERFLOW: u32 = 0x0000_4000;
    pub const IGNORED: u32 = 0x0000_8000;
    pub const ONLYDIR: u32 = 0x0100_0000;
    pub const DONT_FOLLOW: u32 = 0x0200_0000;
    pub const MASK_ADD: u32 = 0x2000_0000;
    pub const ISDIR: u32 = 0x4000_0000;
    pub const ONESHOT: u32 = 0x8000_0000;

    pub const CLOSE: u32 = CLOSE_WRITE | CLOSE_NOWRITE;
    pub const MOVE: u32 = MOVED_FROM | MOVED_TO;
    pub const ALL_EVENTS: u32 = 0x0000_0fff;
}

/// Name accepted by [`KindSet::parse`] that expands to every change kind
pub const ALL_EVENTS_NAME: &str = "all_events";

/// A single event kind
///
/// Variants are declared in alphabetical order of their names, so the derived
/// `Ord` sorts kinds the same way their names sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Access,
    Attrib,
    Close,
    CloseNowrite,
    CloseWrite,
    Create,
    Delete,
    DeleteSelf,
    DontFollow,
    Ignored,
    Isdir,
    MaskAdd,
    Modify,
    Move,
    MoveSelf,
    MovedFrom,
    MovedTo,
    Oneshot,
    Onlydir,
    Open,
    QOverflow,
    Unmount,
}

impl EventKind {
    /// Every recognized kind, sorted by name
    pub const ALL: [EventKind; 22] = [
        EventKind::Access,
        EventKind::Attrib,
        EventKind::Close,
        EventKind::CloseNowrite,
        EventKind::CloseWrite,
        EventKind::Create,
        EventKind::Delete,
        EventKind::DeleteSelf,
        EventKind::DontFollow,
        EventKind::Ignored,
        EventKind::Isdir,
        EventKind::MaskAdd,
        EventKind::Modify,
        EventKind::Move,
        EventKind::MoveSelf,
        EventKind::MovedFrom,
        EventKind::MovedTo,
        EventKind::Oneshot,
        EventKind::Onlydir,
        EventKind::Open,
        EventKind::QOverflow,
        EventKind::Unmount,
    ];

    /// Canonical name of the kind
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Access => "access",
            EventKind::Attrib => "attrib",
            EventKind::Close => "close",
            EventKind::CloseNowrite => "close_nowrite",
            EventKind::CloseWrite => "close_write",
            EventKind::Create => "create",
            EventKind::Delete => "delete",
            EventKind::DeleteSelf => "delete_self",
            EventKind::DontFollow => "dont_follow",
            EventKind::Ignored => "ignored",
            EventKind::Isdir => "isdir",
            EventKind::MaskAdd => "mask_add",
            EventKind::Modify => "modify",
            EventKind::Move => "move",
            EventKind::MoveSelf => "move_self",
            EventKind::MovedFrom => "moved_from",
            EventKind::MovedTo => "moved_to",
            EventKind::Oneshot => "oneshot",
            EventKind::Onlydir => "onlydir",
            EventKind::Open => "open",
            EventKind::QOverflow => "q_overflow",
            EventKind::Unmount => "unmount",
        }
    }

    /// Raw mask bits for this kind
    pub fn mask(self) -> u32 {
        match self {
            EventKind::Access => mask::ACCESS,
            EventKind::Attrib => mask::ATTRIB,
            EventKind::Close => mask::CLOSE,
            EventKind::CloseNowrite => mask::CLOSE_NOWRITE,
            EventKind::CloseWrite => mask::CLOSE_WRITE,
            EventKind::Create => mask::CREATE,
            EventKind::Delete => mask::DELETE,
            EventKind::DeleteSelf => mask::DELETE_SELF,
            EventKind::DontFollow => mask::DONT_FOLLOW,
            EventKind::Ignored => mask::IGNORED,
            EventKind::Isdir => mask::ISDIR,
            EventKind::MaskAdd => mask::MASK_ADD,
            EventKind::Modify => mask::MODIFY,
            EventKind::Move => mask::MOVE,
            EventKind::MoveSelf => mask::MOVE_SELF,
            EventKind::MovedFrom => mask::MOVED_FROM,
            EventKind::MovedTo => mask::MOVED_TO,
            EventKind::Oneshot => mask::ONESHOT,
            EventKind::Onlydir => mask::ONLYDIR,
            EventKind::Open => mask::OPEN,
            EventKind::QOverflow => mask::Q_OVERFLOW,
            EventKind::Unmount => mask::UNMOUNT,
        }
    }

    /// Derived kinds span two raw bits and never appear in a raw mask alone
    pub fn is_derived(self) -> bool {
        matches!(self, EventKind::Close | EventKind::Move)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().trim_start_matches(':');
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| WatchError::UnknownKind(s.to_string()))
    }
}

/// A set of unique event kinds
///
/// Iteration order is the canonical (name-sorted) order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KindSet(BTreeSet<EventKind>);

impl KindSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the single-bit kinds present in a raw mask
    pub fn from_mask(raw: u32) -> Self {
        EventKind::ALL
            .iter()
            .copied()
            .filter(|kind| !kind.is_derived() && raw & kind.mask() == kind.mask())
            .collect()
    }

    /// Every change kind, what `all_events` expands to
    pub fn all_events() -> Self {
        EventKind::ALL
            .iter()
            .copied()
            .filter(|kind| kind.mask() & mask::ALL_EVENTS == kind.mask())
            .collect()
    }

    /// Parse kind names, rejecting the first unrecognized one
    pub fn parse<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = KindSet::new();
        for name in names {
            let name = name.as_ref();
            if name.trim().eq_ignore_ascii_case(ALL_EVENTS_NAME) {
                set.0.extend(KindSet::all_events().0);
            } else {
                set.insert(name.parse()?);
            }
        }
        Ok(set)
    }

    pub fn insert(&mut self, kind: EventKind) -> bool {
        self.0.insert(kind)
    }

    pub fn remove(&mut self, kind: EventKind) -> bool {
        self.0.remove(&kind)
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        self.0.contains(&kind)
    }

    /// Whether any kind is shared with `other`
    pub fn intersects(&self, other: &KindSet) -> bool {
        self.0.iter().any(|kind| other.0.contains(kind))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = EventKind> + '_ {
        self.0.iter().copied()
    }

    /// Union of the raw bits of every member
    pub fn mask(&self) -> u32 {
        self.0.iter().fold(0, |acc, kind| acc | kind.mask())
    }

    /// Sorted kind names
    pub fn canonical(&self) -> Vec<&'static str> {
        self.0.iter().map(|kind| kind.name()).collect()
    }
}

impl FromIterator<EventKind> for KindSet {
    fn from_iter<T: IntoIterator<Item = EventKind>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[EventKind; N]> for KindSet {
    fn from(kinds: [EventKind; N]) -> Self {
        kinds.into_iter().collect()
    }
}

impl fmt::Display for KindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.canonical().join(", "))
    }
}
