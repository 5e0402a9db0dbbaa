//! The change journal: every mutation `update()` makes to `ranges` is
//! recorded here, keyed by range start and timestamp, so peers can ask for
//! "everything changed since X" without re-scanning the whole table.

use chrono::NaiveDateTime;

/// The kind of change a journal row records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        return match self {
            ChangeKind::Added => "A",
            ChangeKind::Modified => "M",
            ChangeKind::Deleted => "D",
        };
    }

    pub fn from_str(s: &str) -> Option<ChangeKind> {
        return match s {
            "A" => Some(ChangeKind::Added),
            "M" => Some(ChangeKind::Modified),
            "D" => Some(ChangeKind::Deleted),
            _ => None,
        };
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEntry {
    pub kind: ChangeKind,
    pub start: String,
    pub changed_at: NaiveDateTime,
}
