use chrono::{DateTime, Utc};

/// Opaque handle of one engine entry. Never reused within a process.
pub type EntryId = u64;

/// Diagnostic snapshot of an engine entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub id: EntryId,
    /// Name reported by the entry's [`Runnable`](crate::Runnable).
    pub name: String,
    /// Schedule expression as registered.
    pub expr: String,
    /// Next planned firing; `None` once the schedule is exhausted.
    pub next_run: Option<DateTime<Utc>>,
}
