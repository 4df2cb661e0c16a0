// src/core/reporter.rs

//! The error aggregator. Reconcilers never raise; they record failures here,
//! and the reconcile driver drains one grouped report per pass into the
//! management room. Repeats of the same (room, kind) inside a cooldown
//! window are suppressed so a broken room does not flood moderators.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;
use strum_macros::{Display, EnumString};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ErrorKind {
    /// Missing power level or a server-side `forbidden`. Not retried.
    Permission,
    /// An invariant violation; the affected room's reconcile was aborted.
    Fatal,
    /// Retried by the scheduler; recorded only after retry exhaustion.
    Transient,
}

impl ErrorKind {
    /// How long repeats of this kind stay suppressed after surfacing.
    pub fn cooldown(self) -> Duration {
        match self {
            ErrorKind::Permission => Duration::from_secs(3 * 60 * 60),
            ErrorKind::Fatal => Duration::from_secs(15 * 60),
            ErrorKind::Transient => Duration::from_secs(15 * 60),
        }
    }
}

/// One recorded failure.
#[derive(Debug, Clone)]
pub struct RoomError {
    pub room_id: String,
    pub kind: ErrorKind,
    pub message: String,
    pub at: Instant,
}

/// A drained, grouped summary ready for the management room.
#[derive(Debug, Clone, Default)]
pub struct ErrorReport {
    /// (room id, kind, messages) groups in first-recorded order.
    pub entries: Vec<(String, ErrorKind, Vec<String>)>,
}

impl ErrorReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A plain-text rendering, one room per line.
    pub fn render(&self) -> String {
        let mut out = String::from("⚠ Errors during the last reconcile pass:");
        for (room_id, kind, messages) in &self.entries {
            let _ = write!(out, "\n{room_id} [{kind}]: {}", messages.join("; "));
        }
        out
    }
}

#[derive(Debug, Default)]
struct AggregatorInner {
    pending: Vec<RoomError>,
    last_surfaced: HashMap<(String, ErrorKind), Instant>,
}

#[derive(Debug, Default)]
pub struct ErrorAggregator {
    inner: Mutex<AggregatorInner>,
}

impl ErrorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, room_id: &str, kind: ErrorKind, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.pending.push(RoomError {
            room_id: room_id.to_string(),
            kind,
            message: message.into(),
            at: Instant::now(),
        });
    }

    /// Number of errors recorded since the last drain.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Drains the pass's errors into a grouped report. Groups whose
    /// (room, kind) surfaced within its cooldown are dropped; cooldowns are
    /// armed only for the groups actually included.
    pub fn drain(&self) -> Option<ErrorReport> {
        let mut inner = self.inner.lock();
        if inner.pending.is_empty() {
            return None;
        }
        let now = Instant::now();
        let pending = std::mem::take(&mut inner.pending);

        let mut groups: Vec<((String, ErrorKind), Vec<String>)> = Vec::new();
        for error in pending {
            let key = (error.room_id, error.kind);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, messages)) => {
                    if !messages.contains(&error.message) {
                        messages.push(error.message);
                    }
                }
                None => groups.push((key, vec![error.message])),
            }
        }

        let mut report = ErrorReport::default();
        for ((room_id, kind), messages) in groups {
            let suppressed = inner
                .last_surfaced
                .get(&(room_id.clone(), kind))
                .is_some_and(|last| now.duration_since(*last) < kind.cooldown());
            if suppressed {
                continue;
            }
            inner.last_surfaced.insert((room_id.clone(), kind), now);
            report.entries.push((room_id, kind, messages));
        }

        if report.is_empty() { None } else { Some(report) }
    }
}
