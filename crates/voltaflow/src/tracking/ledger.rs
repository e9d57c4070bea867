//! Append-only event and note ledgers.
//!
//! Events record dossier status transitions; notes are free-text
//! administrative annotations on an order or one of its dossiers. Neither
//! can be updated or deleted. Concurrent appends commute; readers see a
//! total order by timestamp with the monotonic sequence id as tie-break.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{Actor, DossierId, OrderId};
use super::dossier::DossierStatus;

/// Monotonic identifier for ledger events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

/// Monotonic identifier for administrative notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NoteId(pub u64);

/// One recorded dossier status transition. Creation events carry no
/// `from_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DossierEvent {
    pub event_id: EventId,
    pub dossier_id: DossierId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_status: Option<DossierStatus>,
    pub to_status: DossierStatus,
    pub actor: Actor,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One administrative note. Order-level when `dossier_id` is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminNote {
    pub note_id: NoteId,
    pub order_id: OrderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dossier_id: Option<DossierId>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

/// Insert-only log of events and notes keyed by their parent ids.
#[derive(Debug, Default)]
pub struct Ledger {
    events: Mutex<BTreeMap<DossierId, Vec<DossierEvent>>>,
    notes: Mutex<BTreeMap<OrderId, Vec<AdminNote>>>,
    event_sequence: AtomicU64,
    note_sequence: AtomicU64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status transition against a dossier.
    pub fn append_event(
        &self,
        dossier_id: DossierId,
        from_status: Option<DossierStatus>,
        to_status: DossierStatus,
        actor: Actor,
        timestamp: DateTime<Utc>,
        reason: Option<String>,
    ) -> DossierEvent {
        let event = DossierEvent {
            event_id: EventId(self.event_sequence.fetch_add(1, Ordering::Relaxed) + 1),
            dossier_id: dossier_id.clone(),
            from_status,
            to_status,
            actor,
            timestamp,
            reason,
        };

        let mut guard = self.events.lock().expect("event ledger mutex poisoned");
        guard.entry(dossier_id).or_default().push(event.clone());
        event
    }

    /// Record an administrative note. Content is assumed validated by the
    /// caller; the ledger never rejects an append.
    pub fn append_note(
        &self,
        order_id: OrderId,
        dossier_id: Option<DossierId>,
        content: String,
        actor: &Actor,
        created_at: DateTime<Utc>,
    ) -> AdminNote {
        let note = AdminNote {
            note_id: NoteId(self.note_sequence.fetch_add(1, Ordering::Relaxed) + 1),
            order_id: order_id.clone(),
            dossier_id,
            content,
            created_at,
            created_by: actor.id.clone(),
        };

        let mut guard = self.notes.lock().expect("note ledger mutex poisoned");
        guard.entry(order_id).or_default().push(note.clone());
        note
    }

    /// Events for a dossier, ordered by timestamp then event id.
    pub fn events_for(&self, dossier_id: &DossierId) -> Vec<DossierEvent> {
        let guard = self.events.lock().expect("event ledger mutex poisoned");
        let mut events = guard.get(dossier_id).cloned().unwrap_or_default();
        events.sort_by(|a, b| (a.timestamp, a.event_id).cmp(&(b.timestamp, b.event_id)));
        events
    }

    /// Notes for an order, ordered by creation time then note id.
    pub fn notes_for(&self, order_id: &OrderId) -> Vec<AdminNote> {
        let guard = self.notes.lock().expect("note ledger mutex poisoned");
        let mut notes = guard.get(order_id).cloned().unwrap_or_default();
        notes.sort_by(|a, b| (a.created_at, a.note_id).cmp(&(b.created_at, b.note_id)));
        notes
    }
}
