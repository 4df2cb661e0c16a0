// src/core/protect.rs

//! The protected-room set: which rooms the daemon keeps in sync with the
//! policy rules, plus a per-room membership snapshot maintained from the
//! inbound event stream.
//!
//! Member snapshots are mutated only by the event router (and by the
//! full-state fetch when a room is first protected); reconcilers read
//! cloned snapshots.

use crate::core::event::{RoomEvent, SERVER_ACL_EVENT};
use crate::core::metrics;
use dashmap::DashMap;
use std::collections::HashMap;

/// Per-room record: membership snapshot and the checksum of the last ACL
/// content the reconciler applied. The checksum lets a reconcile pass skip
/// rooms whose ACL is already known to match the desired content; it is
/// cleared whenever an ACL state event is observed in the room.
#[derive(Debug, Clone, Default)]
pub struct ProtectedRoom {
    /// user id → join timestamp in ms. Invited users are tracked too; both
    /// states are ban targets for the member reconciler.
    pub members: HashMap<String, i64>,
    pub acl_checksum: Option<u32>,
}

#[derive(Debug, Default)]
pub struct ProtectedRooms {
    rooms: DashMap<String, ProtectedRoom>,
}

impl ProtectedRooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotently protects a room with an empty member snapshot. The
    /// caller is responsible for the background member fetch and the initial
    /// reconcile. Returns false when the room was already protected.
    pub fn add(&self, room_id: &str) -> bool {
        let newly = match self.rooms.entry(room_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(ProtectedRoom::default());
                true
            }
        };
        if newly {
            metrics::PROTECTED_ROOMS.set(self.rooms.len() as f64);
        }
        newly
    }

    /// Idempotent removal. Returns false when the room was not protected.
    pub fn remove(&self, room_id: &str) -> bool {
        let removed = self.rooms.remove(room_id).is_some();
        if removed {
            metrics::PROTECTED_ROOMS.set(self.rooms.len() as f64);
        }
        removed
    }

    pub fn is_protected(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn room_ids(&self) -> Vec<String> {
        self.rooms.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Replaces a room's member snapshot wholesale (startup full-state
    /// fetch). Joins already observed through the stream are kept when the
    /// fetched snapshot carries no timestamp for them.
    pub fn set_members(&self, room_id: &str, fetched: HashMap<String, i64>) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            let mut members = fetched;
            for (user, ts) in &room.members {
                members
                    .entry(user.clone())
                    .and_modify(|t| *t = (*t).max(*ts))
                    .or_insert(*ts);
            }
            room.members = members;
        }
    }

    /// Routes one event into the room record: membership events maintain the
    /// member snapshot, and an observed ACL change drops the cached checksum
    /// so the next reconcile pass re-reads the room. Other events are
    /// ignored here; protection handlers consume them elsewhere.
    pub fn handle_event(&self, room_id: &str, event: &RoomEvent) {
        if event.kind == SERVER_ACL_EVENT && event.is_state() {
            if let Some(mut room) = self.rooms.get_mut(room_id) {
                room.acl_checksum = None;
            }
            return;
        }

        let (Some(membership), Some(user_id)) = (event.membership(), event.state_key.as_deref())
        else {
            return;
        };
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return;
        };
        match membership {
            "join" | "invite" => {
                room.members
                    .insert(user_id.to_string(), event.origin_server_ts);
            }
            "leave" | "ban" => {
                room.members.remove(user_id);
            }
            _ => {}
        }
    }

    /// A read-only copy of a room's member snapshot.
    pub fn members_snapshot(&self, room_id: &str) -> Option<HashMap<String, i64>> {
        self.rooms.get(room_id).map(|room| room.members.clone())
    }

    /// Members with `joined_at >= min_timestamp`, newest first, bounded by
    /// `max_entries`.
    pub fn recent_joins_since(
        &self,
        room_id: &str,
        min_timestamp: i64,
        max_entries: usize,
    ) -> Vec<(String, i64)> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        let mut joins: Vec<(String, i64)> = room
            .members
            .iter()
            .filter(|(_, ts)| **ts >= min_timestamp)
            .map(|(user, ts)| (user.clone(), *ts))
            .collect();
        joins.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        joins.truncate(max_entries);
        joins
    }

    pub fn acl_checksum(&self, room_id: &str) -> Option<u32> {
        self.rooms.get(room_id).and_then(|room| room.acl_checksum)
    }

    pub fn set_acl_checksum(&self, room_id: &str, checksum: u32) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.acl_checksum = Some(checksum);
        }
    }
}
