// src/core/policy/manager.rs

//! The policy manager: an ordered collection of policy lists with unified
//! rule queries and an aggregate change bus.
//!
//! Lists hold no back-pointer to the manager. Changes flow one way: the
//! ingestion path applies events to a list, and the manager publishes the
//! resulting delta on a broadcast bus that reconcilers subscribe to.
//! Listeners must not block; they enqueue work onto the action scheduler.

use crate::core::event::RoomEvent;
use crate::core::policy::feed::RuleFeed;
use crate::core::policy::list::{PolicyList, RuleDelta};
use crate::core::policy::rule::{EntityKind, PolicyRule, Recommendation};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// The capacity of the delta broadcast bus. Reconcilers that lag past this
/// fall back to a full sweep on `RecvError::Lagged`.
const DELTA_BUS_CAPACITY: usize = 1024;

pub struct PolicyManager {
    /// Watched lists in watch order; list-room ids are unique.
    lists: RwLock<IndexMap<String, PolicyList>>,
    bus: broadcast::Sender<RuleDelta>,
    feed: RuleFeed,
}

impl Default for PolicyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyManager {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(DELTA_BUS_CAPACITY);
        Self {
            lists: RwLock::new(IndexMap::new()),
            bus,
            feed: RuleFeed::new(),
        }
    }

    /// Attaches a new policy list for `room_id`. Returns false when the room
    /// was already watched (the existing list is kept).
    pub fn watch(&self, room_id: &str) -> bool {
        let mut lists = self.lists.write();
        if lists.contains_key(room_id) {
            return false;
        }
        info!("Watching policy room {room_id}");
        lists.insert(room_id.to_string(), PolicyList::new(room_id));
        true
    }

    /// Detaches a policy list. The rules it contributed disappear from all
    /// queries immediately; reconcilers converge on the next pass.
    pub fn unwatch(&self, room_id: &str) -> bool {
        let removed = self.lists.write().shift_remove(room_id).is_some();
        if removed {
            info!("Unwatched policy room {room_id}");
        }
        removed
    }

    pub fn is_watched(&self, room_id: &str) -> bool {
        self.lists.read().contains_key(room_id)
    }

    pub fn watched_rooms(&self) -> Vec<String> {
        self.lists.read().keys().cloned().collect()
    }

    /// Applies a batch of state events to the list owning `room_id` and
    /// publishes the aggregated delta. Returns the delta, if any.
    pub fn apply_room_events(&self, room_id: &str, events: &[RoomEvent]) -> Option<RuleDelta> {
        let delta = {
            let mut lists = self.lists.write();
            let list = lists.get_mut(room_id)?;
            list.apply_batch(events)?
        };

        debug!(
            "Policy room {room_id} produced a delta: +{} ~{} -{}",
            delta.added.len(),
            delta.modified.len(),
            delta.removed.len()
        );
        self.feed.push(delta.clone());
        // It's okay if no reconciler is subscribed yet (startup ingestion).
        let _ = self.bus.send(delta.clone());
        Some(delta)
    }

    /// Subscribes to aggregated change deltas, delivered in ingestion order.
    pub fn subscribe(&self) -> broadcast::Receiver<RuleDelta> {
        self.bus.subscribe()
    }

    /// The rule-server updates feed backing the web API.
    pub fn feed(&self) -> &RuleFeed {
        &self.feed
    }

    /// Union of matching rules across all lists, in list watch order then
    /// rule insertion order, deduplicated by (pattern, kind).
    pub fn rules_matching(&self, entity: &str, kind: EntityKind) -> Vec<Arc<PolicyRule>> {
        let lists = self.lists.read();
        let mut seen: HashSet<String> = HashSet::new();
        let mut matches = Vec::new();
        for list in lists.values() {
            for rule in list.rules_matching(entity, kind) {
                if seen.insert(rule.pattern.clone()) {
                    matches.push(rule);
                }
            }
        }
        matches
    }

    /// The deduplicated, lexicographically sorted set of server globs from
    /// all active `ban` rules of kind `server`. This is the desired `deny`
    /// content of every protected room's ACL.
    pub fn server_ban_patterns(&self) -> Vec<String> {
        let lists = self.lists.read();
        let mut patterns: Vec<String> = lists
            .values()
            .flat_map(|list| {
                let snapshot = list.snapshot();
                snapshot
                    .values()
                    .filter(|rule| {
                        rule.kind == EntityKind::Server
                            && rule.recommendation == Recommendation::Ban
                    })
                    .map(|rule| rule.pattern.clone())
                    .collect::<Vec<_>>()
            })
            .collect();
        patterns.sort();
        patterns.dedup();
        patterns
    }

    /// All current `ban` rules of kind `user`, in list watch order then rule
    /// insertion order. The first entry matching a member wins ties.
    pub fn user_ban_rules(&self) -> Vec<Arc<PolicyRule>> {
        let lists = self.lists.read();
        lists
            .values()
            .flat_map(|list| {
                let snapshot = list.snapshot();
                snapshot
                    .values()
                    .filter(|rule| {
                        rule.kind == EntityKind::User
                            && rule.recommendation == Recommendation::Ban
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Every rule across all lists, for `dump_rules` and full resyncs.
    pub fn all_rules(&self) -> Vec<Arc<PolicyRule>> {
        let lists = self.lists.read();
        lists
            .values()
            .flat_map(|list| list.snapshot().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn rule_count(&self) -> usize {
        self.lists.read().values().map(PolicyList::len).sum()
    }

    pub fn list_count(&self) -> usize {
        self.lists.read().len()
    }

    /// Resolves a list-level shortcode to its policy-room id.
    pub fn list_by_shortcode(&self, code: &str) -> Option<String> {
        let lists = self.lists.read();
        lists
            .values()
            .find(|list| list.shortcode() == Some(code))
            .map(|list| list.room_id().to_string())
    }

    /// The shortcode of a watched list, if one was set.
    pub fn shortcode_of(&self, room_id: &str) -> Option<String> {
        let lists = self.lists.read();
        lists
            .get(room_id)
            .and_then(|list| list.shortcode().map(str::to_string))
    }
}
