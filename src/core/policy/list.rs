// src/core/policy/list.rs

//! A policy list: the materialized view of one policy room's rule events.
//!
//! The list is single-writer (the event router's ingestion path). Readers
//! take an `Arc` snapshot of the rule map in O(1); the writer replaces the
//! snapshot wholesale after each batch, so readers never observe a batch
//! half-applied.

use crate::core::event::RoomEvent;
use crate::core::policy::rule::{
    EntityKind, PolicyRule, RuleKey, SHORTCODE_EVENT,
};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// An immutable view of a list's rules, keyed by (kind, state key) in
/// insertion order. Insertion order is load-bearing: the member-ban
/// reconciler breaks ties between matching rules by it.
pub type RuleSnapshot = Arc<IndexMap<RuleKey, Arc<PolicyRule>>>;

/// The change a batch of state events produced on one policy list. Deltas
/// with all three sets empty are never emitted.
#[derive(Debug, Clone, Default)]
pub struct RuleDelta {
    /// The policy room the delta originates from.
    pub room_id: String,
    pub added: Vec<Arc<PolicyRule>>,
    pub modified: Vec<Arc<PolicyRule>>,
    pub removed: Vec<RuleKey>,
}

impl RuleDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// True when any entry of the delta concerns rules of `kind`.
    pub fn touches(&self, kind: EntityKind) -> bool {
        self.added.iter().any(|r| r.kind == kind)
            || self.modified.iter().any(|r| r.kind == kind)
            || self.removed.iter().any(|k| k.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }
}

#[derive(Debug)]
pub struct PolicyList {
    room_id: String,
    shortcode: Option<String>,
    snapshot: RuleSnapshot,
}

impl PolicyList {
    pub fn new(room_id: &str) -> Self {
        Self {
            room_id: room_id.to_string(),
            shortcode: None,
            snapshot: Arc::new(IndexMap::new()),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// The current human-friendly identifier of this list, if one was set.
    pub fn shortcode(&self) -> Option<&str> {
        self.shortcode.as_deref()
    }

    /// An O(1) immutable view of all current rules.
    pub fn snapshot(&self) -> RuleSnapshot {
        Arc::clone(&self.snapshot)
    }

    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }

    /// Ingests a batch of state events and returns the resulting delta, or
    /// `None` when the batch changed nothing. Ingestion is idempotent:
    /// replaying an event that is byte-equal to the stored revision is a
    /// no-change.
    pub fn apply_batch(&mut self, events: &[RoomEvent]) -> Option<RuleDelta> {
        let mut delta = RuleDelta {
            room_id: self.room_id.clone(),
            ..Default::default()
        };
        // Copy-on-write: mutate a private copy, then swap the snapshot once.
        let mut rules = (*self.snapshot).clone();

        for event in events {
            self.apply_one(event, &mut rules, &mut delta);
        }

        if delta.is_empty() {
            return None;
        }
        self.snapshot = Arc::new(rules);
        Some(delta)
    }

    /// Idempotent ingestion of a single state event.
    pub fn apply_state_event(&mut self, event: &RoomEvent) -> Option<RuleDelta> {
        self.apply_batch(std::slice::from_ref(event))
    }

    fn apply_one(
        &mut self,
        event: &RoomEvent,
        rules: &mut IndexMap<RuleKey, Arc<PolicyRule>>,
        delta: &mut RuleDelta,
    ) {
        if event.kind == SHORTCODE_EVENT {
            self.shortcode = event
                .content
                .get("shortcode")
                .and_then(Value::as_str)
                .map(str::to_string);
            return;
        }

        // Not a recognized rule type: no-change.
        let Some(kind) = EntityKind::from_event_type(&event.kind) else {
            return;
        };
        let Some(state_key) = event.state_key.clone() else {
            return;
        };
        let key = RuleKey { kind, state_key };

        // Empty content tombstones the rule at this (kind, state key).
        if event.has_empty_content() {
            if rules.shift_remove(&key).is_some() {
                // A key removed in the same batch it was added to cancels out.
                if let Some(pos) = delta.added.iter().position(|r| r.key() == key) {
                    delta.added.remove(pos);
                } else {
                    delta.modified.retain(|r| r.key() != key);
                    delta.removed.push(key);
                }
            }
            return;
        }

        let rule = match PolicyRule::parse(&self.room_id, kind, event) {
            Ok(rule) => Arc::new(rule),
            Err(e) => {
                warn!("Ignoring malformed policy event in {}: {}", self.room_id, e);
                return;
            }
        };

        // Replaying an event byte-equal to the stored revision: no-change.
        if rules.get(&key).is_some_and(|prior| prior.same_content(&rule)) {
            return;
        }

        let existed = rules
            .insert(key.clone(), Arc::clone(&rule))
            .is_some();
        if existed {
            delta.removed.retain(|k| *k != key);
            if let Some(pos) = delta.added.iter().position(|r| r.key() == key) {
                // Still new within this batch; report the final revision once.
                delta.added[pos] = rule;
            } else {
                delta.modified.retain(|r| r.key() != key);
                delta.modified.push(rule);
            }
        } else if delta.removed.contains(&key) {
            // Removed and re-added within one batch: a modification.
            delta.removed.retain(|k| *k != key);
            delta.modified.push(rule);
        } else {
            delta.added.push(rule);
        }
    }

    /// Enumerates the list's rules of `kind` whose glob matches `entity`,
    /// in insertion order.
    pub fn rules_matching(&self, entity: &str, kind: EntityKind) -> Vec<Arc<PolicyRule>> {
        self.snapshot
            .values()
            .filter(|rule| rule.kind == kind && rule.matches(entity))
            .cloned()
            .collect()
    }
}
