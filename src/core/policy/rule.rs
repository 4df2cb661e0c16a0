// src/core/policy/rule.rs

//! The immutable ban-rule record and its state-event encoding.

use crate::core::errors::PalisadeError;
use crate::core::event::RoomEvent;
use crate::core::matcher::Glob;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};

/// State-event types that encode rules, one per entity kind, plus the legacy
/// aliases older policy rooms still carry.
pub const RULE_USER_EVENT: &str = "m.policy.rule.user";
pub const RULE_SERVER_EVENT: &str = "m.policy.rule.server";
pub const RULE_ROOM_EVENT: &str = "m.policy.rule.room";
const LEGACY_RULE_USER_EVENT: &str = "m.room.rule.user";
const LEGACY_RULE_SERVER_EVENT: &str = "m.room.rule.server";
const LEGACY_RULE_ROOM_EVENT: &str = "m.room.rule.room";

/// The state event that names a policy list. Its content carries a single
/// `shortcode` string.
pub const SHORTCODE_EVENT: &str = "org.palisade.shortcode";

/// The closed set of entities a rule can apply to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Server,
    Room,
}

impl EntityKind {
    /// Maps a state-event type onto the rule kind it encodes, if any.
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            RULE_USER_EVENT | LEGACY_RULE_USER_EVENT => Some(EntityKind::User),
            RULE_SERVER_EVENT | LEGACY_RULE_SERVER_EVENT => Some(EntityKind::Server),
            RULE_ROOM_EVENT | LEGACY_RULE_ROOM_EVENT => Some(EntityKind::Room),
            _ => None,
        }
    }
}

/// What a rule asks the daemon to do with matching entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recommendation {
    Ban,
    /// An unrecognized recommendation; carried verbatim but never acted on.
    Other(String),
}

impl From<String> for Recommendation {
    fn from(s: String) -> Self {
        match s.as_str() {
            "m.ban" => Recommendation::Ban,
            _ => Recommendation::Other(s),
        }
    }
}

impl From<Recommendation> for String {
    fn from(r: Recommendation) -> Self {
        match r {
            Recommendation::Ban => "m.ban".to_string(),
            Recommendation::Other(s) => s,
        }
    }
}

/// Identifies a rule within its policy list: one rule per (kind, state key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleKey {
    pub kind: EntityKind,
    pub state_key: String,
}

/// An immutable ban rule materialized from one policy-room state event.
/// Replacement happens by superseding the prior event at the same state key;
/// the record itself is never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub kind: EntityKind,
    /// The entity glob, lowercased at parse time.
    pub pattern: String,
    pub recommendation: Recommendation,
    pub reason: String,
    /// The policy room this rule was authored in.
    pub room_id: String,
    /// The state event that carries the current revision of the rule.
    pub event_id: String,
    pub state_key: String,
}

impl PolicyRule {
    /// Parses a rule out of a policy-room state event. The caller has already
    /// established that the event type encodes `kind` and that the content is
    /// not a tombstone.
    pub fn parse(
        room_id: &str,
        kind: EntityKind,
        event: &RoomEvent,
    ) -> Result<Self, PalisadeError> {
        let state_key = event.state_key.clone().ok_or_else(|| {
            PalisadeError::InvalidRuleEvent {
                event_id: event.event_id.clone(),
                message: "rule event without a state key".to_string(),
            }
        })?;
        let entity = event
            .content
            .get("entity")
            .and_then(Value::as_str)
            .ok_or_else(|| PalisadeError::InvalidRuleEvent {
                event_id: event.event_id.clone(),
                message: "missing 'entity' field".to_string(),
            })?;
        if entity.is_empty() {
            return Err(PalisadeError::InvalidRuleEvent {
                event_id: event.event_id.clone(),
                message: "empty 'entity' pattern".to_string(),
            });
        }
        let recommendation = event
            .content
            .get("recommendation")
            .and_then(Value::as_str)
            .ok_or_else(|| PalisadeError::InvalidRuleEvent {
                event_id: event.event_id.clone(),
                message: "missing 'recommendation' field".to_string(),
            })?;
        let reason = event
            .content
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("<no reason supplied>");

        Ok(Self {
            kind,
            pattern: entity.to_lowercase(),
            recommendation: Recommendation::from(recommendation.to_string()),
            reason: reason.to_string(),
            room_id: room_id.to_string(),
            event_id: event.event_id.clone(),
            state_key,
        })
    }

    pub fn key(&self) -> RuleKey {
        RuleKey {
            kind: self.kind,
            state_key: self.state_key.clone(),
        }
    }

    /// The compiled glob for this rule's pattern; compilation is cached per
    /// pattern string, so this is cheap to call on every evaluation.
    pub fn glob(&self) -> Glob {
        Glob::compile(&self.pattern)
    }

    pub fn matches(&self, entity: &str) -> bool {
        self.glob().matches(entity)
    }

    /// Byte-equality of the fields that define the rule's effect. Replaying
    /// an identical event must be a no-change.
    pub fn same_content(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.pattern == other.pattern
            && self.recommendation == other.recommendation
            && self.reason == other.reason
            && self.state_key == other.state_key
    }
}
