// src/core/protections.rs

//! The named protection registry. A protection is a behavior toggle layered
//! over the config defaults; moderators flip them at runtime with
//! `enable_protection` / `disable_protection`.

use crate::config::ProtectionsConfig;
use crate::core::errors::PalisadeError;
use dashmap::DashMap;

/// Redact a banned user's recent messages right after the ban lands.
pub const REDACT_ON_BAN: &str = "redact-on-ban";

/// Every protection the daemon knows about.
pub const KNOWN_PROTECTIONS: &[&str] = &[REDACT_ON_BAN];

#[derive(Debug, Default)]
pub struct Protections {
    /// Runtime overrides; absent keys fall through to the config default.
    overrides: DashMap<String, bool>,
    defaults: ProtectionsConfig,
}

impl Protections {
    pub fn new(defaults: ProtectionsConfig) -> Self {
        Self {
            overrides: DashMap::new(),
            defaults,
        }
    }

    fn default_for(&self, name: &str) -> bool {
        match name {
            REDACT_ON_BAN => self.defaults.redact_on_ban,
            _ => false,
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.overrides
            .get(name)
            .map(|e| *e)
            .unwrap_or_else(|| self.default_for(name))
    }

    pub fn enable(&self, name: &str) -> Result<(), PalisadeError> {
        self.set(name, true)
    }

    pub fn disable(&self, name: &str) -> Result<(), PalisadeError> {
        self.set(name, false)
    }

    fn set(&self, name: &str, enabled: bool) -> Result<(), PalisadeError> {
        if !KNOWN_PROTECTIONS.contains(&name) {
            return Err(PalisadeError::UnknownProtection(name.to_string()));
        }
        self.overrides.insert(name.to_string(), enabled);
        Ok(())
    }

    /// (name, enabled) for every known protection, for status output.
    pub fn statuses(&self) -> Vec<(&'static str, bool)> {
        KNOWN_PROTECTIONS
            .iter()
            .map(|name| (*name, self.is_enabled(name)))
            .collect()
    }
}
