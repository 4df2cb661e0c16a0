// src/core/matcher.rs

//! Shell-style glob matching for ban-rule patterns: `*` matches any run of
//! characters, `?` matches exactly one, everything else is literal, and
//! matching is case-insensitive. Compilation is cached per pattern string so
//! repeated evaluation of the same rule set stays cheap.

use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use wildmatch::WildMatch;

/// Upper bound on distinct cached patterns. Rule sets are far smaller in
/// practice; the cap only guards against hostile policy rooms.
const MATCHER_CACHE_CAPACITY: usize = 4096;

static MATCHER_CACHE: Lazy<Mutex<LruCache<String, Arc<WildMatch>>>> = Lazy::new(|| {
    Mutex::new(LruCache::new(
        NonZeroUsize::new(MATCHER_CACHE_CAPACITY).unwrap(),
    ))
});

/// A compiled, case-insensitive glob.
#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    matcher: Arc<WildMatch>,
}

impl Glob {
    /// Compiles `pattern`, reusing a previously compiled matcher when the
    /// same pattern string was seen before.
    pub fn compile(pattern: &str) -> Self {
        let lowered = pattern.to_lowercase();
        let matcher = {
            let mut cache = MATCHER_CACHE.lock();
            if let Some(hit) = cache.get(&lowered) {
                Arc::clone(hit)
            } else {
                let compiled = Arc::new(WildMatch::new(&lowered));
                cache.put(lowered.clone(), Arc::clone(&compiled));
                compiled
            }
        };
        Self {
            pattern: lowered,
            matcher,
        }
    }

    /// Evaluates the glob against `entity`, case-insensitively. Entities that
    /// are already lowercase (the common case for room and user ids) are
    /// matched without allocating.
    pub fn matches(&self, entity: &str) -> bool {
        if entity.bytes().any(|b| b.is_ascii_uppercase()) || entity.chars().any(char::is_uppercase)
        {
            self.matcher.matches(&entity.to_lowercase())
        } else {
            self.matcher.matches(entity)
        }
    }

    /// The lowercased pattern this glob was compiled from.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// True when the pattern contains no wildcards and can only ever match
    /// one entity.
    pub fn is_literal(&self) -> bool {
        !self.pattern.contains(['*', '?'])
    }
}

impl PartialEq for Glob {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for Glob {}
