// tests/unit_matcher_test.rs

use palisade::core::matcher::Glob;

#[test]
fn test_star_matches_any_run() {
    let glob = Glob::compile("@spam*:evil.example");
    assert!(glob.matches("@spam:evil.example"));
    assert!(glob.matches("@spam1:evil.example"));
    assert!(glob.matches("@spammer-9000:evil.example"));
    assert!(!glob.matches("@ham:evil.example"));
}

#[test]
fn test_question_mark_matches_exactly_one() {
    let glob = Glob::compile("a?c");
    assert!(glob.matches("abc"));
    assert!(glob.matches("axc"));
    assert!(!glob.matches("ac"));
    assert!(!glob.matches("abbc"));
}

#[test]
fn test_literal_patterns_match_exactly() {
    let glob = Glob::compile("evil.example");
    assert!(glob.matches("evil.example"));
    assert!(!glob.matches("evil.example.com"));
    assert!(!glob.matches("very.evil.example"));
}

#[test]
fn test_matching_is_case_insensitive() {
    assert!(Glob::compile("@Spam*:Evil.Example").matches("@spam9:evil.example"));
    assert!(Glob::compile("@spam*").matches("@SPAM1:anywhere"));
    assert!(Glob::compile("EVIL.EXAMPLE").matches("evil.example"));
}

#[test]
fn test_pattern_is_stored_lowercased() {
    let glob = Glob::compile("Evil.*");
    assert_eq!(glob.pattern(), "evil.*");
}

#[test]
fn test_literal_detection() {
    assert!(Glob::compile("evil.example").is_literal());
    assert!(!Glob::compile("*.example").is_literal());
    assert!(!Glob::compile("evil.e?ample").is_literal());
}

#[test]
fn test_compilation_is_cached_per_pattern() {
    // Two compilations of the same pattern string behave identically and
    // compare equal; the second one is served from the cache.
    let first = Glob::compile("@*:bad.server");
    let second = Glob::compile("@*:BAD.server");
    assert_eq!(first, second);
    assert!(second.matches("@anyone:bad.server"));
}

#[test]
fn test_empty_pattern_matches_only_empty() {
    let glob = Glob::compile("");
    assert!(glob.matches(""));
    assert!(!glob.matches("x"));
}
