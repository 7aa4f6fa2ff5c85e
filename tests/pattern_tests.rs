// Integration tests for address patterns
//
// Intersection has to be symmetric, has to reduce to plain matching when one
// side is a concrete address, and has to agree with the regex translation.

use assert2::{check, let_assert};
use osc_dispatch::{Pattern, compile_pattern, patterns_intersect};

const PATTERNS: &[&str] = &[
    "/",
    "/foo",
    "/foo/bar",
    "/f*",
    "/*o",
    "/*",
    "/*/*",
    "/*/bar",
    "/fo?",
    "/???",
    "/[xyz]oo",
    "/[fb]oo",
    "/[!f]oo",
    "/[!fb]oo",
    "/{foo,bar,baz}",
    "/{foo,bar}/*",
    "/{}",
    "/f*o*",
    "/*oo/b?r",
    "/x[ab]*{c,d}",
];

const ADDRESSES: &[&str] = &[
    "/",
    "/f",
    "/fo",
    "/foo",
    "/fob",
    "/boo",
    "/zoo",
    "/bar",
    "/baz",
    "/quux",
    "/foo/bar",
    "/foo/baz",
    "/bar/bar",
    "/xac",
    "/xbzzd",
    "/xc",
    "/f*",
    "/foo/",
];

#[test]
fn test_examples() {
    check!(patterns_intersect("/{foo,bar,baz}", "/bar"));
    check!(!patterns_intersect("/{foo,bar,baz}", "/quux"));
    check!(!patterns_intersect("/f*", "/foo/bar"));
}

#[test]
fn test_intersection_is_symmetric() {
    for a in PATTERNS {
        for b in PATTERNS.iter().chain(ADDRESSES) {
            check!(
                patterns_intersect(a, b) == patterns_intersect(b, a),
                "{a} vs {b}"
            );
        }
    }
}

#[test]
fn test_pattern_intersects_itself_unless_empty() {
    for p in PATTERNS {
        check!(patterns_intersect(p, p) == (*p != "/{}"), "{p}");
    }
}

#[test]
fn test_concrete_address_reduces_to_matching() {
    for p in PATTERNS {
        let pattern = compile_pattern(p);
        for addr in ADDRESSES.iter().filter(|a| !a.contains(['*', '?', '[', '{'])) {
            check!(
                pattern.intersects(&compile_pattern(addr)) == pattern.matches(addr),
                "{p} vs {addr}"
            );
        }
    }
}

#[test]
fn test_regex_agrees_with_matches() {
    for p in PATTERNS {
        let pattern = compile_pattern(p);
        let_assert!(Ok(re) = pattern.to_regex());
        for addr in ADDRESSES {
            check!(re.is_match(addr) == pattern.matches(addr), "{p} ({re}) vs {addr}");
        }
    }
}

#[test]
fn test_wildcards_stay_within_a_segment() {
    for p in ["/*", "/?", "/[!x]", "/f*", "/*o"] {
        let pattern = Pattern::from(p);
        check!(!pattern.matches("/f/o"), "{p}");
        check!(!pattern.matches("//"), "{p}");
    }
    check!(compile_pattern("/*/*").matches("/f/o"));
}

#[test]
fn test_pattern_against_pattern() {
    check!(patterns_intersect("/*/bar", "/foo/*"));
    check!(patterns_intersect("/f?o", "/*o"));
    check!(patterns_intersect("/[ab]*", "/{cat,bat}"));
    check!(!patterns_intersect("/[ab]*", "/{cat,rat}"));
    check!(patterns_intersect("/[!a]", "/[!b]"));
    check!(!patterns_intersect("/[ab]", "/[cd]"));
    check!(patterns_intersect("/[!a]", "/[ab]"));
    check!(!patterns_intersect("/[!ab]", "/[ab]"));
    check!(!patterns_intersect("/????", "/{foo,bar}"));
}
