//! Host-hint patterns.
//!
//! An optional, ordered list of `pattern → fingerprint` records lets a
//! user pin a key per destination: when a connection hint (derived from
//! the peer process, opaque to the router) matches a pattern, the
//! referenced key is moved to the front of the identity listing.  First
//! match wins; hints never filter, only reorder.
//!
//! Pattern grammar:
//! - `host` — any hint for that host
//! - `host:*` — same, written explicitly
//! - `host:owner/*` — hints of the form `host:owner/<anything>`

use crate::config::HostHintEntry;

/// Find the first pattern matching `hint`.
pub fn first_match<'a>(hints: &'a [HostHintEntry], hint: &str) -> Option<&'a HostHintEntry> {
    hints.iter().find(|entry| matches(&entry.pattern, hint))
}

/// Does `pattern` match the connection hint?
pub fn matches(pattern: &str, hint: &str) -> bool {
    let (pattern_host, pattern_rest) = split_host(pattern);
    let (hint_host, hint_rest) = split_host(hint);

    if !pattern_host.eq_ignore_ascii_case(hint_host) {
        return false;
    }

    match pattern_rest {
        None | Some("*") => true,
        Some(rest) => match rest.strip_suffix('*') {
            Some(prefix) => hint_rest.is_some_and(|h| h.starts_with(prefix)),
            None => hint_rest == Some(rest),
        },
    }
}

fn split_host(s: &str) -> (&str, Option<&str>) {
    match s.split_once(':') {
        Some((host, rest)) => (host, Some(rest)),
        None => (s, None),
    }
}
