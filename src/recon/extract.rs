//! Identifier extraction from free-form text.
//!
//! Separator heuristic: a payload containing any comma is split on commas
//! only, otherwise on line breaks. Inside a segment every run of
//! `[A-Za-z0-9_]` is concatenated, so `abc-123` is one identifier (`abc123`).

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::normalize::normalize_strict;

static IDENTIFIER_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_]+").expect("identifier run pattern is valid"));

/// Extract the ordered, deduplicated identifiers from a payload.
///
/// Returned values keep the letter case of their first occurrence; two
/// values never share a normalized key.
pub fn extract(payload: &str) -> Vec<String> {
    extract_fragments(std::iter::once(payload))
}

/// Extract from several independently split fragments (e.g. spreadsheet
/// cells), deduplicating across all of them.
pub fn extract_fragments<'a, I>(fragments: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let mut identifiers = Vec::new();

    for fragment in fragments {
        collect_fragment(fragment, &mut seen, &mut identifiers);
    }

    identifiers
}

fn collect_fragment(fragment: &str, seen: &mut HashSet<String>, identifiers: &mut Vec<String>) {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        return;
    }

    for segment in split_segments(fragment) {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        let joined: String = IDENTIFIER_RUN
            .find_iter(segment)
            .map(|m| m.as_str())
            .collect();

        let key = normalize_strict(&joined);
        if key.is_empty() {
            continue;
        }
        if seen.insert(key) {
            identifiers.push(joined);
        }
    }
}

fn split_segments(payload: &str) -> Box<dyn Iterator<Item = &str> + '_> {
    if payload.contains(',') {
        Box::new(payload.split(','))
    } else {
        // `lines()` handles `\n` and `\r\n`; lone `\r` still needs a split.
        Box::new(payload.lines().flat_map(|line| line.split('\r')))
    }
}
