use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

// -----------------------------------------------------------------------------
// Reserved keys

/// Prefix reserved for stack metadata trailers.
pub const TRAILER_PREFIX: &str = "Stacker-";
/// Trailer carrying the entry's PR branch name.
pub const BRANCH_KEY: &str = "Stacker-Branch";
/// Trailer carrying the entry's PR number.
pub const PR_KEY: &str = "Stacker-PR";
/// Trailer on the bottom commit naming the stack this stack depends on.
pub const DEPENDS_ON_KEY: &str = "Stacker-Depends-On";

/// A well-formed trailer line: `Key: Value` with a conventional key.
static TRAILER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]*: .+$").expect("valid regex"));

// -----------------------------------------------------------------------------
// Codec

/// Locate the terminal trailer block as a line range.
///
/// Scans backward from the end of the message (ignoring trailing blank
/// lines); trailer-shaped lines extend the block and the first blank or
/// malformed line terminates it. The subject line is never a trailer, so a
/// block can start at line 1 at the earliest. A message without a blank line
/// before the block is still accepted (single-paragraph messages are common).
fn block_range(lines: &[&str]) -> Option<Range<usize>> {
    let mut end = lines.len();
    while end > 1 && lines[end - 1].trim().is_empty() {
        end -= 1;
    }
    if end <= 1 {
        return None;
    }
    let mut start = end;
    while start > 1 && TRAILER_LINE.is_match(lines[start - 1]) {
        start -= 1;
    }
    if start == end { None } else { Some(start..end) }
}

/// Split a trailer line into key and value.
fn split_line(line: &str) -> (String, String) {
    let (key, value) = line.split_once(": ").expect("checked by TRAILER_LINE");
    (key.to_string(), value.to_string())
}

/// Merge pairs into an ordered mapping with unique keys.
///
/// The last occurrence of a key in input order is authoritative; the key
/// keeps its first-seen position.
fn merge_pairs(pairs: &mut Vec<(String, String)>, key: String, value: String) {
    match pairs.iter_mut().find(|(k, _)| *k == key) {
        Some((_, v)) => *v = value,
        None => pairs.push((key, value)),
    }
}

/// Parse the trailer block of a commit message into a key/value mapping.
///
/// Duplicate keys collapse to the last occurrence in forward order.
pub fn parse(message: &str) -> Vec<(String, String)> {
    let lines: Vec<&str> = message.lines().collect();
    let mut pairs = Vec::new();
    if let Some(range) = block_range(&lines) {
        for line in &lines[range] {
            let (key, value) = split_line(line);
            merge_pairs(&mut pairs, key, value);
        }
    }
    pairs
}

/// Keep only trailers whose key starts with `prefix`.
pub fn filter_prefixed(pairs: &[(String, String)], prefix: &str) -> Vec<(String, String)> {
    pairs
        .iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .cloned()
        .collect()
}

/// Rewrite the trailer block of a message, merging `new_trailers` over any
/// existing block.
///
/// New values win on key collision; unrelated existing trailers are
/// preserved in place. The body keeps its text with trailing blank lines
/// stripped, followed by a single blank line and the merged block. If the
/// merge result is empty no block is emitted. The returned message carries
/// no trailing newline.
pub fn set(message: &str, new_trailers: &[(String, String)]) -> String {
    let lines: Vec<&str> = message.lines().collect();
    let (body_lines, mut merged) = match block_range(&lines) {
        Some(range) => {
            let mut existing = Vec::new();
            for line in &lines[range.clone()] {
                let (key, value) = split_line(line);
                merge_pairs(&mut existing, key, value);
            }
            (&lines[..range.start], existing)
        }
        None => (&lines[..], Vec::new()),
    };
    for (key, value) in new_trailers {
        merge_pairs(&mut merged, key.clone(), value.clone());
    }

    render(body_lines, &merged)
}

/// Remove only trailers whose key starts with `prefix`, preserving all
/// others. If no trailers remain the block is removed entirely, trailing
/// blank line included.
pub fn strip(message: &str, prefix: &str) -> String {
    let lines: Vec<&str> = message.lines().collect();
    match block_range(&lines) {
        Some(range) => {
            let mut remaining = Vec::new();
            for line in &lines[range.clone()] {
                let (key, value) = split_line(line);
                if !key.starts_with(prefix) {
                    merge_pairs(&mut remaining, key, value);
                }
            }
            render(&lines[..range.start], &remaining)
        }
        None => message.trim_end().to_string(),
    }
}

fn render(body_lines: &[&str], trailers: &[(String, String)]) -> String {
    let body = body_lines.join("\n").trim_end().to_string();
    if trailers.is_empty() {
        return body;
    }
    let block = trailers
        .iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect::<Vec<_>>()
        .join("\n");
    if body.is_empty() {
        block
    } else {
        format!("{body}\n\n{block}")
    }
}

// -----------------------------------------------------------------------------
// Typed stack trailers

/// The closed set of stack trailers, decoded from the raw mapping.
///
/// Unrecognized trailers never pass through this type; they stay in the raw
/// mapping and are preserved verbatim by [`set`] and [`strip`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackTrailers {
    pub branch: Option<String>,
    pub pr: Option<u64>,
    pub depends_on: Option<String>,
}

impl StackTrailers {
    pub fn decode(pairs: &[(String, String)]) -> Self {
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };
        Self {
            branch: get(BRANCH_KEY),
            pr: get(PR_KEY).and_then(|v| v.parse().ok()),
            depends_on: get(DEPENDS_ON_KEY),
        }
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(branch) = &self.branch {
            pairs.push((BRANCH_KEY.to_string(), branch.clone()));
        }
        if let Some(pr) = self.pr {
            pairs.push((PR_KEY.to_string(), pr.to_string()));
        }
        if let Some(depends_on) = &self.depends_on {
            pairs.push((DEPENDS_ON_KEY.to_string(), depends_on.clone()));
        }
        pairs
    }
}
