//! Memory-bank index format (spec.md §6).
//!
//! The memory bank itself — walking `<project>/.nightfall/memory/` to
//! discover files — is an external collaborator outside this crate's scope.
//! What belongs here is the pure, round-trippable grammar of `index.md`:
//! a flat list of entries plus a `## Components` sublist, parsed and
//! re-serialized without loss.

use std::sync::OnceLock;

use regex::Regex;

fn entry_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^-\s+(\S+)\s+(?:—|-)\s+(.+)$").expect("valid regex"))
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryIndex {
    pub entries: Vec<IndexEntry>,
    pub components: Vec<IndexEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: String,
    pub description: String,
}

/// Parse `memory/index.md` contents into a [`MemoryIndex`].
///
/// Lines matching `- <path> — <desc>` (em dash or hyphen) are collected into
/// whichever list is currently active. A `## Components` heading switches
/// the active list to `components`; any other `## ` heading switches back
/// to `entries`. All other lines (the leading `# Memory Index` title,
/// blank lines, prose) are ignored.
pub fn parse_index(text: &str) -> MemoryIndex {
    let mut idx = MemoryIndex::default();
    let mut in_components = false;

    for line in text.lines() {
        let trimmed = line.trim_end();
        if trimmed.starts_with("## ") {
            in_components = trimmed.trim_start_matches("## ").trim() == "Components";
            continue;
        }
        if let Some(caps) = entry_line_pattern().captures(trimmed) {
            let entry = IndexEntry {
                path: caps[1].to_string(),
                description: caps[2].to_string(),
            };
            if in_components {
                idx.components.push(entry);
            } else {
                idx.entries.push(entry);
            }
        }
    }
    idx
}

/// Serialize a [`MemoryIndex`] back to `index.md` text such that
/// `parse_index(&serialize_index(idx)) == idx` for any index produced by
/// `parse_index`.
pub fn serialize_index(idx: &MemoryIndex) -> String {
    let mut out = String::from("# Memory Index\n");
    for entry in &idx.entries {
        out.push_str(&format!("- {} — {}\n", entry.path, entry.description));
    }
    out.push_str("## Components\n");
    for entry in &idx.components {
        out.push_str(&format!("- {} — {}\n", entry.path, entry.description));
    }
    out
}
