use crate::constants::git::{LOG_FIELD_SEPARATOR, LOG_RECORD_SEPARATOR};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRecord {
    pub hash: String,
    pub author_name: String,
    pub author_email: String,
    /// Strict ISO-8601 author date.
    pub timestamp: String,
    pub subject: String,
    pub unpushed: bool,
}

/// `--pretty=format:` argument matching [`parse_log`].
pub fn log_format() -> String {
    format!(
        "--pretty=format:%H{sep}%an{sep}%ae{sep}%aI{sep}%s{rec}",
        sep = "%x1f",
        rec = "%x1e"
    )
}

fn looks_like_hash(value: &str) -> bool {
    value.len() >= 7 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parses records produced with [`log_format`]. Only the first four field
/// separators split; anything after them belongs to the subject. Records
/// without a hash are dropped.
pub fn parse_log(output: &str) -> Vec<CommitRecord> {
    output
        .split(|c: char| c == LOG_RECORD_SEPARATOR || c == '\n')
        .map(|record| record.trim_start_matches('\r'))
        .filter(|record| !record.trim().is_empty())
        .filter_map(|record| {
            let mut fields = record.splitn(5, LOG_FIELD_SEPARATOR);
            let hash = fields.next()?.trim();
            if !looks_like_hash(hash) {
                return None;
            }
            let mut next = || fields.next().unwrap_or("").to_string();
            Some(CommitRecord {
                hash: hash.to_string(),
                author_name: next(),
                author_email: next(),
                timestamp: next(),
                subject: next().trim_end_matches('\r').to_string(),
                unpushed: false,
            })
        })
        .collect()
}

/// Flags commits whose hash is in `unpushed`.
pub fn mark_unpushed(records: &mut [CommitRecord], unpushed: &HashSet<String>) {
    for record in records.iter_mut() {
        record.unpushed = unpushed.contains(&record.hash);
    }
}
