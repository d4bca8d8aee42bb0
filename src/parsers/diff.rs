use super::status::FileStatusKind;
use super::unquote_path;
use crate::constants::diff::{BINARY_MARKERS, MAX_PATCH_BYTES, TRUNCATION_MARKER};
use crate::utils::text::truncate_with_marker;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffRecord {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    pub status: FileStatusKind,
    pub patch: String,
    pub additions: u32,
    pub deletions: u32,
    pub is_binary: bool,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchSummary {
    pub additions: u32,
    pub deletions: u32,
    pub is_binary: bool,
}

/// Counts `+`/`-` lines inside hunks. File headers (`---`/`+++`) come before
/// the first `@@` and are never counted. A binary marker in the header
/// short-circuits the scan.
pub fn summarize_patch(patch: &str) -> PatchSummary {
    let mut summary = PatchSummary::default();
    let mut in_hunk = false;
    for line in patch.lines() {
        if line.starts_with("diff --git ") {
            in_hunk = false;
            continue;
        }
        if line.starts_with("@@") {
            in_hunk = true;
            continue;
        }
        if !in_hunk {
            if BINARY_MARKERS.iter().any(|marker| line.starts_with(marker)) {
                return PatchSummary {
                    additions: 0,
                    deletions: 0,
                    is_binary: true,
                };
            }
            continue;
        }
        if line.starts_with('+') {
            summary.additions += 1;
        } else if line.starts_with('-') {
            summary.deletions += 1;
        }
    }
    summary
}

/// Caps a patch at the fixed ceiling, appending the truncation marker.
pub fn truncate_patch(patch: &str) -> (String, bool) {
    truncate_with_marker(patch, MAX_PATCH_BYTES, TRUNCATION_MARKER)
}

fn strip_side(raw: &str, prefix: &str) -> Option<String> {
    let path = unquote_path(raw.trim_end_matches('\t'));
    if path == "/dev/null" {
        return None;
    }
    Some(path.strip_prefix(prefix).unwrap_or(&path).to_string())
}

/// `a/x b/x` with identical halves; the only reliable split when the path
/// itself contains ` b/`.
fn paths_from_git_header(rest: &str) -> Option<(String, String)> {
    let rest = rest.trim_end();
    if rest.starts_with('"') {
        let end = rest[1..].find("\" ")? + 1;
        let old = unquote_path(&rest[..=end]);
        let new = unquote_path(rest[end + 1..].trim_start());
        return Some((
            old.strip_prefix("a/").unwrap_or(&old).to_string(),
            new.strip_prefix("b/").unwrap_or(&new).to_string(),
        ));
    }
    if rest.len() % 2 == 1 {
        let mid = rest.len() / 2;
        if rest.is_char_boundary(mid) {
            let (old, new) = (&rest[..mid], &rest[mid + 1..]);
            if let (Some(o), Some(n)) = (old.strip_prefix("a/"), new.strip_prefix("b/")) {
                if o == n {
                    return Some((o.to_string(), n.to_string()));
                }
            }
        }
    }
    let split = rest.rfind(" b/")?;
    Some((
        rest[..split].strip_prefix("a/").unwrap_or(&rest[..split]).to_string(),
        rest[split + 3..].to_string(),
    ))
}

/// Builds one record from a single-file patch (one `diff --git` section).
pub fn parse_patch(patch: &str) -> Option<DiffRecord> {
    let mut header_paths: Option<(String, String)> = None;
    let mut old_side: Option<Option<String>> = None;
    let mut new_side: Option<Option<String>> = None;
    let mut rename_from: Option<String> = None;
    let mut rename_to: Option<String> = None;
    let mut status = FileStatusKind::Modified;

    for line in patch.lines() {
        if line.starts_with("@@") {
            break;
        }
        if let Some(rest) = line.strip_prefix("diff --git ") {
            header_paths = paths_from_git_header(rest);
        } else if line.starts_with("new file mode") {
            status = FileStatusKind::Added;
        } else if line.starts_with("deleted file mode") {
            status = FileStatusKind::Deleted;
        } else if let Some(rest) = line.strip_prefix("rename from ") {
            rename_from = Some(unquote_path(rest));
            status = FileStatusKind::Renamed;
        } else if let Some(rest) = line.strip_prefix("rename to ") {
            rename_to = Some(unquote_path(rest));
        } else if let Some(rest) = line.strip_prefix("copy from ") {
            rename_from = Some(unquote_path(rest));
            status = FileStatusKind::Copied;
        } else if let Some(rest) = line.strip_prefix("copy to ") {
            rename_to = Some(unquote_path(rest));
        } else if let Some(rest) = line.strip_prefix("--- ") {
            old_side = Some(strip_side(rest, "a/"));
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            new_side = Some(strip_side(rest, "b/"));
        }
    }

    let path = rename_to
        .clone()
        .or_else(|| new_side.clone().flatten())
        .or_else(|| old_side.clone().flatten())
        .or_else(|| header_paths.as_ref().map(|(_, new)| new.clone()))?;
    let old_path = match status {
        FileStatusKind::Renamed | FileStatusKind::Copied => rename_from
            .or_else(|| old_side.flatten())
            .or_else(|| header_paths.map(|(old, _)| old)),
        _ => None,
    };

    let summary = summarize_patch(patch);
    let (patch, truncated) = truncate_patch(patch);
    Some(DiffRecord {
        path,
        old_path,
        status,
        patch,
        additions: summary.additions,
        deletions: summary.deletions,
        is_binary: summary.is_binary,
        truncated,
    })
}

/// Splits multi-file diff output into per-file records.
pub fn split_patches(output: &str) -> Vec<DiffRecord> {
    let mut sections: Vec<&str> = Vec::new();
    let mut start: Option<usize> = None;
    let mut offset = 0;
    for line in output.split_inclusive('\n') {
        if line.starts_with("diff --git ") {
            if let Some(begin) = start {
                sections.push(&output[begin..offset]);
            }
            start = Some(offset);
        }
        offset += line.len();
    }
    if let Some(begin) = start {
        sections.push(&output[begin..]);
    }
    sections.into_iter().filter_map(parse_patch).collect()
}
