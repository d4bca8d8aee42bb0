//! Typed records from git's script-facing output formats.

pub mod branch;
pub mod diff;
pub mod log;
pub mod status;

pub use branch::{ahead_behind_args, parse_ahead_behind, parse_branches, AheadBehind, BranchKind, BranchRecord};
pub use diff::{parse_patch, split_patches, summarize_patch, truncate_patch, DiffRecord, PatchSummary};
pub use log::{log_format, mark_unpushed, parse_log, CommitRecord};
pub use status::{parse_status, FileStatus, FileStatusKind};

/// Undoes git's C-style path quoting (`"a\tb"`, `"\303\251"`). Unquoted input
/// is returned as is.
pub(crate) fn unquote_path(raw: &str) -> String {
    let Some(inner) = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return raw.to_string();
    };
    let mut bytes = Vec::with_capacity(inner.len());
    let mut chars = inner.bytes().peekable();
    while let Some(byte) = chars.next() {
        if byte != b'\\' {
            bytes.push(byte);
            continue;
        }
        match chars.next() {
            Some(b'n') => bytes.push(b'\n'),
            Some(b't') => bytes.push(b'\t'),
            Some(b'r') => bytes.push(b'\r'),
            Some(b'a') => bytes.push(0x07),
            Some(b'b') => bytes.push(0x08),
            Some(b'f') => bytes.push(0x0c),
            Some(b'v') => bytes.push(0x0b),
            Some(d @ b'0'..=b'7') => {
                let mut value = u32::from(d - b'0');
                for _ in 0..2 {
                    match chars.peek() {
                        Some(next @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(next - b'0');
                            chars.next();
                        }
                        _ => break,
                    }
                }
                bytes.push(value as u8);
            }
            Some(other) => bytes.push(other),
            None => bytes.push(b'\\'),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
