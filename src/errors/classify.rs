//! Maps raw git/ssh failure text to a closed set of error categories.
//!
//! Categories are tested in a fixed order and the first match wins. Some
//! messages match more than one category (an ssh `Permission denied
//! (publickey)` is both an authentication and a permission problem), so the
//! order of [`CATEGORY_PATTERNS`] is part of the observable behavior.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::{ToolError, ToolErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GitErrorCode {
    AuthenticationFailure,
    NotFound,
    PermissionDenied,
    PushRejected,
    MergeConflict,
    NoUpstream,
    Timeout,
    NotARepository,
    LockContention,
    DetachedHead,
    BranchExists,
    BranchNotFound,
    UncommittedChanges,
    Unknown,
}

impl GitErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            GitErrorCode::AuthenticationFailure => "authentication-failure",
            GitErrorCode::NotFound => "not-found",
            GitErrorCode::PermissionDenied => "permission-denied",
            GitErrorCode::PushRejected => "push-rejected",
            GitErrorCode::MergeConflict => "merge-conflict",
            GitErrorCode::NoUpstream => "no-upstream",
            GitErrorCode::Timeout => "timeout",
            GitErrorCode::NotARepository => "not-a-repository",
            GitErrorCode::LockContention => "lock-contention",
            GitErrorCode::DetachedHead => "detached-head",
            GitErrorCode::BranchExists => "branch-exists",
            GitErrorCode::BranchNotFound => "branch-not-found",
            GitErrorCode::UncommittedChanges => "uncommitted-changes",
            GitErrorCode::Unknown => "unknown",
        }
    }

    pub fn summary(self) -> &'static str {
        match self {
            GitErrorCode::AuthenticationFailure => {
                "Authentication with the remote failed. Check the configured credentials."
            }
            GitErrorCode::NotFound => "The remote repository could not be found.",
            GitErrorCode::PermissionDenied => {
                "Permission denied. The credentials do not grant access to this operation."
            }
            GitErrorCode::PushRejected => {
                "Push was rejected by the remote. Pull the latest changes and try again."
            }
            GitErrorCode::MergeConflict => {
                "Merge conflict. Resolve the conflicting files and commit the result."
            }
            GitErrorCode::NoUpstream => "The current branch has no upstream branch configured.",
            GitErrorCode::Timeout => "The git operation timed out.",
            GitErrorCode::NotARepository => "The directory is not a git repository.",
            GitErrorCode::LockContention => {
                "Another git process is holding a lock on this repository."
            }
            GitErrorCode::DetachedHead => "HEAD is detached; check out a branch first.",
            GitErrorCode::BranchExists => "A branch with this name already exists.",
            GitErrorCode::BranchNotFound => "The requested branch or revision does not exist.",
            GitErrorCode::UncommittedChanges => {
                "Uncommitted local changes would be lost. Commit or stash them first."
            }
            GitErrorCode::Unknown => "The git operation failed.",
        }
    }

    pub fn status(self) -> u16 {
        match self {
            GitErrorCode::AuthenticationFailure => 401,
            GitErrorCode::PermissionDenied => 403,
            GitErrorCode::NotFound | GitErrorCode::NotARepository | GitErrorCode::BranchNotFound => {
                404
            }
            GitErrorCode::PushRejected
            | GitErrorCode::MergeConflict
            | GitErrorCode::LockContention
            | GitErrorCode::BranchExists
            | GitErrorCode::UncommittedChanges => 409,
            GitErrorCode::NoUpstream | GitErrorCode::DetachedHead => 400,
            GitErrorCode::Timeout => 504,
            GitErrorCode::Unknown => 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{summary}")]
pub struct ClassifiedError {
    pub code: GitErrorCode,
    pub summary: String,
    pub detail: String,
    pub status: u16,
}

impl ClassifiedError {
    pub fn from_code(code: GitErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            summary: code.summary().to_string(),
            detail: detail.into(),
            status: code.status(),
        }
    }
}

impl From<ToolError> for ClassifiedError {
    fn from(err: ToolError) -> Self {
        if err.kind == ToolErrorKind::Timeout {
            return ClassifiedError::from_code(GitErrorCode::Timeout, clean_error_text(&err.message));
        }
        classify(&failure_text(&err))
    }
}

/// The message carries stderr only. git writes some verdicts (merge conflicts
/// during pull) to stdout, so stdout is appended after it.
fn failure_text(err: &ToolError) -> String {
    let stdout = err
        .details
        .as_ref()
        .and_then(|details| details.get("stdout"))
        .and_then(|value| value.as_str())
        .map(str::trim)
        .unwrap_or("");
    if stdout.is_empty() || err.message.contains(stdout) {
        return err.message.clone();
    }
    format!("{}\n{}", err.message, stdout)
}

static COMMAND_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*command failed(?: with (?:exit )?code -?\d+)?\s*:\s*")
        .expect("command prefix regex")
});

static NOISE_LINES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^(remote:\s*)?(enumerating|counting|compressing|receiving|resolving|writing|unpacking|finding|checking) (objects|deltas|sources|connectivity)\b",
        r"(?i)^(remote:\s*)?total \d+ \(delta \d+\)",
        r"(?i)^(remote:\s*)?delta compression using up to",
        r"(?i)^(remote:\s*)?$",
        r"(?i)^from \S+$",
        r"(?i)^to \S+$",
        r"^\s*[*+\-=! ]\s*(\[new (branch|tag|ref)\]|\[up to date\]|[0-9a-f]{7,40}\.\.\.?[0-9a-f]{7,40})\s+\S+\s+->\s+\S+",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("noise line regex"))
    .collect()
});

static CATEGORY_PATTERNS: Lazy<Vec<(GitErrorCode, Regex)>> = Lazy::new(|| {
    let table: &[(GitErrorCode, &str)] = &[
        (
            GitErrorCode::AuthenticationFailure,
            r"authentication failed|could not read (username|password)|invalid username or password|invalid credentials|bad credentials|permission denied \(publickey|host key verification failed|terminal prompts disabled|http basic: access denied|incorrect passphrase",
        ),
        (
            GitErrorCode::NotFound,
            r"repository not found|repository '[^']*' (not found|does not exist)|does not appear to be a git repository|remote: not found|could not resolve host|returned error: 404|project you were looking for could not be found",
        ),
        (
            GitErrorCode::PermissionDenied,
            r"permission denied|access denied|returned error: 403|\b403 forbidden\b|you are not allowed to push|write access to repository not granted|permission to \S+ denied",
        ),
        (
            GitErrorCode::PushRejected,
            r"\[rejected\]|\[remote rejected\]|failed to push some refs|non-fast-forward|updates were rejected|protected branch",
        ),
        (
            GitErrorCode::MergeConflict,
            r"conflict \(|merge conflict|automatic merge failed|fix conflicts and then commit|you have unmerged paths|needs merge|unmerged files",
        ),
        (
            GitErrorCode::NoUpstream,
            r"has no upstream branch|no tracking information|no upstream configured|no such ref was fetched",
        ),
        (
            GitErrorCode::Timeout,
            r"timed out|\btimeout\b|operation too slow",
        ),
        (
            GitErrorCode::NotARepository,
            r"not a git repository",
        ),
        (
            GitErrorCode::LockContention,
            r"index\.lock|unable to create '[^']*\.lock'|another git process seems to be running|cannot lock ref",
        ),
        (
            GitErrorCode::DetachedHead,
            r"head detached|detached head|you are not currently on a branch",
        ),
        (
            GitErrorCode::BranchExists,
            r"a branch named '[^']*' already exists|branch '[^']*' already exists",
        ),
        (
            GitErrorCode::BranchNotFound,
            r"branch '[^']*' not found|did not match any file\(s\) known to git|invalid reference|couldn't find remote ref|unknown revision|not a valid (object|branch) name",
        ),
        (
            GitErrorCode::UncommittedChanges,
            r"local changes to the following files would be overwritten|please commit your changes or stash them|untracked working tree files would be (overwritten|removed)|you have unstaged changes|your index contains uncommitted changes",
        ),
    ];
    table
        .iter()
        .map(|(code, pattern)| {
            (
                *code,
                Regex::new(&format!("(?i){}", pattern)).expect("category regex"),
            )
        })
        .collect()
});

fn is_noise_line(line: &str) -> bool {
    NOISE_LINES.iter().any(|re| re.is_match(line))
}

/// Strips the generic "command failed" prefix and git progress chatter.
pub fn clean_error_text(raw: &str) -> String {
    let without_prefix = COMMAND_PREFIX.replace(raw, "");
    without_prefix
        .split(|c: char| c == '\n' || c == '\r')
        .map(|line| line.trim_end())
        .filter(|line| !line.trim().is_empty() && !is_noise_line(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Classifies raw failure text. Pure and total: never panics, always yields a
/// category (falling back to [`GitErrorCode::Unknown`]).
pub fn classify(raw: &str) -> ClassifiedError {
    let detail = clean_error_text(raw);
    let code = CATEGORY_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(&detail))
        .map(|(code, _)| *code)
        .unwrap_or(GitErrorCode::Unknown);
    ClassifiedError::from_code(code, detail)
}
