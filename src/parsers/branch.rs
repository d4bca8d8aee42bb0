use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchKind {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchRecord {
    pub name: String,
    pub kind: BranchKind,
    pub current: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    /// Upstream configured but deleted on the remote.
    pub gone: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AheadBehind {
    pub ahead: u32,
    pub behind: u32,
}

static AHEAD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bahead (\d+)").expect("ahead regex"));
static BEHIND_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bbehind (\d+)").expect("behind regex"));

fn capture_count(re: &Regex, text: &str) -> u32 {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Arguments for the upstream comparison read by [`parse_ahead_behind`].
/// The left side of `@{u}...HEAD` is the upstream, so git prints
/// `<behind>\t<ahead>`.
pub fn ahead_behind_args() -> Vec<String> {
    vec![
        "rev-list".to_string(),
        "--left-right".to_string(),
        "--count".to_string(),
        "@{u}...HEAD".to_string(),
    ]
}

/// Reads `<behind>\t<ahead>` as printed for [`ahead_behind_args`]. This is
/// the only place the two numbers are mapped.
pub fn parse_ahead_behind(output: &str) -> Option<AheadBehind> {
    let mut numbers = output.split_whitespace().map(|n| n.parse::<u32>());
    let behind = numbers.next()?.ok()?;
    let ahead = numbers.next()?.ok()?;
    Some(AheadBehind { ahead, behind })
}

/// `[origin/main: ahead 1, behind 2]` → (upstream, ahead, behind, gone).
fn parse_annotation(inner: &str) -> (String, u32, u32, bool) {
    match inner.split_once(": ") {
        Some((upstream, tracking)) => (
            upstream.to_string(),
            capture_count(&AHEAD_RE, tracking),
            capture_count(&BEHIND_RE, tracking),
            tracking.trim() == "gone",
        ),
        None => (inner.to_string(), 0, 0, false),
    }
}

fn parse_line(line: &str) -> Option<BranchRecord> {
    if line.len() < 3 {
        return None;
    }
    let current = line.starts_with('*');
    let body = line.get(2..)?.trim_start();
    // Detached HEAD and symbolic refs are not branches.
    if body.starts_with('(') || body.contains(" -> ") {
        return None;
    }
    let (name, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
    let (kind, name) = match name
        .strip_prefix("remotes/")
        .or_else(|| name.strip_prefix("refs/remotes/"))
    {
        Some(remote) => (BranchKind::Remote, remote),
        None => (BranchKind::Local, name),
    };

    let mut record = BranchRecord {
        name: name.to_string(),
        kind,
        current,
        upstream: None,
        ahead: 0,
        behind: 0,
        gone: false,
    };

    // Remaining text: `<hash> [annotation] subject`.
    let after_hash = rest
        .trim_start()
        .split_once(char::is_whitespace)
        .map(|(_, tail)| tail.trim_start())
        .unwrap_or("");
    if let Some(annotation) = after_hash.strip_prefix('[') {
        if let Some(end) = annotation.find(']') {
            let (upstream, ahead, behind, gone) = parse_annotation(&annotation[..end]);
            record.upstream = Some(upstream);
            record.ahead = ahead;
            record.behind = behind;
            record.gone = gone;
        }
    }
    Some(record)
}

/// `-vv` prints the upstream annotation and the commit subject in the same
/// slot, so a subject like `[WIP] ...` looks like an annotation. Keep a
/// bracket only when it names a listed branch, or a gone branch of a known
/// remote.
fn drop_subject_brackets(records: &mut [BranchRecord]) {
    let listed: HashSet<String> = records.iter().map(|r| r.name.clone()).collect();
    let remotes: HashSet<String> = records
        .iter()
        .filter(|r| r.kind == BranchKind::Remote)
        .filter_map(|r| r.name.split_once('/').map(|(remote, _)| remote.to_string()))
        .collect();
    for record in records.iter_mut() {
        let Some(upstream) = record.upstream.as_deref() else {
            continue;
        };
        let known = listed.contains(upstream)
            || (record.gone
                && upstream
                    .split_once('/')
                    .map_or(false, |(remote, _)| remotes.contains(remote)));
        if record.kind == BranchKind::Remote || !known {
            record.upstream = None;
            record.ahead = 0;
            record.behind = 0;
            record.gone = false;
        }
    }
}

/// Parses `git branch -vv --all`. Remote-tracking refs that a local branch
/// already represents (same short name, or the local branch's upstream) are
/// dropped.
pub fn parse_branches(output: &str) -> Vec<BranchRecord> {
    let mut parsed: Vec<BranchRecord> = output
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(parse_line)
        .collect();
    drop_subject_brackets(&mut parsed);

    let mut represented: HashSet<String> = HashSet::new();
    let mut local_names: HashSet<String> = HashSet::new();
    for record in parsed.iter().filter(|r| r.kind == BranchKind::Local) {
        local_names.insert(record.name.clone());
        if let Some(upstream) = record.upstream.as_ref() {
            represented.insert(upstream.clone());
        }
    }

    let mut seen: HashSet<(BranchKind, String)> = HashSet::new();
    parsed
        .into_iter()
        .filter(|record| {
            if record.kind == BranchKind::Remote {
                let short = record
                    .name
                    .split_once('/')
                    .map(|(_, short)| short)
                    .unwrap_or(&record.name);
                if represented.contains(&record.name) || local_names.contains(short) {
                    return false;
                }
            }
            seen.insert((record.kind, record.name.clone()))
        })
        .collect()
}
