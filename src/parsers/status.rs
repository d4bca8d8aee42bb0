use super::unquote_path;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatusKind {
    Modified,
    Added,
    Deleted,
    Renamed,
    Copied,
    TypeChanged,
    Untracked,
    Conflicted,
}

impl FileStatusKind {
    fn from_column(column: char) -> Option<Self> {
        match column {
            'M' => Some(Self::Modified),
            'A' => Some(Self::Added),
            'D' => Some(Self::Deleted),
            'R' => Some(Self::Renamed),
            'C' => Some(Self::Copied),
            'T' => Some(Self::TypeChanged),
            'U' => Some(Self::Conflicted),
            '?' => Some(Self::Untracked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    pub status: FileStatusKind,
    pub staged: bool,
}

fn is_unmerged(x: char, y: char) -> bool {
    matches!(
        (x, y),
        ('D', 'D') | ('A', 'U') | ('U', 'D') | ('U', 'A') | ('D', 'U') | ('A', 'A') | ('U', 'U')
    )
}

/// Parses `git status --porcelain` (v1) output.
///
/// A line whose index and worktree columns are both set yields two records,
/// one staged and one unstaged. Paths keep embedded and trailing spaces.
pub fn parse_status(output: &str) -> Vec<FileStatus> {
    let mut entries = Vec::new();
    for raw in output.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line.starts_with("##") || line.len() < 4 {
            continue;
        }
        let mut columns = line.chars();
        let (Some(x), Some(y)) = (columns.next(), columns.next()) else {
            continue;
        };
        let Some(rest) = line.get(3..) else {
            continue;
        };
        if x == '!' {
            continue;
        }
        if x == '?' {
            entries.push(FileStatus {
                path: unquote_path(rest),
                old_path: None,
                status: FileStatusKind::Untracked,
                staged: false,
            });
            continue;
        }
        if is_unmerged(x, y) {
            entries.push(FileStatus {
                path: unquote_path(rest),
                old_path: None,
                status: FileStatusKind::Conflicted,
                staged: false,
            });
            continue;
        }

        let has_arrow = matches!(x, 'R' | 'C') || matches!(y, 'R' | 'C');
        let (path, old_path) = match rest.split_once(" -> ").filter(|_| has_arrow) {
            Some((from, to)) => (unquote_path(to), Some(unquote_path(from))),
            None => (unquote_path(rest), None),
        };

        if let Some(kind) = FileStatusKind::from_column(x) {
            entries.push(FileStatus {
                path: path.clone(),
                old_path: old_path
                    .clone()
                    .filter(|_| matches!(kind, FileStatusKind::Renamed | FileStatusKind::Copied)),
                status: kind,
                staged: true,
            });
        }
        if let Some(kind) = FileStatusKind::from_column(y) {
            entries.push(FileStatus {
                path,
                old_path: old_path
                    .filter(|_| matches!(kind, FileStatusKind::Renamed | FileStatusKind::Copied)),
                status: kind,
                staged: false,
            });
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_columns_yield_staged_and_unstaged_records() {
        let entries = parse_status(" M a.rs\nMM file.ts\nA  new.rs\n");
        let file: Vec<_> = entries.iter().filter(|e| e.path == "file.ts").collect();
        assert_eq!(file.len(), 2);
        assert!(file.iter().any(|e| e.staged && e.status == FileStatusKind::Modified));
        assert!(file.iter().any(|e| !e.staged && e.status == FileStatusKind::Modified));
        assert_eq!(entries.len(), 4);
        assert!(!entries[0].staged);
        assert!(entries[3].staged && entries[3].status == FileStatusKind::Added);
    }

    #[test]
    fn rename_resolves_new_and_old_path() {
        let entries = parse_status("R  old.ts -> new.ts\n");
        assert_eq!(
            entries,
            vec![FileStatus {
                path: "new.ts".to_string(),
                old_path: Some("old.ts".to_string()),
                status: FileStatusKind::Renamed,
                staged: true,
            }]
        );
    }

    #[test]
    fn renamed_then_modified_keeps_old_path_on_staged_record_only() {
        let entries = parse_status("RM src/a.rs -> src/b.rs\n");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].old_path.as_deref(), Some("src/a.rs"));
        assert_eq!(entries[1].path, "src/b.rs");
        assert_eq!(entries[1].old_path, None);
        assert_eq!(entries[1].status, FileStatusKind::Modified);
    }

    #[test]
    fn untracked_entry_is_single_unstaged_record() {
        let entries = parse_status("?? newfile.ts\n");
        assert_eq!(
            entries,
            vec![FileStatus {
                path: "newfile.ts".to_string(),
                old_path: None,
                status: FileStatusKind::Untracked,
                staged: false,
            }]
        );
    }

    #[test]
    fn spaces_in_names_are_preserved() {
        let entries = parse_status(" M docs/release notes.md \n?? my file\r\n");
        assert_eq!(entries[0].path, "docs/release notes.md ");
        assert_eq!(entries[1].path, "my file");
    }

    #[test]
    fn arrow_in_plain_modified_name_is_literal() {
        let entries = parse_status(" M a -> b.txt\n");
        assert_eq!(entries[0].path, "a -> b.txt");
        assert!(entries[0].old_path.is_none());
    }

    #[test]
    fn conflicts_collapse_to_one_record() {
        let entries = parse_status("UU merge.txt\nAA both.txt\n");
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.status == FileStatusKind::Conflicted && !e.staged));
    }

    #[test]
    fn quoted_paths_are_unquoted() {
        let entries = parse_status("?? \"tab\\there.txt\"\n");
        assert_eq!(entries[0].path, "tab\there.txt");
    }

    #[test]
    fn branch_header_and_blank_lines_are_skipped() {
        let entries = parse_status("## main...origin/main [ahead 1]\n\n M x\n");
        assert_eq!(entries.len(), 1);
    }
}
