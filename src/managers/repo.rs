//! Per-repository git operations. Every public operation resolves the
//! repository record, runs git through the executor and returns either a
//! structured record or a [`ClassifiedError`].

use crate::constants::git::{DEFAULT_LOG_LIMIT, DEFAULT_REMOTE, MAX_LOG_LIMIT};
use crate::errors::{clean_error_text, ClassifiedError, ErrorCode, RpcError, ToolError};
use crate::parsers::{
    ahead_behind_args, log_format, mark_unpushed, parse_ahead_behind, parse_branches, parse_log,
    parse_patch, parse_status, split_patches, AheadBehind, BranchRecord, CommitRecord, DiffRecord,
    FileStatus, FileStatusKind,
};
use crate::services::askpass::non_interactive_env;
use crate::services::credentials::{AuthMode, CredentialResolver};
use crate::services::logger::Logger;
use crate::services::process::{CommandResult, ExecOptions, ProcessExecutor};
use crate::services::repository_store::{RepoLifecycle, RepositoryRecord, RepositoryStore};
use crate::utils::args::{
    read_bool, read_optional_str, read_positive_int, read_required_str, read_string_list,
};
use crate::utils::cancel::CancelToken;
use crate::utils::tool_errors::unknown_action_error;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub const REPO_ACTIONS: &[&str] = &[
    "register",
    "unregister",
    "list",
    "clone",
    "status",
    "ahead_behind",
    "diff",
    "commit_diff",
    "fetch",
    "pull",
    "commit",
    "push",
    "stage",
    "unstage",
    "discard",
    "log",
    "reset",
    "branches",
    "create_branch",
    "switch_branch",
    "delete_branch",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoStatus {
    pub branch: Option<String>,
    pub detached: bool,
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub files: Vec<FileStatus>,
    pub clean: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DiffOptions {
    #[serde(default)]
    pub staged: bool,
}

/// Result of fetch/pull: remote chatter with progress noise removed, plus
/// the upstream counts afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub output: String,
    pub ahead: u32,
    pub behind: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushOutcome {
    pub branch: String,
    pub set_upstream: bool,
    pub output: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetMode {
    Soft,
    #[default]
    Mixed,
    Hard,
}

impl ResetMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "soft" => Some(Self::Soft),
            "mixed" => Some(Self::Mixed),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }

    fn flag(self) -> &'static str {
        match self {
            Self::Soft => "--soft",
            Self::Mixed => "--mixed",
            Self::Hard => "--hard",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CloneOptions {
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub depth: Option<u32>,
}

/// What the caller should persist after a clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloneOutcome {
    pub repository_id: String,
    pub status: RepoLifecycle,
    pub default_branch: Option<String>,
}

fn to_args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn with_paths(mut args: Vec<String>, paths: &[String]) -> Vec<String> {
    args.push("--".to_string());
    args.extend(paths.iter().cloned());
    args
}

fn combined_output(result: &CommandResult) -> String {
    clean_error_text(&format!("{}\n{}", result.stdout, result.stderr))
}

fn split_nul(output: &str) -> Vec<String> {
    output
        .split('\0')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Git's ref-name rules as they apply to branch names.
pub fn validate_branch_name(name: &str) -> Result<&str, ToolError> {
    let invalid = |reason: &str| {
        ToolError::invalid_params(format!("Invalid branch name '{}': {}", name, reason))
    };
    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.starts_with('-') {
        return Err(invalid("must not start with '-'"));
    }
    if name == "@" || name == "HEAD" {
        return Err(invalid("reserved name"));
    }
    if name.starts_with('/') || name.ends_with('/') || name.ends_with('.') {
        return Err(invalid("must not start or end with '/' or end with '.'"));
    }
    if name.ends_with(".lock") {
        return Err(invalid("must not end with '.lock'"));
    }
    if name.contains("..") || name.contains("//") || name.contains("@{") {
        return Err(invalid("contains a forbidden sequence"));
    }
    if name.chars().any(|c| {
        c.is_control()
            || c.is_whitespace()
            || matches!(c, '~' | '^' | ':' | '?' | '*' | '[' | '\\')
    }) {
        return Err(invalid("contains a forbidden character"));
    }
    if name.split('/').any(|part| part.starts_with('.')) {
        return Err(invalid("components must not start with '.'"));
    }
    Ok(name)
}

/// Commit-ish arguments never start with `-`, so they cannot be read as
/// options.
pub fn validate_revision(raw: &str) -> Result<&str, ToolError> {
    let revision = raw.trim();
    if revision.is_empty() {
        return Err(ToolError::invalid_params("Revision must be a non-empty string"));
    }
    if revision.starts_with('-') || revision.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ToolError::invalid_params(format!("Invalid revision: {}", revision)));
    }
    Ok(revision)
}

pub fn validate_paths(paths: &[String]) -> Result<(), ToolError> {
    if paths.is_empty() {
        return Err(ToolError::invalid_params("paths must be a non-empty list"));
    }
    if paths.iter().any(|p| p.trim().is_empty() || p.contains('\0')) {
        return Err(ToolError::invalid_params(
            "paths must not contain empty entries",
        ));
    }
    Ok(())
}

pub fn clamp_log_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT)
}

fn empty_diff(path: &str) -> DiffRecord {
    DiffRecord {
        path: path.to_string(),
        old_path: None,
        status: FileStatusKind::Modified,
        patch: String::new(),
        additions: 0,
        deletions: 0,
        is_binary: false,
        truncated: false,
    }
}

fn dir_is_empty(path: &Path) -> std::io::Result<bool> {
    Ok(std::fs::read_dir(path)?.next().is_none())
}

/// Removes what a failed clone left behind. A directory that existed before
/// (it had to be empty) is kept and emptied.
fn remove_partial_clone(path: &Path, existed: bool) -> std::io::Result<()> {
    if !existed {
        return match std::fs::remove_dir_all(path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        };
    }
    for entry in std::fs::read_dir(path)? {
        let entry_path = entry?.path();
        if entry_path.is_dir() {
            std::fs::remove_dir_all(&entry_path)?;
        } else {
            std::fs::remove_file(&entry_path)?;
        }
    }
    Ok(())
}

fn to_json<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|err| RpcError::new(ErrorCode::InternalError, err.to_string()))
}

#[derive(Clone)]
pub struct RepoManager {
    logger: Logger,
    executor: ProcessExecutor,
    resolver: CredentialResolver,
    repositories: Arc<dyn RepositoryStore>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    local_timeout_ms: u64,
    network_timeout_ms: u64,
}

impl RepoManager {
    pub fn new(
        logger: &Logger,
        executor: ProcessExecutor,
        resolver: CredentialResolver,
        repositories: Arc<dyn RepositoryStore>,
    ) -> Self {
        Self {
            logger: logger.child("repo"),
            executor,
            resolver,
            repositories,
            locks: Arc::new(DashMap::new()),
            local_timeout_ms: crate::constants::git::TIMEOUT_LOCAL_MS,
            network_timeout_ms: crate::constants::git::TIMEOUT_NETWORK_MS,
        }
    }

    pub fn with_timeouts(mut self, local_ms: u64, network_ms: u64) -> Self {
        self.local_timeout_ms = local_ms;
        self.network_timeout_ms = network_ms;
        self
    }

    pub fn repositories(&self) -> &Arc<dyn RepositoryStore> {
        &self.repositories
    }

    /// Runs one operation and funnels its failure through the classifier.
    async fn guarded<T, F>(&self, op: &'static str, repo_id: &str, fut: F) -> Result<T, ClassifiedError>
    where
        F: Future<Output = Result<T, ToolError>>,
    {
        match fut.await {
            Ok(value) => Ok(value),
            Err(err) => {
                let classified = ClassifiedError::from(err);
                self.logger.warn(
                    "operation failed",
                    Some(&serde_json::json!({
                        "op": op,
                        "repository": repo_id,
                        "code": classified.code,
                        "status": classified.status,
                        "detail": classified.detail,
                    })),
                );
                Err(classified)
            }
        }
    }

    /// Serializes writers on one repository id.
    async fn write_lock(&self, repo_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let entry = self
                .locks
                .entry(repo_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            Arc::clone(entry.value())
        };
        lock.lock_owned().await
    }

    fn record(&self, repo_id: &str) -> Result<RepositoryRecord, ToolError> {
        self.repositories.get(repo_id).ok_or_else(|| {
            ToolError::not_found(format!(
                "Repository not found: '{}' is not registered",
                repo_id
            ))
        })
    }

    fn local_options(&self, record: &RepositoryRecord, cancel: Option<&CancelToken>) -> ExecOptions {
        ExecOptions::in_dir(&record.path)
            .with_env(non_interactive_env())
            .with_timeout(self.local_timeout_ms)
            .with_cancel(cancel.cloned())
    }

    async fn git(
        &self,
        record: &RepositoryRecord,
        args: &[String],
        cancel: Option<&CancelToken>,
    ) -> Result<String, ToolError> {
        self.executor
            .run_git(args, &self.local_options(record, cancel))
            .await
    }

    async fn git_split(
        &self,
        record: &RepositoryRecord,
        args: &[String],
        cancel: Option<&CancelToken>,
    ) -> Result<CommandResult, ToolError> {
        self.executor
            .run_git_split(args, &self.local_options(record, cancel))
            .await
    }

    /// Runs a remote-touching command with resolved auth. The auth context
    /// (ephemeral key, askpass socket) is torn down before returning on every
    /// path.
    async fn network_git(
        &self,
        record: &RepositoryRecord,
        cwd: &Path,
        mode: AuthMode,
        args: Vec<String>,
        silent: bool,
        cancel: Option<&CancelToken>,
    ) -> Result<CommandResult, ToolError> {
        let mut auth = self
            .resolver
            .resolve(record.remote_url.as_deref(), mode, Some(&record.id), cancel)
            .await?;
        let mut options = ExecOptions::in_dir(cwd)
            .with_env(auth.env())
            .with_timeout(self.network_timeout_ms)
            .with_cancel(cancel.cloned());
        if silent {
            options = options.silent();
        }
        let outcome = self.executor.run_git_split(&args, &options).await;
        auth.cleanup();
        let result = outcome?;
        if !result.success() {
            return Err(ToolError::command_failed(
                result.exit_code,
                &result.stdout,
                &result.stderr,
            ));
        }
        Ok(result)
    }

    async fn current_branch(
        &self,
        record: &RepositoryRecord,
        cancel: Option<&CancelToken>,
    ) -> Result<Option<String>, ToolError> {
        let result = self
            .git_split(record, &to_args(&["symbolic-ref", "--quiet", "--short", "HEAD"]), cancel)
            .await?;
        if result.success() {
            let name = result.stdout.trim();
            return Ok((!name.is_empty()).then(|| name.to_string()));
        }
        // `--quiet` keeps a detached HEAD silent; anything on stderr is real.
        if !result.stderr.trim().is_empty() {
            return Err(ToolError::command_failed(
                result.exit_code,
                &result.stdout,
                &result.stderr,
            ));
        }
        Ok(None)
    }

    async fn upstream(&self, record: &RepositoryRecord, cancel: Option<&CancelToken>) -> Option<String> {
        let args = to_args(&["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"]);
        match self.git_split(record, &args, cancel).await {
            Ok(result) if result.success() => {
                let name = result.stdout.trim();
                (!name.is_empty()).then(|| name.to_string())
            }
            _ => None,
        }
    }

    async fn has_head(&self, record: &RepositoryRecord, cancel: Option<&CancelToken>) -> bool {
        let args = to_args(&["rev-parse", "--verify", "--quiet", "HEAD"]);
        matches!(self.git_split(record, &args, cancel).await, Ok(r) if r.success())
    }

    /// Zeros when there is no upstream or the lookup fails.
    async fn counts(&self, record: &RepositoryRecord, cancel: Option<&CancelToken>) -> AheadBehind {
        match self.git_split(record, &ahead_behind_args(), cancel).await {
            Ok(result) if result.success() => parse_ahead_behind(&result.stdout).unwrap_or_default(),
            Ok(result) => {
                self.logger.debug(
                    "ahead/behind unavailable",
                    Some(&serde_json::json!({
                        "repository": record.id,
                        "stderr": result.stderr.trim(),
                    })),
                );
                AheadBehind::default()
            }
            Err(err) => {
                self.logger.debug(
                    "ahead/behind unavailable",
                    Some(&serde_json::json!({ "repository": record.id, "error": err.message })),
                );
                AheadBehind::default()
            }
        }
    }

    async fn status_of(
        &self,
        record: &RepositoryRecord,
        cancel: Option<&CancelToken>,
    ) -> Result<RepoStatus, ToolError> {
        let args = to_args(&["status", "--porcelain", "--untracked-files=all"]);
        let options = self
            .local_options(record, cancel)
            .with_env(vec![("GIT_OPTIONAL_LOCKS".to_string(), "0".to_string())]);
        let output = self.executor.run_git(&args, &options).await?;
        let files = parse_status(&output);
        let branch = self.current_branch(record, cancel).await?;
        let upstream = match branch {
            Some(_) => self.upstream(record, cancel).await,
            None => None,
        };
        let counts = match upstream {
            Some(_) => self.counts(record, cancel).await,
            None => AheadBehind::default(),
        };
        Ok(RepoStatus {
            detached: branch.is_none(),
            branch,
            upstream,
            ahead: counts.ahead,
            behind: counts.behind,
            clean: files.is_empty(),
            files,
        })
    }

    async fn head_commit(
        &self,
        record: &RepositoryRecord,
        cancel: Option<&CancelToken>,
    ) -> Result<CommitRecord, ToolError> {
        let args = vec!["log".to_string(), "-1".to_string(), log_format()];
        let output = self.git(record, &args, cancel).await?;
        parse_log(&output)
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::internal("Could not read the HEAD commit"))
    }

    async fn branch_listing(
        &self,
        record: &RepositoryRecord,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<BranchRecord>, ToolError> {
        let args = to_args(&["branch", "-vv", "--all", "--no-color"]);
        let output = self.git(record, &args, cancel).await?;
        Ok(parse_branches(&output))
    }

    pub async fn get_status(
        &self,
        repo_id: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<RepoStatus, ClassifiedError> {
        self.guarded("status", repo_id, async {
            let record = self.record(repo_id)?;
            self.status_of(&record, cancel).await
        })
        .await
    }

    pub async fn get_ahead_behind(
        &self,
        repo_id: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<AheadBehind, ClassifiedError> {
        self.guarded("ahead_behind", repo_id, async {
            let record = self.record(repo_id)?;
            Ok(self.counts(&record, cancel).await)
        })
        .await
    }

    /// Diff of one path against the index (or HEAD with `staged`). Untracked
    /// files are shown as additions against an empty file.
    pub async fn get_diff(
        &self,
        repo_id: &str,
        path: &str,
        options: DiffOptions,
        cancel: Option<&CancelToken>,
    ) -> Result<DiffRecord, ClassifiedError> {
        self.guarded("diff", repo_id, async {
            let record = self.record(repo_id)?;
            validate_paths(&[path.to_string()])?;
            let mut args = to_args(&["diff", "--no-color", "--no-ext-diff"]);
            if options.staged {
                args.push("--cached".to_string());
            }
            let output = self
                .git(&record, &with_paths(args, &[path.to_string()]), cancel)
                .await?;
            if let Some(found) = split_patches(&output)
                .into_iter()
                .find(|r| r.path == path)
                .or_else(|| split_patches(&output).into_iter().next())
            {
                return Ok(found);
            }
            if options.staged {
                return Ok(empty_diff(path));
            }

            let untracked = self
                .git(
                    &record,
                    &with_paths(to_args(&["ls-files", "--others", "--exclude-standard"]), &[path.to_string()]),
                    cancel,
                )
                .await?;
            if untracked.trim().is_empty() {
                return Ok(empty_diff(path));
            }
            let args = to_args(&["diff", "--no-color", "--no-ext-diff", "--no-index", "--", "/dev/null", path]);
            let result = self.git_split(&record, &args, cancel).await?;
            // --no-index exits 1 when the files differ.
            if result.exit_code > 1 {
                return Err(ToolError::command_failed(
                    result.exit_code,
                    &result.stdout,
                    &result.stderr,
                ));
            }
            Ok(parse_patch(&result.stdout)
                .map(|mut diff| {
                    diff.path = path.to_string();
                    diff.status = FileStatusKind::Untracked;
                    diff
                })
                .unwrap_or_else(|| empty_diff(path)))
        })
        .await
    }

    pub async fn get_commit_diff(
        &self,
        repo_id: &str,
        hash: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<DiffRecord>, ClassifiedError> {
        self.guarded("commit_diff", repo_id, async {
            let record = self.record(repo_id)?;
            let revision = validate_revision(hash)?;
            let args = to_args(&[
                "show",
                "--format=",
                "--no-color",
                "--no-ext-diff",
                "-M",
                "-m",
                "--first-parent",
                revision,
            ]);
            let output = self.git(&record, &args, cancel).await?;
            Ok(split_patches(&output))
        })
        .await
    }

    /// Background-safe: never prompts.
    pub async fn fetch(
        &self,
        repo_id: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<SyncOutcome, ClassifiedError> {
        self.guarded("fetch", repo_id, async {
            let _guard = self.write_lock(repo_id).await;
            let record = self.record(repo_id)?;
            let result = self
                .network_git(
                    &record,
                    &record.path,
                    AuthMode::NonInteractive,
                    to_args(&["fetch", "--all", "--prune"]),
                    false,
                    cancel,
                )
                .await?;
            let counts = self.counts(&record, cancel).await;
            Ok(SyncOutcome {
                output: combined_output(&result),
                ahead: counts.ahead,
                behind: counts.behind,
            })
        })
        .await
    }

    pub async fn pull(
        &self,
        repo_id: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<SyncOutcome, ClassifiedError> {
        self.guarded("pull", repo_id, async {
            let _guard = self.write_lock(repo_id).await;
            let record = self.record(repo_id)?;
            let result = self
                .network_git(
                    &record,
                    &record.path,
                    AuthMode::Interactive,
                    to_args(&["pull", "--no-rebase", "--no-edit"]),
                    false,
                    cancel,
                )
                .await?;
            let counts = self.counts(&record, cancel).await;
            Ok(SyncOutcome {
                output: combined_output(&result),
                ahead: counts.ahead,
                behind: counts.behind,
            })
        })
        .await
    }

    /// Commits the index, or only `paths` (staging them first) when given.
    pub async fn commit(
        &self,
        repo_id: &str,
        message: &str,
        paths: Option<&[String]>,
        cancel: Option<&CancelToken>,
    ) -> Result<CommitRecord, ClassifiedError> {
        self.guarded("commit", repo_id, async {
            if message.trim().is_empty() {
                return Err(ToolError::invalid_params("Commit message must not be empty"));
            }
            let _guard = self.write_lock(repo_id).await;
            let record = self.record(repo_id)?;
            let mut args = vec!["commit".to_string(), "-m".to_string(), message.to_string()];
            if let Some(paths) = paths.filter(|p| !p.is_empty()) {
                validate_paths(paths)?;
                self.git(&record, &with_paths(to_args(&["add", "-A"]), paths), cancel)
                    .await?;
                args = with_paths(args, paths);
            }
            self.git(&record, &args, cancel).await?;
            let mut head = self.head_commit(&record, cancel).await?;
            head.unpushed = true;
            Ok(head)
        })
        .await
    }

    /// Pushes the current branch. With `set_upstream` the branch is pushed to
    /// the default remote and tracked.
    pub async fn push(
        &self,
        repo_id: &str,
        set_upstream: bool,
        cancel: Option<&CancelToken>,
    ) -> Result<PushOutcome, ClassifiedError> {
        self.guarded("push", repo_id, async {
            let _guard = self.write_lock(repo_id).await;
            let record = self.record(repo_id)?;
            let branch = self
                .current_branch(&record, cancel)
                .await?
                .ok_or_else(|| ToolError::conflict("You are not currently on a branch"))?;
            let args = if set_upstream {
                to_args(&["push", "-u", DEFAULT_REMOTE, branch.as_str()])
            } else {
                to_args(&["push"])
            };
            let result = self
                .network_git(&record, &record.path, AuthMode::Interactive, args, false, cancel)
                .await?;
            Ok(PushOutcome {
                branch,
                set_upstream,
                output: combined_output(&result),
            })
        })
        .await
    }

    pub async fn stage(
        &self,
        repo_id: &str,
        paths: &[String],
        cancel: Option<&CancelToken>,
    ) -> Result<RepoStatus, ClassifiedError> {
        self.guarded("stage", repo_id, async {
            validate_paths(paths)?;
            let _guard = self.write_lock(repo_id).await;
            let record = self.record(repo_id)?;
            self.git(&record, &with_paths(to_args(&["add", "-A"]), paths), cancel)
                .await?;
            self.status_of(&record, cancel).await
        })
        .await
    }

    pub async fn unstage(
        &self,
        repo_id: &str,
        paths: &[String],
        cancel: Option<&CancelToken>,
    ) -> Result<RepoStatus, ClassifiedError> {
        self.guarded("unstage", repo_id, async {
            validate_paths(paths)?;
            let _guard = self.write_lock(repo_id).await;
            let record = self.record(repo_id)?;
            // Before the first commit there is no HEAD to reset to.
            let args = if self.has_head(&record, cancel).await {
                to_args(&["reset", "-q", "HEAD"])
            } else {
                to_args(&["rm", "--cached", "-r", "-q"])
            };
            self.git(&record, &with_paths(args, paths), cancel).await?;
            self.status_of(&record, cancel).await
        })
        .await
    }

    /// Throws away working-tree changes: tracked files are restored from the
    /// index, untracked files are deleted.
    pub async fn discard(
        &self,
        repo_id: &str,
        paths: &[String],
        cancel: Option<&CancelToken>,
    ) -> Result<RepoStatus, ClassifiedError> {
        self.guarded("discard", repo_id, async {
            validate_paths(paths)?;
            let _guard = self.write_lock(repo_id).await;
            let record = self.record(repo_id)?;
            let untracked = split_nul(
                &self
                    .git(
                        &record,
                        &with_paths(to_args(&["ls-files", "-z", "--others", "--exclude-standard"]), paths),
                        cancel,
                    )
                    .await?,
            );
            let tracked = split_nul(
                &self
                    .git(&record, &with_paths(to_args(&["ls-files", "-z"]), paths), cancel)
                    .await?,
            );
            if !untracked.is_empty() {
                self.git(&record, &with_paths(to_args(&["clean", "-f", "-q"]), &untracked), cancel)
                    .await?;
            }
            if !tracked.is_empty() {
                self.git(&record, &with_paths(to_args(&["checkout"]), &tracked), cancel)
                    .await?;
            }
            self.status_of(&record, cancel).await
        })
        .await
    }

    /// Newest first. Commits not yet on the upstream (or on no remote at all
    /// when there is no upstream) are flagged `unpushed`.
    pub async fn get_log(
        &self,
        repo_id: &str,
        limit: Option<usize>,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<CommitRecord>, ClassifiedError> {
        self.guarded("log", repo_id, async {
            let record = self.record(repo_id)?;
            if !self.has_head(&record, cancel).await {
                return Ok(Vec::new());
            }
            let limit = clamp_log_limit(limit);
            let args = vec![
                "log".to_string(),
                format!("--max-count={}", limit),
                "--no-color".to_string(),
                log_format(),
            ];
            let mut commits = parse_log(&self.git(&record, &args, cancel).await?);

            let max_count = format!("--max-count={}", MAX_LOG_LIMIT);
            let unpushed_args = match self.upstream(&record, cancel).await {
                Some(_) => to_args(&["rev-list", max_count.as_str(), "@{u}..HEAD"]),
                None => to_args(&["rev-list", max_count.as_str(), "HEAD", "--not", "--remotes"]),
            };
            let unpushed: HashSet<String> = match self.git(&record, &unpushed_args, cancel).await {
                Ok(output) => output.lines().map(|l| l.trim().to_string()).collect(),
                Err(_) => HashSet::new(),
            };
            mark_unpushed(&mut commits, &unpushed);
            Ok(commits)
        })
        .await
    }

    pub async fn reset_to_commit(
        &self,
        repo_id: &str,
        hash: &str,
        mode: ResetMode,
        cancel: Option<&CancelToken>,
    ) -> Result<CommitRecord, ClassifiedError> {
        self.guarded("reset", repo_id, async {
            let revision = validate_revision(hash)?;
            let _guard = self.write_lock(repo_id).await;
            let record = self.record(repo_id)?;
            self.git(&record, &to_args(&["reset", mode.flag(), "-q", revision]), cancel)
                .await?;
            self.head_commit(&record, cancel).await
        })
        .await
    }

    pub async fn get_branches(
        &self,
        repo_id: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<BranchRecord>, ClassifiedError> {
        self.guarded("branches", repo_id, async {
            let record = self.record(repo_id)?;
            self.branch_listing(&record, cancel).await
        })
        .await
    }

    /// Creates `name` at `start_point` (HEAD by default) and, unless told
    /// otherwise, checks it out.
    pub async fn create_branch(
        &self,
        repo_id: &str,
        name: &str,
        start_point: Option<&str>,
        checkout: bool,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<BranchRecord>, ClassifiedError> {
        self.guarded("create_branch", repo_id, async {
            let name = validate_branch_name(name)?;
            let start = start_point.map(validate_revision).transpose()?;
            let _guard = self.write_lock(repo_id).await;
            let record = self.record(repo_id)?;
            let mut args = if checkout {
                to_args(&["checkout", "-q", "-b", name])
            } else {
                to_args(&["branch", name])
            };
            if let Some(start) = start {
                args.push(start.to_string());
            }
            self.git(&record, &args, cancel).await?;
            self.branch_listing(&record, cancel).await
        })
        .await
    }

    /// Checks out a local branch. A remote-tracking name such as
    /// `origin/feature` with no local counterpart gets a tracking branch.
    pub async fn switch_branch(
        &self,
        repo_id: &str,
        name: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<BranchRecord>, ClassifiedError> {
        self.guarded("switch_branch", repo_id, async {
            let name = validate_branch_name(name)?;
            let _guard = self.write_lock(repo_id).await;
            let record = self.record(repo_id)?;
            let local_ref = format!("refs/heads/{}", name);
            let remote_ref = format!("refs/remotes/{}", name);
            let verify = |reference: String| to_args(&["rev-parse", "--verify", "--quiet", reference.as_str()]);
            let is_local = matches!(self.git_split(&record, &verify(local_ref), cancel).await, Ok(r) if r.success());
            let is_remote = !is_local
                && matches!(self.git_split(&record, &verify(remote_ref), cancel).await, Ok(r) if r.success());
            let args = if is_remote {
                to_args(&["checkout", "-q", "--track", name])
            } else {
                // The trailing `--` keeps a same-named file from being checked out instead.
                to_args(&["checkout", "-q", name, "--"])
            };
            self.git(&record, &args, cancel).await?;
            self.branch_listing(&record, cancel).await
        })
        .await
    }

    pub async fn delete_branch(
        &self,
        repo_id: &str,
        name: &str,
        force: bool,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<BranchRecord>, ClassifiedError> {
        self.guarded("delete_branch", repo_id, async {
            let name = validate_branch_name(name)?;
            let _guard = self.write_lock(repo_id).await;
            let record = self.record(repo_id)?;
            let flag = if force { "-D" } else { "-d" };
            self.git(&record, &to_args(&["branch", flag, name]), cancel)
                .await?;
            self.branch_listing(&record, cancel).await
        })
        .await
    }

    /// Clones `record.remote_url` into `record.path`. The destination must be
    /// missing or empty; on failure whatever the clone created is removed.
    pub async fn clone_repository(
        &self,
        record: &RepositoryRecord,
        options: CloneOptions,
        cancel: Option<&CancelToken>,
    ) -> Result<CloneOutcome, ClassifiedError> {
        self.guarded("clone", &record.id, async {
            record.validate()?;
            let url = record
                .remote_url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .ok_or_else(|| ToolError::invalid_params("remote_url is required to clone"))?;
            let branch = options
                .branch
                .as_deref()
                .map(validate_branch_name)
                .transpose()?;
            let _guard = self.write_lock(&record.id).await;

            let existed = record.path.exists();
            if existed && !dir_is_empty(&record.path)? {
                return Err(ToolError::conflict(format!(
                    "destination path '{}' already exists and is not an empty directory",
                    record.path.display()
                )));
            }
            let parent = record
                .path
                .parent()
                .ok_or_else(|| ToolError::invalid_params("Repository path has no parent directory"))?;
            std::fs::create_dir_all(parent)?;

            let mut args = to_args(&["clone", "--no-progress"]);
            if let Some(branch) = branch {
                args.push("--branch".to_string());
                args.push(branch.to_string());
            }
            if let Some(depth) = options.depth.filter(|d| *d > 0) {
                args.push(format!("--depth={}", depth));
            }
            args.push("--".to_string());
            args.push(url.to_string());
            args.push(record.path.to_string_lossy().to_string());

            self.logger.info(
                "clone started",
                Some(&serde_json::json!({ "repository": record.id, "url": url })),
            );
            if let Err(err) = self
                .network_git(record, parent, AuthMode::Interactive, args, true, cancel)
                .await
            {
                if let Err(cleanup_err) = remove_partial_clone(&record.path, existed) {
                    self.logger.warn(
                        "failed to remove partial clone",
                        Some(&serde_json::json!({
                            "path": record.path,
                            "error": cleanup_err.to_string(),
                        })),
                    );
                }
                return Err(err);
            }
            let default_branch = self.current_branch(record, cancel).await.unwrap_or(None);
            Ok(CloneOutcome {
                repository_id: record.id.clone(),
                status: RepoLifecycle::Ready,
                default_branch,
            })
        })
        .await
    }

    /// JSON entry point used by the RPC server. Parameter problems surface as
    /// invalid-params protocol errors; operation failures carry the
    /// classified error in `data`.
    pub async fn handle_action(&self, args: Value, cancel: Option<CancelToken>) -> Result<Value, RpcError> {
        let cancel = cancel.as_ref();
        let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("");
        match action {
            "register" => {
                let record = parse_record(&args)?;
                self.repositories.upsert(record.clone())?;
                to_json(record)
            }
            "unregister" => {
                let repo_id = read_required_str(&args, "repo_id")?;
                self.locks.remove(repo_id);
                to_json(self.repositories.remove(repo_id))
            }
            "list" => to_json(self.repositories.list()),
            "clone" => {
                let mut record = parse_record(&args)?;
                let options = CloneOptions {
                    branch: read_optional_str(&args, "branch").map(str::to_string),
                    depth: read_positive_int(args.get("depth")).map(|d| d.min(u32::MAX as u64) as u32),
                };
                record.status = RepoLifecycle::Cloning;
                self.repositories.upsert(record.clone())?;
                match self.clone_repository(&record, options, cancel).await {
                    Ok(outcome) => {
                        record.status = outcome.status;
                        record.default_branch = outcome.default_branch.clone();
                        self.repositories.upsert(record)?;
                        to_json(outcome)
                    }
                    Err(err) => {
                        self.repositories.set_status(&record.id, RepoLifecycle::Error);
                        Err(err.into())
                    }
                }
            }
            "status" => to_json(self.get_status(read_required_str(&args, "repo_id")?, cancel).await?),
            "ahead_behind" => {
                to_json(self.get_ahead_behind(read_required_str(&args, "repo_id")?, cancel).await?)
            }
            "diff" => {
                let repo_id = read_required_str(&args, "repo_id")?;
                let path = read_required_str(&args, "path")?;
                let options = DiffOptions {
                    staged: read_bool(&args, "staged", false),
                };
                to_json(self.get_diff(repo_id, path, options, cancel).await?)
            }
            "commit_diff" => {
                let repo_id = read_required_str(&args, "repo_id")?;
                let hash = read_required_str(&args, "hash")?;
                to_json(self.get_commit_diff(repo_id, hash, cancel).await?)
            }
            "fetch" => to_json(self.fetch(read_required_str(&args, "repo_id")?, cancel).await?),
            "pull" => to_json(self.pull(read_required_str(&args, "repo_id")?, cancel).await?),
            "commit" => {
                let repo_id = read_required_str(&args, "repo_id")?;
                let message = read_required_str(&args, "message")?;
                let paths = read_string_list(&args, "paths")?;
                to_json(self.commit(repo_id, message, paths.as_deref(), cancel).await?)
            }
            "push" => {
                let repo_id = read_required_str(&args, "repo_id")?;
                let set_upstream = read_bool(&args, "set_upstream", false);
                to_json(self.push(repo_id, set_upstream, cancel).await?)
            }
            "stage" | "unstage" | "discard" => {
                let repo_id = read_required_str(&args, "repo_id")?;
                let paths = read_string_list(&args, "paths")?
                    .ok_or_else(|| ToolError::invalid_params("paths is required"))?;
                let status = match action {
                    "stage" => self.stage(repo_id, &paths, cancel).await?,
                    "unstage" => self.unstage(repo_id, &paths, cancel).await?,
                    _ => self.discard(repo_id, &paths, cancel).await?,
                };
                to_json(status)
            }
            "log" => {
                let repo_id = read_required_str(&args, "repo_id")?;
                let limit = read_positive_int(args.get("limit")).map(|n| n.min(MAX_LOG_LIMIT as u64) as usize);
                to_json(self.get_log(repo_id, limit, cancel).await?)
            }
            "reset" => {
                let repo_id = read_required_str(&args, "repo_id")?;
                let hash = read_required_str(&args, "hash")?;
                let mode = match read_optional_str(&args, "mode") {
                    Some(raw) => ResetMode::parse(raw).ok_or_else(|| {
                        ToolError::invalid_params("mode must be one of: soft, mixed, hard")
                    })?,
                    None => ResetMode::default(),
                };
                to_json(self.reset_to_commit(repo_id, hash, mode, cancel).await?)
            }
            "branches" => to_json(self.get_branches(read_required_str(&args, "repo_id")?, cancel).await?),
            "create_branch" => {
                let repo_id = read_required_str(&args, "repo_id")?;
                let name = read_required_str(&args, "name")?;
                let start_point = read_optional_str(&args, "start_point");
                let checkout = read_bool(&args, "checkout", true);
                to_json(
                    self.create_branch(repo_id, name, start_point, checkout, cancel)
                        .await?,
                )
            }
            "switch_branch" => {
                let repo_id = read_required_str(&args, "repo_id")?;
                let name = read_required_str(&args, "name")?;
                to_json(self.switch_branch(repo_id, name, cancel).await?)
            }
            "delete_branch" => {
                let repo_id = read_required_str(&args, "repo_id")?;
                let name = read_required_str(&args, "name")?;
                let force = read_bool(&args, "force", false);
                to_json(self.delete_branch(repo_id, name, force, cancel).await?)
            }
            _ => {
                let err = unknown_action_error("repo", args.get("action"), REPO_ACTIONS);
                Err(RpcError::new(ErrorCode::MethodNotFound, err.message).with_data(err.details))
            }
        }
    }
}

fn parse_record(args: &Value) -> Result<RepositoryRecord, ToolError> {
    let record: RepositoryRecord = serde_json::from_value(args.clone())
        .map_err(|err| ToolError::invalid_params(format!("Invalid repository record: {}", err)))?;
    record.validate()?;
    Ok(record)
}
