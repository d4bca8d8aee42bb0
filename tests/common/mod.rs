#![allow(dead_code)]

use gitkeeper::app::App;
use gitkeeper::config::Config;
use gitkeeper::services::logger::Logger;
use gitkeeper::services::operator::StaticOperator;
use gitkeeper::services::repository_store::{RepoLifecycle, RepositoryRecord};
use gitkeeper::services::security::Security;
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tokio::sync::Mutex;

pub static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new(prefix: &str) -> Self {
        let path = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).expect("create temp dir");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, rel: &str) -> PathBuf {
        self.path.join(rel)
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Pins author identity and hides the developer's own git config.
pub fn isolate_git(root: &Path) {
    let global = root.join("gitconfig");
    std::fs::write(&global, "[init]\n\tdefaultBranch = main\n").expect("write gitconfig");
    std::env::set_var("GIT_CONFIG_GLOBAL", &global);
    std::env::set_var("GIT_CONFIG_NOSYSTEM", "1");
    std::env::set_var("GIT_AUTHOR_NAME", "Test Author");
    std::env::set_var("GIT_AUTHOR_EMAIL", "author@example.com");
    std::env::set_var("GIT_COMMITTER_NAME", "Test Author");
    std::env::set_var("GIT_COMMITTER_EMAIL", "author@example.com");
}

/// Setup-only git invocation; panics on failure.
pub fn git(cwd: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .arg("-C")
        .arg(cwd)
        .args(args)
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).to_string()
}

/// Bare repository with one commit on `main`.
pub fn seed_remote(root: &Path) -> PathBuf {
    let seed = root.join("seed");
    std::fs::create_dir_all(&seed).expect("seed dir");
    git(&seed, &["init", "-q"]);
    std::fs::write(seed.join("README.md"), "hello\n").expect("readme");
    git(&seed, &["add", "README.md"]);
    git(&seed, &["commit", "-q", "-m", "Initial commit"]);
    git(&seed, &["branch", "-M", "main"]);
    let remote = root.join("remote.git");
    git(root, &["clone", "-q", "--bare", seed.to_str().expect("utf8"), remote.to_str().expect("utf8")]);
    remote
}

pub fn build_app(root: &Path) -> App {
    let config = Config {
        base_dir: root.to_path_buf(),
        credentials_path: root.join("credentials.json"),
        known_hosts_path: root.join("known_hosts"),
        runtime_dir: root.join("run"),
        git_binary: "git".to_string(),
        local_timeout_ms: 20_000,
        network_timeout_ms: 60_000,
        host_key_wait_ms: 1_000,
        auto_accept_host_keys: false,
        askpass_helper: None,
    };
    App::with_security(
        config,
        Logger::new("test"),
        Arc::new(StaticOperator::rejecting()),
        Arc::new(Security::from_key(&[9u8; 32])),
    )
    .expect("app")
}

pub fn record(id: &str, path: PathBuf, remote: Option<&Path>) -> RepositoryRecord {
    RepositoryRecord {
        id: id.to_string(),
        remote_url: remote.map(|p| p.to_string_lossy().to_string()),
        path,
        default_branch: None,
        status: RepoLifecycle::Ready,
        worktree: false,
    }
}
