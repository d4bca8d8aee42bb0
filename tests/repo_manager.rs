mod common;
use common::{build_app, git, git_available, isolate_git, record, seed_remote, TempDir, ENV_LOCK};

use gitkeeper::app::App;
use gitkeeper::errors::GitErrorCode;
use gitkeeper::managers::repo::{CloneOptions, DiffOptions, ResetMode};
use gitkeeper::parsers::{BranchKind, FileStatusKind};
use gitkeeper::services::repository_store::RepoLifecycle;
use std::path::PathBuf;

struct Fixture {
    root: TempDir,
    remote: PathBuf,
    app: App,
}

impl Fixture {
    /// Seeded bare remote plus a clone registered as `id`.
    async fn cloned(id: &str) -> Self {
        let root = TempDir::new("gk");
        isolate_git(root.path());
        let remote = seed_remote(root.path());
        let app = build_app(root.path());
        let fixture = Self { root, remote, app };
        fixture.clone_as(id, "work").await;
        fixture
    }

    async fn clone_as(&self, id: &str, dir: &str) -> PathBuf {
        let path = self.root.join(dir);
        let rec = record(id, path.clone(), Some(&self.remote));
        let outcome = self
            .app
            .repos
            .clone_repository(&rec, CloneOptions::default(), None)
            .await
            .expect("clone");
        assert_eq!(outcome.status, RepoLifecycle::Ready);
        self.app.repos.repositories().upsert(rec).expect("register");
        path
    }
}

macro_rules! require_git {
    () => {
        if !git_available() {
            eprintln!("git not available; skipping");
            return;
        }
    };
}

#[tokio::test]
async fn clone_reports_ready_and_clean_status() {
    require_git!();
    let _guard = ENV_LOCK.lock().await;
    let fx = Fixture::cloned("app").await;

    let status = fx.app.repos.get_status("app", None).await.expect("status");
    assert!(status.clean);
    assert!(!status.detached);
    assert_eq!(status.branch.as_deref(), Some("main"));
    assert_eq!(status.upstream.as_deref(), Some("origin/main"));
    assert_eq!((status.ahead, status.behind), (0, 0));
}

#[tokio::test]
async fn stage_commit_push_marks_and_clears_unpushed() {
    require_git!();
    let _guard = ENV_LOCK.lock().await;
    let fx = Fixture::cloned("app").await;
    let work = fx.root.join("work");
    let repos = &fx.app.repos;

    std::fs::write(work.join("notes file.txt"), "one\ntwo\n").expect("write");
    let status = repos.get_status("app", None).await.expect("status");
    assert!(status
        .files
        .iter()
        .any(|f| f.path == "notes file.txt" && f.status == FileStatusKind::Untracked && !f.staged));

    let staged = repos
        .stage("app", &["notes file.txt".to_string()], None)
        .await
        .expect("stage");
    assert!(staged
        .files
        .iter()
        .any(|f| f.path == "notes file.txt" && f.status == FileStatusKind::Added && f.staged));

    let commit = repos.commit("app", "Add notes", None, None).await.expect("commit");
    assert_eq!(commit.subject, "Add notes");
    assert_eq!(commit.author_email, "author@example.com");

    let log = repos.get_log("app", Some(10), None).await.expect("log");
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].hash, commit.hash);
    assert!(log[0].unpushed);
    assert!(!log[1].unpushed);
    assert_eq!(repos.get_ahead_behind("app", None).await.expect("counts").ahead, 1);

    let pushed = repos.push("app", false, None).await.expect("push");
    assert_eq!(pushed.branch, "main");
    let log = repos.get_log("app", None, None).await.expect("log");
    assert!(log.iter().all(|c| !c.unpushed));
    let status = repos.get_status("app", None).await.expect("status");
    assert_eq!((status.ahead, status.behind), (0, 0));
}

#[tokio::test]
async fn restaged_then_modified_file_has_two_records() {
    require_git!();
    let _guard = ENV_LOCK.lock().await;
    let fx = Fixture::cloned("app").await;
    let work = fx.root.join("work");

    std::fs::write(work.join("README.md"), "hello\nstaged\n").expect("write");
    git(&work, &["add", "README.md"]);
    std::fs::write(work.join("README.md"), "hello\nstaged\nunstaged\n").expect("write");

    let status = fx.app.repos.get_status("app", None).await.expect("status");
    let records: Vec<_> = status.files.iter().filter(|f| f.path == "README.md").collect();
    assert_eq!(records.len(), 2);
    assert!(records.iter().any(|f| f.staged));
    assert!(records.iter().any(|f| !f.staged));

    let unstaged = fx
        .app
        .repos
        .get_diff("app", "README.md", DiffOptions::default(), None)
        .await
        .expect("diff");
    assert_eq!((unstaged.additions, unstaged.deletions), (1, 0));
    let staged = fx
        .app
        .repos
        .get_diff("app", "README.md", DiffOptions { staged: true }, None)
        .await
        .expect("diff");
    assert_eq!((staged.additions, staged.deletions), (1, 0));
    assert!(staged.patch.contains("+staged"));
}

#[tokio::test]
async fn untracked_diff_and_commit_diff() {
    require_git!();
    let _guard = ENV_LOCK.lock().await;
    let fx = Fixture::cloned("app").await;
    let work = fx.root.join("work");
    let repos = &fx.app.repos;

    std::fs::write(work.join("new.txt"), "a\nb\nc\n").expect("write");
    let diff = repos
        .get_diff("app", "new.txt", DiffOptions::default(), None)
        .await
        .expect("diff");
    assert_eq!(diff.path, "new.txt");
    assert_eq!(diff.status, FileStatusKind::Untracked);
    assert_eq!(diff.additions, 3);

    let clean = repos
        .get_diff("app", "README.md", DiffOptions::default(), None)
        .await
        .expect("diff");
    assert!(clean.patch.is_empty());

    let commit = repos
        .commit("app", "Add new", Some(&["new.txt".to_string()]), None)
        .await
        .expect("commit");
    let files = repos
        .get_commit_diff("app", &commit.hash, None)
        .await
        .expect("commit diff");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].status, FileStatusKind::Added);
    assert_eq!(files[0].additions, 3);
}

#[tokio::test]
async fn branch_lifecycle_and_classified_failures() {
    require_git!();
    let _guard = ENV_LOCK.lock().await;
    let fx = Fixture::cloned("app").await;
    let repos = &fx.app.repos;

    let branches = repos
        .create_branch("app", "feature/x", None, true, None)
        .await
        .expect("create");
    let current = branches.iter().find(|b| b.current).expect("current");
    assert_eq!(current.name, "feature/x");
    assert_eq!(current.kind, BranchKind::Local);

    let err = repos
        .create_branch("app", "feature/x", None, false, None)
        .await
        .expect_err("duplicate");
    assert_eq!(err.code, GitErrorCode::BranchExists);
    assert_eq!(err.status, 409);

    let err = repos.switch_branch("app", "nope", None).await.expect_err("missing");
    assert_eq!(err.code, GitErrorCode::BranchNotFound);

    let branches = repos.switch_branch("app", "main", None).await.expect("switch");
    assert_eq!(branches.iter().find(|b| b.current).map(|b| b.name.as_str()), Some("main"));

    let branches = repos
        .delete_branch("app", "feature/x", false, None)
        .await
        .expect("delete");
    assert!(branches.iter().all(|b| b.name != "feature/x"));
}

#[tokio::test]
async fn remote_only_branch_is_checked_out_with_tracking() {
    require_git!();
    let _guard = ENV_LOCK.lock().await;
    let fx = Fixture::cloned("app").await;
    let work = fx.root.join("work");
    git(&work, &["push", "-q", "origin", "main:topic"]);
    git(&work, &["fetch", "-q", "origin"]);

    let branches = fx.app.repos.get_branches("app", None).await.expect("branches");
    assert!(branches
        .iter()
        .any(|b| b.kind == BranchKind::Remote && b.name == "origin/topic"));

    let branches = fx
        .app
        .repos
        .switch_branch("app", "origin/topic", None)
        .await
        .expect("switch");
    let current = branches.iter().find(|b| b.current).expect("current");
    assert_eq!(current.name, "topic");
    assert_eq!(current.upstream.as_deref(), Some("origin/topic"));
}

#[tokio::test]
async fn push_on_detached_head_is_rejected_before_running() {
    require_git!();
    let _guard = ENV_LOCK.lock().await;
    let fx = Fixture::cloned("app").await;
    git(&fx.root.join("work"), &["checkout", "-q", "--detach"]);

    let status = fx.app.repos.get_status("app", None).await.expect("status");
    assert!(status.detached);
    assert!(status.branch.is_none());

    let err = fx.app.repos.push("app", true, None).await.expect_err("detached");
    assert_eq!(err.code, GitErrorCode::DetachedHead);
    assert_eq!(err.status, 400);
}

#[tokio::test]
async fn fetch_reports_behind_after_remote_moves() {
    require_git!();
    let _guard = ENV_LOCK.lock().await;
    let fx = Fixture::cloned("app").await;
    let other = fx.clone_as("other", "other").await;

    std::fs::write(other.join("change.txt"), "x\n").expect("write");
    fx.app
        .repos
        .stage("other", &["change.txt".to_string()], None)
        .await
        .expect("stage");
    fx.app.repos.commit("other", "Remote change", None, None).await.expect("commit");
    fx.app.repos.push("other", false, None).await.expect("push");

    let outcome = fx.app.repos.fetch("app", None).await.expect("fetch");
    assert_eq!((outcome.ahead, outcome.behind), (0, 1));
    let pulled = fx.app.repos.pull("app", None).await.expect("pull");
    assert_eq!((pulled.ahead, pulled.behind), (0, 0));
    assert!(fx.root.join("work").join("change.txt").exists());
}

#[tokio::test]
async fn diverged_clones_report_rejection_then_conflict() {
    require_git!();
    let _guard = ENV_LOCK.lock().await;
    let fx = Fixture::cloned("app").await;
    let other = fx.clone_as("other", "other").await;
    let work = fx.root.join("work");
    let repos = &fx.app.repos;
    let readme = ["README.md".to_string()];

    std::fs::write(other.join("README.md"), "hello from other\n").expect("write");
    repos.commit("other", "Other edit", Some(&readme), None).await.expect("commit");
    repos.push("other", false, None).await.expect("push");

    std::fs::write(work.join("README.md"), "hello from work\n").expect("write");
    repos.commit("app", "Work edit", Some(&readme), None).await.expect("commit");

    let err = repos.push("app", false, None).await.expect_err("rejected");
    assert_eq!(err.code, GitErrorCode::PushRejected);
    assert_eq!(err.status, 409);

    let err = repos.pull("app", None).await.expect_err("conflict");
    assert_eq!(err.code, GitErrorCode::MergeConflict);
    assert_eq!(err.status, 409);
    assert!(err.detail.contains("README.md"));
}

#[tokio::test]
async fn reset_and_discard_restore_the_working_tree() {
    require_git!();
    let _guard = ENV_LOCK.lock().await;
    let fx = Fixture::cloned("app").await;
    let work = fx.root.join("work");
    let repos = &fx.app.repos;

    let base = repos.get_log("app", Some(1), None).await.expect("log")[0].hash.clone();
    std::fs::write(work.join("README.md"), "changed\n").expect("write");
    repos
        .commit("app", "Change readme", Some(&["README.md".to_string()]), None)
        .await
        .expect("commit");
    let head = repos
        .reset_to_commit("app", &base, ResetMode::Hard, None)
        .await
        .expect("reset");
    assert_eq!(head.hash, base);
    assert_eq!(std::fs::read_to_string(work.join("README.md")).expect("read"), "hello\n");

    std::fs::write(work.join("README.md"), "dirty\n").expect("write");
    std::fs::write(work.join("scratch file.txt"), "tmp\n").expect("write");
    let status = repos
        .discard(
            "app",
            &["README.md".to_string(), "scratch file.txt".to_string()],
            None,
        )
        .await
        .expect("discard");
    assert!(status.clean, "{:?}", status.files);
    assert!(!work.join("scratch file.txt").exists());

    let err = repos
        .reset_to_commit("app", "--hard", ResetMode::Mixed, None)
        .await
        .expect_err("option-like revision");
    assert_eq!(err.code, GitErrorCode::Unknown);
}

#[tokio::test]
async fn unborn_repository_log_and_unstage() {
    require_git!();
    let _guard = ENV_LOCK.lock().await;
    let root = TempDir::new("gk");
    isolate_git(root.path());
    let app = build_app(root.path());
    let work = root.join("fresh");
    std::fs::create_dir_all(&work).expect("mkdir");
    git(&work, &["init", "-q"]);
    app.repos
        .repositories()
        .upsert(record("fresh", work.clone(), None))
        .expect("register");

    assert!(app.repos.get_log("fresh", None, None).await.expect("log").is_empty());
    std::fs::write(work.join("a.txt"), "a\n").expect("write");
    app.repos.stage("fresh", &["a.txt".to_string()], None).await.expect("stage");
    let status = app
        .repos
        .unstage("fresh", &["a.txt".to_string()], None)
        .await
        .expect("unstage");
    assert_eq!(status.files.len(), 1);
    assert_eq!(status.files[0].status, FileStatusKind::Untracked);
    assert_eq!((status.ahead, status.behind), (0, 0));
}

#[tokio::test]
async fn failed_clone_leaves_nothing_behind() {
    require_git!();
    let _guard = ENV_LOCK.lock().await;
    let root = TempDir::new("gk");
    isolate_git(root.path());
    let app = build_app(root.path());

    let missing = root.join("missing.git");
    let target = root.join("nested/clone");
    let err = app
        .repos
        .clone_repository(&record("ghost", target.clone(), Some(&missing)), CloneOptions::default(), None)
        .await
        .expect_err("missing remote");
    assert_eq!(err.code, GitErrorCode::NotFound);
    assert!(!target.exists());

    let occupied = root.join("occupied");
    std::fs::create_dir_all(&occupied).expect("mkdir");
    std::fs::write(occupied.join("keep.txt"), "keep").expect("write");
    let remote = seed_remote(root.path());
    app.repos
        .clone_repository(&record("busy", occupied.clone(), Some(&remote)), CloneOptions::default(), None)
        .await
        .expect_err("non-empty destination");
    assert!(occupied.join("keep.txt").exists());
}

#[tokio::test]
async fn unknown_and_non_repository_ids_are_classified() {
    require_git!();
    let _guard = ENV_LOCK.lock().await;
    let root = TempDir::new("gk");
    isolate_git(root.path());
    let app = build_app(root.path());

    let err = app.repos.get_status("ghost", None).await.expect_err("unregistered");
    assert_eq!(err.code, GitErrorCode::NotFound);
    assert_eq!(err.status, 404);

    let plain = root.join("plain");
    std::fs::create_dir_all(&plain).expect("mkdir");
    app.repos
        .repositories()
        .upsert(record("plain", plain, None))
        .expect("register");
    std::env::set_var("GIT_CEILING_DIRECTORIES", root.path());
    let err = app.repos.get_status("plain", None).await.expect_err("not a repo");
    std::env::remove_var("GIT_CEILING_DIRECTORIES");
    assert_eq!(err.code, GitErrorCode::NotARepository);
}

#[tokio::test]
async fn concurrent_writes_on_one_repository_are_serialized() {
    require_git!();
    let _guard = ENV_LOCK.lock().await;
    let fx = Fixture::cloned("app").await;
    let work = fx.root.join("work");
    for i in 0..4 {
        std::fs::write(work.join(format!("f{}.txt", i)), format!("{}\n", i)).expect("write");
    }

    let repos = &fx.app.repos;
    let stages = (0..4).map(|i| {
        let path = vec![format!("f{}.txt", i)];
        async move { repos.stage("app", &path, None).await }
    });
    for result in futures::future::join_all(stages).await {
        assert!(result.is_ok(), "{:?}", result.err());
    }
    let status = repos.get_status("app", None).await.expect("status");
    assert_eq!(status.files.iter().filter(|f| f.staged).count(), 4);
}
