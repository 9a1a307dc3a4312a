//! Git collector integration tests - real repositories, temp directories.
//!
//! Global test rules:
//! - Real git repos, no fixtures checked in
//! - No fixed SHAs; assert relationships only
//! - Upstream repos serve blobless fetches (uploadpack.allowFilter)

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Duration, TimeZone, Utc};

use ossuary_core::ecosystem::RepositoryRef;
use ossuary_core::gitsource::GitSource;

/// Run a git command in the repository, panicking loudly on failure.
fn git_command(repo_path: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(args)
        .output()
        .unwrap_or_else(|_| panic!("failed to run git {:?}", args));
    if !output.status.success() {
        panic!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Create an upstream repository that supports partial (blobless) clones.
fn create_upstream() -> (tempfile::TempDir, PathBuf) {
    let temp = tempfile::tempdir().expect("failed to create temp directory");
    let path = temp.path().join("upstream");
    std::fs::create_dir_all(&path).unwrap();
    git_command(&path, &["init", "--initial-branch=main"]);
    git_command(&path, &["config", "user.name", "Test User"]);
    git_command(&path, &["config", "user.email", "test@example.com"]);
    git_command(&path, &["config", "commit.gpgsign", "false"]);
    git_command(&path, &["config", "uploadpack.allowFilter", "true"]);
    (temp, path)
}

/// Commit a file change with a fixed author identity and date.
fn commit_at(
    repo_path: &Path,
    file: &str,
    author: (&str, &str),
    when: DateTime<Utc>,
    message: &str,
) {
    let file_path = repo_path.join(file);
    let previous = std::fs::read_to_string(&file_path).unwrap_or_default();
    std::fs::write(&file_path, format!("{}{}\n", previous, message)).unwrap();
    let stamp = when.to_rfc3339();
    let output = Command::new("git")
        .current_dir(repo_path)
        .env("GIT_AUTHOR_NAME", author.0)
        .env("GIT_AUTHOR_EMAIL", author.1)
        .env("GIT_AUTHOR_DATE", &stamp)
        .env("GIT_COMMITTER_NAME", author.0)
        .env("GIT_COMMITTER_EMAIL", author.1)
        .env("GIT_COMMITTER_DATE", &stamp)
        .args(["commit", "-q", "-a", "-m", message])
        .output()
        .expect("failed to run git commit");
    if !output.status.success() {
        // first commit needs an add
        git_command(repo_path, &["add", "."]);
        let retry = Command::new("git")
            .current_dir(repo_path)
            .env("GIT_AUTHOR_NAME", author.0)
            .env("GIT_AUTHOR_EMAIL", author.1)
            .env("GIT_AUTHOR_DATE", &stamp)
            .env("GIT_COMMITTER_NAME", author.0)
            .env("GIT_COMMITTER_EMAIL", author.1)
            .env("GIT_COMMITTER_DATE", &stamp)
            .args(["commit", "-q", "-m", message])
            .output()
            .expect("failed to run git commit");
        assert!(
            retry.status.success(),
            "git commit failed: {}",
            String::from_utf8_lossy(&retry.stderr)
        );
    }
}

fn repo_ref(upstream: &Path) -> RepositoryRef {
    RepositoryRef {
        host: "local.test".to_string(),
        owner: "owner".to_string(),
        repo: "upstream".to_string(),
        url: format!("file://{}", upstream.display()),
    }
}

fn day(year: i32, month: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, d, 12, 0, 0).unwrap()
}

#[test]
fn clone_enumerates_commits_newest_first() {
    let (_guard, upstream) = create_upstream();
    commit_at(&upstream, "a.txt", ("Ann", "ann@example.com"), day(2023, 1, 1), "first");
    commit_at(&upstream, "a.txt", ("Ann", "ann@example.com"), day(2023, 3, 1), "second");
    commit_at(&upstream, "a.txt", ("Bob", "bob@example.com"), day(2023, 6, 1), "third");

    let repos = tempfile::tempdir().unwrap();
    let source = GitSource::new(repos.path());
    let dir = source.sync(&repo_ref(&upstream)).unwrap();
    let commits = source.commits(&dir, None).unwrap();

    assert_eq!(commits.len(), 3);
    assert_eq!(commits[0].message, "third");
    assert_eq!(commits[0].author_name, "Bob");
    assert_eq!(commits[2].message, "first");
    assert!(commits[0].author_time > commits[1].author_time);
    // clone lands under <repos>/<host>/<owner>/<repo>.git
    assert!(dir.ends_with("local.test/owner/upstream.git"));
}

#[test]
fn as_of_excludes_later_commits() {
    let (_guard, upstream) = create_upstream();
    commit_at(&upstream, "a.txt", ("Ann", "ann@example.com"), day(2022, 1, 1), "old");
    commit_at(&upstream, "a.txt", ("Ann", "ann@example.com"), day(2023, 1, 1), "cutoff-day");
    commit_at(&upstream, "a.txt", ("Ann", "ann@example.com"), day(2024, 1, 1), "future");

    let repos = tempfile::tempdir().unwrap();
    let source = GitSource::new(repos.path());
    let dir = source.sync(&repo_ref(&upstream)).unwrap();

    let all = source.commits(&dir, None).unwrap();
    assert_eq!(all.len(), 3);

    let as_of = day(2023, 1, 2);
    let bounded = source.commits(&dir, Some(as_of)).unwrap();
    assert_eq!(bounded.len(), 2);
    assert!(bounded.iter().all(|c| c.author_time <= as_of));
    assert!(bounded.iter().all(|c| c.message != "future"));
}

#[test]
fn second_sync_reuses_fresh_clone() {
    let (_guard, upstream) = create_upstream();
    commit_at(&upstream, "a.txt", ("Ann", "ann@example.com"), day(2023, 1, 1), "first");

    let repos = tempfile::tempdir().unwrap();
    let source = GitSource::new(repos.path());
    let dir1 = source.sync(&repo_ref(&upstream)).unwrap();

    // upstream moves on, but the fetch stamp is fresh: no re-fetch
    commit_at(&upstream, "a.txt", ("Ann", "ann@example.com"), day(2023, 2, 1), "second");
    let dir2 = source.sync(&repo_ref(&upstream)).unwrap();
    assert_eq!(dir1, dir2);
    assert_eq!(source.commits(&dir2, None).unwrap().len(), 1);
}

#[test]
fn stale_stamp_triggers_fetch_of_new_commits() {
    let (_guard, upstream) = create_upstream();
    commit_at(&upstream, "a.txt", ("Ann", "ann@example.com"), day(2023, 1, 1), "first");

    let repos = tempfile::tempdir().unwrap();
    let source = GitSource::new(repos.path());
    let dir = source.sync(&repo_ref(&upstream)).unwrap();
    assert_eq!(source.commits(&dir, None).unwrap().len(), 1);

    commit_at(&upstream, "a.txt", ("Bob", "bob@example.com"), day(2023, 2, 1), "second");

    // age out the fetch stamp to force an update
    std::fs::write(dir.join("ossuary-fetch-stamp"), "0").unwrap();
    let dir = source.sync(&repo_ref(&upstream)).unwrap();

    let commits = source.commits(&dir, None).unwrap();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].message, "second");
}

#[test]
fn missing_upstream_is_an_error() {
    let repos = tempfile::tempdir().unwrap();
    let source = GitSource::new(repos.path());
    let missing = RepositoryRef {
        host: "local.test".to_string(),
        owner: "owner".to_string(),
        repo: "missing".to_string(),
        url: format!("file://{}/does-not-exist", repos.path().display()),
    };
    assert!(source.sync(&missing).is_err());
    // the failed clone must not leave a half-created directory behind
    assert!(!repos
        .path()
        .join("local.test/owner/missing.git/HEAD")
        .exists());
}

#[test]
fn history_rewrite_is_absorbed() {
    let (_guard, upstream) = create_upstream();
    commit_at(&upstream, "a.txt", ("Ann", "ann@example.com"), day(2023, 1, 1), "first");
    commit_at(&upstream, "a.txt", ("Ann", "ann@example.com"), day(2023, 2, 1), "second");

    let repos = tempfile::tempdir().unwrap();
    let source = GitSource::new(repos.path());
    let dir = source.sync(&repo_ref(&upstream)).unwrap();
    assert_eq!(source.commits(&dir, None).unwrap().len(), 2);

    // rewrite upstream history: drop the tip and add a different commit
    git_command(&upstream, &["reset", "--hard", "HEAD~1"]);
    commit_at(&upstream, "b.txt", ("Ann", "ann@example.com"), day(2023, 3, 1), "rewritten");

    std::fs::write(dir.join("ossuary-fetch-stamp"), "0").unwrap();
    let dir = source.sync(&repo_ref(&upstream)).unwrap();
    let commits = source.commits(&dir, None).unwrap();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].message, "rewritten");
}

/// Pipeline-shape check: the aggregator consumes the collector's output
/// directly.
#[test]
fn collector_feeds_aggregator() {
    let (_guard, upstream) = create_upstream();
    let now = Utc::now();
    for i in 0..6 {
        commit_at(
            &upstream,
            "a.txt",
            ("Main", "main@example.com"),
            now - Duration::days(30 + i * 10),
            &format!("main work {}", i),
        );
    }
    commit_at(
        &upstream,
        "a.txt",
        ("Other", "other@example.com"),
        now - Duration::days(45),
        "drive-by fix",
    );

    let repos = tempfile::tempdir().unwrap();
    let source = GitSource::new(repos.path());
    let dir = source.sync(&repo_ref(&upstream)).unwrap();
    let commits = source.commits(&dir, Some(now)).unwrap();

    let agg = ossuary_core::contributors::aggregate(&commits, now).unwrap();
    assert_eq!(agg.total_commits, 7);
    assert_eq!(agg.recent_commits, 7);
    assert_eq!(agg.unique_contributors_recent, 2);
    let conc = agg.recent_concentration.unwrap();
    assert!((conc - 100.0 * 6.0 / 7.0).abs() < 0.01);
    assert_eq!(agg.top_recent_id.as_deref(), Some("main@example.com"));
}
