//! Git history acquisition.
//!
//! Maintains bare, blobless clones under a shared repos directory and
//! enumerates commit metadata from them. Uses the git CLI directly (no
//! libgit2) for portability.
//!
//! Invariants enforced:
//! - One clone per (host, owner, repo); concurrent fetches on the same repo
//!   are serialized by a lock file
//! - Commits with `author_time > as_of` never reach the caller
//! - A fetch that has not succeeded within 24 hours is retried on the next
//!   request; fresher clones are reused as-is

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};

use crate::ecosystem::RepositoryRef;
use crate::error::{OssuaryError, Result};

/// Re-fetch clones whose last successful fetch is older than this.
const FETCH_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// How long a caller waits on another task's in-flight fetch before giving up.
const LOCK_WAIT: Duration = Duration::from_secs(120);

/// Marker file recording the last successful fetch (unix seconds).
const STAMP_FILE: &str = "ossuary-fetch-stamp";

/// One commit as emitted by the history walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub sha: String,
    pub author_name: String,
    pub author_email: String,
    pub author_time: DateTime<Utc>,
    /// Subject and body, as one string.
    pub message: String,
}

/// Manages the shared repos directory.
#[derive(Debug, Clone)]
pub struct GitSource {
    repos_path: PathBuf,
}

impl GitSource {
    pub fn new(repos_path: impl Into<PathBuf>) -> GitSource {
        GitSource {
            repos_path: repos_path.into(),
        }
    }

    /// Local clone path for a repository: `<repos>/<host>/<owner>/<repo>.git`.
    pub fn clone_dir(&self, repo: &RepositoryRef) -> PathBuf {
        self.repos_path
            .join(&repo.host)
            .join(&repo.owner)
            .join(format!("{}.git", repo.repo))
    }

    /// Clone the repository if absent, otherwise fetch when the last
    /// successful fetch is stale. Returns the clone path.
    pub fn sync(&self, repo: &RepositoryRef) -> Result<PathBuf> {
        let dir = self.clone_dir(repo);
        let _lock = RepoLock::acquire(&dir)?;

        if dir.join("HEAD").exists() {
            if stamp_age(&dir).map_or(true, |age| age >= FETCH_MAX_AGE) {
                self.fetch(repo, &dir)?;
            } else {
                debug!("reusing fresh clone at {}", dir.display());
            }
        } else {
            self.clone(repo, &dir)?;
        }
        Ok(dir)
    }

    fn clone(&self, repo: &RepositoryRef, dir: &Path) -> Result<()> {
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                OssuaryError::Transient(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        info!("cloning {} (blobless, history only)", repo.url);
        let output = Command::new("git")
            .args([
                "clone",
                "--bare",
                "--filter=blob:none",
                "--single-branch",
                repo.url.as_str(),
            ])
            .arg(dir)
            .output()
            .map_err(|e| OssuaryError::Transient(format!("failed to invoke git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // A half-created directory would shadow the failure forever.
            let _ = fs::remove_dir_all(dir);
            return Err(classify_transport_failure(&repo.url, &stderr));
        }
        write_stamp(dir);
        Ok(())
    }

    fn fetch(&self, repo: &RepositoryRef, dir: &Path) -> Result<()> {
        let branch = self.git(dir, &["symbolic-ref", "--short", "HEAD"])?;
        let old_head = self.git(dir, &["rev-parse", "HEAD"]).ok();

        info!("fetching {} ({})", repo.url, branch);
        let refspec = format!("+{0}:{0}", branch);
        let output = Command::new("git")
            .arg("--git-dir")
            .arg(dir)
            .args(["fetch", "--filter=blob:none", "--prune", "origin", refspec.as_str()])
            .output()
            .map_err(|e| OssuaryError::Transient(format!("failed to invoke git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_transport_failure(&repo.url, &stderr));
        }
        write_stamp(dir);

        // History-rewrite detection: the force refspec already moved the
        // ref, so a vanished ancestry only warrants a warning.
        if let Some(old) = old_head {
            let ancestry = Command::new("git")
                .arg("--git-dir")
                .arg(dir)
                .args(["merge-base", "--is-ancestor", old.as_str(), "HEAD"])
                .status();
            if !matches!(ancestry, Ok(s) if s.success()) {
                warn!(
                    "history rewrite detected for {}: {} is no longer an ancestor of HEAD",
                    repo.url, old
                );
            }
        }
        Ok(())
    }

    /// Enumerate default-branch commits in author-time descending order.
    ///
    /// When `as_of` is given, commits authored after it are skipped so a
    /// historical evaluation never sees the future. Recent/historical
    /// windowing happens downstream from this single walk.
    pub fn commits(&self, dir: &Path, as_of: Option<DateTime<Utc>>) -> Result<Vec<CommitRecord>> {
        // %x1f separates fields, %x1e separates records; %B is subject+body.
        let raw = self.git(
            dir,
            &["log", "--format=%H%x1f%an%x1f%ae%x1f%at%x1f%B%x1e", "HEAD"],
        )?;

        let mut commits = Vec::new();
        for record in raw.split('\u{1e}') {
            let record = record.trim_matches(['\n', '\r']);
            if record.is_empty() {
                continue;
            }
            let fields: Vec<&str> = record.splitn(5, '\u{1f}').collect();
            if fields.len() != 5 {
                return Err(OssuaryError::Invariant(format!(
                    "malformed git log record in {}",
                    dir.display()
                )));
            }
            let epoch: i64 = fields[3].parse().map_err(|_| {
                OssuaryError::Invariant(format!("unparseable author time '{}'", fields[3]))
            })?;
            let author_time = match Utc.timestamp_opt(epoch, 0) {
                chrono::LocalResult::Single(t) => t,
                _ => {
                    warn!("skipping commit {} with out-of-range timestamp", fields[0]);
                    continue;
                }
            };
            if let Some(cutoff) = as_of {
                if author_time > cutoff {
                    continue;
                }
            }
            commits.push(CommitRecord {
                sha: fields[0].to_string(),
                author_name: fields[1].to_string(),
                author_email: fields[2].to_string(),
                author_time,
                message: fields[4].trim_end().to_string(),
            });
        }

        // git log walks in commit order; the contract is author-time
        // descending with SHA as the tiebreak.
        commits.sort_by(|a, b| b.author_time.cmp(&a.author_time).then(a.sha.cmp(&b.sha)));
        Ok(commits)
    }

    fn git(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("--git-dir")
            .arg(dir)
            .args(args)
            .output()
            .map_err(|e| OssuaryError::Transient(format!("failed to invoke git: {}", e)))?;
        if !output.status.success() {
            return Err(OssuaryError::Transient(format!(
                "git {:?} failed in {}: {}",
                args,
                dir.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Map clone/fetch stderr onto the error taxonomy. Not-found and
/// access-revoked failures are terminal; everything else is retryable.
fn classify_transport_failure(url: &str, stderr: &str) -> OssuaryError {
    let lower = stderr.to_ascii_lowercase();
    let gone = lower.contains("repository not found")
        || lower.contains("dmca")
        || lower.contains("access denied")
        || lower.contains("403");
    if gone {
        OssuaryError::RepoGone(format!("{}: {}", url, stderr.trim()))
    } else {
        OssuaryError::Transient(format!("git transport failure for {}: {}", url, stderr.trim()))
    }
}

fn stamp_age(dir: &Path) -> Option<Duration> {
    let raw = fs::read_to_string(dir.join(STAMP_FILE)).ok()?;
    let stamped = raw.trim().parse::<u64>().ok()?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
    Some(Duration::from_secs(now.saturating_sub(stamped)))
}

fn write_stamp(dir: &Path) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    if let Err(e) = fs::write(dir.join(STAMP_FILE), now.to_string()) {
        warn!("could not write fetch stamp in {}: {}", dir.display(), e);
    }
}

/// Lock file guard serializing fetches per clone directory. The lock is a
/// sibling `<repo>.git.lock` created with O_EXCL; waiting callers poll.
struct RepoLock {
    path: PathBuf,
}

impl RepoLock {
    fn acquire(dir: &Path) -> Result<RepoLock> {
        let path = dir.with_extension("git.lock");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                OssuaryError::Transient(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let start = std::time::Instant::now();
        loop {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(RepoLock { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if start.elapsed() >= LOCK_WAIT {
                        return Err(OssuaryError::Transient(format!(
                            "timed out waiting for repo lock {}",
                            path.display()
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    return Err(OssuaryError::Transient(format!(
                        "cannot create repo lock {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_dir_layout() {
        let src = GitSource::new("/tmp/repos");
        let repo = RepositoryRef::parse("https://github.com/chalk/chalk").unwrap();
        assert_eq!(
            src.clone_dir(&repo),
            PathBuf::from("/tmp/repos/github.com/chalk/chalk.git")
        );
    }

    #[test]
    fn transport_failure_classification() {
        let gone = classify_transport_failure("u", "fatal: repository not found");
        assert!(matches!(gone, OssuaryError::RepoGone(_)));
        let transient = classify_transport_failure("u", "fatal: unable to access: timed out");
        assert!(matches!(transient, OssuaryError::Transient(_)));
    }

    #[test]
    fn lock_is_exclusive_and_released() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("github.com/a/b.git");
        let first = RepoLock::acquire(&dir).unwrap();
        let lock_path = dir.with_extension("git.lock");
        assert!(lock_path.exists());
        drop(first);
        assert!(!lock_path.exists());
        // reacquirable after release
        let _second = RepoLock::acquire(&dir).unwrap();
    }
}
