//! Scoring orchestration.
//!
//! One entry point, [`Orchestrator::score`]: cache read, repository
//! resolution through the ecosystem's registry, a parallel git/forge
//! fan-out under a per-package deadline, aggregation, sentiment,
//! reputation, scoring, cache write.
//!
//! Invariants enforced:
//! - a cache HIT returns without any network traffic
//! - no repository, no score: `UnresolvedRepo` is surfaced, never a
//!   fabricated result
//! - a partial result (one collector branch failed transiently) is marked
//!   `partial = true` and never silently complete
//! - nothing is written to the cache after the deadline has passed

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::cache::{bucket_for, ScoreCache};
use crate::config::Settings;
use crate::contributors::{self, Aggregation};
use crate::ecosystem::{PackageIdentity, RepositoryRef};
use crate::error::{OssuaryError, Result};
use crate::forge::{self, ForgeCollector, ForgeRecord, OwnerKind};
use crate::gitsource::{CommitRecord, GitSource};
use crate::http::{HttpClient, HttpConfig};
use crate::registry::{self, RegistryRecord};
use crate::reputation::{self, ReputationTier};
use crate::scoring::{self, Score, ScoreConfig, ScoreInputs};
use crate::sentiment;

/// Commit subjects fed to the sentiment pass.
const SENTIMENT_COMMIT_SAMPLE: usize = 200;
/// Recent window length, shared with the aggregator.
const RECENT_WINDOW_DAYS: i64 = 365;

/// One scoring request.
#[derive(Debug, Clone)]
pub struct ScoreRequest {
    pub package: PackageIdentity,
    /// Evaluate as though the present moment were this instant. Future
    /// values are clamped to now.
    pub as_of: Option<DateTime<Utc>>,
    /// Cache freshness window.
    pub max_age: Duration,
    /// Skip the cache read (the write still happens).
    pub force: bool,
}

/// Wires the collectors, the engine and the cache together.
pub struct Orchestrator {
    settings: Settings,
    score_config: ScoreConfig,
    registry_client: HttpClient,
    git: GitSource,
    forge: ForgeCollector,
    cache: ScoreCache,
}

impl Orchestrator {
    /// Build an orchestrator over an injected cache handle.
    pub fn new(settings: Settings, score_config: ScoreConfig, cache: ScoreCache) -> Result<Self> {
        score_config.validate()?;
        let registry_client = HttpClient::new(HttpConfig::default())?;
        let git = GitSource::new(settings.repos_path.clone());
        let forge = ForgeCollector::new(settings.github_token.clone())?;
        Ok(Orchestrator {
            settings,
            score_config,
            registry_client,
            git,
            forge,
            cache,
        })
    }

    pub fn cache(&self) -> &ScoreCache {
        &self.cache
    }

    /// Score one package, honoring the cache and the optional cutoff.
    pub fn score(&self, req: &ScoreRequest) -> Result<Score> {
        let now = Utc::now();
        let as_of = req.as_of.map(|t| t.min(now));
        let effective_as_of = as_of.unwrap_or(now);
        let bucket = bucket_for(as_of);

        if !req.force {
            if let Some(hit) = self.cache.read(
                req.package.ecosystem,
                &req.package.name,
                bucket.as_deref(),
                req.max_age,
                now,
            )? {
                info!("cache hit for {}", req.package);
                return Ok(hit);
            }
        }

        let registry = registry::fetch(&self.registry_client, &req.package)?;
        let repo = resolve_repo(&req.package, &registry)?;
        info!("scoring {} via {}", req.package, repo.url);

        let deadline = Instant::now() + self.settings.deadline;
        let (git_result, forge_result) = self.collect(&repo, effective_as_of, deadline);

        let (commits, forge_record, partial) = match (git_result, forge_result) {
            (Ok(commits), Ok(record)) => (commits, Some(record), false),
            (Ok(commits), Err(OssuaryError::Transient(msg))) => {
                warn!("forge branch degraded for {}: {}", req.package, msg);
                (commits, None, true)
            }
            (Err(OssuaryError::Transient(msg)), Ok(record)) => {
                warn!("git branch degraded for {}: {}", req.package, msg);
                (Vec::new(), Some(record), true)
            }
            (Err(OssuaryError::RepoGone(msg)), _) | (_, Err(OssuaryError::RepoGone(msg))) => {
                return Err(OssuaryError::UnresolvedRepo(msg));
            }
            (Err(e), _) | (_, Err(e)) => return Err(e),
        };

        if Instant::now() >= deadline {
            return Err(OssuaryError::Transient(format!(
                "deadline exceeded while scoring {}",
                req.package
            )));
        }

        let agg = contributors::aggregate(&commits, effective_as_of)?;
        let inputs = self.build_inputs(
            &req.package,
            &registry,
            &commits,
            &agg,
            forge_record.as_ref(),
            effective_as_of,
            partial,
        );

        let score = scoring::evaluate(
            &req.package.name,
            req.package.ecosystem,
            &inputs,
            &self.score_config,
            now,
            as_of,
        )?;
        self.cache.write(&score)?;
        Ok(score)
    }

    /// Fan out the git and forge branches on scoped threads.
    fn collect(
        &self,
        repo: &RepositoryRef,
        as_of: DateTime<Utc>,
        deadline: Instant,
    ) -> (Result<Vec<CommitRecord>>, Result<ForgeRecord>) {
        std::thread::scope(|s| {
            let git_branch = s.spawn(|| -> Result<Vec<CommitRecord>> {
                check_deadline(deadline, "git")?;
                let dir = self.git.sync(repo)?;
                self.git.commits(&dir, Some(as_of))
            });
            let forge_branch = s.spawn(|| -> Result<ForgeRecord> {
                check_deadline(deadline, "forge")?;
                self.forge.collect(repo)
            });
            (join(git_branch), join(forge_branch))
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_inputs(
        &self,
        package: &PackageIdentity,
        registry: &RegistryRecord,
        commits: &[CommitRecord],
        agg: &Aggregation,
        forge_record: Option<&ForgeRecord>,
        as_of: DateTime<Utc>,
        partial: bool,
    ) -> ScoreInputs {
        // Sentiment corpus: recent commit subjects plus forge discussion
        // titles.
        let window_start = as_of - chrono::Duration::days(RECENT_WINDOW_DAYS);
        let subjects: Vec<&str> = commits
            .iter()
            .filter(|c| c.author_time > window_start)
            .take(SENTIMENT_COMMIT_SAMPLE)
            .map(|c| c.message.lines().next().unwrap_or(""))
            .collect();
        let titles: Vec<&str> = forge_record
            .map(|f| f.discussion_titles.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let sentiment =
            sentiment::analyze_corpus(subjects.iter().chain(titles.iter()).copied());

        // Maintainer reputation: profile of the top recent commit author.
        // A failed or missing profile degrades to UNKNOWN, never an error.
        let (tier, evidence) = match forge_record {
            Some(record) => {
                let login = agg
                    .top_recent_email
                    .as_deref()
                    .and_then(forge::login_from_email)
                    .or_else(|| record.contributors.first().map(|c| c.login.clone()))
                    .or_else(|| record.owner.as_ref().map(|o| o.login.clone()));
                match login {
                    Some(login) => match self.forge.user_portfolio(&login) {
                        Ok(portfolio) => {
                            let breakdown = reputation::score_reputation(
                                &portfolio,
                                package.ecosystem,
                                &[package.name.clone()],
                                false,
                                as_of,
                            );
                            let evidence = breakdown.evidence();
                            (breakdown.tier(), Some(evidence))
                        }
                        Err(e) => {
                            warn!("reputation lookup degraded for {}: {}", login, e);
                            (ReputationTier::Unknown, None)
                        }
                    },
                    None => (ReputationTier::Unknown, None),
                }
            }
            None => (ReputationTier::Unknown, None),
        };

        let repo_facts = forge_record.and_then(|f| f.repo.as_ref());
        let owner = forge_record.and_then(|f| f.owner.as_ref());

        ScoreInputs {
            recent_concentration: agg.recent_concentration,
            lifetime_concentration: agg.lifetime_concentration,
            commits_per_year_recent: agg.recent_commits,
            unique_contributors_recent: agg.unique_contributors_recent,
            total_commits: agg.total_commits,
            repo_age_years: agg.repo_age_years,
            last_commit: agg.last_commit,
            downloads_per_week: registry.downloads_per_week,
            sentiment_compound: sentiment.compound,
            frustration_flags: sentiment.frustration_flags,
            reputation_tier: tier,
            reputation_evidence: evidence,
            owner_is_org: owner.is_some_and(|o| o.kind == OwnerKind::Organization),
            org_admin_count: owner.and_then(|o| o.admin_count),
            has_sponsors: repo_facts.is_some_and(|r| r.has_sponsors),
            cii_badge: forge_record.is_some_and(|f| f.cii_badge),
            proportion_shifts: agg.proportion_shifts.clone(),
            as_of,
            partial,
        }
    }
}

/// Resolve the upstream repository for a package from its registry record.
fn resolve_repo(package: &PackageIdentity, registry: &RegistryRecord) -> Result<RepositoryRef> {
    let url = registry.repo_url.as_deref().ok_or_else(|| {
        OssuaryError::UnresolvedRepo(format!("no repository URL published for {}", package))
    })?;
    let repo = RepositoryRef::parse(url).ok_or_else(|| {
        OssuaryError::UnresolvedRepo(format!("unparseable repository URL '{}'", url))
    })?;
    if !repo.is_supported_forge() {
        return Err(OssuaryError::UnresolvedRepo(format!(
            "{} is not on a supported forge",
            repo.url
        )));
    }
    Ok(repo)
}

fn check_deadline(deadline: Instant, branch: &str) -> Result<()> {
    if Instant::now() >= deadline {
        return Err(OssuaryError::Transient(format!(
            "deadline exceeded before {} collection",
            branch
        )));
    }
    Ok(())
}

fn join<T>(handle: std::thread::ScopedJoinHandle<'_, Result<T>>) -> Result<T> {
    handle
        .join()
        .unwrap_or_else(|_| Err(OssuaryError::Invariant("collector thread panicked".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecosystem::Ecosystem;

    #[test]
    fn unresolved_repo_when_registry_has_no_url() {
        let package = PackageIdentity::new(Ecosystem::Npm, "ghost").unwrap();
        let registry = RegistryRecord {
            name: "ghost".to_string(),
            ..RegistryRecord::default()
        };
        let err = resolve_repo(&package, &registry).unwrap_err();
        assert!(matches!(err, OssuaryError::UnresolvedRepo(_)));
    }

    #[test]
    fn unsupported_forge_is_unresolved() {
        let package = PackageIdentity::new(Ecosystem::Pypi, "tool").unwrap();
        let registry = RegistryRecord {
            name: "tool".to_string(),
            repo_url: Some("https://git.sr.ht/~me/tool".to_string()),
            ..RegistryRecord::default()
        };
        let err = resolve_repo(&package, &registry).unwrap_err();
        assert!(matches!(err, OssuaryError::UnresolvedRepo(_)));
    }

    #[test]
    fn github_urls_resolve() {
        let package = PackageIdentity::new(Ecosystem::Npm, "chalk").unwrap();
        let registry = RegistryRecord {
            name: "chalk".to_string(),
            repo_url: Some("https://github.com/chalk/chalk".to_string()),
            ..RegistryRecord::default()
        };
        let repo = resolve_repo(&package, &registry).unwrap();
        assert_eq!(repo.owner, "chalk");
    }
}
