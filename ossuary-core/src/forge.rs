//! Forge (GitHub) metadata collector.
//!
//! Acquires repository, owner, contributor, release, and maintainer-profile
//! data for a resolved repository. All requests go through the shared
//! [`HttpClient`], which owns retry and pacing; this module owns only the
//! GitHub shapes and the negative cache.
//!
//! Policy:
//! - not-found responses cache a null record for one hour to stop stampedes
//! - an auth token raises the request rate and unlocks the sponsors lookup

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::{json, Value};

use crate::ecosystem::RepositoryRef;
use crate::error::{OssuaryError, Result};
use crate::http::{HttpClient, HttpConfig};

const API_BASE: &str = "https://api.github.com";
const GRAPHQL_URL: &str = "https://api.github.com/graphql";
const BADGE_API: &str = "https://bestpractices.coreinfrastructure.org/projects.json";

/// Requests per minute against api.github.com without a token. GitHub's
/// unauthenticated quota is 60/hour; staying at one a minute keeps a long
/// batch inside it.
pub const UNAUTHENTICATED_RPM: u32 = 1;
/// Requests per minute with a token (5000/hour quota).
pub const AUTHENTICATED_RPM: u32 = 80;

/// Org admin listings are truncated here; beyond this the exact count does
/// not change any factor.
const ADMIN_COUNT_CAP: usize = 50;
/// Contributor listing size.
const CONTRIBUTOR_SAMPLE: usize = 30;
/// Issue/release title sample for the sentiment pass.
const ISSUE_SAMPLE: usize = 50;

/// How long a not-found repo stays null-cached.
const NEGATIVE_TTL: Duration = Duration::from_secs(60 * 60);

/// Repository owner kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind {
    User,
    Organization,
}

/// Repository-level facts.
#[derive(Debug, Clone, Default)]
pub struct RepoFacts {
    pub stars: u64,
    pub default_branch: Option<String>,
    pub pushed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub archived: bool,
    pub open_issues_count: u64,
    pub releases_count: u64,
    pub has_sponsors: bool,
}

/// Owner-level facts. Admin and member counts are only populated for
/// organizations and are capped.
#[derive(Debug, Clone)]
pub struct OwnerFacts {
    pub login: String,
    pub kind: OwnerKind,
    pub admin_count: Option<u32>,
    pub member_count: Option<u32>,
}

/// One entry from the contributor listing.
#[derive(Debug, Clone)]
pub struct ForgeContributor {
    pub login: String,
    pub contributions: u64,
}

/// A forge user's portfolio, input to reputation scoring.
#[derive(Debug, Clone, Default)]
pub struct UserPortfolio {
    pub login: String,
    pub account_created: Option<DateTime<Utc>>,
    /// (is_fork, stars) per owned repository.
    pub owned_repos: Vec<(bool, u64)>,
    pub sponsor_count: Option<u32>,
    pub orgs: Vec<String>,
}

/// Everything the forge knows about a resolved repository.
#[derive(Debug, Clone, Default)]
pub struct ForgeRecord {
    pub repo: Option<RepoFacts>,
    pub owner: Option<OwnerFacts>,
    pub contributors: Vec<ForgeContributor>,
    pub cii_badge: bool,
    /// Recent issue titles plus release names/notes, for the sentiment pass.
    pub discussion_titles: Vec<String>,
}

/// GitHub API collector.
pub struct ForgeCollector {
    client: HttpClient,
    token: Option<String>,
    /// repo URL → instant the 404 was observed
    negative: Mutex<HashMap<String, Instant>>,
}

impl ForgeCollector {
    pub fn new(token: Option<String>) -> Result<ForgeCollector> {
        let rpm = if token.is_some() {
            AUTHENTICATED_RPM
        } else {
            UNAUTHENTICATED_RPM
        };
        let client = HttpClient::new(HttpConfig {
            host_requests_per_minute: rpm,
            ..HttpConfig::default()
        })?;
        Ok(ForgeCollector {
            client,
            token,
            negative: Mutex::new(HashMap::new()),
        })
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        let mut h = vec![(
            "Accept",
            "application/vnd.github.v3+json".to_string(),
        )];
        if let Some(token) = &self.token {
            h.push(("Authorization", format!("Bearer {}", token)));
        }
        h
    }

    fn get(&self, path: &str) -> Result<Option<Value>> {
        let url = if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", API_BASE, path)
        };
        self.client.get_json(&url, &self.headers())
    }

    /// Collect forge data for a repository. `RepoGone` when the repository
    /// itself is missing (including while null-cached).
    pub fn collect(&self, repo: &RepositoryRef) -> Result<ForgeRecord> {
        if self.is_null_cached(&repo.url) {
            return Err(OssuaryError::RepoGone(format!(
                "{} (cached not-found)",
                repo.url
            )));
        }

        let repo_doc = match self.get(&format!("/repos/{}/{}", repo.owner, repo.repo))? {
            Some(doc) => doc,
            None => {
                self.cache_null(&repo.url);
                return Err(OssuaryError::RepoGone(format!("{} not found", repo.url)));
            }
        };

        let mut record = ForgeRecord::default();

        let owner_login = repo_doc
            .pointer("/owner/login")
            .and_then(Value::as_str)
            .unwrap_or(&repo.owner)
            .to_string();
        let owner_kind = match repo_doc.pointer("/owner/type").and_then(Value::as_str) {
            Some("Organization") => OwnerKind::Organization,
            _ => OwnerKind::User,
        };

        let mut facts = RepoFacts {
            stars: repo_doc
                .get("stargazers_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            default_branch: repo_doc
                .get("default_branch")
                .and_then(Value::as_str)
                .map(str::to_string),
            pushed_at: date_field(&repo_doc, "pushed_at"),
            created_at: date_field(&repo_doc, "created_at"),
            archived: repo_doc
                .get("archived")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            open_issues_count: repo_doc
                .get("open_issues_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            releases_count: 0,
            has_sponsors: false,
        };

        // Owner facts; admin listing requires an org and often a token.
        let mut owner = OwnerFacts {
            login: owner_login.clone(),
            kind: owner_kind,
            admin_count: None,
            member_count: None,
        };
        if owner_kind == OwnerKind::Organization {
            owner.admin_count = self.org_member_count(&owner_login, Some("admin"));
            owner.member_count = self.org_member_count(&owner_login, None);
        }

        // Contributor sample.
        if let Ok(Some(list)) = self.get(&format!(
            "/repos/{}/{}/contributors?per_page={}",
            repo.owner, repo.repo, CONTRIBUTOR_SAMPLE
        )) {
            if let Some(entries) = list.as_array() {
                record.contributors = entries
                    .iter()
                    .filter_map(|c| {
                        Some(ForgeContributor {
                            login: c.get("login")?.as_str()?.to_string(),
                            contributions: c.get("contributions").and_then(Value::as_u64)?,
                        })
                    })
                    .collect();
            }
        }

        // Issue titles for the sentiment corpus.
        if let Ok(Some(list)) = self.get(&format!(
            "/repos/{}/{}/issues?state=all&per_page={}&sort=updated",
            repo.owner, repo.repo, ISSUE_SAMPLE
        )) {
            if let Some(entries) = list.as_array() {
                record
                    .discussion_titles
                    .extend(entries.iter().filter_map(|i| {
                        i.get("title").and_then(Value::as_str).map(str::to_string)
                    }));
            }
        }

        // Releases: count (bounded) and notes for the corpus.
        if let Ok(Some(list)) = self.get(&format!(
            "/repos/{}/{}/releases?per_page={}",
            repo.owner, repo.repo, ISSUE_SAMPLE
        )) {
            if let Some(entries) = list.as_array() {
                facts.releases_count = entries.len() as u64;
                record.discussion_titles.extend(
                    entries
                        .iter()
                        .filter_map(|r| r.get("name").and_then(Value::as_str))
                        .filter(|n| !n.is_empty())
                        .map(str::to_string),
                );
            }
        }

        // Sponsors listing (GraphQL, token only).
        facts.has_sponsors = self.has_sponsors_listing(&owner_login).unwrap_or(false);

        record.cii_badge = self.cii_badge(&repo.url);
        record.repo = Some(facts);
        record.owner = Some(owner);
        Ok(record)
    }

    /// Fetch the portfolio of a forge user, for reputation scoring. Errors
    /// degrade to `None` fields; a missing profile is not a failure.
    pub fn user_portfolio(&self, login: &str) -> Result<UserPortfolio> {
        let mut portfolio = UserPortfolio {
            login: login.to_string(),
            ..UserPortfolio::default()
        };

        let profile = match self.get(&format!("/users/{}", login))? {
            Some(p) => p,
            None => {
                debug!("no profile for {}", login);
                return Ok(portfolio);
            }
        };
        portfolio.account_created = date_field(&profile, "created_at");

        // Owned repositories, paged; ten pages bounds the cost for prolific
        // accounts without losing the thresholds that matter.
        for page in 1..=10 {
            let path = format!(
                "/users/{}/repos?per_page=100&page={}&type=owner",
                login, page
            );
            let Some(list) = self.get(&path)? else { break };
            let Some(entries) = list.as_array() else { break };
            if entries.is_empty() {
                break;
            }
            portfolio.owned_repos.extend(entries.iter().map(|r| {
                (
                    r.get("fork").and_then(Value::as_bool).unwrap_or(false),
                    r.get("stargazers_count")
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                )
            }));
            if entries.len() < 100 {
                break;
            }
        }

        if let Ok(Some(orgs)) = self.get(&format!("/users/{}/orgs", login)) {
            if let Some(entries) = orgs.as_array() {
                portfolio.orgs = entries
                    .iter()
                    .filter_map(|o| o.get("login").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect();
            }
        }

        portfolio.sponsor_count = self.sponsor_count(login);
        Ok(portfolio)
    }

    fn org_member_count(&self, org: &str, role: Option<&str>) -> Option<u32> {
        let role_param = role.map(|r| format!("&role={}", r)).unwrap_or_default();
        let path = format!(
            "/orgs/{}/members?per_page={}{}",
            org, ADMIN_COUNT_CAP, role_param
        );
        match self.get(&path) {
            Ok(Some(Value::Array(members))) => Some(members.len().min(ADMIN_COUNT_CAP) as u32),
            Ok(_) => None,
            Err(e) => {
                debug!("member listing for {} unavailable: {}", org, e);
                None
            }
        }
    }

    fn has_sponsors_listing(&self, login: &str) -> Option<bool> {
        self.token.as_ref()?;
        let query = json!({
            "query": "query($login: String!) { user(login: $login) { hasSponsorsListing } }",
            "variables": { "login": login },
        });
        match self.client.post_json(GRAPHQL_URL, &self.headers(), &query) {
            Ok(Some(doc)) => doc
                .pointer("/data/user/hasSponsorsListing")
                .and_then(Value::as_bool),
            Ok(None) => None,
            Err(e) => {
                debug!("sponsors lookup failed for {}: {}", login, e);
                None
            }
        }
    }

    fn sponsor_count(&self, login: &str) -> Option<u32> {
        self.token.as_ref()?;
        let query = json!({
            "query": "query($login: String!) { user(login: $login) { sponsors { totalCount } } }",
            "variables": { "login": login },
        });
        match self.client.post_json(GRAPHQL_URL, &self.headers(), &query) {
            Ok(Some(doc)) => doc
                .pointer("/data/user/sponsors/totalCount")
                .and_then(Value::as_u64)
                .map(|n| n as u32),
            _ => None,
        }
    }

    /// CII best-practices badge lookup, keyed on the repository URL.
    fn cii_badge(&self, repo_url: &str) -> bool {
        let url = format!("{}?url={}", BADGE_API, repo_url);
        match self.client.get_json(&url, &[]) {
            Ok(Some(Value::Array(projects))) => projects.iter().any(|p| {
                matches!(
                    p.get("badge_level").and_then(Value::as_str),
                    Some("passing") | Some("silver") | Some("gold")
                )
            }),
            Ok(_) => false,
            Err(e) => {
                debug!("CII badge lookup failed for {}: {}", repo_url, e);
                false
            }
        }
    }

    fn is_null_cached(&self, url: &str) -> bool {
        let mut map = self
            .negative
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match map.get(url) {
            Some(seen) if seen.elapsed() < NEGATIVE_TTL => true,
            Some(_) => {
                map.remove(url);
                false
            }
            None => false,
        }
    }

    fn cache_null(&self, url: &str) {
        info!("caching not-found for {} ({}s)", url, NEGATIVE_TTL.as_secs());
        self.negative
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(url.to_string(), Instant::now());
    }
}

fn date_field(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    let raw = value.get(key)?.as_str()?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            warn!("unparseable {} date '{}': {}", key, raw, e);
            None
        }
    }
}

/// Infer a GitHub login from a contributor's canonical key or raw email.
/// Only the relay forms are unambiguous; anything else returns `None`.
pub fn login_from_email(email: &str) -> Option<String> {
    let lower = email.to_ascii_lowercase();
    let local = lower.strip_suffix("@users.noreply.github.com")?;
    let login = match local.split_once('+') {
        Some((_, l)) => l,
        None => local,
    };
    if login.is_empty() {
        None
    } else {
        Some(login.to_string())
    }
}
