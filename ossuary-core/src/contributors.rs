//! Contributor aggregation over raw commit history.
//!
//! Builds the recent and lifetime contributor tables the scoring engine
//! consumes, including concentration figures and the proportion-shift table
//! behind the takeover detector.
//!
//! Invariants enforced:
//! - recent + historical commit counts partition all commits at or before
//!   the evaluation instant
//! - bot commits never enter concentration, contributor counts, or shifts
//! - output ordering is deterministic: commit count desc, first commit asc,
//!   id asc

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::error::{OssuaryError, Result};
use crate::gitsource::CommitRecord;
use crate::identity::{self, IdentityResolver, Observation};

/// The recent window is exactly twelve months before the evaluation instant.
const RECENT_WINDOW_DAYS: i64 = 365;

/// Maturity thresholds. A project is mature when it is at least five years
/// old, has at least thirty commits, and its last commit is within five
/// years of the evaluation instant.
const MATURITY_MIN_AGE_YEARS: f64 = 5.0;
const MATURITY_MIN_COMMITS: u64 = 30;
const MATURITY_MAX_GAP_DAYS: i64 = 5 * 365;

/// Proportion shifts are only meaningful with a minimum of recent activity.
const SHIFT_MIN_RECENT: u64 = 5;
/// Contributors at or above this historical share are established
/// maintainers; their fluctuations are not takeover signals.
const SHIFT_MAX_HISTORICAL_SHARE: f64 = 5.0;

/// One canonical contributor with both window views.
#[derive(Debug, Clone, PartialEq)]
pub struct Contributor {
    pub id: String,
    pub display_name: String,
    pub is_bot: bool,
    pub first_commit: DateTime<Utc>,
    pub last_commit: DateTime<Utc>,
    pub commit_count_lifetime: u64,
    pub commit_count_recent: u64,
}

/// Commit-share movement for one contributor between the historical and
/// recent windows.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProportionShift {
    pub id: String,
    pub display_name: String,
    pub share_recent: f64,
    pub share_historical: f64,
    /// `share_recent - share_historical`, in percentage points.
    pub shift: f64,
}

/// Aggregated contributor tables for one evaluation instant.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    /// All commits at or before `as_of`, bots included (maturity input).
    pub total_commits: u64,
    /// Non-bot commits in the recent window.
    pub recent_commits: u64,
    /// Non-bot commits before the recent window.
    pub historical_commits: u64,
    /// Top-contributor share of recent non-bot commits, None when the
    /// recent window is empty.
    pub recent_concentration: Option<f64>,
    /// Top-contributor share of lifetime non-bot commits.
    pub lifetime_concentration: Option<f64>,
    pub unique_contributors_recent: u32,
    pub unique_contributors_lifetime: u32,
    pub first_commit: Option<DateTime<Utc>>,
    pub last_commit: Option<DateTime<Utc>>,
    pub repo_age_years: f64,
    pub is_mature: bool,
    /// Canonical key of the top recent contributor.
    pub top_recent_id: Option<String>,
    /// Raw email of the top recent contributor (login inference input).
    pub top_recent_email: Option<String>,
    pub contributors: Vec<Contributor>,
    /// Populated only for mature projects with enough recent activity.
    pub proportion_shifts: Vec<ProportionShift>,
}

#[derive(Debug, Default)]
struct Tally {
    display_name: String,
    raw_email: String,
    is_bot: bool,
    first: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
    lifetime: u64,
    recent: u64,
    historical: u64,
}

/// Aggregate commits into contributor tables as of an instant.
///
/// `commits` may contain entries after `as_of`; they are ignored, so callers
/// can reuse one full enumeration for many cutoffs.
pub fn aggregate(commits: &[CommitRecord], as_of: DateTime<Utc>) -> Result<Aggregation> {
    let window_start = as_of - Duration::days(RECENT_WINDOW_DAYS);

    let mut resolver = IdentityResolver::new();
    let mut keyed: Vec<(String, &CommitRecord)> = Vec::new();
    for commit in commits {
        if commit.author_time > as_of {
            continue;
        }
        let key = resolver.observe(&Observation {
            name: commit.author_name.clone(),
            email: commit.author_email.clone(),
        });
        keyed.push((key, commit));
    }
    resolver.resolve();

    let mut agg = Aggregation {
        total_commits: keyed.len() as u64,
        ..Aggregation::default()
    };
    if keyed.is_empty() {
        return Ok(agg);
    }

    let mut tallies: HashMap<String, Tally> = HashMap::new();
    let mut nonbot_recent = 0u64;
    let mut nonbot_historical = 0u64;

    for (preliminary, commit) in &keyed {
        let id = resolver.final_key(preliminary).to_string();
        let tally = tallies.entry(id).or_default();
        if tally.lifetime == 0 {
            tally.display_name = commit.author_name.clone();
            tally.raw_email = commit.author_email.clone();
            tally.is_bot = identity::is_bot(&commit.author_name, &commit.author_email);
        }
        tally.lifetime += 1;
        tally.first = Some(match tally.first {
            Some(f) => f.min(commit.author_time),
            None => commit.author_time,
        });
        tally.last = Some(match tally.last {
            Some(l) => l.max(commit.author_time),
            None => commit.author_time,
        });
        let recent = commit.author_time > window_start;
        if recent {
            tally.recent += 1;
        } else {
            tally.historical += 1;
        }
        if !tally.is_bot {
            if recent {
                nonbot_recent += 1;
            } else {
                nonbot_historical += 1;
            }
        }
    }

    agg.first_commit = keyed.iter().map(|(_, c)| c.author_time).min();
    agg.last_commit = keyed.iter().map(|(_, c)| c.author_time).max();
    agg.recent_commits = nonbot_recent;
    agg.historical_commits = nonbot_historical;

    if nonbot_recent + nonbot_historical
        != tallies
            .values()
            .filter(|t| !t.is_bot)
            .map(|t| t.lifetime)
            .sum::<u64>()
    {
        return Err(OssuaryError::Invariant(
            "recent + historical does not partition lifetime commits".into(),
        ));
    }

    // Sorted contributor table.
    let mut contributors: Vec<Contributor> = tallies
        .iter()
        .map(|(id, t)| Contributor {
            id: id.clone(),
            display_name: t.display_name.clone(),
            is_bot: t.is_bot,
            first_commit: t.first.unwrap_or(as_of),
            last_commit: t.last.unwrap_or(as_of),
            commit_count_lifetime: t.lifetime,
            commit_count_recent: t.recent,
        })
        .collect();
    contributors.sort_by(|a, b| {
        b.commit_count_lifetime
            .cmp(&a.commit_count_lifetime)
            .then(a.first_commit.cmp(&b.first_commit))
            .then(a.id.cmp(&b.id))
    });

    let nonbot = |t: &&Tally| !t.is_bot;
    agg.unique_contributors_lifetime =
        tallies.values().filter(nonbot).count() as u32;
    agg.unique_contributors_recent = tallies
        .values()
        .filter(|t| !t.is_bot && t.recent > 0)
        .count() as u32;

    let lifetime_nonbot: u64 = nonbot_recent + nonbot_historical;
    if lifetime_nonbot > 0 {
        let top_lifetime = tallies
            .values()
            .filter(nonbot)
            .map(|t| t.lifetime)
            .max()
            .unwrap_or(0);
        agg.lifetime_concentration =
            Some(100.0 * top_lifetime as f64 / lifetime_nonbot as f64);
    }

    if nonbot_recent > 0 {
        let top = tallies
            .iter()
            .filter(|(_, t)| !t.is_bot && t.recent > 0)
            .max_by(|(ida, a), (idb, b)| a.recent.cmp(&b.recent).then(idb.cmp(ida)));
        if let Some((id, t)) = top {
            agg.recent_concentration = Some(100.0 * t.recent as f64 / nonbot_recent as f64);
            agg.top_recent_id = Some(id.clone());
            agg.top_recent_email = Some(t.raw_email.clone());
        }
    }

    // Maturity classification.
    if let (Some(first), Some(last)) = (agg.first_commit, agg.last_commit) {
        agg.repo_age_years = (as_of - first).num_days() as f64 / 365.25;
        let gap_days = (as_of - last).num_days();
        agg.is_mature = agg.repo_age_years >= MATURITY_MIN_AGE_YEARS
            && agg.total_commits >= MATURITY_MIN_COMMITS
            && gap_days < MATURITY_MAX_GAP_DAYS;
    }

    // Proportion shifts: mature projects with enough recent signal only.
    if agg.is_mature && nonbot_recent >= SHIFT_MIN_RECENT {
        let mut shifts: Vec<ProportionShift> = tallies
            .iter()
            .filter(|(_, t)| !t.is_bot && t.recent > 0)
            .filter_map(|(id, t)| {
                let share_recent = 100.0 * t.recent as f64 / nonbot_recent as f64;
                let share_historical = if nonbot_historical > 0 {
                    100.0 * t.historical as f64 / nonbot_historical as f64
                } else {
                    0.0
                };
                if share_historical >= SHIFT_MAX_HISTORICAL_SHARE {
                    return None;
                }
                Some(ProportionShift {
                    id: id.clone(),
                    display_name: t.display_name.clone(),
                    share_recent,
                    share_historical,
                    shift: share_recent - share_historical,
                })
            })
            .collect();
        shifts.sort_by(|a, b| {
            b.shift
                .partial_cmp(&a.shift)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        agg.proportion_shifts = shifts;
    }

    agg.contributors = contributors;
    Ok(agg)
}
