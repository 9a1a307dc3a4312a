//! Maintainer reputation scoring.
//!
//! Additive signal table over a forge user's portfolio, mapped to a tier.
//! Pure function of its inputs; the forge collector supplies the portfolio
//! and this module never performs I/O.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::ecosystem::Ecosystem;
use crate::forge::UserPortfolio;

/// Organizations that confer institutional backing. Frozen constant; part
/// of the scoring contract.
pub const RECOGNIZED_ORGS: [&str; 22] = [
    "nodejs",
    "openjs-foundation",
    "npm",
    "expressjs",
    "eslint",
    "webpack",
    "babel",
    "python",
    "psf",
    "pypa",
    "pallets",
    "django",
    "tiangolo",
    "apache",
    "cncf",
    "linux-foundation",
    "mozilla",
    "rust-lang",
    "golang",
    "kubernetes",
    "docker",
    "hashicorp",
];

/// Starter sets of top packages per ecosystem, backing the top-maintainer
/// signal when the caller has no explicit flag.
const TOP_NPM: [&str; 20] = [
    "lodash", "chalk", "express", "react", "vue", "axios", "webpack", "babel", "eslint",
    "typescript", "prettier", "jest", "commander", "debug", "async", "uuid", "minimist",
    "glob", "semver", "yargs",
];
const TOP_PYPI: [&str; 20] = [
    "requests", "numpy", "pandas", "django", "flask", "pytest", "boto3", "urllib3",
    "setuptools", "pip", "certifi", "pyyaml", "cryptography", "pillow", "sqlalchemy",
    "jinja2", "click", "scipy", "fastapi", "pydantic",
];

// Signal points.
const TENURE_POINTS: i32 = 15;
const PORTFOLIO_POINTS: i32 = 15;
const STARS_POINTS: i32 = 15;
const SPONSORS_POINTS: i32 = 15;
const PACKAGES_POINTS: i32 = 10;
const TOP_MAINTAINER_POINTS: i32 = 15;
const ORG_POINTS: i32 = 15;

// Signal thresholds.
const TENURE_YEARS: f64 = 5.0;
const PORTFOLIO_MIN_REPOS: usize = 50;
const PORTFOLIO_MIN_STARS: u64 = 10;
const TOTAL_STARS_THRESHOLD: u64 = 50_000;
const MIN_SPONSORS: u32 = 10;
const MIN_PACKAGES: usize = 20;

/// Reputation tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReputationTier {
    Tier1,
    Tier2,
    Unknown,
}

impl ReputationTier {
    pub fn from_points(points: i32) -> ReputationTier {
        if points >= 60 {
            ReputationTier::Tier1
        } else if points >= 30 {
            ReputationTier::Tier2
        } else {
            ReputationTier::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReputationTier::Tier1 => "TIER_1",
            ReputationTier::Tier2 => "TIER_2",
            ReputationTier::Unknown => "UNKNOWN",
        }
    }
}

/// Per-signal breakdown with the evidence behind each award.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReputationBreakdown {
    pub login: String,
    pub tenure_points: i32,
    pub portfolio_points: i32,
    pub stars_points: i32,
    pub sponsors_points: i32,
    pub packages_points: i32,
    pub top_maintainer_points: i32,
    pub org_points: i32,

    pub account_age_years: f64,
    pub repos_with_stars: usize,
    pub total_stars: u64,
    pub recognized_orgs: Vec<String>,
}

impl ReputationBreakdown {
    pub fn total(&self) -> i32 {
        self.tenure_points
            + self.portfolio_points
            + self.stars_points
            + self.sponsors_points
            + self.packages_points
            + self.top_maintainer_points
            + self.org_points
    }

    pub fn tier(&self) -> ReputationTier {
        ReputationTier::from_points(self.total())
    }

    /// Evidence line for the score breakdown.
    pub fn evidence(&self) -> String {
        format!(
            "{}: {} pts ({}) - tenure={}, portfolio={}, stars={}, sponsors={}",
            self.login,
            self.total(),
            self.tier().as_str(),
            self.tenure_points,
            self.portfolio_points,
            self.stars_points,
            self.sponsors_points,
        )
    }
}

fn is_top_package(ecosystem: Ecosystem, name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    match ecosystem {
        Ecosystem::Npm => TOP_NPM.contains(&lower.as_str()),
        Ecosystem::Pypi => TOP_PYPI.contains(&lower.as_str()),
        _ => false,
    }
}

/// Score a maintainer's portfolio as of an instant.
///
/// `maintained_packages` is what the caller knows this user maintains
/// (usually just the package under evaluation); `top_maintainer_flag`
/// short-circuits the top-package lookup when the caller already knows.
pub fn score_reputation(
    portfolio: &UserPortfolio,
    ecosystem: Ecosystem,
    maintained_packages: &[String],
    top_maintainer_flag: bool,
    as_of: DateTime<Utc>,
) -> ReputationBreakdown {
    let mut breakdown = ReputationBreakdown {
        login: portfolio.login.clone(),
        ..ReputationBreakdown::default()
    };

    if let Some(created) = portfolio.account_created {
        let age = (as_of - created).num_days() as f64 / 365.25;
        breakdown.account_age_years = (age * 10.0).round() / 10.0;
        if age >= TENURE_YEARS {
            breakdown.tenure_points = TENURE_POINTS;
        }
    }

    let mut repos_with_stars = 0usize;
    let mut total_stars = 0u64;
    for (is_fork, stars) in &portfolio.owned_repos {
        if *is_fork {
            continue;
        }
        total_stars += stars;
        if *stars >= PORTFOLIO_MIN_STARS {
            repos_with_stars += 1;
        }
    }
    breakdown.repos_with_stars = repos_with_stars;
    breakdown.total_stars = total_stars;
    if repos_with_stars >= PORTFOLIO_MIN_REPOS {
        breakdown.portfolio_points = PORTFOLIO_POINTS;
    }
    if total_stars >= TOTAL_STARS_THRESHOLD {
        breakdown.stars_points = STARS_POINTS;
    }

    if portfolio.sponsor_count.is_some_and(|n| n >= MIN_SPONSORS) {
        breakdown.sponsors_points = SPONSORS_POINTS;
    }

    if maintained_packages.len() >= MIN_PACKAGES {
        breakdown.packages_points = PACKAGES_POINTS;
    }

    if top_maintainer_flag
        || maintained_packages
            .iter()
            .any(|p| is_top_package(ecosystem, p))
    {
        breakdown.top_maintainer_points = TOP_MAINTAINER_POINTS;
    }

    breakdown.recognized_orgs = portfolio
        .orgs
        .iter()
        .filter(|o| RECOGNIZED_ORGS.contains(&o.to_ascii_lowercase().as_str()))
        .cloned()
        .collect();
    if !breakdown.recognized_orgs.is_empty() {
        breakdown.org_points = ORG_POINTS;
    }

    debug!(
        "reputation for {}: {} ({})",
        breakdown.login,
        breakdown.total(),
        breakdown.tier().as_str()
    );
    breakdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn veteran_portfolio() -> UserPortfolio {
        UserPortfolio {
            login: "veteran".to_string(),
            account_created: Some(Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap()),
            owned_repos: (0..60).map(|_| (false, 1_000)).collect(),
            sponsor_count: Some(40),
            orgs: vec![],
        }
    }

    #[test]
    fn tier_boundaries() {
        assert_eq!(ReputationTier::from_points(60), ReputationTier::Tier1);
        assert_eq!(ReputationTier::from_points(59), ReputationTier::Tier2);
        assert_eq!(ReputationTier::from_points(30), ReputationTier::Tier2);
        assert_eq!(ReputationTier::from_points(29), ReputationTier::Unknown);
    }

    #[test]
    fn veteran_reaches_tier1() {
        let b = score_reputation(&veteran_portfolio(), Ecosystem::Npm, &[], false, as_of());
        // tenure + portfolio + stars + sponsors = 60
        assert_eq!(b.total(), 60);
        assert_eq!(b.tier(), ReputationTier::Tier1);
    }

    #[test]
    fn empty_portfolio_is_unknown() {
        let b = score_reputation(
            &UserPortfolio::default(),
            Ecosystem::Npm,
            &[],
            false,
            as_of(),
        );
        assert_eq!(b.total(), 0);
        assert_eq!(b.tier(), ReputationTier::Unknown);
    }

    #[test]
    fn forks_do_not_count_toward_portfolio() {
        let portfolio = UserPortfolio {
            login: "forker".to_string(),
            owned_repos: (0..100).map(|_| (true, 5_000)).collect(),
            ..UserPortfolio::default()
        };
        let b = score_reputation(&portfolio, Ecosystem::Npm, &[], false, as_of());
        assert_eq!(b.portfolio_points, 0);
        assert_eq!(b.stars_points, 0);
    }

    #[test]
    fn top_package_signal_fires_per_ecosystem() {
        let pkgs = vec!["chalk".to_string()];
        let b = score_reputation(&UserPortfolio::default(), Ecosystem::Npm, &pkgs, false, as_of());
        assert_eq!(b.top_maintainer_points, TOP_MAINTAINER_POINTS);
        let b2 =
            score_reputation(&UserPortfolio::default(), Ecosystem::Pypi, &pkgs, false, as_of());
        assert_eq!(b2.top_maintainer_points, 0);
    }

    #[test]
    fn recognized_org_signal() {
        let portfolio = UserPortfolio {
            login: "member".to_string(),
            orgs: vec!["Rust-Lang".to_string(), "acme".to_string()],
            ..UserPortfolio::default()
        };
        let b = score_reputation(&portfolio, Ecosystem::Cargo, &[], false, as_of());
        assert_eq!(b.org_points, ORG_POINTS);
        assert_eq!(b.recognized_orgs, vec!["Rust-Lang".to_string()]);
    }

    #[test]
    fn increasing_signals_never_lower_tier() {
        let base = score_reputation(&UserPortfolio::default(), Ecosystem::Npm, &[], false, as_of());
        let better = score_reputation(&veteran_portfolio(), Ecosystem::Npm, &[], false, as_of());
        assert!(better.total() >= base.total());
    }
}
