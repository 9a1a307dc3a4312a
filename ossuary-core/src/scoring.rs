//! Governance risk scoring engine.
//!
//! Two-track model: base risk from maintainer concentration (recent window
//! for active projects, lifetime fallback for quiet mature ones), an
//! activity modifier, then independent additive protective and warning
//! factors. The result is a clamped 0-100 score with a full breakdown.
//!
//! Invariants enforced:
//! - the score is a pure function of `ScoreInputs` and `ScoreConfig`
//! - every applied factor records an evidence string in the breakdown
//! - visibility tie-break is exclusive: massive or high, never both
//! - changing any weight or threshold requires a model version bump

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::contributors::ProportionShift;
use crate::ecosystem::Ecosystem;
use crate::error::{OssuaryError, Result};
use crate::reputation::ReputationTier;

/// Risk level classification, derived solely from the score bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    VeryLow,
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: i32) -> RiskLevel {
        if score >= 80 {
            RiskLevel::Critical
        } else if score >= 60 {
            RiskLevel::High
        } else if score >= 40 {
            RiskLevel::Moderate
        } else if score >= 20 {
            RiskLevel::Low
        } else {
            RiskLevel::VeryLow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::VeryLow => "VERY_LOW",
            RiskLevel::Low => "LOW",
            RiskLevel::Moderate => "MODERATE",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    pub fn semaphore(&self) -> &'static str {
        match self {
            RiskLevel::VeryLow | RiskLevel::Low => "\u{1F7E2}",
            RiskLevel::Moderate => "\u{1F7E1}",
            RiskLevel::High => "\u{1F7E0}",
            RiskLevel::Critical => "\u{1F534}",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "Immediate risk - action required",
            RiskLevel::High => "Elevated risk - intervention recommended",
            RiskLevel::Moderate => "Requires active monitoring",
            RiskLevel::Low => "Minor concerns, generally stable",
            RiskLevel::VeryLow => "Safe, well-governed package",
        }
    }
}

/// Weights, thresholds, and the model version. The engine takes this by
/// parameter so tests can swap it; any change to a value here MUST bump
/// `model_version`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreConfig {
    pub model_version: String,

    // Maturity classification.
    pub mature_min_age_years: f64,
    pub mature_min_commits: u64,
    pub mature_max_gap_days: i64,

    /// Concentration bands as (upper bound, base risk); anything at or
    /// above the last bound gets `base_max`.
    pub concentration_bands: [(f64, i32); 4],
    pub base_max: i32,

    // Activity modifier by commits in the last twelve months.
    pub activity_active_threshold: u64,
    pub activity_active_bonus: i32,
    pub activity_moderate_threshold: u64,
    pub activity_moderate_bonus: i32,
    pub activity_low_threshold: u64,
    pub activity_abandoned_penalty: i32,

    // Protective factors.
    pub tier1_bonus: i32,
    pub tier2_bonus: i32,
    pub sponsors_bonus: i32,
    pub org_bonus: i32,
    pub org_min_admins: u32,
    pub massive_visibility_threshold: u64,
    pub massive_visibility_bonus: i32,
    pub high_visibility_threshold: u64,
    pub high_visibility_bonus: i32,
    pub distributed_threshold: f64,
    pub distributed_bonus: i32,
    pub community_threshold: u32,
    pub community_bonus: i32,
    pub cii_bonus: i32,
    pub positive_sentiment_threshold: f64,
    pub positive_sentiment_bonus: i32,

    // Warning factors.
    pub frustration_penalty: i32,
    pub negative_sentiment_threshold: f64,
    pub negative_sentiment_penalty: i32,
    pub takeover_shift_threshold: f64,
    pub takeover_penalty: i32,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        ScoreConfig {
            model_version: "1.0.0".to_string(),
            mature_min_age_years: 5.0,
            mature_min_commits: 30,
            mature_max_gap_days: 5 * 365,
            concentration_bands: [(30.0, 20), (50.0, 40), (70.0, 60), (90.0, 80)],
            base_max: 100,
            activity_active_threshold: 50,
            activity_active_bonus: -30,
            activity_moderate_threshold: 12,
            activity_moderate_bonus: -15,
            activity_low_threshold: 4,
            activity_abandoned_penalty: 20,
            tier1_bonus: -25,
            tier2_bonus: -10,
            sponsors_bonus: -15,
            org_bonus: -15,
            org_min_admins: 3,
            massive_visibility_threshold: 50_000_000,
            massive_visibility_bonus: -20,
            high_visibility_threshold: 10_000_000,
            high_visibility_bonus: -10,
            distributed_threshold: 40.0,
            distributed_bonus: -10,
            community_threshold: 20,
            community_bonus: -10,
            cii_bonus: -10,
            positive_sentiment_threshold: 0.3,
            positive_sentiment_bonus: -5,
            frustration_penalty: 20,
            negative_sentiment_threshold: -0.3,
            negative_sentiment_penalty: 10,
            takeover_shift_threshold: 30.0,
            takeover_penalty: 20,
        }
    }
}

impl ScoreConfig {
    /// Validate the configuration for logical errors.
    pub fn validate(&self) -> Result<()> {
        let mut prev = f64::NEG_INFINITY;
        for (bound, _) in &self.concentration_bands {
            if *bound <= prev {
                return Err(OssuaryError::Input(format!(
                    "concentration bands must be strictly increasing (got {})",
                    bound
                )));
            }
            prev = *bound;
        }
        if self.activity_active_threshold < self.activity_moderate_threshold
            || self.activity_moderate_threshold < self.activity_low_threshold
        {
            return Err(OssuaryError::Input(
                "activity thresholds must be ordered active >= moderate >= low".into(),
            ));
        }
        if self.massive_visibility_threshold <= self.high_visibility_threshold {
            return Err(OssuaryError::Input(
                "massive visibility threshold must exceed the high threshold".into(),
            ));
        }
        if self.negative_sentiment_threshold >= self.positive_sentiment_threshold {
            return Err(OssuaryError::Input(
                "sentiment thresholds must be ordered negative < positive".into(),
            ));
        }
        if self.model_version.trim().is_empty() {
            return Err(OssuaryError::Input("model_version is empty".into()));
        }
        Ok(())
    }

    fn base_risk(&self, concentration: f64) -> i32 {
        for (bound, base) in &self.concentration_bands {
            if concentration < *bound {
                return *base;
            }
        }
        self.base_max
    }

    fn activity_modifier(&self, commits_last_year: u64) -> i32 {
        if commits_last_year > self.activity_active_threshold {
            self.activity_active_bonus
        } else if commits_last_year >= self.activity_moderate_threshold {
            self.activity_moderate_bonus
        } else if commits_last_year >= self.activity_low_threshold {
            0
        } else {
            self.activity_abandoned_penalty
        }
    }
}

/// Snapshot of everything the engine consumes. Immutable after
/// construction; the stable hash of this struct plus the model version is
/// the cache idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreInputs {
    /// Top-contributor share of recent non-bot commits; None when the
    /// recent window has no commits.
    pub recent_concentration: Option<f64>,
    pub lifetime_concentration: Option<f64>,
    /// Non-bot commits in the twelve months before `as_of`.
    pub commits_per_year_recent: u64,
    pub unique_contributors_recent: u32,
    /// All commits at or before `as_of`, bots included.
    pub total_commits: u64,
    pub repo_age_years: f64,
    pub last_commit: Option<DateTime<Utc>>,
    pub downloads_per_week: Option<u64>,
    pub sentiment_compound: f64,
    pub frustration_flags: BTreeSet<String>,
    pub reputation_tier: ReputationTier,
    pub reputation_evidence: Option<String>,
    pub owner_is_org: bool,
    pub org_admin_count: Option<u32>,
    pub has_sponsors: bool,
    pub cii_badge: bool,
    pub proportion_shifts: Vec<ProportionShift>,
    pub as_of: DateTime<Utc>,
    /// True when a collector branch failed and the inputs are incomplete.
    pub partial: bool,
}

impl Default for ScoreInputs {
    fn default() -> Self {
        ScoreInputs {
            recent_concentration: None,
            lifetime_concentration: None,
            commits_per_year_recent: 0,
            unique_contributors_recent: 0,
            total_commits: 0,
            repo_age_years: 0.0,
            last_commit: None,
            downloads_per_week: None,
            sentiment_compound: 0.0,
            frustration_flags: BTreeSet::new(),
            reputation_tier: ReputationTier::Unknown,
            reputation_evidence: None,
            owner_is_org: false,
            org_admin_count: None,
            has_sponsors: false,
            cii_badge: false,
            proportion_shifts: Vec::new(),
            as_of: DateTime::<Utc>::UNIX_EPOCH,
            partial: false,
        }
    }
}

impl ScoreInputs {
    /// Stable hash of the inputs and the model version.
    pub fn stable_hash(&self, model_version: &str) -> String {
        let mut hasher = Sha256::new();
        // serde_json serializes struct fields in declaration order, so the
        // byte stream is stable for a fixed model version.
        let canonical = serde_json::to_string(self).unwrap_or_default();
        hasher.update(canonical.as_bytes());
        hasher.update(b"\x00");
        hasher.update(model_version.as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// One signed contribution in the breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownEntry {
    pub tag: String,
    pub points: i32,
    pub evidence: String,
}

/// Final scoring result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub package: String,
    pub ecosystem: Ecosystem,
    pub score: i32,
    pub risk_level: RiskLevel,
    pub semaphore: String,
    pub explanation: String,
    pub breakdown: Vec<BreakdownEntry>,
    pub recommendations: Vec<String>,
    pub partial: bool,
    pub inputs_hash: String,
    pub computed_at: DateTime<Utc>,
    pub as_of: Option<DateTime<Utc>>,
    pub model_version: String,
}

/// Compute the risk score for one package.
///
/// Pure: identical inputs and config yield identical output except for
/// `computed_at`, which is stamped by the caller-supplied instant.
pub fn evaluate(
    package: &str,
    ecosystem: Ecosystem,
    inputs: &ScoreInputs,
    config: &ScoreConfig,
    computed_at: DateTime<Utc>,
    explicit_as_of: Option<DateTime<Utc>>,
) -> Result<Score> {
    for conc in [inputs.recent_concentration, inputs.lifetime_concentration]
        .into_iter()
        .flatten()
    {
        if !(0.0..=100.0).contains(&conc) {
            return Err(OssuaryError::Invariant(format!(
                "concentration out of range: {}",
                conc
            )));
        }
    }

    let mature = inputs.repo_age_years >= config.mature_min_age_years
        && inputs.total_commits >= config.mature_min_commits
        && inputs
            .last_commit
            .is_some_and(|lc| (inputs.as_of - lc).num_days() < config.mature_max_gap_days);

    // Base risk: recent concentration unless the project is mature and too
    // quiet for the recent window to be meaningful; an empty window means
    // maximum concentration.
    let (concentration, window) = if mature {
        if inputs.commits_per_year_recent >= config.activity_low_threshold {
            (inputs.recent_concentration.unwrap_or(100.0), "recent")
        } else {
            (
                inputs
                    .lifetime_concentration
                    .or(inputs.recent_concentration)
                    .unwrap_or(100.0),
                "lifetime",
            )
        }
    } else {
        (inputs.recent_concentration.unwrap_or(100.0), "recent")
    };
    let base = config.base_risk(concentration);

    // Activity modifier; mature projects are never penalized for quiet.
    let raw_activity = config.activity_modifier(inputs.commits_per_year_recent);
    let mut activity = if mature { raw_activity.min(0) } else { raw_activity };

    // Takeover detection first, because it interacts with the activity
    // bonus below.
    let takeover = if mature {
        inputs
            .proportion_shifts
            .iter()
            .filter(|s| s.shift > config.takeover_shift_threshold)
            .max_by(|a, b| {
                a.shift
                    .partial_cmp(&b.shift)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    } else {
        None
    };

    let mut activity_evidence = format!(
        "{} commits in the last 12 months",
        inputs.commits_per_year_recent
    );
    if takeover.is_some() && activity < 0 {
        // High commit volume is part of the takeover pattern; the bonus
        // must not cancel the signal.
        activity = 0;
        activity_evidence.push_str(" (bonus withheld: takeover pattern present)");
    }

    let mut breakdown = vec![
        BreakdownEntry {
            tag: "base_risk".to_string(),
            points: base,
            evidence: format!("{:.0}% {} concentration", concentration, window),
        },
        BreakdownEntry {
            tag: "activity".to_string(),
            points: activity,
            evidence: activity_evidence,
        },
    ];
    let mut push = |tag: &str, points: i32, evidence: String| {
        breakdown.push(BreakdownEntry {
            tag: tag.to_string(),
            points,
            evidence,
        });
    };

    match inputs.reputation_tier {
        ReputationTier::Tier1 => push(
            "reputation",
            config.tier1_bonus,
            inputs
                .reputation_evidence
                .clone()
                .unwrap_or_else(|| "tier-1 maintainer reputation".to_string()),
        ),
        ReputationTier::Tier2 => push(
            "reputation",
            config.tier2_bonus,
            inputs
                .reputation_evidence
                .clone()
                .unwrap_or_else(|| "tier-2 maintainer reputation".to_string()),
        ),
        ReputationTier::Unknown => {}
    }

    if inputs.has_sponsors {
        push(
            "funding",
            config.sponsors_bonus,
            "GitHub Sponsors enabled".to_string(),
        );
    }

    if inputs.owner_is_org {
        if let Some(admins) = inputs.org_admin_count {
            if admins >= config.org_min_admins {
                push(
                    "organization",
                    config.org_bonus,
                    format!("organization owner with {} admins", admins),
                );
            }
        }
    }

    // Visibility: massive and high are mutually exclusive.
    if let Some(downloads) = inputs.downloads_per_week {
        if downloads > config.massive_visibility_threshold {
            push(
                "visibility",
                config.massive_visibility_bonus,
                format!("{} weekly downloads", downloads),
            );
        } else if downloads > config.high_visibility_threshold {
            push(
                "visibility",
                config.high_visibility_bonus,
                format!("{} weekly downloads", downloads),
            );
        }
    }

    // A newcomer flooding the recent window can drag concentration under
    // the threshold; that is not distributed governance.
    if concentration < config.distributed_threshold && takeover.is_none() {
        push(
            "distributed_governance",
            config.distributed_bonus,
            format!("{:.0}% {} concentration", concentration, window),
        );
    }

    if inputs.unique_contributors_recent > config.community_threshold {
        push(
            "community",
            config.community_bonus,
            format!(
                "{} contributors in the last year",
                inputs.unique_contributors_recent
            ),
        );
    }

    if inputs.cii_badge {
        push(
            "cii_badge",
            config.cii_bonus,
            "CII best-practices badge".to_string(),
        );
    }

    if inputs.sentiment_compound > config.positive_sentiment_threshold {
        push(
            "sentiment",
            config.positive_sentiment_bonus,
            format!("compound sentiment {:+.2}", inputs.sentiment_compound),
        );
    }

    if !inputs.frustration_flags.is_empty() {
        let flags: Vec<&str> = inputs.frustration_flags.iter().map(String::as_str).collect();
        push(
            "frustration",
            config.frustration_penalty,
            format!("maintainer frustration signals: {}", flags.join(", ")),
        );
    }

    if inputs.sentiment_compound < config.negative_sentiment_threshold {
        push(
            "sentiment",
            config.negative_sentiment_penalty,
            format!("compound sentiment {:+.2}", inputs.sentiment_compound),
        );
    }

    if let Some(shift) = takeover {
        push(
            "takeover_risk",
            config.takeover_penalty,
            format!(
                "{}: {:+.1}pp shift in commit share on a mature project",
                if shift.display_name.is_empty() {
                    &shift.id
                } else {
                    &shift.display_name
                },
                shift.shift
            ),
        );
    }

    let raw: i32 = breakdown.iter().map(|e| e.points).sum();
    let score = raw.clamp(0, 100);
    let risk_level = RiskLevel::from_score(score);

    let explanation = explain(risk_level, score, &breakdown);
    let recommendations = recommend(risk_level, &breakdown);

    Ok(Score {
        package: package.to_string(),
        ecosystem,
        score,
        risk_level,
        semaphore: risk_level.semaphore().to_string(),
        explanation,
        breakdown,
        recommendations,
        partial: inputs.partial,
        inputs_hash: inputs.stable_hash(&config.model_version),
        computed_at,
        as_of: explicit_as_of,
        model_version: config.model_version.clone(),
    })
}

/// Assemble the deterministic explanation: semaphore, level and score, then
/// the single largest risk-increasing contribution and up to two largest
/// risk-reducing ones, each with its evidence.
fn explain(level: RiskLevel, score: i32, breakdown: &[BreakdownEntry]) -> String {
    let mut parts: Vec<String> = Vec::new();

    let top_positive = breakdown
        .iter()
        .enumerate()
        .filter(|(_, e)| e.points > 0)
        .max_by_key(|(i, e)| (e.points, std::cmp::Reverse(*i)));
    if let Some((_, entry)) = top_positive {
        parts.push(format!("{} (+{}): {}", entry.tag, entry.points, entry.evidence));
    }

    let mut negatives: Vec<(usize, &BreakdownEntry)> = breakdown
        .iter()
        .enumerate()
        .filter(|(_, e)| e.points < 0)
        .collect();
    negatives.sort_by_key(|(i, e)| (e.points, *i));
    for (_, entry) in negatives.into_iter().take(2) {
        parts.push(format!("{} ({}): {}", entry.tag, entry.points, entry.evidence));
    }

    if breakdown.iter().any(|e| e.tag == "frustration") {
        parts.push("ALERT: maintainer frustration signals detected".to_string());
    }
    if breakdown.iter().any(|e| e.tag == "takeover_risk") {
        parts.push("ALERT: newcomer takeover pattern detected on a mature project".to_string());
    }

    format!(
        "{} {} ({}). {}",
        level.semaphore(),
        level.as_str(),
        score,
        parts.join(". ")
    )
}

/// Static per-level recommendations, with alert lines prepended when the
/// frustration or takeover factor fired.
fn recommend(level: RiskLevel, breakdown: &[BreakdownEntry]) -> Vec<String> {
    let mut recs: Vec<String> = match level {
        RiskLevel::Critical => vec![
            "IMMEDIATE: Identify alternative packages or prepare to fork".to_string(),
            "Do not accept new versions without manual code review".to_string(),
            "Monitor for maintainer changes or ownership transfers".to_string(),
        ],
        RiskLevel::High => vec![
            "Review new releases carefully before updating".to_string(),
            "Consider contributing to reduce maintainer concentration".to_string(),
            "Monitor project health metrics monthly".to_string(),
        ],
        RiskLevel::Moderate => vec![
            "Standard monitoring recommended".to_string(),
            "Keep dependencies updated".to_string(),
        ],
        RiskLevel::Low | RiskLevel::VeryLow => {
            vec!["Low risk - standard dependency management practices apply".to_string()]
        }
    };

    if breakdown.iter().any(|e| e.tag == "takeover_risk") {
        recs.insert(
            0,
            "ALERT: New contributor dominates recent commits on a mature project - review carefully"
                .to_string(),
        );
    }
    if breakdown.iter().any(|e| e.tag == "frustration") {
        recs.insert(
            0,
            "URGENT: Maintainer frustration detected - elevated sabotage risk".to_string(),
        );
    }
    recs
}
