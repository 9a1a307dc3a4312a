//! Sentiment and frustration detection over maintainer communications.
//!
//! Two independent signals from one corpus (recent commit subjects plus
//! issue and release titles):
//!
//! - a lexicon-based compound polarity score in [-1, 1], VADER-style:
//!   per-token valences with negation and booster handling, normalized by
//!   `sum / sqrt(sum^2 + 15)`
//! - frustration flags: case-insensitive substring matches against a fixed
//!   phrase list; the scorer only consumes the set's emptiness, the matched
//!   phrases become evidence

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

/// Phrases signalling maintainer frustration or burnout. Substring match,
/// case-insensitive. This list is part of the scoring contract.
pub const FRUSTRATION_KEYWORDS: [&str; 17] = [
    "not getting paid",
    "unpaid work",
    "free labor",
    "free work",
    "corporate exploitation",
    "burned out",
    "burnout",
    "stepping down",
    "abandoning this project",
    "fortune 500",
    "pay developers",
    "companies make millions",
    "protest",
    "on strike",
    "boycott",
    "resentment",
    "exploitation",
];

/// Token valences, VADER-style. Positive means positive polarity; the
/// magnitudes follow the usual lexicon scale of roughly -4..4.
const LEXICON: [(&str, f64); 88] = [
    ("abandoned", -2.1),
    ("amazing", 2.8),
    ("angry", -2.3),
    ("annoying", -1.9),
    ("appreciate", 1.9),
    ("appreciated", 1.9),
    ("awesome", 3.1),
    ("awful", -2.9),
    ("bad", -2.5),
    ("best", 3.2),
    ("better", 1.9),
    ("breaks", -1.6),
    ("broken", -2.2),
    ("brilliant", 2.8),
    ("bug", -1.4),
    ("buggy", -2.0),
    ("cool", 1.5),
    ("crash", -2.1),
    ("crashes", -2.1),
    ("dead", -2.4),
    ("disappointed", -2.2),
    ("disappointing", -2.2),
    ("dying", -2.5),
    ("easy", 1.6),
    ("elegant", 2.0),
    ("enjoy", 2.0),
    ("excellent", 3.0),
    ("excited", 2.2),
    ("fail", -2.3),
    ("failed", -2.3),
    ("fails", -2.3),
    ("failure", -2.4),
    ("fantastic", 2.9),
    ("fine", 1.1),
    ("frustrated", -2.4),
    ("frustrating", -2.4),
    ("garbage", -2.7),
    ("glad", 1.9),
    ("good", 1.9),
    ("great", 2.6),
    ("happy", 2.4),
    ("hate", -2.9),
    ("helpful", 1.9),
    ("hopeless", -2.6),
    ("horrible", -2.9),
    ("impossible", -1.8),
    ("improved", 1.8),
    ("improvement", 1.7),
    ("incredible", 2.8),
    ("insult", -2.3),
    ("issue", -0.8),
    ("lazy", -1.6),
    ("love", 2.9),
    ("mess", -1.9),
    ("miserable", -2.7),
    ("neat", 1.7),
    ("nice", 1.8),
    ("nightmare", -2.8),
    ("perfect", 2.7),
    ("pleased", 1.9),
    ("poor", -1.9),
    ("problem", -1.3),
    ("problems", -1.3),
    ("quit", -1.9),
    ("quitting", -2.1),
    ("regression", -1.6),
    ("reliable", 1.9),
    ("rude", -2.2),
    ("sad", -2.1),
    ("slow", -1.2),
    ("smooth", 1.7),
    ("solid", 1.6),
    ("sorry", -0.9),
    ("stable", 1.5),
    ("stuck", -1.5),
    ("stupid", -2.4),
    ("terrible", -2.9),
    ("thanks", 1.9),
    ("tired", -1.6),
    ("ugly", -1.9),
    ("unmaintained", -2.2),
    ("unusable", -2.5),
    ("useless", -2.3),
    ("welcome", 1.9),
    ("wonderful", 2.8),
    ("worse", -2.3),
    ("worst", -3.1),
    ("wrong", -1.7),
];

/// Words that flip the valence of what follows; VADER scales a negated
/// token by -0.74.
const NEGATIONS: [&str; 10] = [
    "not", "no", "never", "neither", "nobody", "nothing", "cannot", "cant", "dont", "wont",
];
const NEGATION_SCALE: f64 = -0.74;

/// Intensity boosters and dampeners, applied to the following token.
const BOOSTERS: [(&str, f64); 8] = [
    ("very", 0.293),
    ("really", 0.293),
    ("extremely", 0.293),
    ("totally", 0.293),
    ("completely", 0.293),
    ("slightly", -0.293),
    ("somewhat", -0.293),
    ("barely", -0.293),
];

/// Compound polarity of one text, in [-1, 1].
pub fn compound(text: &str) -> f64 {
    let tokens: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty())
        .map(|t| t.replace('\'', "").to_ascii_lowercase())
        .collect();
    if tokens.is_empty() {
        return 0.0;
    }

    let mut sum = 0.0;
    for (i, token) in tokens.iter().enumerate() {
        let Some(&(_, valence)) = LEXICON.iter().find(|(w, _)| *w == token.as_str()) else {
            continue;
        };
        let mut v = valence;

        // Look back up to three tokens for negation and boosting.
        let window_start = i.saturating_sub(3);
        for prior in &tokens[window_start..i] {
            if NEGATIONS.contains(&prior.as_str()) {
                v *= NEGATION_SCALE;
            } else if let Some(&(_, boost)) = BOOSTERS.iter().find(|(w, _)| *w == prior.as_str()) {
                v += boost * v.signum();
            }
        }
        sum += v;
    }

    let normalized = sum / (sum * sum + 15.0).sqrt();
    normalized.clamp(-1.0, 1.0)
}

/// Frustration phrases found in one text, lowercase.
pub fn frustration_matches(text: &str) -> Vec<&'static str> {
    let lower = text.to_ascii_lowercase();
    FRUSTRATION_KEYWORDS
        .iter()
        .copied()
        .filter(|kw| lower.contains(kw))
        .collect()
}

/// Aggregated sentiment over a corpus.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SentimentSummary {
    /// Mean per-text compound score.
    pub compound: f64,
    pub analyzed: usize,
    /// Distinct matched frustration phrases; ordered, so evidence strings
    /// are stable across runs.
    pub frustration_flags: BTreeSet<String>,
    /// Up to ten evidence strings naming the phrase and a text preview.
    pub evidence: Vec<String>,
}

const MAX_EVIDENCE: usize = 10;
const PREVIEW_LEN: usize = 80;

/// Analyze a corpus of short texts. Duplicate texts (by content hash) are
/// scored once so repeated bot messages don't swamp the average.
pub fn analyze_corpus<'a>(texts: impl IntoIterator<Item = &'a str>) -> SentimentSummary {
    let mut summary = SentimentSummary::default();
    let mut seen: BTreeSet<[u8; 32]> = BTreeSet::new();
    let mut total = 0.0;

    for text in texts {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !seen.insert(text_hash(trimmed)) {
            continue;
        }

        total += compound(trimmed);
        summary.analyzed += 1;

        for phrase in frustration_matches(trimmed) {
            summary.frustration_flags.insert(phrase.to_string());
            if summary.evidence.len() < MAX_EVIDENCE {
                summary
                    .evidence
                    .push(format!("matched \"{}\": {}", phrase, preview(trimmed)));
            }
        }
    }

    if summary.analyzed > 0 {
        summary.compound = total / summary.analyzed as f64;
    }
    summary
}

fn preview(text: &str) -> String {
    if text.len() <= PREVIEW_LEN {
        return text.to_string();
    }
    let cut = text
        .char_indices()
        .take_while(|(i, _)| *i < PREVIEW_LEN)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(text.len());
    format!("{}...", &text[..cut])
}

/// Content hash used for corpus deduplication.
pub fn text_hash(text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_text_scores_positive() {
        assert!(compound("This is a great release with amazing features") > 0.0);
    }

    #[test]
    fn negative_text_scores_negative() {
        assert!(compound("This is terrible and broken, awful experience") < 0.0);
    }

    #[test]
    fn neutral_text_stays_near_zero() {
        let c = compound("Update dependency version to 2.0.1");
        assert!((-0.3..=0.3).contains(&c));
    }

    #[test]
    fn empty_text_is_zero() {
        assert_eq!(compound(""), 0.0);
    }

    #[test]
    fn negation_flips_polarity() {
        let plain = compound("this is good");
        let negated = compound("this is not good");
        assert!(plain > 0.0);
        assert!(negated < 0.0);
    }

    #[test]
    fn booster_amplifies() {
        assert!(compound("very good work") > compound("good work"));
    }

    #[test]
    fn frustration_phrases_match_as_substrings() {
        let matches = frustration_matches("I'm done doing free work for Fortune 500 companies");
        assert!(matches.contains(&"free work"));
        assert!(matches.contains(&"fortune 500"));
        assert!(frustration_matches("Fix bug in parser, update tests").is_empty());
    }

    #[test]
    fn burnout_and_burned_out_both_flag() {
        assert!(!frustration_matches("complete burnout, stepping down").is_empty());
        assert!(!frustration_matches("I am burned out").is_empty());
    }

    #[test]
    fn corpus_averages_and_dedups() {
        let summary = analyze_corpus(["great work", "great work", "terrible mess"]);
        assert_eq!(summary.analyzed, 2);
        let lone_negative = analyze_corpus(["terrible mess"]);
        assert!(summary.compound > lone_negative.compound);
    }

    #[test]
    fn corpus_collects_flag_evidence() {
        let summary = analyze_corpus([
            "I am burned out and this is unpaid work",
            "routine release notes",
        ]);
        assert!(summary.frustration_flags.contains("burned out"));
        assert!(summary.frustration_flags.contains("unpaid work"));
        assert!(!summary.evidence.is_empty());
        assert!(summary.evidence.len() <= MAX_EVIDENCE);
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(text_hash("hello"), text_hash("hello"));
        assert_ne!(text_hash("hello"), text_hash("world"));
    }
}
