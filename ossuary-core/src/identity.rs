//! Contributor identity normalization.
//!
//! Collapses the `(author_name, author_email)` tuples seen in git history
//! into stable contributor keys, so one person committing under several
//! addresses counts once.
//!
//! Invariants enforced:
//! - Normalization is idempotent: the same tuple always yields the same key
//! - Key assignment is independent of observation order up to the documented
//!   earliest-seen-wins case folding

use std::collections::HashMap;

/// Personal mail providers whose domain carries no identity signal; they all
/// collapse to the `personal` domain class so `jane@gmail.com` and
/// `jane@outlook.com` merge.
const PERSONAL_PROVIDERS: [&str; 5] = [
    "gmail.com",
    "outlook.com",
    "yahoo.com",
    "hotmail.com",
    "protonmail.com",
];

/// Accounts that are automation even without a `[bot]` marker.
const KNOWN_BOTS: [&str; 10] = [
    "dependabot",
    "renovate",
    "greenkeeper",
    "github-actions",
    "snyk-bot",
    "codecov",
    "imgbot",
    "allcontributors",
    "semantic-release-bot",
    "web-flow",
];

/// True when the author is automation rather than a person.
pub fn is_bot(name: &str, email: &str) -> bool {
    if name.contains("[bot]") || email.contains("[bot]") {
        return true;
    }
    if email.to_ascii_lowercase().ends_with("@bots.noreply.github.com") {
        return true;
    }
    let name_lower = name.trim().to_ascii_lowercase();
    KNOWN_BOTS.iter().any(|b| name_lower == *b)
}

/// Extract the GitHub login from a private-relay address.
///
/// `12345+login@users.noreply.github.com` → `login`; the prefix-less
/// `login@users.noreply.github.com` form is also accepted. The relay domain
/// is matched case-insensitively but the login is returned verbatim; case
/// folding across observations is the resolver's job.
fn noreply_login(email: &str) -> Option<&str> {
    const RELAY: &str = "@users.noreply.github.com";
    if !email.to_ascii_lowercase().ends_with(RELAY) {
        return None;
    }
    let local = &email[..email.len() - RELAY.len()];
    match local.split_once('+') {
        Some((id, login)) if id.chars().all(|c| c.is_ascii_digit()) && !login.is_empty() => {
            Some(login)
        }
        Some(_) => None,
        None if !local.is_empty() => Some(local),
        None => None,
    }
}

/// Map an email to its `local@domain_class` key form.
///
/// - GitHub relay addresses become `login@github`
/// - personal providers collapse to the `personal` class
/// - every other domain is preserved verbatim (lowercased)
///
/// Addresses without an `@` are kept as-is under the `invalid` class so they
/// still aggregate deterministically.
pub fn canonical_key(email: &str) -> String {
    let email = email.trim();

    if let Some(login) = noreply_login(email) {
        return format!("{}@github", login);
    }

    let lower = email.to_ascii_lowercase();
    let Some((local, domain)) = lower.rsplit_once('@') else {
        return format!("{}@invalid", lower);
    };

    if PERSONAL_PROVIDERS.contains(&domain) {
        return format!("{}@personal", local);
    }

    format!("{}@{}", local, domain)
}

/// Display name lowered to plain ASCII with separators removed; used as
/// cross-address merge evidence, never shown.
fn normalized_name(name: &str) -> Option<String> {
    let folded: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if folded.len() < 3 {
        return None;
    }
    Some(folded)
}

/// Local part with any `+tag` suffix stripped.
fn stripped_local(key: &str) -> Option<String> {
    let (local, _) = key.rsplit_once('@')?;
    let base = local.split('+').next().unwrap_or(local);
    if base.is_empty() {
        None
    } else {
        Some(base.to_string())
    }
}

/// One author observation fed to the resolver.
#[derive(Debug, Clone)]
pub struct Observation {
    pub name: String,
    pub email: String,
}

/// Merge evidence for one preliminary key: the identity fragments that can
/// tie two addresses to the same person.
#[derive(Debug, Default)]
struct Evidence {
    local: Option<String>,
    login: Option<String>,
    names: Vec<String>,
}

impl Evidence {
    fn fragments(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        if let Some(l) = &self.local {
            out.push(l);
        }
        if let Some(l) = &self.login {
            out.push(l);
        }
        for n in &self.names {
            out.push(n);
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Number of evidence kinds of `other` matched by any fragment of
    /// `self`. Kinds are {local-part, relay login, display name}; a single
    /// shared nickname that shows up as someone's local part AND login AND
    /// name counts three times, which is exactly the signal we want.
    fn kinds_matched_by(&self, other: &Evidence) -> usize {
        let mine = self.fragments();
        let mut matched = 0;
        if other.local.as_deref().is_some_and(|v| mine.contains(&v)) {
            matched += 1;
        }
        if other.login.as_deref().is_some_and(|v| mine.contains(&v)) {
            matched += 1;
        }
        if other.names.iter().any(|v| mine.contains(&v.as_str())) {
            matched += 1;
        }
        matched
    }
}

/// Two keys belong to the same person when at least two evidence kinds line
/// up in either direction.
fn should_merge(a: &Evidence, b: &Evidence) -> bool {
    a.kinds_matched_by(b).max(b.kinds_matched_by(a)) >= 2
}

/// Resolves raw author tuples into final contributor keys.
///
/// Two passes: the first assigns `canonical_key` forms, folding keys that
/// differ only by case to the earliest-seen form (relay logins preserve
/// case, so `Login@github` and `login@github` can both occur). The second
/// merges keys whose identity fragments overlap in at least two kinds,
/// catching `sindre@gmail.com` vs `sindresorhus@users.noreply.github.com`.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    /// lowercase key → first-seen key form
    case_fold: HashMap<String, String>,
    /// first-seen key form → merge evidence
    evidence: HashMap<String, Evidence>,
    /// insertion order of first-seen keys, for deterministic merging
    order: Vec<String>,
    /// final merge targets, computed by `resolve`
    merged: HashMap<String, String>,
}

impl IdentityResolver {
    pub fn new() -> IdentityResolver {
        IdentityResolver::default()
    }

    /// Record one observation and return its preliminary key.
    pub fn observe(&mut self, obs: &Observation) -> String {
        let raw_key = canonical_key(&obs.email);
        let folded = raw_key.to_ascii_lowercase();
        let key = self
            .case_fold
            .entry(folded)
            .or_insert_with(|| raw_key.clone())
            .clone();

        let key_lower = key.to_ascii_lowercase();
        let email_lower = obs.email.to_ascii_lowercase();
        let login = noreply_login(&email_lower).map(str::to_string);

        let entry = match self.evidence.entry(key.clone()) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(v) => {
                self.order.push(key.clone());
                v.insert(Evidence {
                    local: stripped_local(&key_lower),
                    login: None,
                    names: Vec::new(),
                })
            }
        };
        if entry.login.is_none() {
            entry.login = login;
        }
        if let Some(n) = normalized_name(&obs.name) {
            if !entry.names.contains(&n) {
                entry.names.push(n);
            }
        }
        key
    }

    /// Run the secondary merge pass. After this, `final_key` maps any
    /// preliminary key to its merge representative (the earliest-seen key of
    /// its group).
    pub fn resolve(&mut self) {
        self.merged.clear();
        // Earliest-seen key wins as representative; later keys that share
        // enough evidence fold into it. Single forward pass over insertion
        // order keeps the outcome deterministic.
        for i in 0..self.order.len() {
            let key_i = self.order[i].clone();
            if self.merged.contains_key(&key_i) {
                continue;
            }
            for j in (i + 1)..self.order.len() {
                let key_j = self.order[j].clone();
                if self.merged.contains_key(&key_j) {
                    continue;
                }
                let (ev_i, ev_j) = (&self.evidence[&key_i], &self.evidence[&key_j]);
                if should_merge(ev_i, ev_j) {
                    self.merged.insert(key_j, key_i.clone());
                }
            }
        }
    }

    /// Final key for a preliminary key returned by `observe`.
    pub fn final_key<'a>(&'a self, preliminary: &'a str) -> &'a str {
        self.merged
            .get(preliminary)
            .map(String::as_str)
            .unwrap_or(preliminary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(name: &str, email: &str) -> Observation {
        Observation {
            name: name.to_string(),
            email: email.to_string(),
        }
    }

    #[test]
    fn relay_address_maps_to_login() {
        assert_eq!(
            canonical_key("12345+sindresorhus@users.noreply.github.com"),
            "sindresorhus@github"
        );
        assert_eq!(
            canonical_key("cfconrad@users.noreply.github.com"),
            "cfconrad@github"
        );
    }

    #[test]
    fn personal_providers_collapse() {
        assert_eq!(canonical_key("Jane@Gmail.com"), "jane@personal");
        assert_eq!(canonical_key("jane@outlook.com"), "jane@personal");
        assert_eq!(canonical_key("jane@corp.example"), "jane@corp.example");
    }

    #[test]
    fn normalization_is_idempotent() {
        let k = canonical_key("A.User+tag@GMAIL.com");
        assert_eq!(canonical_key(&k), k);
    }

    #[test]
    fn bot_detection() {
        assert!(is_bot("dependabot[bot]", "x@example.com"));
        assert!(is_bot("someone", "123+dep@bots.noreply.github.com"));
        assert!(is_bot("Renovate", "bot@renovate.example"));
        assert!(!is_bot("Jane Doe", "jane@example.com"));
    }

    #[test]
    fn case_collision_folds_to_earliest() {
        let mut r = IdentityResolver::new();
        let first = r.observe(&obs("A", "99+Login@users.noreply.github.com"));
        let second = r.observe(&obs("A", "99+login@users.noreply.github.com"));
        assert_eq!(first, second);
        assert_eq!(first, "Login@github");
    }

    #[test]
    fn merge_pass_joins_relay_and_personal_address() {
        let mut r = IdentityResolver::new();
        let a = r.observe(&obs("Sindre Sorhus", "sindre@gmail.com"));
        let b = r.observe(&obs(
            "Sindre Sorhus",
            "170270+sindresorhus@users.noreply.github.com",
        ));
        r.resolve();
        assert_eq!(r.final_key(&a), r.final_key(&b));
        // earliest-seen key is the representative
        assert_eq!(r.final_key(&b), "sindre@personal");
    }

    #[test]
    fn merge_pass_leaves_distinct_people_apart() {
        let mut r = IdentityResolver::new();
        let a = r.observe(&obs("John Smith", "john@alpha.example"));
        let b = r.observe(&obs("John Smith", "jsmith@beta.example"));
        r.resolve();
        // only the display name matches: one kind, no merge
        assert_ne!(r.final_key(&a), r.final_key(&b));
    }

    #[test]
    fn stable_across_runs() {
        let seq = [
            obs("Ann", "ann@corp.example"),
            obs("Ann B", "ann@gmail.com"),
            obs("Carl", "carl@users.noreply.github.com"),
        ];
        let mut r1 = IdentityResolver::new();
        let mut r2 = IdentityResolver::new();
        let k1: Vec<String> = seq.iter().map(|o| r1.observe(o)).collect();
        let k2: Vec<String> = seq.iter().map(|o| r2.observe(o)).collect();
        assert_eq!(k1, k2);
    }
}
