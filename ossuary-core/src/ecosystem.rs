//! Package identity: the closed ecosystem set and repository references.
//!
//! Dispatch over ecosystems is a closed enum, not a string registry; an
//! unknown ecosystem is an input error at the boundary, never a runtime
//! lookup miss.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::OssuaryError;

/// Supported package ecosystems.
///
/// `Github` is a pseudo-ecosystem: the package name is `owner/name` and no
/// registry call is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Npm,
    Pypi,
    Cargo,
    Rubygems,
    Packagist,
    Nuget,
    Go,
    Github,
}

impl Ecosystem {
    pub const ALL: [Ecosystem; 8] = [
        Ecosystem::Npm,
        Ecosystem::Pypi,
        Ecosystem::Cargo,
        Ecosystem::Rubygems,
        Ecosystem::Packagist,
        Ecosystem::Nuget,
        Ecosystem::Go,
        Ecosystem::Github,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "npm",
            Ecosystem::Pypi => "pypi",
            Ecosystem::Cargo => "cargo",
            Ecosystem::Rubygems => "rubygems",
            Ecosystem::Packagist => "packagist",
            Ecosystem::Nuget => "nuget",
            Ecosystem::Go => "go",
            Ecosystem::Github => "github",
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Ecosystem {
    type Err = OssuaryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "npm" => Ok(Ecosystem::Npm),
            "pypi" => Ok(Ecosystem::Pypi),
            "cargo" | "crates" => Ok(Ecosystem::Cargo),
            "rubygems" | "gem" => Ok(Ecosystem::Rubygems),
            "packagist" | "composer" => Ok(Ecosystem::Packagist),
            "nuget" => Ok(Ecosystem::Nuget),
            "go" => Ok(Ecosystem::Go),
            "github" => Ok(Ecosystem::Github),
            other => Err(OssuaryError::Input(format!(
                "unknown ecosystem '{}' (expected one of: npm, pypi, cargo, rubygems, packagist, nuget, go, github)",
                other
            ))),
        }
    }
}

/// A package within one ecosystem. `ecosystem:name` is the entity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub ecosystem: Ecosystem,
    pub name: String,
}

impl PackageIdentity {
    /// Validate and construct. Names are non-empty; the github
    /// pseudo-ecosystem and packagist require the `owner/name` form.
    pub fn new(ecosystem: Ecosystem, name: &str) -> Result<Self, OssuaryError> {
        let name = name.trim().trim_matches('/');
        if name.is_empty() {
            return Err(OssuaryError::Input("package name is empty".into()));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(OssuaryError::Input(format!(
                "package name '{}' contains whitespace",
                name
            )));
        }
        match ecosystem {
            Ecosystem::Github | Ecosystem::Packagist => {
                let segments: Vec<&str> = name.split('/').collect();
                if segments.len() != 2 || segments.iter().any(|s| s.is_empty()) {
                    return Err(OssuaryError::Input(format!(
                        "{} packages use the owner/name form, got '{}'",
                        ecosystem, name
                    )));
                }
            }
            _ => {}
        }
        Ok(PackageIdentity {
            ecosystem,
            name: name.to_string(),
        })
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ecosystem, self.name)
    }
}

/// A resolved upstream repository. At most one per package at a given
/// evaluation instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub host: String,
    pub owner: String,
    pub repo: String,
    pub url: String,
}

impl RepositoryRef {
    /// Parse a repository URL into host/owner/repo.
    ///
    /// Accepts https, http, git and scp-like `git@host:owner/repo` forms,
    /// with or without a `.git` suffix. Returns `None` for URLs that do not
    /// carry an owner/repo path.
    pub fn parse(url: &str) -> Option<RepositoryRef> {
        let trimmed = url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return None;
        }

        // git@github.com:owner/repo.git
        let rest = if let Some(scp) = trimmed.strip_prefix("git@") {
            scp.replacen(':', "/", 1)
        } else {
            let without_scheme = trimmed
                .strip_prefix("https://")
                .or_else(|| trimmed.strip_prefix("http://"))
                .or_else(|| trimmed.strip_prefix("git://"))
                .or_else(|| trimmed.strip_prefix("ssh://git@"))
                .unwrap_or(trimmed);
            without_scheme.to_string()
        };

        let mut parts = rest.split('/');
        let host = parts.next()?.to_ascii_lowercase();
        if !host.contains('.') {
            return None;
        }
        let owner = parts.next()?.to_string();
        let repo = parts.next()?.trim_end_matches(".git").to_string();
        if owner.is_empty() || repo.is_empty() {
            return None;
        }

        Some(RepositoryRef {
            url: format!("https://{}/{}/{}", host, owner, repo),
            host,
            owner,
            repo,
        })
    }

    /// True when the repository lives on a forge the collector pipeline
    /// understands (currently github.com only).
    pub fn is_supported_forge(&self) -> bool {
        self.host == "github.com"
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecosystem_round_trip() {
        for eco in Ecosystem::ALL {
            assert_eq!(eco.as_str().parse::<Ecosystem>().unwrap(), eco);
        }
    }

    #[test]
    fn unknown_ecosystem_is_input_error() {
        let err = "maven".parse::<Ecosystem>().unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn github_identity_requires_owner_name() {
        assert!(PackageIdentity::new(Ecosystem::Github, "lodash").is_err());
        assert!(PackageIdentity::new(Ecosystem::Github, "lodash/lodash").is_ok());
        assert!(PackageIdentity::new(Ecosystem::Npm, "lodash").is_ok());
    }

    #[test]
    fn parses_common_url_forms() {
        for url in [
            "https://github.com/chalk/chalk",
            "https://github.com/chalk/chalk.git",
            "http://github.com/chalk/chalk/",
            "git://github.com/chalk/chalk.git",
            "git@github.com:chalk/chalk.git",
            "ssh://git@github.com/chalk/chalk",
        ] {
            let r = RepositoryRef::parse(url).unwrap();
            assert_eq!(r.host, "github.com");
            assert_eq!(r.owner, "chalk");
            assert_eq!(r.repo, "chalk");
            assert_eq!(r.url, "https://github.com/chalk/chalk");
        }
    }

    #[test]
    fn rejects_urls_without_repo_path() {
        assert!(RepositoryRef::parse("https://example.com").is_none());
        assert!(RepositoryRef::parse("https://github.com/only-owner").is_none());
        assert!(RepositoryRef::parse("").is_none());
    }

    #[test]
    fn non_github_hosts_parse_but_are_unsupported() {
        let r = RepositoryRef::parse("https://gitlab.com/a/b").unwrap();
        assert!(!r.is_supported_forge());
    }
}
