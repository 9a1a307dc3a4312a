//! Package-registry collectors.
//!
//! One adapter per ecosystem, all with the same contract: fetch package
//! metadata, weekly downloads, and the upstream repository URL. Dispatch is
//! over the closed [`Ecosystem`] enum; the `github` pseudo-ecosystem makes
//! no registry call at all.
//!
//! Download figures are normalized to a weekly rate. Registries that only
//! publish coarser windows are scaled (90-day / 13, monthly / 4, lifetime /
//! 260); Go has no public download API and reports none.

use log::debug;
use serde_json::Value;

use crate::ecosystem::{Ecosystem, PackageIdentity};
use crate::error::Result;
use crate::http::HttpClient;

/// Unified record from any package registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryRecord {
    pub name: String,
    pub latest_version: Option<String>,
    pub description: Option<String>,
    /// Upstream repository URL as published; may point at an unsupported
    /// forge, which downstream resolution rejects explicitly.
    pub repo_url: Option<String>,
    pub downloads_per_week: Option<u64>,
    pub maintainers: Vec<String>,
}

/// Fetch the registry record for a package.
pub fn fetch(client: &HttpClient, package: &PackageIdentity) -> Result<RegistryRecord> {
    let name = package.name.as_str();
    match package.ecosystem {
        Ecosystem::Npm => fetch_npm(client, name),
        Ecosystem::Pypi => fetch_pypi(client, name),
        Ecosystem::Cargo => fetch_cargo(client, name),
        Ecosystem::Rubygems => fetch_rubygems(client, name),
        Ecosystem::Packagist => fetch_packagist(client, name),
        Ecosystem::Nuget => fetch_nuget(client, name),
        Ecosystem::Go => fetch_go(client, name),
        Ecosystem::Github => Ok(RegistryRecord {
            name: name.to_string(),
            repo_url: Some(format!("https://github.com/{}", name)),
            ..RegistryRecord::default()
        }),
    }
}

fn fetch_npm(client: &HttpClient, name: &str) -> Result<RegistryRecord> {
    let mut record = RegistryRecord {
        name: name.to_string(),
        ..RegistryRecord::default()
    };

    let url = format!("https://registry.npmjs.org/{}", name);
    if let Some(manifest) = client.get_json(&url, &[])? {
        record.latest_version = manifest
            .pointer("/dist-tags/latest")
            .and_then(Value::as_str)
            .map(str::to_string);
        record.description = str_field(&manifest, "description");
        record.repo_url = manifest
            .get("repository")
            .and_then(|repo| match repo {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => o.get("url").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .map(|raw| normalize_git_url(&raw));
        if let Some(list) = manifest.get("maintainers").and_then(Value::as_array) {
            record.maintainers = list
                .iter()
                .filter_map(|m| m.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
        }
    }

    let downloads_url = format!("https://api.npmjs.org/downloads/point/last-week/{}", name);
    if let Some(stats) = client.get_json(&downloads_url, &[])? {
        record.downloads_per_week = stats.get("downloads").and_then(Value::as_u64);
    }

    Ok(record)
}

/// Priority order over PyPI `project_urls` keys, matched case-insensitively.
/// The order is part of the scoring contract; reordering changes which repo
/// gets cloned for packages that publish several links.
const PYPI_URL_KEYS: [&str; 6] = [
    "repository",
    "source",
    "source code",
    "code",
    "homepage",
    "bug tracker",
];

fn fetch_pypi(client: &HttpClient, name: &str) -> Result<RegistryRecord> {
    let mut record = RegistryRecord {
        name: name.to_string(),
        ..RegistryRecord::default()
    };

    let url = format!("https://pypi.org/pypi/{}/json", name);
    if let Some(doc) = client.get_json(&url, &[])? {
        let info = doc.get("info").cloned().unwrap_or(Value::Null);
        record.latest_version = str_field(&info, "version");
        record.description = str_field(&info, "summary");
        record.repo_url = pypi_repo_url(&info);
        for key in ["maintainer", "author"] {
            if let Some(v) = str_field(&info, key) {
                if !v.trim().is_empty() {
                    record.maintainers.push(v);
                    break;
                }
            }
        }
    }

    let stats_url = format!("https://pypistats.org/api/packages/{}/recent", name);
    if let Some(stats) = client.get_json(&stats_url, &[])? {
        record.downloads_per_week = stats
            .pointer("/data/last_month")
            .and_then(Value::as_u64)
            .map(|monthly| monthly / 4);
    }

    Ok(record)
}

fn pypi_repo_url(info: &Value) -> Option<String> {
    let urls = info.get("project_urls").and_then(Value::as_object)?;
    let lowered: Vec<(String, &str)> = urls
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.to_ascii_lowercase(), s)))
        .collect();
    for wanted in PYPI_URL_KEYS {
        if let Some((_, url)) = lowered.iter().find(|(k, _)| k == wanted) {
            if !url.trim().is_empty() {
                return Some(clean_repo_url(url));
            }
        }
    }
    None
}

fn fetch_cargo(client: &HttpClient, name: &str) -> Result<RegistryRecord> {
    let mut record = RegistryRecord {
        name: name.to_string(),
        ..RegistryRecord::default()
    };
    let url = format!("https://crates.io/api/v1/crates/{}", name);
    if let Some(doc) = client.get_json(&url, &[])? {
        let krate = doc.get("crate").cloned().unwrap_or(Value::Null);
        record.latest_version = str_field(&krate, "newest_version");
        record.description = str_field(&krate, "description");
        record.repo_url = str_field(&krate, "repository").filter(|s| !s.is_empty());
        // recent_downloads covers the last 90 days (~13 weeks)
        record.downloads_per_week = krate
            .get("recent_downloads")
            .and_then(Value::as_u64)
            .map(|recent| recent / 13);
    }
    Ok(record)
}

fn fetch_rubygems(client: &HttpClient, name: &str) -> Result<RegistryRecord> {
    let mut record = RegistryRecord {
        name: name.to_string(),
        ..RegistryRecord::default()
    };
    let url = format!("https://rubygems.org/api/v1/gems/{}.json", name);
    if let Some(gem) = client.get_json(&url, &[])? {
        record.latest_version = str_field(&gem, "version");
        record.description = str_field(&gem, "info");
        let repo = str_field(&gem, "source_code_uri")
            .filter(|s| !s.is_empty())
            .or_else(|| str_field(&gem, "homepage_uri").filter(|s| !s.is_empty()));
        record.repo_url = repo.map(|r| clean_repo_url(&r));
        // Lifetime downloads scaled by an assumed five-year life (260 weeks).
        record.downloads_per_week = gem
            .get("downloads")
            .and_then(Value::as_u64)
            .map(|total| total / 260);
    }
    Ok(record)
}

fn fetch_packagist(client: &HttpClient, name: &str) -> Result<RegistryRecord> {
    let mut record = RegistryRecord {
        name: name.to_string(),
        ..RegistryRecord::default()
    };
    let url = format!("https://packagist.org/packages/{}.json", name);
    if let Some(doc) = client.get_json(&url, &[])? {
        let pkg = doc.get("package").cloned().unwrap_or(Value::Null);
        record.description = str_field(&pkg, "description");
        record.repo_url = str_field(&pkg, "repository")
            .filter(|s| !s.is_empty())
            .map(|r| r.replacen("git://", "https://", 1));
        record.downloads_per_week = pkg
            .pointer("/downloads/daily")
            .and_then(Value::as_u64)
            .map(|daily| daily * 7);
        if let Some(versions) = pkg.get("versions").and_then(Value::as_object) {
            record.latest_version = versions
                .values()
                .next()
                .and_then(|v| v.get("version"))
                .and_then(Value::as_str)
                .map(str::to_string);
        }
    }
    Ok(record)
}

fn fetch_nuget(client: &HttpClient, name: &str) -> Result<RegistryRecord> {
    let mut record = RegistryRecord {
        name: name.to_string(),
        ..RegistryRecord::default()
    };
    let url = format!(
        "https://azuresearch-usnc.nuget.org/query?q=packageid:{}&take=1",
        name
    );
    if let Some(doc) = client.get_json(&url, &[])? {
        if let Some(pkg) = doc.pointer("/data/0") {
            record.latest_version = str_field(pkg, "version");
            record.description = str_field(pkg, "description");
            record.downloads_per_week = pkg
                .get("totalDownloads")
                .and_then(Value::as_u64)
                .map(|total| total / 260);
            record.repo_url = str_field(pkg, "projectUrl")
                .filter(|u| looks_like_forge(u))
                .map(|u| clean_repo_url(&u));
        }
    }

    // The search document often omits the source repo; the registration
    // catalog is the fallback.
    if record.repo_url.is_none() {
        let reg_url = format!(
            "https://api.nuget.org/v3/registration5-gz-semver2/{}/index.json",
            name.to_ascii_lowercase()
        );
        if let Some(reg) = client.get_json(&reg_url, &[])? {
            let catalog_url = reg
                .pointer("/items")
                .and_then(Value::as_array)
                .and_then(|pages| pages.last())
                .and_then(|page| page.pointer("/items"))
                .and_then(Value::as_array)
                .and_then(|items| items.last())
                .and_then(|item| item.pointer("/catalogEntry/projectUrl"))
                .and_then(Value::as_str)
                .map(str::to_string);
            record.repo_url = catalog_url
                .filter(|u| looks_like_forge(u))
                .map(|u| clean_repo_url(&u));
        }
    }
    Ok(record)
}

fn fetch_go(client: &HttpClient, name: &str) -> Result<RegistryRecord> {
    let mut record = RegistryRecord {
        name: name.to_string(),
        ..RegistryRecord::default()
    };

    // For Go modules the import path usually IS the repository.
    if name.starts_with("github.com/") {
        record.repo_url = Some(format!("https://{}", name));
    } else if let Some(pkg) = name.strip_prefix("golang.org/x/") {
        let base = pkg.split('/').next().unwrap_or(pkg);
        record.repo_url = Some(format!("https://github.com/golang/{}", base));
    }

    let url = format!("https://proxy.golang.org/{}/@latest", name.to_ascii_lowercase());
    match client.get_json(&url, &[]) {
        Ok(Some(info)) => {
            record.latest_version = str_field(&info, "Version")
                .map(|v| v.trim_start_matches('v').to_string());
        }
        Ok(None) => {}
        Err(e) if record.repo_url.is_some() => {
            // The proxy only supplies the version string; a derived repo URL
            // is enough to keep scoring.
            debug!("go proxy lookup failed for {}: {}", name, e);
        }
        Err(e) => return Err(e),
    }

    // proxy.golang.org does not publish download counts.
    record.downloads_per_week = None;
    Ok(record)
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn looks_like_forge(url: &str) -> bool {
    url.contains("github.com") || url.contains("gitlab.com")
}

/// Normalize the `repository` field forms npm publishes:
/// `git+https://...`, `git://...`, `ssh://git@...`, with a `.git` suffix.
fn normalize_git_url(raw: &str) -> String {
    let mut url = raw.trim().to_string();
    if let Some(rest) = url.strip_prefix("git+") {
        url = rest.to_string();
    }
    if let Some(rest) = url.strip_prefix("git://") {
        url = format!("https://{}", rest);
    }
    if let Some(rest) = url.strip_prefix("ssh://git@") {
        url = format!("https://{}", rest);
    }
    url.trim_end_matches(".git").trim_end_matches('/').to_string()
}

/// Strip fragments, query strings and issue/tree/blob tails so the URL
/// points at the repository root.
fn clean_repo_url(raw: &str) -> String {
    let mut url = raw.split(['#', '?']).next().unwrap_or(raw).trim_end_matches('/');
    for marker in [
        "/issues", "/pulls", "/tree/", "/blob/", "/wiki", "/releases", "/actions",
        "/discussions",
    ] {
        if let Some(pos) = url.find(marker) {
            url = &url[..pos];
        }
    }
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn npm_repository_forms_normalize() {
        assert_eq!(
            normalize_git_url("git+https://github.com/chalk/chalk.git"),
            "https://github.com/chalk/chalk"
        );
        assert_eq!(
            normalize_git_url("git://github.com/a/b.git"),
            "https://github.com/a/b"
        );
        assert_eq!(
            normalize_git_url("ssh://git@github.com/a/b.git"),
            "https://github.com/a/b"
        );
    }

    #[test]
    fn repo_url_tails_are_cleaned() {
        assert_eq!(
            clean_repo_url("https://github.com/a/b/issues"),
            "https://github.com/a/b"
        );
        assert_eq!(
            clean_repo_url("https://github.com/a/b/tree/main/src"),
            "https://github.com/a/b"
        );
        assert_eq!(
            clean_repo_url("https://github.com/a/b?tab=readme#usage"),
            "https://github.com/a/b"
        );
    }

    #[test]
    fn pypi_priority_prefers_repository_over_homepage() {
        let info = json!({
            "project_urls": {
                "Homepage": "https://example.org/docs",
                "Repository": "https://github.com/pallets/flask",
            }
        });
        assert_eq!(
            pypi_repo_url(&info).as_deref(),
            Some("https://github.com/pallets/flask")
        );
    }

    #[test]
    fn pypi_priority_source_beats_code_and_homepage() {
        let info = json!({
            "project_urls": {
                "Code": "https://github.com/a/code",
                "Homepage": "https://a.example",
                "Source": "https://github.com/a/source",
            }
        });
        assert_eq!(
            pypi_repo_url(&info).as_deref(),
            Some("https://github.com/a/source")
        );
    }

    #[test]
    fn pypi_homepage_is_returned_verbatim_even_off_forge() {
        // Non-GitHub hosts are passed through; resolution rejects them
        // downstream with an explicit diagnostic rather than silently here.
        let info = json!({
            "project_urls": { "Homepage": "https://git.sr.ht/~me/tool" }
        });
        assert_eq!(
            pypi_repo_url(&info).as_deref(),
            Some("https://git.sr.ht/~me/tool")
        );
    }

    #[test]
    fn go_module_path_derives_repo_url() {
        let name = "golang.org/x/tools/cmd/stringer";
        let base = name.strip_prefix("golang.org/x/").unwrap();
        assert_eq!(
            format!("https://github.com/golang/{}", base.split('/').next().unwrap()),
            "https://github.com/golang/tools"
        );
    }
}
