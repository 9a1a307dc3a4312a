//! Ossuary CLI - governance risk scoring for open-source packages

#![deny(warnings)]

// Global invariants enforced:
// - Exit codes: 0 success, 1 unresolved repo, 2 transient failure, 3 input error
// - Deterministic output ordering

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use log::error;

use ossuary_core::cache::ScoreCache;
use ossuary_core::config::Settings;
use ossuary_core::ecosystem::{Ecosystem, PackageIdentity};
use ossuary_core::error::OssuaryError;
use ossuary_core::pipeline::{Orchestrator, ScoreRequest};
use ossuary_core::scoring::{Score, ScoreConfig};

#[derive(Parser)]
#[command(name = "ossuary")]
#[command(about = "Governance risk scoring for open-source packages")]
#[command(version = env!("OSSUARY_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a package and print the result
    Score {
        /// Package name (e.g. 'chalk', 'requests', 'owner/repo' for github)
        package: String,

        /// Package ecosystem
        #[arg(long, short = 'e')]
        ecosystem: String,

        /// Evaluate as of this date (YYYY-MM-DD) instead of now
        #[arg(long)]
        cutoff: Option<String>,

        /// Output as JSON
        #[arg(long, short = 'j')]
        json: bool,

        /// Re-score even if a fresh cached result exists
        #[arg(long, short = 'f')]
        force: bool,

        /// Accept cached scores up to this many days old
        #[arg(long)]
        max_age: Option<u64>,
    },
    /// Create the cache schema
    Init,
    /// Show packages with the biggest score changes
    Movers {
        /// Number of movers to show
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,

        /// Only consider history within this many days
        #[arg(long, default_value = "30")]
        since: u64,

        /// Filter by ecosystem
        #[arg(long, short = 'e')]
        ecosystem: Option<String>,
    },
    /// Show score history for a package
    History {
        /// Package name
        package: String,

        /// Package ecosystem
        #[arg(long, short = 'e')]
        ecosystem: String,

        /// Number of records to show
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,

        /// Output as JSON
        #[arg(long, short = 'j')]
        json: bool,
    },
    /// Re-score tracked packages that have gone stale
    Refresh {
        /// Re-score packages older than this many days
        #[arg(long, default_value = "7")]
        max_age: u64,

        /// Only refresh this ecosystem
        #[arg(long, short = 'e')]
        ecosystem: Option<String>,

        /// Concurrent scoring tasks
        #[arg(long, default_value = "3")]
        jobs: usize,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli.command) {
        Ok(()) => {}
        Err(err) => {
            error!("{}", err);
            eprintln!("error: {}", err);
            std::process::exit(err.exit_code());
        }
    }
}

fn run(command: Commands) -> Result<(), OssuaryError> {
    let settings = Settings::from_env()?;

    match command {
        Commands::Score {
            package,
            ecosystem,
            cutoff,
            json,
            force,
            max_age,
        } => {
            let eco = Ecosystem::from_str(&ecosystem)?;
            let identity = PackageIdentity::new(eco, &package)?;
            let as_of = cutoff.as_deref().map(parse_cutoff).transpose()?;
            let max_age = max_age
                .map(|days| Duration::from_secs(days * 24 * 60 * 60))
                .unwrap_or_else(|| settings.max_age());

            let cache = open_cache(&settings)?;
            cache.init()?;
            let orchestrator = Orchestrator::new(settings, ScoreConfig::default(), cache)?;
            let score = orchestrator.score(&ScoreRequest {
                package: identity,
                as_of,
                max_age,
                force,
            })?;

            if json {
                println!("{}", render_json(&score)?);
            } else {
                print!("{}", render_text(&score));
            }
        }
        Commands::Init => {
            let cache = open_cache(&settings)?;
            cache.init()?;
            println!("cache schema ready at {}", settings.database_path.display());
        }
        Commands::Movers {
            limit,
            since,
            ecosystem,
        } => {
            let filter = ecosystem.as_deref().map(Ecosystem::from_str).transpose()?;
            let cache = open_cache(&settings)?;
            cache.init()?;
            let movers = cache.movers(
                limit,
                Duration::from_secs(since * 24 * 60 * 60),
                filter,
                Utc::now(),
            )?;

            if movers.is_empty() {
                println!("No score changes detected.");
                return Ok(());
            }
            println!("{:<40} {:>4} {:>6} {:>7}  ECOSYSTEM", "PACKAGE", "PREV", "NOW", "DELTA");
            for m in movers {
                println!(
                    "{:<40} {:>4} {:>6} {:>+7}  {}",
                    m.name, m.previous, m.current, m.delta, m.ecosystem
                );
            }
        }
        Commands::History {
            package,
            ecosystem,
            limit,
            json,
        } => {
            let eco = Ecosystem::from_str(&ecosystem)?;
            let cache = open_cache(&settings)?;
            cache.init()?;
            let rows = cache.history(eco, &package, limit)?;
            if rows.is_empty() {
                return Err(OssuaryError::Input(format!(
                    "no scores recorded for {}:{} (score it first)",
                    eco, package
                )));
            }
            if json {
                let records: Vec<serde_json::Value> = rows
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "score": r.score,
                            "computed_at": r.computed_at.to_rfc3339(),
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "package": package,
                        "ecosystem": eco.as_str(),
                        "history": records,
                    }))
                    .map_err(|e| OssuaryError::Invariant(e.to_string()))?
                );
            } else {
                println!("{:<25} SCORE", "COMPUTED");
                for r in rows {
                    println!("{:<25} {:>5}", r.computed_at.format("%Y-%m-%d %H:%M:%S"), r.score);
                }
            }
        }
        Commands::Refresh {
            max_age,
            ecosystem,
            jobs,
        } => {
            let filter = ecosystem.as_deref().map(Ecosystem::from_str).transpose()?;
            refresh(settings, filter, max_age, jobs.max(1))?;
        }
    }
    Ok(())
}

/// Re-score every tracked package older than `max_age` days, with a bounded
/// pool of worker threads pulling from one queue.
fn refresh(
    settings: Settings,
    filter: Option<Ecosystem>,
    max_age: u64,
    jobs: usize,
) -> Result<(), OssuaryError> {
    let cache = open_cache(&settings)?;
    cache.init()?;
    let now = Utc::now();
    let threshold = chrono::Duration::days(max_age as i64);
    let stale: Vec<PackageIdentity> = cache
        .tracked(filter)?
        .into_iter()
        .filter(|t| now.signed_duration_since(t.computed_at) >= threshold)
        .map(|t| PackageIdentity {
            ecosystem: t.ecosystem,
            name: t.name,
        })
        .collect();

    if stale.is_empty() {
        println!("All tracked packages are fresh.");
        return Ok(());
    }
    println!("{} packages need refresh (>{} days old).", stale.len(), max_age);

    let max_age_duration = settings.max_age();
    let orchestrator = Orchestrator::new(settings, ScoreConfig::default(), cache)?;
    let queue = std::sync::Mutex::new(stale.into_iter());
    let failures = std::sync::Mutex::new(0usize);

    std::thread::scope(|s| {
        for _ in 0..jobs {
            s.spawn(|| loop {
                let next = {
                    let mut guard = queue.lock().unwrap_or_else(|p| p.into_inner());
                    guard.next()
                };
                let Some(package) = next else { break };
                let label = package.to_string();
                let result = orchestrator.score(&ScoreRequest {
                    package,
                    as_of: None,
                    max_age: max_age_duration,
                    force: true,
                });
                match result {
                    Ok(score) => {
                        println!("  {:<45} {:>3} {}", label, score.score, score.risk_level.as_str());
                    }
                    Err(e) => {
                        eprintln!("  {:<45} ERROR: {}", label, e);
                        *failures.lock().unwrap_or_else(|p| p.into_inner()) += 1;
                    }
                }
            });
        }
    });

    let failed = *failures.lock().unwrap_or_else(|p| p.into_inner());
    if failed > 0 {
        return Err(OssuaryError::Transient(format!(
            "{} packages failed to refresh",
            failed
        )));
    }
    Ok(())
}

fn open_cache(settings: &Settings) -> Result<ScoreCache, OssuaryError> {
    ScoreCache::open(&settings.database_path)
}

fn parse_cutoff(raw: &str) -> Result<DateTime<Utc>, OssuaryError> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| OssuaryError::Input(format!("unparseable cutoff '{}' (want YYYY-MM-DD)", raw)))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| OssuaryError::Input(format!("invalid cutoff '{}'", raw)))?;
    Ok(DateTime::from_naive_utc_and_offset(midnight, Utc))
}

fn render_json(score: &Score) -> Result<String, OssuaryError> {
    serde_json::to_string_pretty(score).map_err(|e| OssuaryError::Invariant(e.to_string()))
}

/// Human-readable score report.
fn render_text(score: &Score) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} {}:{} - {} ({})\n",
        score.semaphore,
        score.ecosystem,
        score.package,
        score.score,
        score.risk_level.as_str()
    ));
    if score.partial {
        out.push_str("  (partial: some collector data was unavailable)\n");
    }
    out.push_str(&format!("\n{}\n\nBreakdown:\n", score.explanation));
    for entry in &score.breakdown {
        out.push_str(&format!(
            "  {:<24} {:>+4}  {}\n",
            entry.tag, entry.points, entry.evidence
        ));
    }
    if !score.recommendations.is_empty() {
        out.push_str("\nRecommendations:\n");
        for rec in &score.recommendations {
            out.push_str(&format!("  - {}\n", rec));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_parsing() {
        let parsed = parse_cutoff("2018-09-01").unwrap();
        assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2018-09-01");
        assert!(parse_cutoff("09/01/2018").is_err());
        assert!(parse_cutoff("2018-13-01").is_err());
    }
}
