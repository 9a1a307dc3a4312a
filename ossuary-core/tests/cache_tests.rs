//! Score cache behavior: freshness gate, bucket matching, idempotent
//! read-after-write, and the movers delta query. All tests run against an
//! in-memory database.

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

use ossuary_core::cache::ScoreCache;
use ossuary_core::ecosystem::Ecosystem;
use ossuary_core::scoring::{evaluate, Score, ScoreConfig, ScoreInputs};

const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
}

fn make_score(
    package: &str,
    ecosystem: Ecosystem,
    concentration: f64,
    computed_at: DateTime<Utc>,
    as_of: Option<DateTime<Utc>>,
) -> Score {
    let inputs = ScoreInputs {
        recent_concentration: Some(concentration),
        commits_per_year_recent: 10,
        total_commits: 100,
        repo_age_years: 2.0,
        last_commit: Some(computed_at - ChronoDuration::days(30)),
        as_of: as_of.unwrap_or(computed_at),
        ..ScoreInputs::default()
    };
    evaluate(
        package,
        ecosystem,
        &inputs,
        &ScoreConfig::default(),
        computed_at,
        as_of,
    )
    .unwrap()
}

fn open() -> ScoreCache {
    let cache = ScoreCache::open_in_memory().unwrap();
    cache.init().unwrap();
    cache
}

#[test]
fn init_is_idempotent() {
    let cache = open();
    cache.init().unwrap();
    cache.init().unwrap();
}

#[test]
fn read_after_write_returns_equal_score() {
    let cache = open();
    let now = at(2024, 6, 1);
    let written = make_score("chalk", Ecosystem::Npm, 80.0, now, None);
    cache.write(&written).unwrap();

    let read = cache
        .read(Ecosystem::Npm, "chalk", None, WEEK, now)
        .unwrap()
        .expect("fresh entry must hit");
    assert_eq!(read, written);
}

#[test]
fn stale_entries_miss() {
    let cache = open();
    let computed = at(2024, 6, 1);
    cache
        .write(&make_score("chalk", Ecosystem::Npm, 80.0, computed, None))
        .unwrap();

    let eight_days_later = computed + ChronoDuration::days(8);
    let miss = cache
        .read(Ecosystem::Npm, "chalk", None, WEEK, eight_days_later)
        .unwrap();
    assert!(miss.is_none());

    let six_days_later = computed + ChronoDuration::days(6);
    let hit = cache
        .read(Ecosystem::Npm, "chalk", None, WEEK, six_days_later)
        .unwrap();
    assert!(hit.is_some());
}

#[test]
fn bucket_mismatch_misses() {
    let cache = open();
    let now = at(2024, 6, 1);
    let cutoff = at(2018, 9, 1);
    cache
        .write(&make_score("event-stream", Ecosystem::Npm, 90.0, now, Some(cutoff)))
        .unwrap();

    // a current read must not see the cutoff-bucketed entry
    assert!(cache
        .read(Ecosystem::Npm, "event-stream", None, WEEK, now)
        .unwrap()
        .is_none());
    // the matching bucket hits
    assert!(cache
        .read(Ecosystem::Npm, "event-stream", Some("2018-09-01"), WEEK, now)
        .unwrap()
        .is_some());
    // a different bucket misses
    assert!(cache
        .read(Ecosystem::Npm, "event-stream", Some("2018-10-01"), WEEK, now)
        .unwrap()
        .is_none());
}

#[test]
fn same_name_different_ecosystems_are_distinct() {
    let cache = open();
    let now = at(2024, 6, 1);
    cache
        .write(&make_score("redis", Ecosystem::Npm, 30.0, now, None))
        .unwrap();
    cache
        .write(&make_score("redis", Ecosystem::Pypi, 95.0, now, None))
        .unwrap();

    let npm = cache.read(Ecosystem::Npm, "redis", None, WEEK, now).unwrap().unwrap();
    let pypi = cache.read(Ecosystem::Pypi, "redis", None, WEEK, now).unwrap().unwrap();
    assert_ne!(npm.score, pypi.score);
}

#[test]
fn upsert_keeps_one_scores_row_and_all_history_rows() {
    let cache = open();
    let first = make_score("lodash", Ecosystem::Npm, 30.0, at(2024, 5, 1), None);
    let second = make_score("lodash", Ecosystem::Npm, 95.0, at(2024, 5, 20), None);
    cache.write(&first).unwrap();
    cache.write(&second).unwrap();

    let now = at(2024, 5, 21);
    let current = cache
        .read(Ecosystem::Npm, "lodash", None, WEEK, now)
        .unwrap()
        .unwrap();
    assert_eq!(current.score, second.score);

    let history = cache.history(Ecosystem::Npm, "lodash", 10).unwrap();
    assert_eq!(history.len(), 2);
    // newest first
    assert_eq!(history[0].score, second.score);
    assert_eq!(history[1].score, first.score);
}

#[test]
fn movers_orders_by_absolute_delta() {
    let cache = open();
    // small riser: 20 -> 30
    cache
        .write(&make_score("steady", Ecosystem::Npm, 25.0, at(2024, 5, 1), None))
        .unwrap();
    cache
        .write(&make_score("steady", Ecosystem::Npm, 45.0, at(2024, 5, 10), None))
        .unwrap();
    // big riser: 20 -> 100
    cache
        .write(&make_score("spiking", Ecosystem::Npm, 20.0, at(2024, 5, 2), None))
        .unwrap();
    cache
        .write(&make_score("spiking", Ecosystem::Npm, 99.0, at(2024, 5, 11), None))
        .unwrap();
    // no change: absent from movers
    cache
        .write(&make_score("flat", Ecosystem::Npm, 50.0, at(2024, 5, 3), None))
        .unwrap();
    cache
        .write(&make_score("flat", Ecosystem::Npm, 50.0, at(2024, 5, 12), None))
        .unwrap();
    // single row: absent from movers
    cache
        .write(&make_score("lonely", Ecosystem::Npm, 50.0, at(2024, 5, 4), None))
        .unwrap();

    let movers = cache
        .movers(10, Duration::from_secs(60 * 24 * 60 * 60), None, at(2024, 5, 15))
        .unwrap();

    let names: Vec<&str> = movers.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["spiking", "steady"]);
    assert!(movers[0].delta.abs() > movers[1].delta.abs());
    assert_eq!(movers[0].previous + movers[0].delta, movers[0].current);
}

#[test]
fn movers_respects_limit_and_ecosystem_filter() {
    let cache = open();
    for (name, eco) in [("a", Ecosystem::Npm), ("b", Ecosystem::Pypi)] {
        cache
            .write(&make_score(name, eco, 25.0, at(2024, 5, 1), None))
            .unwrap();
        cache
            .write(&make_score(name, eco, 95.0, at(2024, 5, 10), None))
            .unwrap();
    }

    let window = Duration::from_secs(60 * 24 * 60 * 60);
    let all = cache.movers(10, window, None, at(2024, 5, 15)).unwrap();
    assert_eq!(all.len(), 2);

    let only_npm = cache
        .movers(10, window, Some(Ecosystem::Npm), at(2024, 5, 15))
        .unwrap();
    assert_eq!(only_npm.len(), 1);
    assert_eq!(only_npm[0].ecosystem, Ecosystem::Npm);

    let limited = cache.movers(1, window, None, at(2024, 5, 15)).unwrap();
    assert_eq!(limited.len(), 1);
}

#[test]
fn movers_ignores_history_outside_window() {
    let cache = open();
    cache
        .write(&make_score("old", Ecosystem::Npm, 25.0, at(2023, 1, 1), None))
        .unwrap();
    cache
        .write(&make_score("old", Ecosystem::Npm, 95.0, at(2023, 1, 10), None))
        .unwrap();

    let movers = cache
        .movers(10, Duration::from_secs(30 * 24 * 60 * 60), None, at(2024, 5, 15))
        .unwrap();
    assert!(movers.is_empty());
}

#[test]
fn tracked_lists_current_rows_only() {
    let cache = open();
    let now = at(2024, 6, 1);
    cache
        .write(&make_score("chalk", Ecosystem::Npm, 80.0, now, None))
        .unwrap();
    cache
        .write(&make_score("event-stream", Ecosystem::Npm, 90.0, now, Some(at(2018, 9, 1))))
        .unwrap();

    let tracked = cache.tracked(None).unwrap();
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].name, "chalk");
}
