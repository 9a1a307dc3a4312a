//! Persistent score cache and movers store.
//!
//! Two tables: `scores` holds the latest score per
//! `(ecosystem, name, as_of_bucket)` and answers freshness-bounded reads;
//! `score_history` is append-only and backs the movers query.
//!
//! Invariants enforced:
//! - `write` is atomic: the upsert and the history append share one
//!   transaction
//! - history rows for one package are strictly monotone in `computed_at`
//!   within a task
//! - two tasks racing on one key leave a single visible `scores` row and
//!   both history rows

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

use crate::ecosystem::Ecosystem;
use crate::error::{OssuaryError, Result};
use crate::scoring::Score;

/// Bucket value for "current" (no cutoff) scores. SQLite treats NULLs as
/// distinct in unique constraints, so the bucket column stores this
/// sentinel instead of NULL.
const CURRENT_BUCKET: &str = "";

/// One movers entry: the latest score change for a package.
#[derive(Debug, Clone, PartialEq)]
pub struct Mover {
    pub ecosystem: Ecosystem,
    pub name: String,
    pub previous: i32,
    pub current: i32,
    pub delta: i32,
    pub computed_at: DateTime<Utc>,
}

/// One row of a package's score history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub score: i32,
    pub computed_at: DateTime<Utc>,
}

/// A tracked package with its most recent computation time.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPackage {
    pub ecosystem: Ecosystem,
    pub name: String,
    pub computed_at: DateTime<Utc>,
}

/// SQLite-backed score cache. The connection is mutex-guarded; rusqlite
/// connections are not Sync and the batch runner shares one handle across
/// worker threads.
pub struct ScoreCache {
    conn: Mutex<Connection>,
}

impl ScoreCache {
    /// Open (creating if needed) the cache database at `path`.
    pub fn open(path: &Path) -> Result<ScoreCache> {
        let conn = Connection::open(path)
            .map_err(|e| OssuaryError::Transient(format!("cannot open cache db: {}", e)))?;
        conn.busy_timeout(std::time::Duration::from_secs(10))
            .map_err(|e| OssuaryError::Transient(format!("cannot set busy timeout: {}", e)))?;
        Ok(ScoreCache {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory cache for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<ScoreCache> {
        let conn = Connection::open_in_memory()
            .map_err(|e| OssuaryError::Transient(format!("cannot open cache db: {}", e)))?;
        Ok(ScoreCache {
            conn: Mutex::new(conn),
        })
    }

    /// Create the schema. Idempotent.
    pub fn init(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS scores (
                 ecosystem    TEXT NOT NULL,
                 name         TEXT NOT NULL,
                 as_of_bucket TEXT NOT NULL DEFAULT '',
                 payload      TEXT NOT NULL,
                 computed_at  TEXT NOT NULL,
                 PRIMARY KEY (ecosystem, name, as_of_bucket)
             );
             CREATE TABLE IF NOT EXISTS score_history (
                 id          INTEGER PRIMARY KEY AUTOINCREMENT,
                 ecosystem   TEXT NOT NULL,
                 name        TEXT NOT NULL,
                 score       INTEGER NOT NULL,
                 computed_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS ix_history_package
                 ON score_history (ecosystem, name, computed_at);",
        )
        .map_err(|e| OssuaryError::Transient(format!("schema init failed: {}", e)))?;
        Ok(())
    }

    /// Read a cached score. HIT requires a matching bucket and
    /// `computed_at` within `max_age` of `now`.
    pub fn read(
        &self,
        ecosystem: Ecosystem,
        name: &str,
        as_of_bucket: Option<&str>,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Score>> {
        let bucket = as_of_bucket.unwrap_or(CURRENT_BUCKET);
        let conn = self.lock();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT payload, computed_at FROM scores
                 WHERE ecosystem = ?1 AND name = ?2 AND as_of_bucket = ?3",
                params![ecosystem.as_str(), name, bucket],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| OssuaryError::Transient(format!("cache read failed: {}", e)))?;

        let Some((payload, computed_at)) = row else {
            return Ok(None);
        };
        let computed_at = parse_ts(&computed_at)?;
        let age = now.signed_duration_since(computed_at);
        if age.num_seconds() >= max_age.as_secs() as i64 {
            debug!("cache entry for {}:{} is stale", ecosystem, name);
            return Ok(None);
        }
        let score: Score = serde_json::from_str(&payload)
            .map_err(|e| OssuaryError::Invariant(format!("corrupt cache payload: {}", e)))?;
        Ok(Some(score))
    }

    /// Upsert the latest score and append a history row, atomically.
    pub fn write(&self, score: &Score) -> Result<()> {
        let bucket = score
            .as_of
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| CURRENT_BUCKET.to_string());
        let payload = serde_json::to_string(score)
            .map_err(|e| OssuaryError::Invariant(format!("unserializable score: {}", e)))?;
        let computed_at = score.computed_at.to_rfc3339();

        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| OssuaryError::Transient(format!("cache write failed: {}", e)))?;
        tx.execute(
            "INSERT INTO scores (ecosystem, name, as_of_bucket, payload, computed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (ecosystem, name, as_of_bucket)
             DO UPDATE SET payload = excluded.payload, computed_at = excluded.computed_at",
            params![
                score.ecosystem.as_str(),
                score.package,
                bucket,
                payload,
                computed_at
            ],
        )
        .map_err(|e| OssuaryError::Transient(format!("cache write failed: {}", e)))?;
        tx.execute(
            "INSERT INTO score_history (ecosystem, name, score, computed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                score.ecosystem.as_str(),
                score.package,
                score.score,
                computed_at
            ],
        )
        .map_err(|e| OssuaryError::Transient(format!("history append failed: {}", e)))?;
        tx.commit()
            .map_err(|e| OssuaryError::Transient(format!("cache write failed: {}", e)))?;
        Ok(())
    }

    /// Packages whose two most recent history rows within `since` differ
    /// the most, by absolute delta descending; ties broken by the later
    /// `computed_at`.
    pub fn movers(
        &self,
        limit: usize,
        since: Duration,
        ecosystem: Option<Ecosystem>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Mover>> {
        let floor = (now - chrono::Duration::seconds(since.as_secs() as i64)).to_rfc3339();
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT ecosystem, name, score, computed_at FROM score_history
                 WHERE computed_at >= ?1
                 ORDER BY ecosystem, name, computed_at DESC, id DESC",
            )
            .map_err(|e| OssuaryError::Transient(format!("movers query failed: {}", e)))?;

        let rows = stmt
            .query_map(params![floor], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i32>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| OssuaryError::Transient(format!("movers query failed: {}", e)))?;

        let mut movers: Vec<Mover> = Vec::new();
        let mut current: Option<(String, String, Vec<(i32, String)>)> = None;
        let flush =
            |group: Option<(String, String, Vec<(i32, String)>)>, out: &mut Vec<Mover>| {
                let Some((eco, name, scores)) = group else {
                    return;
                };
                if scores.len() < 2 {
                    return;
                }
                let Ok(ecosystem) = eco.parse::<Ecosystem>() else {
                    return;
                };
                let (latest, latest_at) = &scores[0];
                let (previous, _) = &scores[1];
                let delta = latest - previous;
                if delta == 0 {
                    return;
                }
                let Ok(computed_at) = parse_ts(latest_at) else {
                    return;
                };
                out.push(Mover {
                    ecosystem,
                    name,
                    previous: *previous,
                    current: *latest,
                    delta,
                    computed_at,
                });
            };

        for row in rows {
            let (eco, name, score, at) =
                row.map_err(|e| OssuaryError::Transient(format!("movers query failed: {}", e)))?;
            match &mut current {
                Some((ceco, cname, scores)) if *ceco == eco && *cname == name => {
                    if scores.len() < 2 {
                        scores.push((score, at));
                    }
                }
                _ => {
                    flush(current.take(), &mut movers);
                    current = Some((eco, name, vec![(score, at)]));
                }
            }
        }
        flush(current.take(), &mut movers);

        if let Some(filter) = ecosystem {
            movers.retain(|m| m.ecosystem == filter);
        }
        movers.sort_by(|a, b| {
            b.delta
                .abs()
                .cmp(&a.delta.abs())
                .then(b.computed_at.cmp(&a.computed_at))
                .then(a.name.cmp(&b.name))
        });
        movers.truncate(limit);
        Ok(movers)
    }

    /// Score history for one package, newest first.
    pub fn history(
        &self,
        ecosystem: Ecosystem,
        name: &str,
        limit: usize,
    ) -> Result<Vec<HistoryRow>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT score, computed_at FROM score_history
                 WHERE ecosystem = ?1 AND name = ?2
                 ORDER BY computed_at DESC, id DESC LIMIT ?3",
            )
            .map_err(|e| OssuaryError::Transient(format!("history query failed: {}", e)))?;
        let rows = stmt
            .query_map(params![ecosystem.as_str(), name, limit as i64], |row| {
                Ok((row.get::<_, i32>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| OssuaryError::Transient(format!("history query failed: {}", e)))?;

        let mut out = Vec::new();
        for row in rows {
            let (score, at) =
                row.map_err(|e| OssuaryError::Transient(format!("history query failed: {}", e)))?;
            out.push(HistoryRow {
                score,
                computed_at: parse_ts(&at)?,
            });
        }
        Ok(out)
    }

    /// Every package with a "current" score row, for the refresh loop.
    pub fn tracked(&self, ecosystem: Option<Ecosystem>) -> Result<Vec<TrackedPackage>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT ecosystem, name, computed_at FROM scores
                 WHERE as_of_bucket = '' ORDER BY ecosystem, name",
            )
            .map_err(|e| OssuaryError::Transient(format!("tracked query failed: {}", e)))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| OssuaryError::Transient(format!("tracked query failed: {}", e)))?;

        let mut out = Vec::new();
        for row in rows {
            let (eco, name, at) =
                row.map_err(|e| OssuaryError::Transient(format!("tracked query failed: {}", e)))?;
            let Ok(parsed) = eco.parse::<Ecosystem>() else {
                continue;
            };
            if ecosystem.is_some_and(|f| f != parsed) {
                continue;
            }
            out.push(TrackedPackage {
                ecosystem: parsed,
                name,
                computed_at: parse_ts(&at)?,
            });
        }
        Ok(out)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Bucket string for an optional cutoff instant.
pub fn bucket_for(as_of: Option<DateTime<Utc>>) -> Option<String> {
    as_of.map(|t| t.format("%Y-%m-%d").to_string())
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| OssuaryError::Invariant(format!("corrupt timestamp '{}': {}", raw, e)))
}
