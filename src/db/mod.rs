// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Analysis result store backed by SQLite

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::{ReelscopeError, Result};

/// One analysis attempt for a work item, keyed by `aweme_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoAnalysis {
    pub aweme_id: String,
    pub file_path: String,
    /// Model order is kept and duplicates are allowed
    pub tags: Vec<String>,
    pub category: String,
    pub summary: String,
    pub objects: Vec<String>,
    pub scene: String,
    pub sexy_level: i64,
    pub analyzed_at: Option<DateTime<Utc>>,
    /// Present only for failed attempts
    pub error: Option<String>,
    pub is_image_set: bool,
    pub image_count: i64,
}

impl VideoAnalysis {
    /// Blank record for `aweme_id`
    pub fn new(aweme_id: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            aweme_id: aweme_id.into(),
            file_path: file_path.into(),
            tags: Vec::new(),
            category: String::new(),
            summary: String::new(),
            objects: Vec::new(),
            scene: String::new(),
            sexy_level: 0,
            analyzed_at: None,
            error: None,
            is_image_set: false,
            image_count: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn level_label(&self) -> &'static str {
        match self.sexy_level {
            1..=2 => "normal",
            3..=4 => "mild",
            5..=6 => "moderate",
            7..=8 => "high",
            9..=10 => "extreme",
            _ => "unknown",
        }
    }
}

/// Persistence seam used by the scheduler
pub trait ResultSink: Send + Sync {
    /// Insert or replace by `aweme_id`
    fn upsert(&self, analysis: &VideoAnalysis) -> Result<()>;
    fn get(&self, aweme_id: &str) -> Result<Option<VideoAnalysis>>;
    /// Successful records, newest first
    fn get_all(&self) -> Result<Vec<VideoAnalysis>>;
    /// Ids whose latest attempt succeeded
    fn analyzed_ids(&self) -> Result<HashSet<String>>;
}

/// Filter for listing successful results
#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    pub tag: Option<String>,
    pub category: Option<String>,
    pub min_level: Option<i64>,
    pub limit: Option<usize>,
}

/// Distinct tags and categories across successful results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Facets {
    pub tags: Vec<String>,
    pub categories: Vec<String>,
}

/// Row counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbStats {
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
}

/// Database manager for Reelscope (thread-safe wrapper)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_COLUMNS: &str = "SELECT aweme_id, file_path, tags, category, summary, objects, scene, \
     sexy_level, analyzed_at, error, is_image_set, image_count FROM video_analysis";

impl Database {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ReelscopeError::Config("Database lock poisoned".to_string()))
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS video_analysis (
                aweme_id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL DEFAULT '',
                tags TEXT NOT NULL DEFAULT '[]',
                category TEXT NOT NULL DEFAULT '',
                summary TEXT NOT NULL DEFAULT '',
                objects TEXT NOT NULL DEFAULT '[]',
                scene TEXT NOT NULL DEFAULT '',
                sexy_level INTEGER NOT NULL DEFAULT 0,
                analyzed_at TEXT,
                error TEXT,
                is_image_set INTEGER NOT NULL DEFAULT 0,
                image_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_analysis_category ON video_analysis(category);
            CREATE INDEX IF NOT EXISTS idx_analysis_time ON video_analysis(analyzed_at);
        "#,
        )?;
        Ok(())
    }

    /// Insert or replace one record
    pub fn save_analysis(&self, analysis: &VideoAnalysis) -> Result<()> {
        let tags = serde_json::to_string(&analysis.tags)?;
        let objects = serde_json::to_string(&analysis.objects)?;
        let analyzed_at = analysis
            .analyzed_at
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true));

        let conn = self.lock_conn()?;
        conn.execute(
            r#"INSERT INTO video_analysis
                   (aweme_id, file_path, tags, category, summary, objects, scene, sexy_level,
                    analyzed_at, error, is_image_set, image_count)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
               ON CONFLICT(aweme_id) DO UPDATE SET
                   file_path = excluded.file_path,
                   tags = excluded.tags,
                   category = excluded.category,
                   summary = excluded.summary,
                   objects = excluded.objects,
                   scene = excluded.scene,
                   sexy_level = excluded.sexy_level,
                   analyzed_at = excluded.analyzed_at,
                   error = excluded.error,
                   is_image_set = excluded.is_image_set,
                   image_count = excluded.image_count"#,
            params![
                analysis.aweme_id,
                analysis.file_path,
                tags,
                analysis.category,
                analysis.summary,
                objects,
                analysis.scene,
                analysis.sexy_level,
                analyzed_at,
                analysis.error,
                analysis.is_image_set,
                analysis.image_count,
            ],
        )?;
        Ok(())
    }

    /// Fetch one record, failed attempts included
    pub fn get_analysis(&self, aweme_id: &str) -> Result<Option<VideoAnalysis>> {
        let conn = self.lock_conn()?;
        let sql = format!("{} WHERE aweme_id = ?1", SELECT_COLUMNS);
        let record = conn
            .query_row(&sql, params![aweme_id], parse_row)
            .optional()?;
        Ok(record)
    }

    /// Successful records, newest first
    pub fn get_all_analysis(&self) -> Result<Vec<VideoAnalysis>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "{} WHERE error IS NULL ORDER BY analyzed_at IS NULL, analyzed_at DESC, aweme_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([], parse_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn get_analyzed_ids(&self) -> Result<HashSet<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT aweme_id FROM video_analysis WHERE error IS NULL")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    /// Successful records matching `filter`, newest first
    pub fn query(&self, filter: &ResultFilter) -> Result<Vec<VideoAnalysis>> {
        let records = self
            .get_all_analysis()?
            .into_iter()
            .filter(|r| filter.tag.as_ref().map_or(true, |t| r.tags.contains(t)))
            .filter(|r| filter.category.as_ref().map_or(true, |c| &r.category == c))
            .filter(|r| filter.min_level.map_or(true, |min| r.sexy_level >= min))
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(records)
    }

    pub fn facets(&self) -> Result<Facets> {
        let mut tags = BTreeSet::new();
        let mut categories = BTreeSet::new();
        for record in self.get_all_analysis()? {
            tags.extend(record.tags);
            if !record.category.is_empty() {
                categories.insert(record.category);
            }
        }
        Ok(Facets {
            tags: tags.into_iter().collect(),
            categories: categories.into_iter().collect(),
        })
    }

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DbStats> {
        let conn = self.lock_conn()?;
        let (total, failed): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(error IS NOT NULL), 0) FROM video_analysis",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(DbStats {
            total,
            succeeded: total - failed,
            failed,
        })
    }

    /// Remove one record so the item is picked up again. Returns whether it existed.
    pub fn delete_analysis(&self, aweme_id: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let removed = conn.execute(
            "DELETE FROM video_analysis WHERE aweme_id = ?1",
            params![aweme_id],
        )?;
        Ok(removed > 0)
    }

    /// Vacuum database
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("VACUUM", [])?;
        Ok(())
    }
}

impl ResultSink for Database {
    fn upsert(&self, analysis: &VideoAnalysis) -> Result<()> {
        self.save_analysis(analysis)
    }

    fn get(&self, aweme_id: &str) -> Result<Option<VideoAnalysis>> {
        self.get_analysis(aweme_id)
    }

    fn get_all(&self) -> Result<Vec<VideoAnalysis>> {
        self.get_all_analysis()
    }

    fn analyzed_ids(&self) -> Result<HashSet<String>> {
        self.get_analyzed_ids()
    }
}

fn parse_row(row: &Row<'_>) -> rusqlite::Result<VideoAnalysis> {
    let tags: String = row.get(2)?;
    let objects: String = row.get(5)?;
    let analyzed_at: Option<String> = row.get(8)?;

    Ok(VideoAnalysis {
        aweme_id: row.get(0)?,
        file_path: row.get(1)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        category: row.get(3)?,
        summary: row.get(4)?,
        objects: serde_json::from_str(&objects).unwrap_or_default(),
        scene: row.get(6)?,
        sexy_level: row.get(7)?,
        analyzed_at: analyzed_at.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }),
        error: row.get(9)?,
        is_image_set: row.get(10)?,
        image_count: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str, tags: &[&str], category: &str, level: i64, minute: u32) -> VideoAnalysis {
        let mut r = VideoAnalysis::new(id, format!("/media/{}.mp4", id));
        r.tags = tags.iter().map(|t| t.to_string()).collect();
        r.category = category.to_string();
        r.sexy_level = level;
        r.analyzed_at = Some(Utc.with_ymd_and_hms(2025, 3, 1, 12, minute, 0).unwrap());
        r
    }

    #[test]
    fn upsert_replaces_by_id() {
        let db = Database::in_memory().unwrap();
        db.upsert(&record("v1", &["a"], "dance", 3, 0)).unwrap();
        let second = record("v1", &["b", "c", "b"], "daily", 4, 5);
        db.upsert(&second).unwrap();

        assert_eq!(db.get_stats().unwrap().total, 1);
        assert_eq!(db.get("v1").unwrap(), Some(second));
    }

    #[test]
    fn round_trip_keeps_every_field() {
        let db = Database::in_memory().unwrap();
        let mut r = record("set9", &["x"], "cosplay", 6, 1);
        r.summary = "short".into();
        r.scene = "outdoor".into();
        r.objects = vec!["fan".into()];
        r.is_image_set = true;
        r.image_count = 14;
        db.upsert(&r).unwrap();
        assert_eq!(db.get("set9").unwrap(), Some(r));

        let mut bare = VideoAnalysis::new("bare", "");
        bare.error = Some("timeout".into());
        db.upsert(&bare).unwrap();
        assert_eq!(db.get("bare").unwrap(), Some(bare));
        assert_eq!(db.get("missing").unwrap(), None);
    }

    #[test]
    fn failed_attempts_are_not_analyzed() {
        let db = Database::in_memory().unwrap();
        db.upsert(&record("ok", &[], "dance", 2, 0)).unwrap();
        let mut failed = record("bad", &[], "", 0, 1);
        failed.error = Some("unparseable response".into());
        db.upsert(&failed).unwrap();

        let ids = db.analyzed_ids().unwrap();
        assert!(ids.contains("ok"));
        assert!(!ids.contains("bad"));

        let all = db.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(db.get("bad").unwrap().unwrap().error.as_deref(), Some("unparseable response"));

        let stats = db.get_stats().unwrap();
        assert_eq!(stats, DbStats { total: 2, succeeded: 1, failed: 1 });

        // a later success clears the error
        db.upsert(&record("bad", &["t"], "daily", 1, 2)).unwrap();
        assert!(db.analyzed_ids().unwrap().contains("bad"));
    }

    #[test]
    fn listing_is_newest_first_and_filterable() {
        let db = Database::in_memory().unwrap();
        db.upsert(&record("old", &["black", "heels"], "dance", 5, 0)).unwrap();
        db.upsert(&record("mid", &["white"], "daily", 2, 10)).unwrap();
        db.upsert(&record("new", &["black"], "dance", 8, 20)).unwrap();

        let ids: Vec<_> = db.get_all().unwrap().into_iter().map(|r| r.aweme_id).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);

        let filter = ResultFilter {
            tag: Some("black".into()),
            min_level: Some(6),
            ..Default::default()
        };
        let ids: Vec<_> = db.query(&filter).unwrap().into_iter().map(|r| r.aweme_id).collect();
        assert_eq!(ids, vec!["new"]);

        let filter = ResultFilter {
            category: Some("dance".into()),
            limit: Some(1),
            ..Default::default()
        };
        assert_eq!(db.query(&filter).unwrap().len(), 1);
    }

    #[test]
    fn facets_are_sorted_and_distinct() {
        let db = Database::in_memory().unwrap();
        db.upsert(&record("a", &["z", "m"], "dance", 1, 0)).unwrap();
        db.upsert(&record("b", &["m", "a"], "", 1, 1)).unwrap();

        let facets = db.facets().unwrap();
        assert_eq!(facets.tags, vec!["a", "m", "z"]);
        assert_eq!(facets.categories, vec!["dance"]);
    }

    #[test]
    fn delete_forces_reanalysis() {
        let db = Database::in_memory().unwrap();
        db.upsert(&record("gone", &[], "daily", 1, 0)).unwrap();
        assert!(db.delete_analysis("gone").unwrap());
        assert!(!db.delete_analysis("gone").unwrap());
        assert!(db.analyzed_ids().unwrap().is_empty());
    }

    #[test]
    fn level_labels() {
        let mut r = VideoAnalysis::new("x", "");
        assert_eq!(r.level_label(), "unknown");
        r.sexy_level = 4;
        assert_eq!(r.level_label(), "mild");
        r.sexy_level = 10;
        assert_eq!(r.level_label(), "extreme");
    }
}
