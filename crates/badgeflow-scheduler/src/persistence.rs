//! SQLite-backed persistence for automations, community content and badge
//! achievements. Implements every store trait the engine consumes so a single
//! database file can drive the bundled runner.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use badgeflow_core::error::{AutomationError, Result};
use badgeflow_core::traits::{
    AchievementStore, AutomationStore, BadgeLookup, ContentPublisher, ContentStore, UserDirectory,
};
use badgeflow_core::types::{
    AutomationKind, AutomationRecord, AwardGuard, Badge, BadgeAchievement, Cadence, ContentItem,
    ContentKind, ContentQuery, KeywordMode, NewAchievement, NewContent, RunClaim, RunCompletion,
    RunStatus, UserSummary,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

/// Fixed-width UTC timestamps so TEXT comparison orders chronologically.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn store_err(e: rusqlite::Error) -> AutomationError {
    AutomationError::Store(e.to_string())
}

/// Tags are stored as ",a,b," so a single LIKE finds exact members.
fn join_tags(tags: &[String]) -> String {
    if tags.is_empty() {
        return String::new();
    }
    let cleaned: Vec<String> = tags.iter().map(|t| t.trim().to_lowercase()).collect();
    format!(",{},", cleaned.join(","))
}

fn split_tags(s: &str) -> Vec<String> {
    s.split(',').filter(|t| !t.is_empty()).map(String::from).collect()
}

fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

/// FTS5 query matching any of the keywords as a phrase.
fn fts_query(keywords: &[String]) -> String {
    keywords
        .iter()
        .map(|k| format!("\"{}\"", k.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Lowercased, with LIKE wildcards escaped for `ESCAPE '\'`.
fn escape_like(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn like_pattern(keyword: &str) -> String {
    format!("%{}%", escape_like(keyword))
}

/// Matches one exact member of a ",a,b," tag column.
fn tag_pattern(tag: &str) -> String {
    format!("%,{},%", escape_like(tag))
}

const CONTENT_COLUMNS: &str = "id, kind, author_user_id, title, body, published_at, score, featured, \
     organization_id, subforem_id, tags, path, thread_id, deleted, hidden_by_owner";

fn content_from_row(row: &Row<'_>) -> rusqlite::Result<ContentItem> {
    let kind: String = row.get(1)?;
    let published_at: String = row.get(5)?;
    let tags: String = row.get(10)?;
    Ok(ContentItem {
        id: row.get(0)?,
        kind: ContentKind::parse(&kind),
        author_user_id: row.get(2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        published_at: parse_ts(&published_at)?,
        score: row.get(6)?,
        featured: row.get::<_, i32>(7)? != 0,
        organization_id: row.get(8)?,
        subforem_id: row.get(9)?,
        tags: split_tags(&tags),
        path: row.get(11)?,
        thread_id: row.get(12)?,
        deleted: row.get::<_, i32>(13)? != 0,
        hidden_by_owner: row.get::<_, i32>(14)? != 0,
    })
}

const AUTOMATION_COLUMNS: &str = "id, name, owner_user_id, subforem_id, kind, action_config, \
     additional_instructions, cadence, enabled, status, last_run_at, next_run_at, last_error, started_at";

fn automation_from_row(row: &Row<'_>) -> rusqlite::Result<AutomationRecord> {
    let kind_str: String = row.get(4)?;
    let config_str: String = row.get(5)?;
    let cadence_str: String = row.get(7)?;
    let status_str: String = row.get(9)?;
    let last_run_at: Option<String> = row.get(10)?;
    let next_run_at: String = row.get(11)?;
    let started_at: Option<String> = row.get(13)?;

    let kind = AutomationKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(4, format!("kind '{kind_str}'"), rusqlite::types::Type::Text)
    })?;
    let cadence: Cadence = serde_json::from_str(&cadence_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let action_config = serde_json::from_str::<serde_json::Value>(&config_str)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();

    Ok(AutomationRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        owner_user_id: row.get(2)?,
        subforem_id: row.get(3)?,
        kind,
        action_config,
        additional_instructions: row.get(6)?,
        cadence,
        enabled: row.get::<_, i32>(8)? != 0,
        status: RunStatus::parse(&status_str),
        started_at: started_at.as_deref().map(parse_ts).transpose()?,
        last_run_at: last_run_at.as_deref().map(parse_ts).transpose()?,
        next_run_at: parse_ts(&next_run_at)?,
        last_error: row.get(12)?,
    })
}

fn achievement_from_row(row: &Row<'_>) -> rusqlite::Result<BadgeAchievement> {
    let created_at: String = row.get(5)?;
    Ok(BadgeAchievement {
        id: row.get(0)?,
        user_id: row.get(1)?,
        badge_id: row.get(2)?,
        rewarder_id: row.get(3)?,
        context_message: row.get(4)?,
        created_at: parse_ts(&created_at)?,
    })
}

/// SQLite-backed store for all engine data.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AutomationError::Store("connection mutex poisoned".into()))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS automations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                owner_user_id INTEGER NOT NULL,
                subforem_id INTEGER,
                kind TEXT NOT NULL,
                action_config TEXT NOT NULL DEFAULT '{}',   -- JSON object
                additional_instructions TEXT,
                cadence TEXT NOT NULL,                      -- JSON: {frequency: ...}
                enabled INTEGER NOT NULL DEFAULT 1,
                status TEXT NOT NULL DEFAULT 'idle',
                started_at TEXT,                            -- set while running
                last_run_at TEXT,
                next_run_at TEXT NOT NULL,
                last_error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_automations_due
                ON automations (enabled, status, next_run_at);

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL,
                banned INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS organizations (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS badges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slug TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                allow_multiple_awards INTEGER NOT NULL DEFAULT 0
            );

            -- Articles and comments
            CREATE TABLE IF NOT EXISTS content (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,                         -- 'article' | 'comment'
                author_user_id INTEGER NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                body TEXT NOT NULL DEFAULT '',
                published INTEGER NOT NULL DEFAULT 1,
                published_at TEXT NOT NULL,
                score INTEGER NOT NULL DEFAULT 0,
                featured INTEGER NOT NULL DEFAULT 0,
                organization_id INTEGER,
                subforem_id INTEGER,
                tags TEXT NOT NULL DEFAULT '',              -- ',a,b,'
                path TEXT NOT NULL DEFAULT '',
                thread_id INTEGER,
                deleted INTEGER NOT NULL DEFAULT 0,
                hidden_by_owner INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_content_window
                ON content (kind, published, published_at);
            CREATE INDEX IF NOT EXISTS idx_content_org_author
                ON content (organization_id, author_user_id, published_at);

            -- Full-text index over content title/body (rowid = content.id)
            CREATE VIRTUAL TABLE IF NOT EXISTS content_fts USING fts5(
                title,
                body,
                tokenize='unicode61'
            );

            CREATE TABLE IF NOT EXISTS badge_achievements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                badge_id INTEGER NOT NULL,
                rewarder_id INTEGER,
                context_message TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_achievements_user_badge
                ON badge_achievements (user_id, badge_id, created_at);
         ",
            )
            .map_err(|e| AutomationError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    // ─── Seeding ──────────────────────────────────────────────

    pub fn insert_user(&self, id: i64, username: &str, banned: bool) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO users (id, username, banned) VALUES (?1, ?2, ?3)",
                params![id, username, banned as i32],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn insert_organization(&self, id: i64, name: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO organizations (id, name) VALUES (?1, ?2)",
                params![id, name],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn insert_badge(&self, slug: &str, title: &str, allow_multiple_awards: bool) -> Result<Badge> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO badges (slug, title, allow_multiple_awards) VALUES (?1, ?2, ?3)",
            params![slug, title, allow_multiple_awards as i32],
        )
        .map_err(store_err)?;
        Ok(Badge {
            id: conn.last_insert_rowid(),
            slug: slug.to_string(),
            title: title.to_string(),
            allow_multiple_awards,
        })
    }

    /// Insert an automation; `record.id` is ignored and the new id returned.
    pub fn insert_automation(&self, record: &AutomationRecord) -> Result<i64> {
        let cadence = serde_json::to_string(&record.cadence)
            .map_err(|e| AutomationError::InvalidConfig(e.to_string()))?;
        let config = serde_json::Value::Object(record.action_config.clone()).to_string();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO automations
             (name, owner_user_id, subforem_id, kind, action_config, additional_instructions,
              cadence, enabled, status, last_run_at, next_run_at, last_error, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.name,
                record.owner_user_id,
                record.subforem_id,
                record.kind.as_str(),
                config,
                record.additional_instructions,
                cadence,
                record.enabled as i32,
                record.status.as_str(),
                record.last_run_at.map(ts),
                ts(record.next_run_at),
                record.last_error,
                record.started_at.map(ts),
            ],
        )
        .map_err(store_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert an article or comment; `item.id` is ignored and the stored item returned.
    pub fn insert_content(&self, item: &ContentItem, published: bool) -> Result<ContentItem> {
        let conn = self.conn()?;
        Self::insert_content_in(&conn, item, published)
    }

    fn insert_content_in(conn: &Connection, item: &ContentItem, published: bool) -> Result<ContentItem> {
        conn.execute(
            "INSERT INTO content
             (kind, author_user_id, title, body, published, published_at, score, featured,
              organization_id, subforem_id, tags, path, thread_id, deleted, hidden_by_owner)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                item.kind.as_str(),
                item.author_user_id,
                item.title,
                item.body,
                published as i32,
                ts(item.published_at),
                item.score,
                item.featured as i32,
                item.organization_id,
                item.subforem_id,
                join_tags(&item.tags),
                item.path,
                item.thread_id,
                item.deleted as i32,
                item.hidden_by_owner as i32,
            ],
        )
        .map_err(store_err)?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO content_fts (rowid, title, body) VALUES (?1, ?2, ?3)",
            params![id, item.title, item.body],
        )
        .map_err(store_err)?;

        let mut stored = item.clone();
        stored.id = id;
        stored.tags = split_tags(&join_tags(&item.tags));
        Ok(stored)
    }

    /// Drop a row from the full-text index only, as when indexing lags behind writes.
    pub fn unindex_content(&self, id: i64) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM content_fts WHERE rowid = ?1", [id])
            .map_err(store_err)?;
        Ok(())
    }

    pub fn achievements_for(&self, user_id: i64, badge_id: i64) -> Result<Vec<BadgeAchievement>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, badge_id, rewarder_id, context_message, created_at
                 FROM badge_achievements WHERE user_id = ?1 AND badge_id = ?2 ORDER BY created_at",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![user_id, badge_id], achievement_from_row)
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn list_automations(&self) -> Result<Vec<AutomationRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {AUTOMATION_COLUMNS} FROM automations ORDER BY id"))
            .map_err(store_err)?;
        let rows = stmt.query_map([], automation_from_row).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    fn username(conn: &Connection, user_id: i64) -> Result<Option<String>> {
        conn.query_row("SELECT username FROM users WHERE id = ?1", [user_id], |r| r.get(0))
            .optional()
            .map_err(store_err)
    }

    fn complete_in(conn: &Connection, id: i64, ran_at: DateTime<Utc>, next_run_at: DateTime<Utc>) -> Result<()> {
        let changed = conn
            .execute(
                "UPDATE automations
                 SET status = 'completed', started_at = NULL, last_run_at = ?1, next_run_at = ?2,
                     last_error = NULL
                 WHERE id = ?3",
                params![ts(ran_at), ts(next_run_at), id],
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(AutomationError::NotFound(format!("Automation with id {id} not found")));
        }
        Ok(())
    }
}

// ─── Automations ──────────────────────────────────────────

#[async_trait]
impl AutomationStore for SqliteStore {
    async fn get_automation(&self, id: i64) -> Result<Option<AutomationRecord>> {
        self.conn()?
            .query_row(
                &format!("SELECT {AUTOMATION_COLUMNS} FROM automations WHERE id = ?1"),
                [id],
                automation_from_row,
            )
            .optional()
            .map_err(store_err)
    }

    async fn due_automations(
        &self,
        now: DateTime<Utc>,
        stale_before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<AutomationRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {AUTOMATION_COLUMNS} FROM automations
                 WHERE enabled = 1 AND next_run_at <= ?1
                   AND (status <> 'running' OR started_at < ?2)
                 ORDER BY next_run_at, id LIMIT ?3"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![ts(now), stale_before.map(ts), limit as i64], automation_from_row)
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    async fn try_begin_run(&self, id: i64, claim: &RunClaim) -> Result<bool> {
        // One statement: lock check, due check and takeover cannot interleave
        // with another worker. A NULL `stale_before` never matches.
        let changed = self
            .conn()?
            .execute(
                "UPDATE automations SET status = 'running', started_at = ?2
                 WHERE id = ?1
                   AND (status <> 'running' OR started_at < ?3)
                   AND (?4 = 0 OR (enabled = 1 AND next_run_at <= ?2))",
                params![id, ts(claim.now), claim.stale_before.map(ts), claim.require_due as i32],
            )
            .map_err(store_err)?;
        Ok(changed == 1)
    }

    async fn complete_run(&self, id: i64, ran_at: DateTime<Utc>, next_run_at: DateTime<Utc>) -> Result<()> {
        Self::complete_in(&*self.conn()?, id, ran_at, next_run_at)
    }

    async fn fail_run(&self, id: i64, next_run_at: DateTime<Utc>, error: &str) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE automations
                 SET status = 'failed', started_at = NULL, next_run_at = ?1, last_error = ?2
                 WHERE id = ?3",
                params![ts(next_run_at), error, id],
            )
            .map_err(store_err)?;
        Ok(())
    }
}

// ─── Content ──────────────────────────────────────────────

#[async_trait]
impl ContentStore for SqliteStore {
    async fn find_published(&self, query: &ContentQuery) -> Result<Vec<ContentItem>> {
        let mut sql = format!(
            "SELECT {CONTENT_COLUMNS} FROM content
             WHERE kind = ?1 AND published = 1 AND published_at >= ?2 AND published_at <= ?3"
        );
        let mut args: Vec<SqlValue> = vec![
            SqlValue::Text(query.kind.as_str().into()),
            SqlValue::Text(ts(query.since)),
            SqlValue::Text(ts(query.until)),
        ];

        if let Some(org) = query.organization_id {
            args.push(SqlValue::Integer(org));
            sql.push_str(&format!(" AND organization_id = ?{}", args.len()));
        }
        if let Some(thread) = query.thread_id {
            args.push(SqlValue::Integer(thread));
            sql.push_str(&format!(" AND thread_id = ?{}", args.len()));
        }
        if !query.keywords.is_empty() {
            match query.keyword_mode {
                KeywordMode::Index => {
                    args.push(SqlValue::Text(fts_query(&query.keywords)));
                    sql.push_str(&format!(
                        " AND id IN (SELECT rowid FROM content_fts WHERE content_fts MATCH ?{})",
                        args.len()
                    ));
                }
                KeywordMode::Literal => {
                    let mut clauses = Vec::with_capacity(query.keywords.len());
                    for keyword in &query.keywords {
                        args.push(SqlValue::Text(like_pattern(keyword)));
                        args.push(SqlValue::Text(tag_pattern(keyword)));
                        let (text, tag) = (args.len() - 1, args.len());
                        clauses.push(format!(
                            "lower(title) LIKE ?{text} ESCAPE '\\' OR lower(body) LIKE ?{text} ESCAPE '\\' \
                             OR tags LIKE ?{tag} ESCAPE '\\'"
                        ));
                    }
                    sql.push_str(&format!(" AND ({})", clauses.join(" OR ")));
                }
            }
        }
        sql.push_str(" ORDER BY published_at, id");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(|e| match query.keyword_mode {
            KeywordMode::Index if !query.keywords.is_empty() => AutomationError::Search(e.to_string()),
            _ => store_err(e),
        })?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), content_from_row)
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|e| {
            if query.keyword_mode == KeywordMode::Index && !query.keywords.is_empty() {
                AutomationError::Search(e.to_string())
            } else {
                store_err(e)
            }
        })
    }

    async fn has_published_before(
        &self,
        author_user_id: i64,
        organization_id: i64,
        before: DateTime<Utc>,
    ) -> Result<bool> {
        self.conn()?
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM content
                 WHERE kind = 'article' AND published = 1 AND author_user_id = ?1
                   AND organization_id = ?2 AND published_at < ?3)",
                params![author_user_id, organization_id, ts(before)],
                |r| r.get::<_, i32>(0),
            )
            .map(|v| v != 0)
            .map_err(store_err)
    }

    async fn find_thread(&self, tag: &str, subforem_id: Option<i64>) -> Result<Option<ContentItem>> {
        self.conn()?
            .query_row(
                &format!(
                    "SELECT {CONTENT_COLUMNS} FROM content
                     WHERE kind = 'article' AND published = 1 AND tags LIKE ?1 ESCAPE '\\'
                       AND (?2 IS NULL OR subforem_id = ?2)
                     ORDER BY published_at DESC, id DESC LIMIT 1"
                ),
                params![tag_pattern(tag), subforem_id],
                content_from_row,
            )
            .optional()
            .map_err(store_err)
    }

    async fn organization_exists(&self, organization_id: i64) -> Result<bool> {
        self.conn()?
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM organizations WHERE id = ?1)",
                [organization_id],
                |r| r.get::<_, i32>(0),
            )
            .map(|v| v != 0)
            .map_err(store_err)
    }
}

// ─── Achievements ─────────────────────────────────────────

#[async_trait]
impl AchievementStore for SqliteStore {
    async fn exists(&self, user_id: i64, badge_id: i64) -> Result<bool> {
        self.conn()?
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM badge_achievements WHERE user_id = ?1 AND badge_id = ?2)",
                params![user_id, badge_id],
                |r| r.get::<_, i32>(0),
            )
            .map(|v| v != 0)
            .map_err(store_err)
    }

    async fn exists_since(&self, user_id: i64, badge_id: i64, since: DateTime<Utc>) -> Result<bool> {
        self.conn()?
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM badge_achievements
                 WHERE user_id = ?1 AND badge_id = ?2 AND created_at >= ?3)",
                params![user_id, badge_id, ts(since)],
                |r| r.get::<_, i32>(0),
            )
            .map(|v| v != 0)
            .map_err(store_err)
    }

    async fn create(&self, achievement: NewAchievement) -> Result<BadgeAchievement> {
        // Single statement: the existence check and the insert cannot interleave
        // with another writer. An empty lower bound matches every row.
        let lower_bound = match achievement.guard {
            AwardGuard::Once => String::new(),
            AwardGuard::Since(since) => ts(since),
        };
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                "INSERT INTO badge_achievements (user_id, badge_id, rewarder_id, context_message, created_at)
                 SELECT ?1, ?2, ?3, ?4, ?5
                 WHERE NOT EXISTS (
                     SELECT 1 FROM badge_achievements
                     WHERE user_id = ?1 AND badge_id = ?2 AND created_at >= ?6
                 )",
                params![
                    achievement.user_id,
                    achievement.badge_id,
                    achievement.rewarder_id,
                    achievement.context_message,
                    ts(achievement.created_at),
                    lower_bound,
                ],
            )
            .map_err(store_err)?;

        if inserted == 0 {
            return Err(AutomationError::DuplicateAward {
                user_id: achievement.user_id,
                badge_id: achievement.badge_id,
            });
        }

        Ok(BadgeAchievement {
            id: conn.last_insert_rowid(),
            user_id: achievement.user_id,
            badge_id: achievement.badge_id,
            rewarder_id: achievement.rewarder_id,
            context_message: achievement.context_message,
            created_at: achievement.created_at,
        })
    }
}

#[async_trait]
impl BadgeLookup for SqliteStore {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Badge>> {
        self.conn()?
            .query_row(
                "SELECT id, slug, title, allow_multiple_awards FROM badges WHERE slug = ?1",
                [slug],
                |r| {
                    Ok(Badge {
                        id: r.get(0)?,
                        slug: r.get(1)?,
                        title: r.get(2)?,
                        allow_multiple_awards: r.get::<_, i32>(3)? != 0,
                    })
                },
            )
            .optional()
            .map_err(store_err)
    }
}

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn find_user(&self, user_id: i64) -> Result<Option<UserSummary>> {
        self.conn()?
            .query_row(
                "SELECT id, username, banned FROM users WHERE id = ?1",
                [user_id],
                |r| {
                    Ok(UserSummary {
                        id: r.get(0)?,
                        username: r.get(1)?,
                        banned: r.get::<_, i32>(2)? != 0,
                    })
                },
            )
            .optional()
            .map_err(store_err)
    }
}

#[async_trait]
impl ContentPublisher for SqliteStore {
    async fn create_content(&self, content: NewContent, run: RunCompletion) -> Result<ContentItem> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(store_err)?;
        let username = Self::username(&tx, content.author_user_id)?
            .unwrap_or_else(|| format!("user{}", content.author_user_id));

        let draft = ContentItem {
            id: 0,
            kind: ContentKind::Article,
            author_user_id: content.author_user_id,
            title: content.title,
            body: content.body,
            published_at: content.created_at,
            score: 0,
            featured: false,
            organization_id: content.organization_id,
            subforem_id: content.subforem_id,
            tags: content.tags,
            path: String::new(),
            thread_id: None,
            deleted: false,
            hidden_by_owner: false,
        };
        let mut stored = Self::insert_content_in(&tx, &draft, content.published)?;

        stored.path = format!("/{}/{}-{}", username, slugify(&stored.title), stored.id);
        tx.execute("UPDATE content SET path = ?1 WHERE id = ?2", params![stored.path, stored.id])
            .map_err(store_err)?;
        Self::complete_in(&tx, run.automation_id, run.ran_at, run.next_run_at)?;
        tx.commit().map_err(store_err)?;
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{article, automation, comment};
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn test_open_and_migrate() {
        let dir = std::env::temp_dir().join("badgeflow-store-test");
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("open.db");
        std::fs::remove_file(&path).ok();
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.list_automations().unwrap().is_empty());
        // Reopening runs migrations again without error.
        drop(store);
        assert!(SqliteStore::open(&path).is_ok());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_save_and_load_automation() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut record = automation(AutomationKind::ContentBadge, json!({"badge_slug": "x"}));
        record.last_run_at = Some(t(9, 0));
        let id = store.insert_automation(&record).unwrap();
        let loaded = store.get_automation(id).await.unwrap().unwrap();
        assert_eq!(loaded.kind, AutomationKind::ContentBadge);
        assert_eq!(loaded.config_str("badge_slug"), Some("x"));
        assert_eq!(loaded.cadence, record.cadence);
        assert_eq!(loaded.last_run_at, Some(t(9, 0)));
        assert_eq!(loaded.status, RunStatus::Idle);
    }

    #[tokio::test]
    async fn test_try_begin_run_is_exclusive() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .insert_automation(&automation(AutomationKind::ThreadBadge, json!({})))
            .unwrap();
        let claim = RunClaim::scheduled(t(10, 0));
        assert!(store.try_begin_run(id, &claim).await.unwrap());
        assert!(!store.try_begin_run(id, &claim).await.unwrap());
        let r = store.get_automation(id).await.unwrap().unwrap();
        assert_eq!(r.started_at, Some(t(10, 0)));

        store.complete_run(id, t(10, 0), t(11, 0)).await.unwrap();
        let r = store.get_automation(id).await.unwrap().unwrap();
        assert_eq!(r.status, RunStatus::Completed);
        assert_eq!(r.last_run_at, Some(t(10, 0)));
        assert_eq!(r.started_at, None);
        assert!(store.try_begin_run(id, &RunClaim::scheduled(t(11, 0))).await.unwrap());
    }

    #[tokio::test]
    async fn test_scheduled_claim_needs_a_due_slot() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .insert_automation(&automation(AutomationKind::ThreadBadge, json!({})))
            .unwrap();
        assert!(store.try_begin_run(id, &RunClaim::scheduled(t(10, 0))).await.unwrap());
        store.complete_run(id, t(10, 0), t(11, 0)).await.unwrap();

        // A worker still holding the 10:00 snapshot must not run the slot again.
        assert!(!store.try_begin_run(id, &RunClaim::scheduled(t(10, 0))).await.unwrap());
        assert!(store.try_begin_run(id, &RunClaim::manual(t(10, 0))).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut record = automation(AutomationKind::ThreadBadge, json!({}));
        record.next_run_at = t(6, 0);
        let id = store.insert_automation(&record).unwrap();
        assert!(store.try_begin_run(id, &RunClaim::scheduled(t(7, 0))).await.unwrap());

        let fresh = RunClaim::scheduled(t(8, 0)).reclaiming_after(Duration::hours(2));
        assert!(!store.try_begin_run(id, &fresh).await.unwrap());
        assert!(store.due_automations(t(8, 0), fresh.stale_before, 10).await.unwrap().is_empty());

        let later = RunClaim::scheduled(t(10, 0)).reclaiming_after(Duration::hours(2));
        let due = store.due_automations(t(10, 0), later.stale_before, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].status, RunStatus::Running);
        assert!(store.try_begin_run(id, &later).await.unwrap());
        let r = store.get_automation(id).await.unwrap().unwrap();
        assert_eq!(r.started_at, Some(t(10, 0)));
        // Without a takeover window the lock holds forever.
        assert!(!store.try_begin_run(id, &RunClaim::manual(t(23, 0))).await.unwrap());
    }

    #[tokio::test]
    async fn test_due_automations_excludes_running_and_future() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut due = automation(AutomationKind::ContentBadge, json!({}));
        due.next_run_at = t(9, 0);
        let due_id = store.insert_automation(&due).unwrap();

        let mut future = due.clone();
        future.next_run_at = t(12, 0);
        store.insert_automation(&future).unwrap();

        let running_id = store.insert_automation(&due).unwrap();
        store.try_begin_run(running_id, &RunClaim::scheduled(t(9, 30))).await.unwrap();

        let mut disabled = due.clone();
        disabled.enabled = false;
        store.insert_automation(&disabled).unwrap();

        let found = store.due_automations(t(10, 0), None, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due_id);
    }

    #[tokio::test]
    async fn test_fail_run_keeps_last_run() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut record = automation(AutomationKind::ContentBadge, json!({}));
        record.last_run_at = Some(t(8, 0));
        let id = store.insert_automation(&record).unwrap();
        store.try_begin_run(id, &RunClaim::scheduled(t(10, 0))).await.unwrap();
        store.fail_run(id, t(11, 0), "StoreError: boom").await.unwrap();
        let r = store.get_automation(id).await.unwrap().unwrap();
        assert_eq!(r.status, RunStatus::Failed);
        assert_eq!(r.last_run_at, Some(t(8, 0)));
        assert_eq!(r.next_run_at, t(11, 0));
        assert_eq!(r.last_error.as_deref(), Some("StoreError: boom"));
        assert_eq!(r.started_at, None);
    }

    #[tokio::test]
    async fn test_find_published_window_and_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_content(&article(0, 1, "Late", t(9, 30)), true).unwrap();
        store.insert_content(&article(0, 2, "Early", t(8, 0)), true).unwrap();
        store.insert_content(&article(0, 3, "Too old", t(7, 0)), true).unwrap();
        store.insert_content(&article(0, 4, "Draft", t(8, 30)), false).unwrap();

        let found = store
            .find_published(&ContentQuery::articles(t(7, 45), t(10, 0)))
            .await
            .unwrap();
        let titles: Vec<_> = found.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["Early", "Late"]);
    }

    #[tokio::test]
    async fn test_keyword_index_and_literal_modes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let stored = store
            .insert_content(&article(0, 1, "Release notes 2.0", t(8, 0)), true)
            .unwrap();
        store.insert_content(&article(0, 2, "Python tips", t(8, 0)), true).unwrap();

        let mut q = ContentQuery::articles(t(7, 0), t(10, 0));
        q.keywords = vec!["release".into()];
        assert_eq!(store.find_published(&q).await.unwrap().len(), 1);

        store.unindex_content(stored.id).unwrap();
        assert!(store.find_published(&q).await.unwrap().is_empty());

        q.keyword_mode = KeywordMode::Literal;
        let found = store.find_published(&q).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stored.id);
    }

    #[tokio::test]
    async fn test_literal_mode_matches_exact_tags() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut tagged = article(0, 1, "Weekend project", t(8, 0));
        tagged.tags = vec!["Rust".into()];
        store.insert_content(&tagged, true).unwrap();
        let mut other = article(0, 2, "Weekend hike", t(8, 0));
        other.tags = vec!["rustic".into()];
        store.insert_content(&other, true).unwrap();

        let mut q = ContentQuery::articles(t(7, 0), t(10, 0));
        q.keywords = vec!["rust".into()];
        q.keyword_mode = KeywordMode::Literal;
        let found = store.find_published(&q).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].author_user_id, 1);
    }

    #[tokio::test]
    async fn test_literal_mode_escapes_wildcards() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_content(&article(0, 1, "100 percent", t(8, 0)), true).unwrap();
        let mut q = ContentQuery::articles(t(7, 0), t(10, 0));
        q.keywords = vec!["%".into()];
        q.keyword_mode = KeywordMode::Literal;
        assert!(store.find_published(&q).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_has_published_before_uses_full_history() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut old = article(0, 7, "First", t(1, 0));
        old.organization_id = Some(42);
        store.insert_content(&old, true).unwrap();
        assert!(store.has_published_before(7, 42, t(8, 0)).await.unwrap());
        assert!(!store.has_published_before(7, 42, t(1, 0)).await.unwrap());
        assert!(!store.has_published_before(7, 43, t(8, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_thread_scoped_then_global() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut global = article(0, 1, "Welcome Thread v1", t(6, 0));
        global.tags = vec!["welcome".into()];
        store.insert_content(&global, true).unwrap();
        let mut scoped = article(0, 1, "Welcome Thread v2", t(5, 0));
        scoped.tags = vec!["Welcome".into()];
        scoped.subforem_id = Some(3);
        store.insert_content(&scoped, true).unwrap();

        let found = store.find_thread("welcome", Some(3)).await.unwrap().unwrap();
        assert_eq!(found.title, "Welcome Thread v2");
        let found = store.find_thread("welcome", None).await.unwrap().unwrap();
        assert_eq!(found.title, "Welcome Thread v1");
        assert!(store.find_thread("welcome", Some(9)).await.unwrap().is_none());
        assert!(store.find_thread("w_lcome", None).await.unwrap().is_none());
        assert!(store.find_thread("%", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_comments_on_thread() {
        let store = SqliteStore::open_in_memory().unwrap();
        let thread = store.insert_content(&article(0, 1, "Welcome", t(6, 0)), true).unwrap();
        store
            .insert_content(&comment(0, 2, thread.id, "Hi all", t(7, 0)), true)
            .unwrap();
        store
            .insert_content(&comment(0, 3, thread.id + 100, "Elsewhere", t(7, 0)), true)
            .unwrap();
        let found = store
            .find_published(&ContentQuery::comments_on(thread.id, t(6, 0), t(8, 0)))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ContentKind::Comment);
    }

    #[tokio::test]
    async fn test_create_achievement_once_guard() {
        let store = SqliteStore::open_in_memory().unwrap();
        let new = |at| NewAchievement {
            user_id: 1,
            badge_id: 9,
            rewarder_id: None,
            context_message: "nice".into(),
            created_at: at,
            guard: AwardGuard::Once,
        };
        store.create(new(t(8, 0))).await.unwrap();
        let err = store.create(new(t(9, 0))).await.unwrap_err();
        assert!(matches!(err, AutomationError::DuplicateAward { user_id: 1, badge_id: 9 }));
        assert_eq!(store.achievements_for(1, 9).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_achievement_cooldown_guard() {
        let store = SqliteStore::open_in_memory().unwrap();
        let cooldown = Duration::days(7);
        let new = |at: DateTime<Utc>| NewAchievement {
            user_id: 1,
            badge_id: 9,
            rewarder_id: Some(100),
            context_message: "again".into(),
            created_at: at,
            guard: AwardGuard::Since(at - cooldown),
        };
        store.create(new(t(8, 0))).await.unwrap();
        assert!(store.create(new(t(8, 0) + Duration::days(3))).await.is_err());
        store.create(new(t(8, 0) + Duration::days(8))).await.unwrap();
        assert!(store.exists_since(1, 9, t(8, 0) + Duration::days(5)).await.unwrap());
        assert!(store.exists(1, 9).await.unwrap());
        assert_eq!(store.achievements_for(1, 9).unwrap().len(), 2);
    }

    fn recap(published: bool) -> NewContent {
        NewContent {
            author_user_id: 5,
            title: "Weekly Recap: Rust & Friends!".into(),
            body: "body".into(),
            published,
            tags: vec!["Recap".into()],
            organization_id: None,
            subforem_id: Some(2),
            created_at: t(10, 0),
        }
    }

    fn completion(automation_id: i64) -> RunCompletion {
        RunCompletion {
            automation_id,
            ran_at: t(10, 0),
            next_run_at: t(11, 0),
        }
    }

    #[tokio::test]
    async fn test_publisher_builds_path_and_completes_run() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_user(5, "recap_bot", false).unwrap();
        let id = store
            .insert_automation(&automation(AutomationKind::GenerativeDraft, json!({})))
            .unwrap();
        store.try_begin_run(id, &RunClaim::scheduled(t(10, 0))).await.unwrap();

        let item = store.create_content(recap(false), completion(id)).await.unwrap();
        assert_eq!(item.path, format!("/recap_bot/weekly-recap-rust-friends-{}", item.id));
        assert_eq!(item.tags, vec!["recap"]);
        let r = store.get_automation(id).await.unwrap().unwrap();
        assert_eq!(r.status, RunStatus::Completed);
        assert_eq!(r.next_run_at, t(11, 0));

        // Drafts are not visible to awarders.
        let found = store
            .find_published(&ContentQuery::articles(t(9, 0), t(11, 0)))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_failed_completion_rolls_back_post() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_user(5, "recap_bot", false).unwrap();

        let err = store.create_content(recap(true), completion(404)).await.unwrap_err();
        assert_eq!(err.to_string(), "Automation with id 404 not found");
        let found = store
            .find_published(&ContentQuery::articles(t(9, 0), t(11, 0)))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_badge_and_user_lookup() {
        let store = SqliteStore::open_in_memory().unwrap();
        let badge = store.insert_badge("warm-welcome", "Warm Welcome", true).unwrap();
        let found = store.find_by_slug("warm-welcome").await.unwrap().unwrap();
        assert_eq!(found.id, badge.id);
        assert!(found.allow_multiple_awards);
        assert!(store.find_by_slug("missing").await.unwrap().is_none());

        store.insert_user(3, "spam_991", false).unwrap();
        let user = store.find_user(3).await.unwrap().unwrap();
        assert!(user.is_banished());
        assert!(store.find_user(4).await.unwrap().is_none());
    }
}
