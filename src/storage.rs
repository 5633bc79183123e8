use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::article::Article;
use crate::loader::Session;

#[derive(Debug)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone)]
pub struct SavedSession {
    pub session: Session,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    /// Replaces the stored session with `session`. A session without articles clears it.
    pub fn save_session(&self, session: &Session) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("storage: begin session save")?;
        tx.execute("DELETE FROM session_articles", [])?;
        tx.execute("DELETE FROM session", [])?;

        if !session.is_empty() {
            tx.execute(
                "INSERT INTO session (id, page, saved_at) VALUES (1, ?1, ?2)",
                params![session.page, Utc::now().timestamp()],
            )?;
            let mut stmt = tx.prepare(
                r#"
INSERT INTO session_articles (position, title, section, author, published_at, url)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#,
            )?;
            for (position, article) in session.articles().iter().enumerate() {
                stmt.execute(params![
                    position as i64,
                    article.title,
                    article.section,
                    article.author,
                    article.published_at,
                    article.url,
                ])?;
            }
        }

        tx.commit().context("storage: commit session")
    }

    pub fn load_session(&self) -> Result<Option<SavedSession>> {
        let conn = self.conn.lock();
        let header: Option<(u32, i64)> = conn
            .query_row("SELECT page, saved_at FROM session WHERE id = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()
            .context("storage: query session")?;
        let Some((page, saved_at)) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            r#"
SELECT title, section, author, published_at, url
FROM session_articles
ORDER BY position ASC
"#,
        )?;
        let articles = stmt
            .query_map([], article_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("storage: query session articles")?;

        Ok(Some(SavedSession {
            session: Session::restored(page, articles),
            saved_at: Utc
                .timestamp_opt(saved_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }))
    }

    pub fn clear_session(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("DELETE FROM session_articles; DELETE FROM session;")
            .context("storage: clear session")
    }
}

fn article_from_row(row: &Row<'_>) -> rusqlite::Result<Article> {
    Ok(Article {
        title: row.get(0)?,
        section: row.get(1)?,
        author: row.get(2)?,
        published_at: row.get(3)?,
        url: row.get(4)?,
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS session (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  page INTEGER NOT NULL,
  saved_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS session_articles (
  position INTEGER PRIMARY KEY,
  title TEXT NOT NULL,
  section TEXT NOT NULL,
  author TEXT,
  published_at TEXT NOT NULL,
  url TEXT NOT NULL
);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("stem-news").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample_article;
    use tempfile::tempdir;

    fn open(dir: &tempfile::TempDir) -> Store {
        Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap()
    }

    #[test]
    fn open_creates_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        assert!(path.exists());
        store.close().unwrap();
    }

    #[test]
    fn session_round_trip_keeps_order() {
        let dir = tempdir().unwrap();
        let store = open(&dir);
        let mut session = Session::default();
        let mut anonymous = sample_article(2);
        anonymous.author = None;
        session.merge(vec![sample_article(1), anonymous.clone(), sample_article(3)]);
        session.page = 3;

        store.save_session(&session).unwrap();
        let saved = store.load_session().unwrap().expect("session stored");
        assert_eq!(saved.session.page, 3);
        assert!(!saved.session.force_refresh);
        assert_eq!(
            saved.session.articles(),
            &[sample_article(1), anonymous, sample_article(3)]
        );
    }

    #[test]
    fn empty_session_clears_storage() {
        let dir = tempdir().unwrap();
        let store = open(&dir);
        let mut session = Session::default();
        session.merge(vec![sample_article(1)]);
        store.save_session(&session).unwrap();

        store.save_session(&Session::default()).unwrap();
        assert!(store.load_session().unwrap().is_none());
    }

    #[test]
    fn clear_session_removes_rows() {
        let dir = tempdir().unwrap();
        let store = open(&dir);
        let mut session = Session::default();
        session.merge(vec![sample_article(1)]);
        store.save_session(&session).unwrap();
        store.clear_session().unwrap();
        assert!(store.load_session().unwrap().is_none());
    }
}
