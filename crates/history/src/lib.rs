use models::{GeneratedImage, GeneratedVideo, ImageRecord, VideoPatch, VideoRecord, VideoStatus};
use rand::Rng;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const DB_FILE_NAME: &str = "history.sqlite3";

/// Newest schema this build understands.
pub const SCHEMA_VERSION: i64 = 3;

pub fn app_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
    base.join("ark_studio")
}

pub fn default_db_path() -> PathBuf {
    app_data_dir().join(DB_FILE_NAME)
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history database is at schema version {found}, this build supports up to {supported}")]
    UnsupportedVersion { found: i64, supported: i64 },
}

pub type Result<T> = std::result::Result<T, HistoryError>;

/// The two record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Images,
    Videos,
}

impl Collection {
    fn table(self) -> &'static str {
        match self {
            Collection::Images => "images",
            Collection::Videos => "videos",
        }
    }

    fn id_prefix(self) -> &'static str {
        match self {
            Collection::Images => "img",
            Collection::Videos => "vid",
        }
    }
}

/// `<prefix>_<epoch millis>_<9 random base36 chars>`
fn synthetic_id(collection: Collection) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!(
        "{}_{}_{}",
        collection.id_prefix(),
        models::now_millis(),
        suffix
    )
}

pub struct HistoryDb {
    conn: Connection,
    path: Option<PathBuf>,
}

impl HistoryDb {
    pub fn open_or_create(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        migrate(&mut conn, SCHEMA_VERSION)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrate(&mut conn, SCHEMA_VERSION)?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> Result<i64> {
        user_version(&self.conn)
    }

    /// Store a new image under a fresh synthetic id.
    pub fn save_image(&self, image: &GeneratedImage) -> Result<ImageRecord> {
        let record = ImageRecord {
            id: synthetic_id(Collection::Images),
            created_at: models::now_millis(),
            image: image.clone(),
        };
        self.insert_image(&record)?;
        Ok(record)
    }

    pub fn insert_image(&self, record: &ImageRecord) -> Result<()> {
        let image = &record.image;
        self.conn.execute(
            "INSERT OR REPLACE INTO images(id, url, b64_json, original_prompt, revised_prompt, edit_prompt, created_at) \
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                image.url,
                image.base64_data,
                image.original_prompt,
                image.revised_prompt,
                image.edit_prompt,
                record.created_at
            ],
        )?;
        debug!(target: "history", "stored image {}", record.id);
        Ok(())
    }

    /// All images, newest first.
    pub fn list_images(&self) -> Result<Vec<ImageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, url, b64_json, original_prompt, revised_prompt, edit_prompt, created_at \
             FROM images ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map([], image_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Store a new video under a fresh synthetic id. A video with the same
    /// task id is replaced.
    pub fn save_video(&self, video: &GeneratedVideo) -> Result<VideoRecord> {
        let created_at = models::now_millis();
        let record = VideoRecord {
            id: synthetic_id(Collection::Videos),
            created_at,
            video: GeneratedVideo {
                created_at,
                ..video.clone()
            },
        };
        self.insert_video(&record)?;
        Ok(record)
    }

    pub fn insert_video(&self, record: &VideoRecord) -> Result<()> {
        let video = &record.video;
        self.conn.execute(
            "INSERT OR REPLACE INTO videos(id, task_id, video_url, original_prompt, original_image_url, status, progress, error_message, created_at) \
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id,
                video.task_id,
                video.video_url,
                video.original_prompt,
                video.original_image_source_url,
                video.status.as_str(),
                video.progress,
                video.error_message,
                record.created_at
            ],
        )?;
        debug!(target: "history", "stored video {} for task {}", record.id, video.task_id);
        Ok(())
    }

    /// All videos, newest first.
    pub fn list_videos(&self) -> Result<Vec<VideoRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, task_id, video_url, original_prompt, original_image_url, status, progress, error_message, created_at \
             FROM videos ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map([], video_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn find_video_by_task_id(&self, task_id: &str) -> Result<Option<VideoRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, task_id, video_url, original_prompt, original_image_url, status, progress, error_message, created_at \
                 FROM videos WHERE task_id = ?1 LIMIT 1",
                params![task_id],
                video_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Merge the present fields of `patch` into the video for `task_id`.
    /// Returns false when no video has that task id.
    pub fn update_video_by_task_id(&self, task_id: &str, patch: &VideoPatch) -> Result<bool> {
        if patch.is_empty() {
            return Ok(self.find_video_by_task_id(task_id)?.is_some());
        }
        let changed = self.conn.execute(
            "UPDATE videos SET \
               status = COALESCE(?2, status), \
               video_url = COALESCE(?3, video_url), \
               progress = COALESCE(?4, progress), \
               error_message = COALESCE(?5, error_message) \
             WHERE task_id = ?1",
            params![
                task_id,
                patch.status.as_ref().map(VideoStatus::as_str),
                patch.video_url,
                patch.progress.map(|p| p.min(100)),
                patch.error_message
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn count(&self, collection: Collection) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", collection.table());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Returns false when `id` was not present.
    pub fn delete(&self, collection: Collection, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", collection.table());
        Ok(self.conn.execute(&sql, params![id])? > 0)
    }

    pub fn clear(&self, collection: Collection) -> Result<usize> {
        let sql = format!("DELETE FROM {}", collection.table());
        let removed = self.conn.execute(&sql, [])?;
        info!(target: "history", "cleared {removed} {}", collection.table());
        Ok(removed)
    }

    /// Delete everything except the `keep_count` newest records. Returns the
    /// number of records removed.
    pub fn cleanup_oldest(&self, collection: Collection, keep_count: usize) -> Result<usize> {
        let table = collection.table();
        let sql = format!(
            "DELETE FROM {table} WHERE rowid IN (\
               SELECT rowid FROM {table} ORDER BY created_at DESC, rowid DESC LIMIT -1 OFFSET ?1\
             )"
        );
        let offset = i64::try_from(keep_count).unwrap_or(i64::MAX);
        let removed = self.conn.execute(&sql, params![offset])?;
        if removed > 0 {
            info!(target: "history", "removed {removed} old {table}, kept {keep_count}");
        }
        Ok(removed)
    }
}

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.get(0)?,
        created_at: row.get(6)?,
        image: GeneratedImage {
            url: row.get(1)?,
            base64_data: row.get(2)?,
            original_prompt: row.get(3)?,
            revised_prompt: row.get(4)?,
            edit_prompt: row.get(5)?,
        },
    })
}

fn video_from_row(row: &Row<'_>) -> rusqlite::Result<VideoRecord> {
    let status = row.get::<_, String>(5)?.parse::<VideoStatus>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(err))
    })?;
    let created_at: i64 = row.get(8)?;
    Ok(VideoRecord {
        id: row.get(0)?,
        created_at,
        video: GeneratedVideo {
            task_id: row.get(1)?,
            video_url: row.get(2)?,
            original_prompt: row.get(3)?,
            original_image_source_url: row.get(4)?,
            status,
            progress: row
                .get::<_, Option<i64>>(6)?
                .map(|p| p.clamp(0, 100) as u8),
            error_message: row.get(7)?,
            created_at,
        },
    })
}

fn ensure_column(conn: &Connection, table: &str, column: &str, alter_sql: &str) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    let mut exists = false;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name.eq_ignore_ascii_case(column) {
            exists = true;
            break;
        }
    }
    if !exists {
        conn.execute(alter_sql, [])?;
    }
    Ok(())
}

fn user_version(conn: &Connection) -> Result<i64> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

struct Migration {
    name: &'static str,
    apply: fn(&Connection) -> Result<()>,
}

fn images_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(include_str!("../migrations/V0001__images.sql"))?;
    Ok(())
}

fn image_prompt_columns(conn: &Connection) -> Result<()> {
    ensure_column(
        conn,
        "images",
        "original_prompt",
        "ALTER TABLE images ADD COLUMN original_prompt TEXT",
    )?;
    ensure_column(
        conn,
        "images",
        "edit_prompt",
        "ALTER TABLE images ADD COLUMN edit_prompt TEXT",
    )
}

fn videos_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(include_str!("../migrations/V0003__videos.sql"))?;
    Ok(())
}

/// Index `i` upgrades the schema from version `i` to `i + 1`. Steps only add.
static MIGRATIONS: [Migration; SCHEMA_VERSION as usize] = [
    Migration {
        name: "V0001__images",
        apply: images_table,
    },
    Migration {
        name: "V0002__image_prompts",
        apply: image_prompt_columns,
    },
    Migration {
        name: "V0003__videos",
        apply: videos_table,
    },
];

/// Bring `conn` up to `target`, one transaction per step.
fn migrate(conn: &mut Connection, target: i64) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (name TEXT PRIMARY KEY, applied_at INTEGER NOT NULL)",
    )?;
    let current = user_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(HistoryError::UnsupportedVersion {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }
    for version in current..target.min(SCHEMA_VERSION) {
        let step = &MIGRATIONS[version as usize];
        let tx = conn.transaction()?;
        (step.apply)(&*tx)?;
        tx.execute(
            "INSERT OR IGNORE INTO migrations(name, applied_at) VALUES(?1, strftime('%s','now'))",
            params![step.name],
        )?;
        tx.pragma_update(None, "user_version", version + 1)?;
        tx.commit()?;
        info!(target: "history", "applied migration {}", step.name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(url: &str) -> GeneratedImage {
        GeneratedImage {
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    fn record(id: &str, created_at: i64) -> ImageRecord {
        ImageRecord {
            id: id.to_string(),
            created_at,
            image: image(&format!("https://cdn/{id}.png")),
        }
    }

    fn ids(db: &HistoryDb) -> Vec<String> {
        db.list_images()
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    #[test]
    fn synthetic_ids_have_prefix_time_and_suffix() {
        let id = synthetic_id(Collection::Videos);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "vid");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn fresh_database_is_at_latest_version() {
        let db = HistoryDb::open_in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
        let applied: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, SCHEMA_VERSION);
    }

    #[test]
    fn version_one_upgrade_keeps_images_and_adds_videos() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn, 1).unwrap();
        conn.execute(
            "INSERT INTO images(id, url, revised_prompt, created_at) VALUES('img_1', 'https://cdn/1.png', 'cat', 10)",
            [],
        )
        .unwrap();
        assert_eq!(user_version(&conn).unwrap(), 1);

        migrate(&mut conn, SCHEMA_VERSION).unwrap();
        let db = HistoryDb { conn, path: None };
        assert_eq!(db.schema_version().unwrap(), 3);

        let images = db.list_images().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].id, "img_1");
        assert_eq!(images[0].created_at, 10);
        assert_eq!(images[0].image.url.as_deref(), Some("https://cdn/1.png"));
        assert_eq!(images[0].image.revised_prompt.as_deref(), Some("cat"));
        assert_eq!(images[0].image.original_prompt, None);

        assert_eq!(db.count(Collection::Videos).unwrap(), 0);
        let indexes: Vec<String> = db
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'videos'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert!(indexes.iter().any(|n| n == "idx_videos_created"));
        assert!(indexes.iter().any(|n| n == "idx_videos_task_id"));
    }

    #[test]
    fn newer_schema_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", 9).unwrap();
        let err = migrate(&mut conn, SCHEMA_VERSION).unwrap_err();
        assert!(matches!(
            err,
            HistoryError::UnsupportedVersion { found: 9, supported: 3 }
        ));
    }

    #[test]
    fn images_list_newest_first() {
        let db = HistoryDb::open_in_memory().unwrap();
        db.insert_image(&record("b", 20)).unwrap();
        db.insert_image(&record("a", 10)).unwrap();
        db.insert_image(&record("c", 30)).unwrap();
        db.insert_image(&record("c2", 30)).unwrap();
        assert_eq!(ids(&db), vec!["c2", "c", "b", "a"]);
    }

    #[test]
    fn cleanup_keeps_exactly_the_newest() {
        let db = HistoryDb::open_in_memory().unwrap();
        for (i, id) in ["A", "B", "C", "D", "E"].iter().enumerate() {
            db.insert_image(&record(id, i as i64)).unwrap();
        }
        assert_eq!(db.cleanup_oldest(Collection::Images, 3).unwrap(), 2);
        assert_eq!(ids(&db), vec!["E", "D", "C"]);

        assert_eq!(db.cleanup_oldest(Collection::Images, 2).unwrap(), 1);
        assert_eq!(ids(&db), vec!["E", "D"]);

        assert_eq!(db.cleanup_oldest(Collection::Images, 10).unwrap(), 0);
        assert_eq!(db.count(Collection::Images).unwrap(), 2);
    }

    #[test]
    fn cleanup_with_huge_keep_removes_nothing() {
        let db = HistoryDb::open_in_memory().unwrap();
        for (i, id) in ["A", "B", "C", "D", "E"].iter().enumerate() {
            db.insert_image(&record(id, i as i64)).unwrap();
        }
        assert_eq!(db.cleanup_oldest(Collection::Images, usize::MAX).unwrap(), 0);
        assert_eq!(db.count(Collection::Images).unwrap(), 5);
    }

    #[test]
    fn stored_video_status_is_read_strictly() {
        let db = HistoryDb::open_in_memory().unwrap();
        let mut video = GeneratedVideo::pending("cgt-1");
        video.status = VideoStatus::Processing;
        db.save_video(&video).unwrap();
        let stored = db.find_video_by_task_id("cgt-1").unwrap().unwrap();
        assert_eq!(stored.video.status, VideoStatus::Processing);

        db.conn
            .execute("UPDATE videos SET status = 'succeeded' WHERE task_id = 'cgt-1'", [])
            .unwrap();
        assert!(matches!(
            db.list_videos(),
            Err(HistoryError::Sqlite(rusqlite::Error::FromSqlConversionFailure(5, _, _)))
        ));
    }

    #[test]
    fn video_patch_merges_present_fields() {
        let db = HistoryDb::open_in_memory().unwrap();
        let mut video = GeneratedVideo::pending("cgt-1");
        video.original_prompt = Some("waves".into());
        let saved = db.save_video(&video).unwrap();
        assert!(saved.id.starts_with("vid_"));

        let patch = VideoPatch {
            status: Some(VideoStatus::Completed),
            video_url: Some("https://cdn/v.mp4".into()),
            progress: Some(100),
            error_message: None,
        };
        assert!(db.update_video_by_task_id("cgt-1", &patch).unwrap());
        assert!(!db.update_video_by_task_id("missing", &patch).unwrap());

        let stored = db.find_video_by_task_id("cgt-1").unwrap().unwrap();
        assert_eq!(stored.id, saved.id);
        assert_eq!(stored.video.status, VideoStatus::Completed);
        assert_eq!(stored.video.video_url.as_deref(), Some("https://cdn/v.mp4"));
        assert_eq!(stored.video.progress, Some(100));
        assert_eq!(stored.video.original_prompt.as_deref(), Some("waves"));
        assert_eq!(stored.video.error_message, None);
    }

    #[test]
    fn delete_and_clear() {
        let db = HistoryDb::open_in_memory().unwrap();
        let first = db.save_image(&image("https://cdn/1.png")).unwrap();
        db.save_image(&image("https://cdn/2.png")).unwrap();
        assert!(db.delete(Collection::Images, &first.id).unwrap());
        assert!(!db.delete(Collection::Images, &first.id).unwrap());
        assert_eq!(db.count(Collection::Images).unwrap(), 1);
        assert_eq!(db.clear(Collection::Images).unwrap(), 1);
        assert!(db.list_images().unwrap().is_empty());
    }
}
