//! SQLite-backed [`Library`].
//!
//! The server, the batch scanner and the standalone ingester are separate
//! processes; they share state through this database file.

use crate::library::{
    current_timestamp_ms, EpisodeRef, Library, LibraryError, MediaKind, MediaRecord, NewVideo,
    Video, VideoId,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS videos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL,
    path TEXT NOT NULL,
    size INTEGER NOT NULL,
    kind TEXT NOT NULL,
    movie_id INTEGER,
    tv_id INTEGER,
    season INTEGER,
    episode INTEGER,
    watch_time INTEGER,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_videos_path ON videos(path);
CREATE TABLE IF NOT EXISTS movies (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    original_title TEXT NOT NULL,
    release_date TEXT
);
CREATE TABLE IF NOT EXISTS tvs (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    original_title TEXT NOT NULL,
    release_date TEXT
);
";

const VIDEO_COLUMNS: &str =
    "id, owner, path, size, kind, movie_id, tv_id, season, episode, watch_time, created_at";

pub struct SqliteLibrary {
    conn: Mutex<Connection>,
}

impl SqliteLibrary {
    /// Opens (creating if needed) the database at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, LibraryError> {
        let conn = Connection::open(db_path.as_ref())?;
        debug!("Opened library database {}", db_path.as_ref().display());
        Self::from_connection(conn)
    }

    /// Database living only as long as this value.
    pub fn open_in_memory() -> Result<Self, LibraryError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, LibraryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LibraryError> {
        self.conn
            .lock()
            .map_err(|_| LibraryError::Storage("database lock poisoned".to_string()))
    }

    fn query_videos(
        &self,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Video>, LibraryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM videos WHERE {} ORDER BY id",
            VIDEO_COLUMNS, filter
        ))?;
        let rows = stmt.query_map(args, video_from_row)?;
        let mut videos = Vec::new();
        for row in rows {
            videos.push(row?);
        }
        Ok(videos)
    }

    fn update_video(
        &self,
        id: VideoId,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<(), LibraryError> {
        let changed = self.conn()?.execute(sql, args)?;
        if changed == 0 {
            return Err(LibraryError::NotFound { what: "video", id });
        }
        Ok(())
    }

    fn get_record(&self, table: &str, id: u64) -> Result<Option<MediaRecord>, LibraryError> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT id, title, original_title, release_date FROM {} WHERE id = ?1",
                    table
                ),
                params![id as i64],
                |row| {
                    Ok(MediaRecord {
                        id: row.get::<_, i64>(0)? as u64,
                        title: row.get(1)?,
                        original_title: row.get(2)?,
                        release_date: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn put_record(&self, table: &str, record: &MediaRecord) -> Result<(), LibraryError> {
        self.conn()?.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (id, title, original_title, release_date)
                 VALUES (?1, ?2, ?3, ?4)",
                table
            ),
            params![
                record.id as i64,
                record.title,
                record.original_title,
                record.release_date
            ],
        )?;
        Ok(())
    }
}

fn video_from_row(row: &Row<'_>) -> rusqlite::Result<Video> {
    let kind: String = row.get(4)?;
    let tv_id: Option<i64> = row.get(6)?;
    let season: Option<i64> = row.get(7)?;
    let episode: Option<i64> = row.get(8)?;
    let episode = match (tv_id, season, episode) {
        (Some(tv_id), Some(season), Some(episode)) => Some(EpisodeRef {
            tv_id: tv_id as u64,
            season: season as u32,
            episode: episode as u32,
        }),
        _ => None,
    };
    Ok(Video {
        id: row.get::<_, i64>(0)? as u64,
        owner: row.get(1)?,
        path: PathBuf::from(row.get::<_, String>(2)?),
        size: row.get::<_, i64>(3)? as u64,
        kind: MediaKind::parse(&kind).unwrap_or(MediaKind::Unknown),
        movie_id: row.get::<_, Option<i64>>(5)?.map(|id| id as u64),
        episode,
        watch_time: row.get::<_, Option<i64>>(9)?.map(|t| t as u64),
        created_at: row.get(10)?,
    })
}

fn path_text(path: &Path) -> Result<&str, LibraryError> {
    path.to_str()
        .ok_or_else(|| LibraryError::NonUtf8Path(path.to_path_buf()))
}

impl Library for SqliteLibrary {
    fn create_video(&self, video: NewVideo) -> Result<Video, LibraryError> {
        let path = path_text(&video.path)?;
        let created_at = current_timestamp_ms();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO videos (owner, path, size, kind, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                video.owner,
                path,
                video.size as i64,
                video.kind.as_str(),
                created_at
            ],
        )?;
        let id = conn.last_insert_rowid() as u64;
        Ok(Video {
            id,
            owner: video.owner,
            path: video.path,
            size: video.size,
            kind: video.kind,
            movie_id: None,
            episode: None,
            watch_time: None,
            created_at,
        })
    }

    fn video(&self, id: VideoId) -> Result<Option<Video>, LibraryError> {
        Ok(self.query_videos("id = ?1", &[&(id as i64)])?.pop())
    }

    fn videos_at_path(&self, path: &Path) -> Result<Vec<Video>, LibraryError> {
        let path = path_text(path)?;
        self.query_videos("path = ?1", &[&path])
    }

    fn unidentified_videos(&self, kind: MediaKind) -> Result<Vec<Video>, LibraryError> {
        self.query_videos(
            "kind = ?1 AND movie_id IS NULL AND tv_id IS NULL",
            &[&kind.as_str()],
        )
    }

    fn delete_video(&self, id: VideoId) -> Result<(), LibraryError> {
        self.update_video(id, "DELETE FROM videos WHERE id = ?1", &[&(id as i64)])
    }

    fn set_movie(&self, id: VideoId, movie_id: u64) -> Result<(), LibraryError> {
        self.update_video(
            id,
            "UPDATE videos SET kind = 'movie', movie_id = ?2,
                 tv_id = NULL, season = NULL, episode = NULL
             WHERE id = ?1",
            &[&(id as i64), &(movie_id as i64)],
        )
    }

    fn set_tv(&self, id: VideoId, episode: EpisodeRef) -> Result<(), LibraryError> {
        self.update_video(
            id,
            "UPDATE videos SET kind = 'tv', movie_id = NULL,
                 tv_id = ?2, season = ?3, episode = ?4
             WHERE id = ?1",
            &[
                &(id as i64),
                &(episode.tv_id as i64),
                &(episode.season as i64),
                &(episode.episode as i64),
            ],
        )
    }

    fn set_path(&self, id: VideoId, path: &Path) -> Result<(), LibraryError> {
        self.update_video(
            id,
            "UPDATE videos SET path = ?2 WHERE id = ?1",
            &[&(id as i64), &path_text(path)?],
        )
    }

    fn movie(&self, movie_id: u64) -> Result<Option<MediaRecord>, LibraryError> {
        self.get_record("movies", movie_id)
    }

    fn tv(&self, tv_id: u64) -> Result<Option<MediaRecord>, LibraryError> {
        self.get_record("tvs", tv_id)
    }

    fn put_movie(&self, record: MediaRecord) -> Result<(), LibraryError> {
        self.put_record("movies", &record)
    }

    fn put_tv(&self, record: MediaRecord) -> Result<(), LibraryError> {
        self.put_record("tvs", &record)
    }
}
