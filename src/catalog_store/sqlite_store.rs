use super::{CatalogStore, Movie, RemoteReference};
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Offset added to the schema version stored in `PRAGMA user_version`, so a
/// foreign SQLite file is not mistaken for a catalog at version 0.
const BASE_DB_VERSION: i64 = 41000;
const SCHEMA_VERSION: i64 = 1;

const CREATE_MOVIES_TABLE: &str = "CREATE TABLE movies (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    category TEXT,
    remote_reference TEXT NOT NULL,
    size_hint INTEGER,
    cached INTEGER NOT NULL DEFAULT 0,
    file_size INTEGER
);";

pub struct SqliteCatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalogStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();
        let conn = Connection::open(path).context("Failed to open catalog database")?;
        Self::init(conn, is_new_db, path)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory catalog")?;
        Self::init(conn, true, Path::new(":memory:"))
    }

    fn init(conn: Connection, is_new_db: bool, path: &Path) -> Result<Self> {
        if is_new_db {
            info!("Creating new catalog database at {:?}", path);
            conn.execute(CREATE_MOVIES_TABLE, [])?;
            conn.execute(
                "CREATE INDEX idx_movies_category ON movies(category);",
                [],
            )?;
            conn.execute(
                &format!("PRAGMA user_version = {}", BASE_DB_VERSION + SCHEMA_VERSION),
                [],
            )?;
        } else {
            let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
            let db_version = raw_version - BASE_DB_VERSION;
            if db_version != SCHEMA_VERSION {
                bail!(
                    "Catalog database version {} is not supported (expected {})",
                    db_version,
                    SCHEMA_VERSION
                );
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_movie(row: &rusqlite::Row) -> rusqlite::Result<Movie> {
        let size_hint: Option<i64> = row.get("size_hint")?;
        let file_size: Option<i64> = row.get("file_size")?;
        let cached: i64 = row.get("cached")?;
        Ok(Movie {
            id: row.get("id")?,
            title: row.get("title")?,
            category: row.get("category")?,
            remote_reference: row.get("remote_reference")?,
            size_hint: size_hint.map(|v| v as u64),
            cached: cached != 0,
            file_size: file_size.map(|v| v as u64),
        })
    }
}

impl CatalogStore for SqliteCatalogStore {
    fn get_movie(&self, movie_id: &str) -> Result<Option<Movie>> {
        let conn = self.conn.lock().unwrap();
        let movie = conn
            .query_row(
                "SELECT * FROM movies WHERE id = ?1",
                params![movie_id],
                Self::row_to_movie,
            )
            .optional()?;
        Ok(movie)
    }

    fn list_movies(&self) -> Result<Vec<Movie>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM movies ORDER BY title")?;
        let movies = stmt
            .query_map([], Self::row_to_movie)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(movies)
    }

    fn upsert_movie(&self, movie: &Movie) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO movies
                (id, title, category, remote_reference, size_hint, cached, file_size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                movie.id,
                movie.title,
                movie.category,
                movie.remote_reference,
                movie.size_hint.map(|v| v as i64),
                movie.cached as i64,
                movie.file_size.map(|v| v as i64),
            ],
        )?;
        Ok(())
    }

    fn get_movie_remote_reference(&self, movie_id: &str) -> Result<RemoteReference> {
        let conn = self.conn.lock().unwrap();
        let reference = conn
            .query_row(
                "SELECT remote_reference, size_hint FROM movies WHERE id = ?1",
                params![movie_id],
                |row| {
                    let size_hint: Option<i64> = row.get(1)?;
                    Ok(RemoteReference {
                        location: row.get(0)?,
                        size_hint: size_hint.map(|v| v as u64),
                    })
                },
            )
            .optional()?;
        reference.with_context(|| format!("Movie not found: {}", movie_id))
    }

    fn set_movie_cached(&self, movie_id: &str, size_bytes: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE movies SET cached = 1, file_size = ?2 WHERE id = ?1",
            params![movie_id, size_bytes as i64],
        )?;
        if updated == 0 {
            bail!("Movie not found: {}", movie_id);
        }
        Ok(())
    }

    fn set_movie_uncached(&self, movie_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE movies SET cached = 0, file_size = NULL WHERE id = ?1",
            params![movie_id],
        )?;
        Ok(())
    }
}
