//! Movie catalog storage.
//!
//! The acquisition core only needs a narrow view of the catalog: where a
//! movie lives remotely and a place to record whether it is cached locally.

mod memory_store;
mod models;
mod sqlite_store;

pub use memory_store::InMemoryCatalogStore;
pub use models::{Movie, RemoteReference};
pub use sqlite_store::SqliteCatalogStore;

use anyhow::Result;

/// Trait for catalog storage backends.
pub trait CatalogStore: Send + Sync {
    /// Get a movie by ID.
    fn get_movie(&self, movie_id: &str) -> Result<Option<Movie>>;

    /// List every movie in the catalog, ordered by title.
    fn list_movies(&self) -> Result<Vec<Movie>>;

    /// Insert or replace a movie record.
    fn upsert_movie(&self, movie: &Movie) -> Result<()>;

    /// Get the remote location descriptor for a movie.
    ///
    /// Fails if the movie does not exist.
    fn get_movie_remote_reference(&self, movie_id: &str) -> Result<RemoteReference>;

    /// Record that the movie's file is resident in the local cache.
    fn set_movie_cached(&self, movie_id: &str, size_bytes: u64) -> Result<()>;

    /// Record that the movie's file is no longer resident (evicted).
    fn set_movie_uncached(&self, movie_id: &str) -> Result<()>;
}
