//! In-memory catalog, used by tests and for running without a database.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};

use super::{CatalogStore, Movie, RemoteReference};

#[derive(Default)]
pub struct InMemoryCatalogStore {
    movies: Mutex<HashMap<String, Movie>>,
    cached_updates: Mutex<Vec<(String, u64)>>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_movies(movies: impl IntoIterator<Item = Movie>) -> Self {
        let store = Self::new();
        {
            let mut map = store.movies.lock().unwrap();
            for movie in movies {
                map.insert(movie.id.clone(), movie);
            }
        }
        store
    }

    /// Every `set_movie_cached` call received, in order.
    pub fn cached_updates(&self) -> Vec<(String, u64)> {
        self.cached_updates.lock().unwrap().clone()
    }
}

impl CatalogStore for InMemoryCatalogStore {
    fn get_movie(&self, movie_id: &str) -> Result<Option<Movie>> {
        Ok(self.movies.lock().unwrap().get(movie_id).cloned())
    }

    fn list_movies(&self) -> Result<Vec<Movie>> {
        let mut movies: Vec<Movie> = self.movies.lock().unwrap().values().cloned().collect();
        movies.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(movies)
    }

    fn upsert_movie(&self, movie: &Movie) -> Result<()> {
        self.movies
            .lock()
            .unwrap()
            .insert(movie.id.clone(), movie.clone());
        Ok(())
    }

    fn get_movie_remote_reference(&self, movie_id: &str) -> Result<RemoteReference> {
        self.movies
            .lock()
            .unwrap()
            .get(movie_id)
            .map(Movie::remote)
            .ok_or_else(|| anyhow!("Movie not found: {}", movie_id))
    }

    fn set_movie_cached(&self, movie_id: &str, size_bytes: u64) -> Result<()> {
        let mut movies = self.movies.lock().unwrap();
        let movie = movies
            .get_mut(movie_id)
            .ok_or_else(|| anyhow!("Movie not found: {}", movie_id))?;
        movie.cached = true;
        movie.file_size = Some(size_bytes);
        self.cached_updates
            .lock()
            .unwrap()
            .push((movie_id.to_string(), size_bytes));
        Ok(())
    }

    fn set_movie_uncached(&self, movie_id: &str) -> Result<()> {
        if let Some(movie) = self.movies.lock().unwrap().get_mut(movie_id) {
            movie.cached = false;
            movie.file_size = None;
        }
        Ok(())
    }
}
