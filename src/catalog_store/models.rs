use serde::{Deserialize, Serialize};

/// A movie record as stored in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movie {
    pub id: String,
    pub title: String,
    pub category: Option<String>,
    /// Location of the video file in the remote store.
    pub remote_reference: String,
    /// Size of the remote file if known when the movie was cataloged.
    pub size_hint: Option<u64>,
    /// True once the file has been fetched and is resident in the local cache.
    pub cached: bool,
    /// Size of the cached file, set together with `cached`.
    pub file_size: Option<u64>,
}

impl Movie {
    pub fn new(id: &str, title: &str, remote_reference: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            category: None,
            remote_reference: remote_reference.to_string(),
            size_hint: None,
            cached: false,
            file_size: None,
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn with_size_hint(mut self, size_hint: u64) -> Self {
        self.size_hint = Some(size_hint);
        self
    }

    pub fn remote(&self) -> RemoteReference {
        RemoteReference {
            location: self.remote_reference.clone(),
            size_hint: self.size_hint,
        }
    }
}

/// Everything the remote fetch layer needs to locate a movie's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteReference {
    pub location: String,
    pub size_hint: Option<u64>,
}
