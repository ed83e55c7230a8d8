use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::config::CacheSettings;
use crate::server::metrics;

use super::models::{CacheEntry, CacheStats, CommitOutcome};
use super::reader::CacheReader;
use super::CacheError;

const BLOB_EXTENSION: &str = "blob";
const STAGING_EXTENSION: &str = "part";
const SNIFF_LEN: usize = 8192;
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Index and running totals. Every mutation happens under one mutex.
#[derive(Default)]
struct CacheIndex {
    entries: HashMap<String, CacheEntry>,
    pins: HashMap<String, usize>,
    used_bytes: u64,
    reserved_bytes: u64,
    access_seq: u64,
}

impl CacheIndex {
    fn next_access_seq(&mut self) -> u64 {
        self.access_seq += 1;
        self.access_seq
    }

    fn is_pinned(&self, movie_id: &str) -> bool {
        self.pins.get(movie_id).is_some_and(|count| *count > 0)
    }

    fn pin(&mut self, movie_id: &str) {
        *self.pins.entry(movie_id.to_string()).or_insert(0) += 1;
    }

    fn unpin(&mut self, movie_id: &str) {
        if let Some(count) = self.pins.get_mut(movie_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pins.remove(movie_id);
            }
        }
    }

    fn insert(&mut self, entry: CacheEntry) {
        self.used_bytes += entry.size_bytes;
        self.entries.insert(entry.movie_id.clone(), entry);
    }

    fn remove(&mut self, movie_id: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(movie_id)?;
        self.used_bytes -= entry.size_bytes;
        Some(entry)
    }

    /// Removes least recently accessed, unpinned entries until
    /// `used + reserved + needed` fits in `quota`.
    ///
    /// Nothing is removed when the target cannot be reached.
    fn evict_for(&mut self, needed: u64, quota: u64) -> Result<Vec<CacheEntry>, CacheError> {
        let mut total = self.used_bytes + self.reserved_bytes + needed;
        if total <= quota {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<(DateTime<Utc>, u64, String, u64)> = self
            .entries
            .values()
            .filter(|e| !self.is_pinned(&e.movie_id))
            .map(|e| {
                (
                    e.last_accessed_at,
                    e.access_seq,
                    e.movie_id.clone(),
                    e.size_bytes,
                )
            })
            .collect();

        let freeable: u64 = candidates.iter().map(|c| c.3).sum();
        if total - freeable.min(total) > quota {
            return Err(CacheError::InsufficientSpace { needed, quota });
        }

        candidates.sort();
        let mut evicted = Vec::new();
        for (_, _, movie_id, size) in candidates {
            if total <= quota {
                break;
            }
            if let Some(entry) = self.remove(&movie_id) {
                total -= size;
                evicted.push(entry);
            }
        }
        Ok(evicted)
    }

    fn stats(&self, max_size_bytes: u64) -> CacheStats {
        CacheStats {
            used_bytes: self.used_bytes,
            reserved_bytes: self.reserved_bytes,
            max_size_bytes,
            entries: self.entries.len(),
        }
    }
}

/// RAII guard preventing eviction of a movie's entry.
pub struct CachePin {
    index: Arc<Mutex<CacheIndex>>,
    movie_id: String,
}

impl Drop for CachePin {
    fn drop(&mut self) {
        self.index.lock().unwrap().unpin(&self.movie_id);
    }
}

/// Private write target for an in-flight transfer.
///
/// Dropping a handle without committing or aborting it releases its
/// reservation and deletes the staging file.
pub struct StagingHandle {
    movie_id: String,
    path: PathBuf,
    reserved_bytes: u64,
    evicted: Vec<String>,
    file: Option<File>,
    index: Arc<Mutex<CacheIndex>>,
    released: bool,
}

impl StagingHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Movies evicted to make room for this reservation.
    pub fn evicted(&self) -> &[String] {
        &self.evicted
    }

    /// The staging file to write the transfer into.
    pub fn writer(&mut self) -> &mut File {
        self.file
            .as_mut()
            .expect("staging file is only taken on commit or abort")
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut index = self.index.lock().unwrap();
        index.reserved_bytes -= self.reserved_bytes;
        index.unpin(&self.movie_id);
    }
}

impl Drop for StagingHandle {
    fn drop(&mut self) {
        if !self.released {
            self.file.take();
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove abandoned staging file {:?}: {}", self.path, e);
                }
            }
            self.release();
        }
    }
}

/// Disk-backed, quota-bounded store of movie blobs keyed by movie id.
pub struct CacheStore {
    storage_dir: PathBuf,
    staging_dir: PathBuf,
    max_size_bytes: u64,
    index: Arc<Mutex<CacheIndex>>,
    next_seq: AtomicU64,
}

impl CacheStore {
    /// Opens the cache, rebuilding the index from the blobs found on disk.
    ///
    /// Leftover staging files from a previous run are deleted, only the newest
    /// blob per movie is kept, and if the rebuilt total exceeds the quota the
    /// least recently modified blobs are evicted.
    pub async fn open(settings: &CacheSettings) -> Result<Self, CacheError> {
        tokio::fs::create_dir_all(&settings.storage_path).await?;
        tokio::fs::create_dir_all(&settings.staging_path).await?;
        if tokio::fs::canonicalize(&settings.storage_path).await?
            == tokio::fs::canonicalize(&settings.staging_path).await?
        {
            return Err(CacheError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "staging directory must differ from the storage directory {:?}",
                    settings.storage_path
                ),
            )));
        }

        let removed_staging = clear_directory_files(&settings.staging_path).await?;
        if removed_staging > 0 {
            info!("Removed {} leftover staging files", removed_staging);
        }

        let mut found: HashMap<String, (u64, PathBuf, std::fs::Metadata)> = HashMap::new();
        let mut stale = Vec::new();
        let mut max_seq = 0;

        let mut dir = tokio::fs::read_dir(&settings.storage_path).await?;
        while let Some(dir_entry) = dir.next_entry().await? {
            let metadata = dir_entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let file_name = dir_entry.file_name();
            if file_name
                .to_str()
                .is_some_and(|name| name.ends_with(&format!(".{}", STAGING_EXTENSION)))
            {
                stale.push(dir_entry.path());
                continue;
            }
            let Some((movie_id, seq)) = file_name.to_str().and_then(parse_blob_file_name) else {
                debug!("Ignoring unknown file in cache directory: {:?}", file_name);
                continue;
            };
            max_seq = max_seq.max(seq);
            match found.get(&movie_id) {
                Some((existing_seq, _, _)) if *existing_seq > seq => {
                    stale.push(dir_entry.path());
                }
                _ => {
                    if let Some((_, old_path, _)) =
                        found.insert(movie_id, (seq, dir_entry.path(), metadata))
                    {
                        stale.push(old_path);
                    }
                }
            }
        }

        for path in stale {
            remove_blob_file(&path).await;
        }

        let mut rebuilt: Vec<CacheEntry> = Vec::with_capacity(found.len());
        for (movie_id, (_, path, metadata)) in found {
            let last_accessed_at = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            let content_type = sniff_content_type(&path).await;
            rebuilt.push(CacheEntry {
                movie_id,
                size_bytes: metadata.len(),
                last_accessed_at,
                storage_path: path,
                content_type,
                resident: true,
                access_seq: 0,
            });
        }
        rebuilt.sort_by_key(|e| e.last_accessed_at);

        let mut index = CacheIndex::default();
        for mut entry in rebuilt {
            entry.access_seq = index.next_access_seq();
            index.insert(entry);
        }

        let evicted = index.evict_for(0, settings.max_size_bytes)?;
        for entry in &evicted {
            remove_blob_file(&entry.storage_path).await;
        }
        if !evicted.is_empty() {
            metrics::record_evictions(evicted.len());
        }

        info!(
            "Cache opened at {:?}: {} entries, {} of {} bytes used",
            settings.storage_path,
            index.entries.len(),
            index.used_bytes,
            settings.max_size_bytes
        );
        metrics::set_cache_usage(index.used_bytes, index.entries.len());

        Ok(Self {
            storage_dir: settings.storage_path.clone(),
            staging_dir: settings.staging_path.clone(),
            max_size_bytes: settings.max_size_bytes,
            index: Arc::new(Mutex::new(index)),
            next_seq: AtomicU64::new(max_seq + 1),
        })
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Allocates a private staging file for a new fetch of `movie_id`.
    ///
    /// Evicts other entries if `estimated_size` does not fit next to the
    /// current usage and outstanding reservations. The movie's own current
    /// entry, if any, stays pinned until the handle is committed or aborted.
    pub async fn reserve(
        &self,
        movie_id: &str,
        estimated_size: u64,
    ) -> Result<StagingHandle, CacheError> {
        if estimated_size > self.max_size_bytes {
            return Err(CacheError::InsufficientSpace {
                needed: estimated_size,
                quota: self.max_size_bytes,
            });
        }

        let evicted = {
            let mut index = self.index.lock().unwrap();
            // Pinned first so the movie's own resident entry is not a candidate.
            index.pin(movie_id);
            let evicted = match index.evict_for(estimated_size, self.max_size_bytes) {
                Ok(evicted) => evicted,
                Err(e) => {
                    index.unpin(movie_id);
                    return Err(e);
                }
            };
            index.reserved_bytes += estimated_size;
            evicted
        };

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let path = self
            .staging_dir
            .join(format!("{}.{}.{}", encode_movie_id(movie_id), seq, STAGING_EXTENSION));

        // From here on, the handle's Drop releases the reservation on failure.
        let mut handle = StagingHandle {
            movie_id: movie_id.to_string(),
            path,
            reserved_bytes: estimated_size,
            evicted: evicted.iter().map(|e| e.movie_id.clone()).collect(),
            file: None,
            index: self.index.clone(),
            released: false,
        };

        self.finish_evictions(&evicted).await;

        handle.file = Some(File::create(&handle.path).await?);
        debug!(
            "Reserved {} bytes for {} at {:?}",
            estimated_size, movie_id, handle.path
        );
        Ok(handle)
    }

    /// Atomically publishes a staged blob as the resident entry for its movie.
    ///
    /// Any prior entry for the same movie is replaced. If the blob does not
    /// fit in the quota even after eviction, the staged file is deleted and
    /// nothing becomes visible.
    pub async fn commit(
        &self,
        mut handle: StagingHandle,
        actual_size: u64,
    ) -> Result<CommitOutcome, CacheError> {
        if let Some(mut file) = handle.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }

        let on_disk = tokio::fs::metadata(&handle.path).await?.len();
        if on_disk != actual_size {
            self.abort(handle).await;
            return Err(CacheError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "staged blob has {} bytes, expected {}",
                    on_disk, actual_size
                ),
            )));
        }

        let content_type = sniff_content_type(&handle.path).await;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let final_path = self.storage_dir.join(blob_file_name(&handle.movie_id, seq));

        // The final path is unique and not yet indexed, so no reader can see it.
        if let Err(e) = move_into_storage(&handle.path, &final_path).await {
            self.abort(handle).await;
            return Err(e.into());
        }

        let movie_id = handle.movie_id.clone();
        let result = {
            let mut index = self.index.lock().unwrap();
            handle.release_locked(&mut index);

            let replaced = index.remove(&movie_id);
            match index.evict_for(actual_size, self.max_size_bytes) {
                Ok(evicted) => {
                    let access_seq = index.next_access_seq();
                    let entry = CacheEntry {
                        movie_id: movie_id.clone(),
                        size_bytes: actual_size,
                        last_accessed_at: Utc::now(),
                        storage_path: final_path.clone(),
                        content_type,
                        resident: true,
                        access_seq,
                    };
                    index.insert(entry.clone());
                    metrics::set_cache_usage(index.used_bytes, index.entries.len());
                    Ok((entry, evicted, replaced))
                }
                Err(e) => {
                    if let Some(previous) = replaced {
                        index.insert(previous);
                    }
                    Err(e)
                }
            }
        };

        match result {
            Ok((entry, evicted, replaced)) => {
                if let Some(previous) = replaced {
                    remove_blob_file(&previous.storage_path).await;
                }
                self.finish_evictions(&evicted).await;
                info!(
                    "Committed {} ({} bytes, {}) to cache",
                    movie_id, actual_size, entry.content_type
                );
                Ok(CommitOutcome {
                    entry,
                    evicted: evicted.into_iter().map(|e| e.movie_id).collect(),
                })
            }
            Err(e) => {
                remove_blob_file(&final_path).await;
                warn!("Could not commit {} to cache: {}", movie_id, e);
                Err(e)
            }
        }
    }

    /// Discards a staged blob and releases its reservation.
    pub async fn abort(&self, mut handle: StagingHandle) {
        handle.file.take();
        if let Err(e) = tokio::fs::remove_file(&handle.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove staging file {:?}: {}", handle.path, e);
            }
        }
        handle.release();
        debug!("Aborted staging for {}", handle.movie_id);
    }

    /// Opens a byte stream over `start..=end` of a resident blob.
    ///
    /// `end` defaults to the last byte and is clamped to it. The returned
    /// reader pins the entry until dropped.
    pub async fn read(
        &self,
        movie_id: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<CacheReader, CacheError> {
        let (entry, pin) = {
            let mut index = self.index.lock().unwrap();
            let access_seq = index.next_access_seq();
            let entry = index
                .entries
                .get_mut(movie_id)
                .ok_or_else(|| CacheError::NotResident(movie_id.to_string()))?;

            let size = entry.size_bytes;
            if start >= size || end.is_some_and(|end| end < start) {
                return Err(CacheError::RangeNotSatisfiable { start, size });
            }

            entry.last_accessed_at = Utc::now();
            entry.access_seq = access_seq;
            let entry = entry.clone();
            index.pin(movie_id);
            (
                entry,
                CachePin {
                    index: self.index.clone(),
                    movie_id: movie_id.to_string(),
                },
            )
        };

        let end_inclusive = end
            .unwrap_or(entry.size_bytes - 1)
            .min(entry.size_bytes - 1);

        let mut file = match File::open(&entry.storage_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Replaced by a newer commit between lookup and open.
                return Err(CacheError::NotResident(movie_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(start)).await?;

        Ok(CacheReader::new(
            entry.movie_id,
            start,
            end_inclusive,
            entry.size_bytes,
            entry.content_type,
            file.take(end_inclusive - start + 1),
            pin,
        ))
    }

    /// Pins a resident entry against eviction until the guard is dropped.
    pub fn pin(&self, movie_id: &str) -> Result<CachePin, CacheError> {
        let mut index = self.index.lock().unwrap();
        if !index.entries.contains_key(movie_id) {
            return Err(CacheError::NotResident(movie_id.to_string()));
        }
        index.pin(movie_id);
        Ok(CachePin {
            index: self.index.clone(),
            movie_id: movie_id.to_string(),
        })
    }

    /// Evicts least recently accessed, unpinned entries until
    /// `free_bytes_needed` more bytes fit in the quota. Returns the evicted
    /// movie ids.
    pub async fn evict_until(&self, free_bytes_needed: u64) -> Result<Vec<String>, CacheError> {
        let evicted = {
            let mut index = self.index.lock().unwrap();
            index.evict_for(free_bytes_needed, self.max_size_bytes)?
        };
        self.finish_evictions(&evicted).await;
        Ok(evicted.into_iter().map(|e| e.movie_id).collect())
    }

    pub fn entry(&self, movie_id: &str) -> Option<CacheEntry> {
        self.index.lock().unwrap().entries.get(movie_id).cloned()
    }

    pub fn is_resident(&self, movie_id: &str) -> bool {
        self.index.lock().unwrap().entries.contains_key(movie_id)
    }

    pub fn stats(&self) -> CacheStats {
        self.index.lock().unwrap().stats(self.max_size_bytes)
    }

    async fn finish_evictions(&self, evicted: &[CacheEntry]) {
        if evicted.is_empty() {
            return;
        }
        for entry in evicted {
            info!(
                "Evicted {} ({} bytes) from cache",
                entry.movie_id, entry.size_bytes
            );
            remove_blob_file(&entry.storage_path).await;
        }
        metrics::record_evictions(evicted.len());
        let stats = self.stats();
        metrics::set_cache_usage(stats.used_bytes, stats.entries);
    }
}

impl StagingHandle {
    fn release_locked(&mut self, index: &mut CacheIndex) {
        if self.released {
            return;
        }
        self.released = true;
        index.reserved_bytes -= self.reserved_bytes;
        index.unpin(&self.movie_id);
    }
}

fn encode_movie_id(movie_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(movie_id.as_bytes())
}

fn blob_file_name(movie_id: &str, seq: u64) -> String {
    format!("{}.{}.{}", encode_movie_id(movie_id), seq, BLOB_EXTENSION)
}

/// Parses `<base64url(movie_id)>.<seq>.blob`.
fn parse_blob_file_name(file_name: &str) -> Option<(String, u64)> {
    let stem = file_name.strip_suffix(&format!(".{}", BLOB_EXTENSION))?;
    let (encoded, seq) = stem.rsplit_once('.')?;
    let seq = seq.parse::<u64>().ok()?;
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    let movie_id = String::from_utf8(bytes).ok()?;
    Some((movie_id, seq))
}

async fn sniff_content_type(path: &Path) -> String {
    let mut buf = vec![0u8; SNIFF_LEN];
    let read = match File::open(path).await {
        Ok(mut file) => {
            let mut filled = 0;
            loop {
                match file.read(&mut buf[filled..]).await {
                    Ok(0) => break,
                    Ok(n) => {
                        filled += n;
                        if filled == buf.len() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            filled
        }
        Err(_) => 0,
    };
    infer::get(&buf[..read])
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
}

/// Renames a staged blob into place. When the rename fails, e.g. because
/// staging lives on another filesystem, the blob is copied to a temporary
/// file next to `to` and that file is renamed instead.
async fn move_into_storage(from: &Path, to: &Path) -> std::io::Result<()> {
    let rename_error = match tokio::fs::rename(from, to).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    debug!(
        "Renaming {:?} to {:?} failed ({}), copying instead",
        from, to, rename_error
    );

    let temp = to.with_extension(STAGING_EXTENSION);
    let copied = async {
        tokio::fs::copy(from, &temp).await?;
        File::open(&temp).await?.sync_all().await?;
        tokio::fs::rename(&temp, to).await
    }
    .await;
    if let Err(e) = copied {
        remove_blob_file(&temp).await;
        return Err(e);
    }
    remove_blob_file(from).await;
    Ok(())
}

async fn remove_blob_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove cache file {:?}: {}", path, e);
        }
    }
}

async fn clear_directory_files(dir: &Path) -> Result<usize, CacheError> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.metadata().await?.is_file() {
            tokio::fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const UNIT: u64 = 1000;

    fn settings(dir: &TempDir, max_size_bytes: u64) -> CacheSettings {
        CacheSettings {
            storage_path: dir.path().join("blobs"),
            staging_path: dir.path().join("blobs").join(".staging"),
            max_size_bytes,
        }
    }

    async fn put(store: &CacheStore, movie_id: &str, data: &[u8]) -> CommitOutcome {
        let mut handle = store.reserve(movie_id, data.len() as u64).await.unwrap();
        handle.writer().write_all(data).await.unwrap();
        store.commit(handle, data.len() as u64).await.unwrap()
    }

    fn bytes(n: u64, fill: u8) -> Vec<u8> {
        vec![fill; n as usize]
    }

    #[test]
    fn blob_file_names_round_trip() {
        let name = blob_file_name("movies/42 ünïcode", 7);
        assert!(!name.contains('/'));
        assert_eq!(
            parse_blob_file_name(&name),
            Some(("movies/42 ünïcode".to_string(), 7))
        );
        assert_eq!(parse_blob_file_name("notes.txt"), None);
        assert_eq!(parse_blob_file_name("abc.x.blob"), None);
    }

    #[tokio::test]
    async fn commit_makes_entry_resident_and_readable() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(&settings(&dir, 10 * UNIT)).await.unwrap();

        let data: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        let mut handle = store.reserve("m1", 3000).await.unwrap();
        handle.writer().write_all(&data).await.unwrap();

        assert!(!store.is_resident("m1"));
        assert!(matches!(
            store.read("m1", 0, None).await,
            Err(CacheError::NotResident(_))
        ));

        let outcome = store.commit(handle, 3000).await.unwrap();
        assert!(outcome.evicted.is_empty());
        assert_eq!(outcome.entry.size_bytes, 3000);
        assert!(outcome.entry.resident);

        let read = store.read("m1", 0, None).await.unwrap();
        assert_eq!(read.len(), 3000);
        assert_eq!(read.read_to_vec().await.unwrap(), data);

        let read = store.read("m1", 100, Some(199)).await.unwrap();
        assert_eq!(read.read_to_vec().await.unwrap(), data[100..200].to_vec());

        let stats = store.stats();
        assert_eq!(stats.used_bytes, 3000);
        assert_eq!(stats.reserved_bytes, 0);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn read_rejects_unsatisfiable_ranges() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(&settings(&dir, 10 * UNIT)).await.unwrap();
        put(&store, "m1", &bytes(100, 1)).await;

        assert!(matches!(
            store.read("m1", 100, None).await,
            Err(CacheError::RangeNotSatisfiable {
                start: 100,
                size: 100
            })
        ));
        assert!(matches!(
            store.read("m1", 50, Some(10)).await,
            Err(CacheError::RangeNotSatisfiable { .. })
        ));

        // End past the blob is clamped.
        let read = store.read("m1", 90, Some(5000)).await.unwrap();
        assert_eq!(read.end_inclusive(), 99);
        assert_eq!(read.read_to_vec().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn abort_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(&settings(&dir, 10 * UNIT)).await.unwrap();

        let mut handle = store.reserve("m1", 500).await.unwrap();
        handle.writer().write_all(&bytes(250, 9)).await.unwrap();
        let staging_path = handle.path().to_path_buf();
        assert_eq!(store.stats().reserved_bytes, 500);

        store.abort(handle).await;

        assert!(!staging_path.exists());
        assert!(!store.is_resident("m1"));
        assert_eq!(store.stats(), CacheStats {
            used_bytes: 0,
            reserved_bytes: 0,
            max_size_bytes: 10 * UNIT,
            entries: 0,
        });
    }

    #[tokio::test]
    async fn dropped_handle_releases_reservation() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(&settings(&dir, 10 * UNIT)).await.unwrap();

        let handle = store.reserve("m1", 500).await.unwrap();
        let staging_path = handle.path().to_path_buf();
        drop(handle);

        assert!(!staging_path.exists());
        assert_eq!(store.stats().reserved_bytes, 0);
    }

    #[tokio::test]
    async fn reserve_larger_than_quota_fails_without_evicting() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(&settings(&dir, 2 * UNIT)).await.unwrap();
        put(&store, "a", &bytes(UNIT, 1)).await;

        let result = store.reserve("big", 3 * UNIT).await;
        assert!(matches!(
            result,
            Err(CacheError::InsufficientSpace { needed, quota }) if needed == 3 * UNIT && quota == 2 * UNIT
        ));
        assert!(store.is_resident("a"));
    }

    #[tokio::test]
    async fn least_recently_accessed_entry_is_evicted() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(&settings(&dir, 2 * UNIT)).await.unwrap();

        put(&store, "a", &bytes(UNIT, 1)).await;
        put(&store, "b", &bytes(UNIT, 2)).await;

        let outcome = put(&store, "c", &bytes(UNIT, 3)).await;
        assert!(store.stats().used_bytes <= 2 * UNIT);

        assert!(!store.is_resident("a"));
        assert!(store.is_resident("b"));
        assert!(store.is_resident("c"));
        assert!(matches!(
            store.read("a", 0, None).await,
            Err(CacheError::NotResident(_))
        ));
        // "a" was evicted when "c" reserved its space, not on commit.
        assert!(outcome.evicted.is_empty());
    }

    #[tokio::test]
    async fn reading_refreshes_recency() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(&settings(&dir, 2 * UNIT)).await.unwrap();

        put(&store, "a", &bytes(UNIT, 1)).await;
        put(&store, "b", &bytes(UNIT, 2)).await;
        drop(store.read("a", 0, None).await.unwrap());

        put(&store, "c", &bytes(UNIT, 3)).await;

        assert!(store.is_resident("a"));
        assert!(!store.is_resident("b"));
        assert!(store.is_resident("c"));
    }

    #[tokio::test]
    async fn pinned_entries_are_never_evicted() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(&settings(&dir, 2 * UNIT)).await.unwrap();

        put(&store, "a", &bytes(UNIT, 1)).await;
        put(&store, "b", &bytes(UNIT, 2)).await;

        // An in-progress read pins "a" even though it is the oldest.
        let reader = store.read("a", 0, None).await.unwrap();
        put(&store, "c", &bytes(UNIT, 3)).await;
        assert!(store.is_resident("a"));
        assert!(!store.is_resident("b"));

        // Everything else pinned too: no room for another blob.
        let _pin_c = store.pin("c").unwrap();
        let result = store.reserve("d", UNIT).await;
        assert!(matches!(result, Err(CacheError::InsufficientSpace { .. })));
        assert!(store.is_resident("a"));
        assert!(store.is_resident("c"));

        let data = reader.read_to_vec().await.unwrap();
        assert_eq!(data, bytes(UNIT, 1));
    }

    #[tokio::test]
    async fn reserve_never_evicts_the_same_movie() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(&settings(&dir, 2 * UNIT)).await.unwrap();
        put(&store, "a", &bytes(UNIT, 1)).await;
        put(&store, "b", &bytes(UNIT, 2)).await;

        // "a" is the oldest, but a refetch of "a" keeps it until commit.
        let handle = store.reserve("a", UNIT).await.unwrap();
        assert_eq!(handle.evicted(), &["b".to_string()]);
        assert!(store.is_resident("a"));
        assert!(!store.is_resident("b"));
        store.abort(handle).await;

        // With nothing else to evict, the reservation fails and unpins "a".
        let result = store.reserve("a", 2 * UNIT).await;
        assert!(matches!(result, Err(CacheError::InsufficientSpace { .. })));
        assert!(store.is_resident("a"));

        let handle = store.reserve("d", 2 * UNIT).await.unwrap();
        assert_eq!(handle.evicted(), &["a".to_string()]);
        store.abort(handle).await;
    }

    #[tokio::test]
    async fn evict_until_is_all_or_nothing() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(&settings(&dir, 3 * UNIT)).await.unwrap();

        put(&store, "a", &bytes(UNIT, 1)).await;
        put(&store, "b", &bytes(UNIT, 2)).await;
        let _pin = store.pin("b").unwrap();

        // Needs 3 units free but only "a" is evictable.
        assert!(matches!(
            store.evict_until(3 * UNIT).await,
            Err(CacheError::InsufficientSpace { .. })
        ));
        assert!(store.is_resident("a"));

        let evicted = store.evict_until(2 * UNIT).await.unwrap();
        assert_eq!(evicted, vec!["a".to_string()]);
        assert_eq!(store.stats().used_bytes, UNIT);
    }

    #[tokio::test]
    async fn commit_replaces_previous_entry() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(&settings(&dir, 2 * UNIT)).await.unwrap();

        let first = put(&store, "m1", &bytes(UNIT, 1)).await;
        let second = put(&store, "m1", &bytes(UNIT / 2, 2)).await;

        assert!(!first.entry.storage_path.exists());
        assert!(second.entry.storage_path.exists());
        assert_eq!(store.stats().used_bytes, UNIT / 2);
        assert_eq!(store.stats().entries, 1);
        let data = store.read("m1", 0, None).await.unwrap().read_to_vec().await.unwrap();
        assert_eq!(data, bytes(UNIT / 2, 2));
    }

    #[tokio::test]
    async fn commit_with_wrong_size_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(&settings(&dir, 2 * UNIT)).await.unwrap();

        let mut handle = store.reserve("m1", 100).await.unwrap();
        handle.writer().write_all(&bytes(50, 1)).await.unwrap();
        assert!(store.commit(handle, 100).await.is_err());
        assert!(!store.is_resident("m1"));
        assert_eq!(store.stats().reserved_bytes, 0);
    }

    #[tokio::test]
    async fn commit_that_cannot_fit_is_discarded() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(&settings(&dir, 2 * UNIT)).await.unwrap();
        put(&store, "a", &bytes(UNIT, 1)).await;
        let _pin = store.pin("a").unwrap();

        // Size hint was too small; the real blob does not fit next to pinned "a".
        let mut handle = store.reserve("b", 10).await.unwrap();
        handle.writer().write_all(&bytes(2 * UNIT, 2)).await.unwrap();
        let result = store.commit(handle, 2 * UNIT).await;

        assert!(matches!(result, Err(CacheError::InsufficientSpace { .. })));
        assert!(!store.is_resident("b"));
        assert!(store.is_resident("a"));
        assert_eq!(store.stats().used_bytes, UNIT);
        let blobs = std::fs::read_dir(dir.path().join("blobs"))
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_type().unwrap().is_file())
            .count();
        assert_eq!(blobs, 1);
    }

    #[tokio::test]
    async fn reopen_rebuilds_index_and_clears_staging() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir, 10 * UNIT);
        {
            let store = CacheStore::open(&settings).await.unwrap();
            put(&store, "a", &bytes(UNIT, 1)).await;
            put(&store, "b", &bytes(2 * UNIT, 2)).await;
            let mut handle = store.reserve("c", UNIT).await.unwrap();
            handle.writer().write_all(&bytes(10, 3)).await.unwrap();
            // Simulate a crash: the staging file survives.
            std::mem::forget(handle);
        }

        let store = CacheStore::open(&settings).await.unwrap();
        let stats = store.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.used_bytes, 3 * UNIT);
        assert_eq!(stats.reserved_bytes, 0);
        assert_eq!(store.entry("b").unwrap().size_bytes, 2 * UNIT);
        assert!(!store.is_resident("c"));
        assert_eq!(
            std::fs::read_dir(&settings.staging_path).unwrap().count(),
            0
        );

        // New blobs do not collide with the rebuilt ones.
        put(&store, "d", &bytes(UNIT, 4)).await;
        assert!(store.is_resident("a"));
        assert!(store.is_resident("d"));
    }

    #[tokio::test]
    async fn open_rejects_staging_equal_to_storage() {
        let dir = TempDir::new().unwrap();
        let good = settings(&dir, 10 * UNIT);
        let committed = {
            let store = CacheStore::open(&good).await.unwrap();
            put(&store, "a", &bytes(UNIT, 1)).await
        };

        let shared = CacheSettings {
            staging_path: good.storage_path.clone(),
            ..good.clone()
        };
        let result = CacheStore::open(&shared).await;
        assert!(
            matches!(result, Err(CacheError::Io(ref e)) if e.kind() == std::io::ErrorKind::InvalidInput)
        );

        // The cached blob survived the rejected open.
        assert!(committed.entry.storage_path.exists());
        let store = CacheStore::open(&good).await.unwrap();
        assert!(store.is_resident("a"));
    }

    #[tokio::test]
    async fn reopen_removes_leftover_copies_in_storage() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir, 10 * UNIT);
        {
            let store = CacheStore::open(&settings).await.unwrap();
            put(&store, "a", &bytes(UNIT, 1)).await;
        }
        let leftover = settings
            .storage_path
            .join(format!("{}.{}", blob_file_name("b", 99), STAGING_EXTENSION));
        std::fs::write(&leftover, bytes(10, 2)).unwrap();

        let store = CacheStore::open(&settings).await.unwrap();
        assert!(!leftover.exists());
        assert_eq!(store.stats().entries, 1);
    }

    #[tokio::test]
    async fn move_into_storage_renames_the_blob() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("staged.part");
        let to = dir.path().join("final.1.blob");
        std::fs::write(&from, bytes(10, 7)).unwrap();

        move_into_storage(&from, &to).await.unwrap();

        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), bytes(10, 7));
        assert!(!to.with_extension(STAGING_EXTENSION).exists());
    }

    #[tokio::test]
    async fn reopen_with_smaller_quota_evicts() {
        let dir = TempDir::new().unwrap();
        {
            let store = CacheStore::open(&settings(&dir, 10 * UNIT)).await.unwrap();
            put(&store, "a", &bytes(UNIT, 1)).await;
            put(&store, "b", &bytes(UNIT, 2)).await;
            put(&store, "c", &bytes(UNIT, 3)).await;
        }

        let store = CacheStore::open(&settings(&dir, 2 * UNIT)).await.unwrap();
        assert_eq!(store.stats().entries, 2);
        assert!(store.stats().used_bytes <= 2 * UNIT);
    }

    #[tokio::test]
    async fn sniffs_content_type() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(&settings(&dir, 10 * UNIT)).await.unwrap();

        // Minimal ISO base media header ("ftyp" box, brand "isom").
        let mut mp4 = vec![0x00, 0x00, 0x00, 0x18];
        mp4.extend_from_slice(b"ftypisom");
        mp4.extend_from_slice(&[0x00, 0x00, 0x02, 0x00]);
        mp4.extend_from_slice(b"isomiso2");
        mp4.resize(512, 0);
        let outcome = put(&store, "m1", &mp4).await;
        assert_eq!(outcome.entry.content_type, "video/mp4");

        let outcome = put(&store, "m2", &bytes(64, 0)).await;
        assert_eq!(outcome.entry.content_type, FALLBACK_CONTENT_TYPE);
    }
}
