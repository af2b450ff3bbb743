use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;

use crate::decode::{AvatarImage, ImageCrateDecoder, ImageDecoder};
use crate::digest::Digest;
use crate::{GravatarError, Result};

/// Where resolved avatars are kept between identity changes.
///
/// One cache may back many views at once, so implementations synchronize
/// internally. Writing the same digest twice is harmless: a digest always
/// names the same image.
pub trait ImageCache: Send + Sync {
    fn get(&self, digest: &Digest) -> Option<AvatarImage>;

    fn put(&self, digest: &Digest, image: &AvatarImage) -> Result<()>;

    fn contains(&self, digest: &Digest) -> bool {
        self.get(digest).is_some()
    }
}

/// In-memory LRU bounded by the total encoded size of its images.
struct MemoryLru {
    /// Label for logging
    label: String,
    entries: LruCache<Digest, AvatarImage>,
    current_memory_bytes: usize,
    max_memory_bytes: usize,
}

impl MemoryLru {
    fn new(label: &str, max_memory_bytes: usize) -> Result<Self> {
        if max_memory_bytes == 0 {
            return Err(GravatarError::Storage(
                label.to_owned(),
                "Capacity can't be zero".to_owned(),
            ));
        }

        log::debug!(
            "cache/{}: initialized with {} bytes limit",
            label,
            max_memory_bytes
        );
        Ok(Self {
            label: label.to_owned(),
            entries: LruCache::unbounded(),
            current_memory_bytes: 0,
            max_memory_bytes,
        })
    }

    fn get(&mut self, digest: &Digest) -> Option<AvatarImage> {
        self.entries.get(digest).cloned()
    }

    fn contains(&self, digest: &Digest) -> bool {
        self.entries.contains(digest)
    }

    /// Adds a value, evicting least recently used entries until it fits.
    /// Values larger than the whole budget are not kept in memory.
    fn insert(&mut self, digest: &Digest, image: &AvatarImage) {
        let size = image.byte_len();
        if size > self.max_memory_bytes {
            log::warn!(
                "cache/{}: value size {} exceeds limit {}",
                self.label,
                size,
                self.max_memory_bytes
            );
            return;
        }

        if let Some(previous) = self.entries.pop(digest) {
            self.current_memory_bytes -= previous.byte_len();
        }

        while self.current_memory_bytes + size > self.max_memory_bytes {
            match self.entries.pop_lru() {
                Some((evicted, old)) => {
                    log::debug!(
                        "cache/{}: evicting {} ({} bytes)",
                        self.label,
                        evicted,
                        old.byte_len()
                    );
                    self.current_memory_bytes = self
                        .current_memory_bytes
                        .saturating_sub(old.byte_len());
                }
                None => break,
            }
        }

        self.entries.put(digest.clone(), image.clone());
        self.current_memory_bytes += size;

        log::debug!(
            "cache/{}: added {} bytes, total {}/{}",
            self.label,
            size,
            self.current_memory_bytes,
            self.max_memory_bytes
        );
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.current_memory_bytes = 0;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-local avatar cache; forgets everything on exit.
pub struct MemoryCache {
    inner: Mutex<MemoryLru>,
}

impl MemoryCache {
    pub fn new(max_memory_bytes: usize) -> Result<Self> {
        Ok(Self {
            inner: Mutex::new(MemoryLru::new("memory", max_memory_bytes)?),
        })
    }

    pub fn memory_usage(&self) -> usize {
        lock(&self.inner).current_memory_bytes
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ImageCache for MemoryCache {
    fn get(&self, digest: &Digest) -> Option<AvatarImage> {
        lock(&self.inner).get(digest)
    }

    fn put(&self, digest: &Digest, image: &AvatarImage) -> Result<()> {
        lock(&self.inner).insert(digest, image);
        Ok(())
    }

    fn contains(&self, digest: &Digest) -> bool {
        lock(&self.inner).contains(digest)
    }
}

/// A combined in-memory and disk-based avatar cache.
///
/// Encoded images are written through to one file per digest under
/// `path`; the most recently used ones are also kept decoded in memory.
pub struct DiskCache {
    /// Label for logging
    label: String,
    /// Path to the underlying folder where data is persisted
    path: PathBuf,
    memory: Mutex<MemoryLru>,
    decoder: Arc<dyn ImageDecoder>,
}

impl DiskCache {
    /// Creates a new cache instance.
    ///
    /// # Arguments
    /// * `label` - Identifier used in logs
    /// * `path` - Directory where cache files are stored
    /// * `max_memory_bytes` - Maximum bytes to keep in memory
    /// * `preload_cache` - Whether to pre-load the cache from disk on initialization
    pub fn new(
        label: String,
        path: &Path,
        max_memory_bytes: usize,
        preload_cache: bool,
    ) -> Result<Self> {
        Self::with_decoder(
            label,
            path,
            max_memory_bytes,
            preload_cache,
            Arc::new(ImageCrateDecoder),
        )
    }

    pub fn with_decoder(
        label: String,
        path: &Path,
        max_memory_bytes: usize,
        preload_cache: bool,
        decoder: Arc<dyn ImageDecoder>,
    ) -> Result<Self> {
        Self::validate_path(path, &label)?;

        let cache = Self {
            memory: Mutex::new(MemoryLru::new(&label, max_memory_bytes)?),
            label,
            path: PathBuf::from(path),
            decoder,
        };

        if preload_cache {
            cache.load_fs()?;
        }
        Ok(cache)
    }

    fn validate_path(path: &Path, label: &str) -> Result<()> {
        if !path.exists() {
            return Err(GravatarError::Storage(
                label.to_owned(),
                "Folder does not exist".to_owned(),
            ));
        }

        if !path.is_dir() {
            return Err(GravatarError::Storage(
                label.to_owned(),
                "Path is not a directory".to_owned(),
            ));
        }

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the digests of every avatar persisted on disk.
    pub fn keys(&self) -> Result<impl Iterator<Item = Digest>> {
        let keys: Vec<Digest> = fs::read_dir(&self.path)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| digest_from_path(&entry.path()))
            .collect();

        Ok(keys.into_iter())
    }

    pub fn memory_usage(&self) -> usize {
        lock(&self.memory).current_memory_bytes
    }

    /// Fills memory with the most recently modified files that fit in the
    /// memory limit. Files that don't fit, or don't decode, stay on disk
    /// only.
    fn load_fs(&self) -> Result<()> {
        let mut file_metadata = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let Some(digest) = digest_from_path(&entry.path()) else {
                continue;
            };
            let metadata = entry.metadata()?;
            file_metadata.push((
                digest,
                metadata.len() as usize,
                metadata.modified()?,
            ));
        }

        // Most recent first
        file_metadata.sort_by(|a, b| b.2.cmp(&a.2));

        let mut memory = lock(&self.memory);
        memory.clear();

        let total_bytes: usize =
            file_metadata.iter().map(|(_, size, _)| size).sum();
        let mut loaded_bytes = 0;

        // Insert least recent first so the LRU order matches file age.
        let fitting: Vec<_> = file_metadata
            .into_iter()
            .filter(|(_, size, _)| {
                if loaded_bytes + size <= memory.max_memory_bytes {
                    loaded_bytes += size;
                    true
                } else {
                    false
                }
            })
            .collect();
        for (digest, _, _) in fitting.into_iter().rev() {
            match self.read_from_disk(&digest) {
                Ok(image) => memory.insert(&digest, &image),
                Err(err) => {
                    log::warn!(
                        "cache/{}: failed to load key={}: {}",
                        self.label,
                        digest,
                        err
                    );
                }
            }
        }

        log::debug!(
            "cache/{}: loaded {}/{} bytes in memory",
            self.label,
            memory.current_memory_bytes,
            total_bytes
        );
        Ok(())
    }

    fn file_path(&self, digest: &Digest) -> PathBuf {
        self.path.join(digest.as_str())
    }

    fn read_from_disk(&self, digest: &Digest) -> Result<AvatarImage> {
        let bytes = fs::read(self.file_path(digest))?;
        Ok(self.decoder.decode(&bytes)?)
    }

    /// Writes the encoded image next to its final name, then renames it
    /// into place so readers never observe a partial file.
    fn persist_to_disk(&self, digest: &Digest, image: &AvatarImage) -> Result<()> {
        log::debug!("cache/{}: writing to disk for key {}", self.label, digest);

        // Unique per process and per write; concurrent writers of the same
        // digest never share a temporary file.
        static WRITES: AtomicU64 = AtomicU64::new(0);
        let tmp = self.path.join(format!(
            ".{}.{}.{}.tmp",
            digest,
            std::process::id(),
            WRITES.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, image.encoded())
            .and_then(|_| fs::rename(&tmp, self.file_path(digest)))
            .map_err(|err| {
                let _ = fs::remove_file(&tmp);
                GravatarError::Storage(
                    self.label.clone(),
                    format!("Failed to write value for key {}: {}", digest, err),
                )
            })
    }
}

impl ImageCache for DiskCache {
    fn get(&self, digest: &Digest) -> Option<AvatarImage> {
        if let Some(image) = lock(&self.memory).get(digest) {
            log::debug!(
                "cache/{}: value for key {} retrieved from memory",
                self.label,
                digest
            );
            return Some(image);
        }

        if !self.file_path(digest).exists() {
            log::debug!("cache/{}: no value found for key {}", self.label, digest);
            return None;
        }

        match self.read_from_disk(digest) {
            Ok(image) => {
                log::debug!(
                    "cache/{}: value for key {} retrieved from disk",
                    self.label,
                    digest
                );
                lock(&self.memory).insert(digest, &image);
                Some(image)
            }
            Err(err) => {
                log::error!(
                    "cache/{}: failed to load from disk for key {}: {}",
                    self.label,
                    digest,
                    err
                );
                None
            }
        }
    }

    fn put(&self, digest: &Digest, image: &AvatarImage) -> Result<()> {
        log::debug!("cache/{}: setting value for key {}", self.label, digest);

        // Always written through: an existing file may be truncated.
        self.persist_to_disk(digest, image)?;
        lock(&self.memory).insert(digest, image);
        Ok(())
    }

    fn contains(&self, digest: &Digest) -> bool {
        lock(&self.memory).contains(digest) || self.file_path(digest).exists()
    }
}

/// Cache files are named by their digest; anything else in the folder
/// (temporary files, strays) is ignored.
fn digest_from_path(path: &Path) -> Option<Digest> {
    if !path.is_file() {
        return None;
    }
    let name = path.file_name()?.to_str()?;
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(Digest(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::tests::png_bytes;
    use std::fs::File;
    use std::time::{Duration, SystemTime};
    use tempdir::TempDir;

    fn image(shade: u8) -> AvatarImage {
        ImageCrateDecoder.decode(&png_bytes(shade)).unwrap()
    }

    fn digest(name: &str) -> Digest {
        Digest(name.to_string())
    }

    fn create_temp_dir() -> TempDir {
        TempDir::new("gravatar_cache").expect("Failed to create temporary directory")
    }

    #[test]
    fn memory_put_and_get() {
        let cache = MemoryCache::new(1024 * 1024).unwrap();
        let key = digest("aa");
        assert!(cache.get(&key).is_none());

        cache.put(&key, &image(1)).unwrap();
        assert_eq!(cache.get(&key), Some(image(1)));
        assert!(cache.contains(&key));
    }

    #[test]
    fn memory_put_is_idempotent() {
        let cache = MemoryCache::new(1024 * 1024).unwrap();
        let key = digest("aa");
        cache.put(&key, &image(1)).unwrap();
        let used = cache.memory_usage();

        cache.put(&key, &image(1)).unwrap();
        assert_eq!(cache.memory_usage(), used);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn memory_eviction() {
        let images = [image(1), image(2), image(3)];
        // Room for two images, not three.
        let budget = images.iter().map(AvatarImage::byte_len).max().unwrap() * 2;
        let cache = MemoryCache::new(budget).unwrap();
        cache.put(&digest("a1"), &images[0]).unwrap();
        cache.put(&digest("a2"), &images[1]).unwrap();

        // Touch a1 so a2 becomes least recently used.
        assert!(cache.get(&digest("a1")).is_some());
        cache.put(&digest("a3"), &images[2]).unwrap();

        assert!(cache.contains(&digest("a1")));
        assert!(!cache.contains(&digest("a2")));
        assert!(cache.contains(&digest("a3")));
        assert!(cache.memory_usage() <= budget);
    }

    #[test]
    fn memory_skips_oversized_values() {
        let cache = MemoryCache::new(4).unwrap();
        cache.put(&digest("aa"), &image(1)).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_is_an_error() {
        assert!(matches!(
            MemoryCache::new(0),
            Err(GravatarError::Storage(_, _))
        ));
    }

    #[test]
    fn disk_set_and_get() {
        let temp_dir = create_temp_dir();
        let cache =
            DiskCache::new("test".to_string(), temp_dir.path(), 1024 * 1024, true)
                .unwrap();
        let key = digest("b48def645758b95537d4424c84d1a9ff");

        assert!(!cache.contains(&key));
        cache.put(&key, &image(5)).unwrap();
        assert!(cache.contains(&key));
        assert_eq!(cache.get(&key), Some(image(5)));
        assert_eq!(
            fs::read(temp_dir.path().join(key.as_str())).unwrap(),
            png_bytes(5)
        );
    }

    #[test]
    fn disk_persistence() {
        let temp_dir = create_temp_dir();
        let key = digest("abc123");

        {
            let cache =
                DiskCache::new("test".to_string(), temp_dir.path(), 1024, false)
                    .unwrap();
            cache.put(&key, &image(7)).unwrap();
        }

        let cache =
            DiskCache::new("test".to_string(), temp_dir.path(), 1024, false)
                .unwrap();
        assert_eq!(cache.memory_usage(), 0);
        assert_eq!(cache.get(&key), Some(image(7)));
        assert_eq!(cache.memory_usage(), image(7).byte_len());
    }

    #[test]
    fn disk_oversized_value_still_persists() {
        let temp_dir = create_temp_dir();
        let cache =
            DiskCache::new("test".to_string(), temp_dir.path(), 4, false).unwrap();
        let key = digest("ff");

        cache.put(&key, &image(9)).unwrap();
        assert_eq!(cache.memory_usage(), 0);
        assert_eq!(cache.get(&key), Some(image(9)));
    }

    #[test]
    fn keys_ignore_temporary_and_foreign_files() {
        let temp_dir = create_temp_dir();
        let cache =
            DiskCache::new("test".to_string(), temp_dir.path(), 1024, false)
                .unwrap();
        cache.put(&digest("0a"), &image(1)).unwrap();
        cache.put(&digest("0b"), &image(2)).unwrap();
        fs::write(temp_dir.path().join(".0c.tmp"), b"partial").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"hello").unwrap();

        let mut keys: Vec<_> = cache.keys().unwrap().collect();
        keys.sort();
        assert_eq!(keys, vec![digest("0a"), digest("0b")]);
    }

    #[test]
    fn corrupt_file_is_a_miss() {
        let temp_dir = create_temp_dir();
        fs::write(temp_dir.path().join("dead"), b"not an image").unwrap();
        let cache =
            DiskCache::new("test".to_string(), temp_dir.path(), 1024, true)
                .unwrap();

        assert!(cache.get(&digest("dead")).is_none());
    }

    #[test]
    fn put_replaces_corrupt_file() {
        let temp_dir = create_temp_dir();
        fs::write(temp_dir.path().join("dead"), b"truncated junk").unwrap();
        let cache =
            DiskCache::new("test".to_string(), temp_dir.path(), 1024 * 1024, false)
                .unwrap();
        assert!(cache.get(&digest("dead")).is_none());

        cache.put(&digest("dead"), &image(3)).unwrap();
        assert_eq!(
            fs::read(temp_dir.path().join("dead")).unwrap(),
            image(3).encoded()
        );

        let reopened =
            DiskCache::new("test".to_string(), temp_dir.path(), 1024 * 1024, false)
                .unwrap();
        assert_eq!(reopened.get(&digest("dead")), Some(image(3)));
    }

    #[test]
    fn put_leaves_no_temporary_files() {
        let temp_dir = create_temp_dir();
        let cache =
            DiskCache::new("test".to_string(), temp_dir.path(), 1024 * 1024, false)
                .unwrap();
        cache.put(&digest("beef"), &image(1)).unwrap();
        cache.put(&digest("beef"), &image(1)).unwrap();

        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("beef")]);
    }

    #[test]
    fn preload_prefers_recent_files() {
        let temp_dir = create_temp_dir();
        let old = png_bytes(1);
        let new = png_bytes(2);

        for (name, data, time) in [
            ("01d", &old, SystemTime::now() - Duration::from_secs(100)),
            ("0e0", &new, SystemTime::now()),
        ] {
            let path = temp_dir.path().join(name);
            fs::write(&path, data).unwrap();
            let file = File::options().write(true).open(&path).unwrap();
            file.set_modified(time).unwrap();
            file.sync_all().unwrap();
        }

        // Room for only one of them.
        let cache =
            DiskCache::new("test".to_string(), temp_dir.path(), new.len(), true)
                .unwrap();

        let memory = lock(&cache.memory);
        assert!(memory.contains(&digest("0e0")));
        assert!(!memory.contains(&digest("01d")));
    }

    #[test]
    fn missing_folder_is_rejected() {
        let temp_dir = create_temp_dir();
        let missing = temp_dir.path().join("nope");
        assert!(matches!(
            DiskCache::new("test".to_string(), &missing, 1024, false),
            Err(GravatarError::Storage(_, _))
        ));
    }

    #[test]
    fn shared_between_threads() {
        use std::thread;

        let cache = Arc::new(MemoryCache::new(1024 * 1024).unwrap());
        let key = digest("abcd");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let key = key.clone();
                thread::spawn(move || cache.put(&key, &image(3)).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().expect("Thread panicked");
        }

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key), Some(image(3)));
    }
}
