//! Content-addressed artifact cache. Outlines and rendered slide images are
//! stored under keys derived from everything that influences the artifact, so
//! a key hit is always safe to reuse. Writes go through a temp file and an
//! atomic rename; concurrent producers of the same key are serialized by a
//! per-key lock so the second producer sees the first one's entry.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Derive a cache key from the parts that determine an artifact's content.
/// Same parts in the same order always give the same key.
pub fn compute_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join("||").as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactClass {
    Outline,
    Image,
}

impl ArtifactClass {
    fn dir(&self) -> &'static str {
        match self {
            ArtifactClass::Outline => "outlines",
            ArtifactClass::Image => "images",
        }
    }
}

/// On-disk envelope for a cached artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub class: ArtifactClass,
    pub created_at: DateTime<Utc>,
    pub payload: T,
}

/// Metadata stored next to an image payload. `style_text` carries the style
/// report returned alongside the first slide so an anchor can be re-derived
/// on a later cache hit without another provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub prompt: String,
    pub model_id: String,
    pub media_type: String,
    pub style_text: Option<String>,
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt cache entry {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("cache integrity violation: requested {requested}, stored {stored}")]
    Integrity { requested: String, stored: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub outline_count: usize,
    pub image_count: usize,
    pub outline_bytes: u64,
    pub image_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictOutcome {
    pub removed: usize,
    pub bytes_freed: u64,
}

/// Durable store rooted at a directory, with `outlines/` and `images/`
/// subdirectories. Entries older than the TTL are treated as misses.
pub struct CacheStore {
    root: PathBuf,
    ttl: Option<chrono::Duration>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>, ttl: Option<std::time::Duration>) -> Result<Self, CacheError> {
        let root = root.into();
        std::fs::create_dir_all(root.join(ArtifactClass::Outline.dir()))?;
        std::fs::create_dir_all(root.join(ArtifactClass::Image.dir()))?;
        let ttl = ttl.and_then(|d| chrono::Duration::from_std(d).ok());
        Ok(Self {
            root,
            ttl,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Per-key lock for single-flight production. Callers hold the guard
    /// across the miss-check and the write.
    pub async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn envelope_path(&self, class: ArtifactClass, key: &str) -> PathBuf {
        self.root.join(class.dir()).join(format!("{key}.json"))
    }

    fn payload_path(&self, key: &str, media_type: &str) -> PathBuf {
        self.root
            .join(ArtifactClass::Image.dir())
            .join(format!("{key}.{}", ext_from(media_type)))
    }

    fn is_expired(&self, created_at: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => Utc::now() - created_at >= ttl,
            None => false,
        }
    }

    async fn read_entry<T: DeserializeOwned>(
        &self,
        class: ArtifactClass,
        key: &str,
    ) -> Result<Option<CacheEntry<T>>, CacheError> {
        let path = self.envelope_path(class, key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: CacheEntry<T> =
            serde_json::from_slice(&raw).map_err(|e| CacheError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        if entry.key != key {
            return Err(CacheError::Integrity {
                requested: key.to_string(),
                stored: entry.key,
            });
        }
        if self.is_expired(entry.created_at) {
            tracing::debug!(key, "cache entry expired, treating as miss");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
        let dir = path.parent().unwrap_or(&self.root);
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    pub async fn get_outline<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        Ok(self
            .read_entry::<T>(ArtifactClass::Outline, key)
            .await?
            .map(|entry| entry.payload))
    }

    /// Store an outline. Re-putting an identical payload is a no-op that
    /// preserves the original timestamp; a different payload under the same
    /// key overwrites with a warning.
    pub async fn put_outline<T: Serialize + DeserializeOwned>(
        &self,
        key: &str,
        payload: &T,
    ) -> Result<(), CacheError> {
        let new_json = serde_json::to_value(payload)?;
        if let Some(existing) = self
            .read_entry::<serde_json::Value>(ArtifactClass::Outline, key)
            .await?
        {
            if existing.payload == new_json {
                return Ok(());
            }
            tracing::warn!(key, "overwriting outline cache entry with different payload");
        }
        let entry = CacheEntry {
            key: key.to_string(),
            class: ArtifactClass::Outline,
            created_at: Utc::now(),
            payload: new_json,
        };
        let bytes = serde_json::to_vec_pretty(&entry)?;
        self.write_atomic(&self.envelope_path(ArtifactClass::Outline, key), &bytes)
    }

    /// Look up a rendered image. Returns the payload path and its metadata.
    pub async fn get_image(&self, key: &str) -> Result<Option<(PathBuf, ImageMeta)>, CacheError> {
        let entry = match self.read_entry::<ImageMeta>(ArtifactClass::Image, key).await? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let path = self.payload_path(key, &entry.payload.media_type);
        if !path.exists() {
            return Err(CacheError::Corrupt {
                key: key.to_string(),
                reason: format!("envelope present but payload {} missing", path.display()),
            });
        }
        Ok(Some((path, entry.payload)))
    }

    /// Store an image payload plus metadata. The payload lands first so a
    /// visible envelope always points at existing bytes. Re-putting identical
    /// bytes is a no-op.
    pub async fn put_image(
        &self,
        key: &str,
        bytes: &[u8],
        meta: ImageMeta,
    ) -> Result<PathBuf, CacheError> {
        let payload_path = self.payload_path(key, &meta.media_type);
        if let Some((existing_path, existing_meta)) = self.get_image(key).await? {
            let existing_bytes = tokio::fs::read(&existing_path).await?;
            if existing_bytes == bytes && existing_meta == meta {
                return Ok(existing_path);
            }
            tracing::warn!(key, "overwriting image cache entry with different payload");
        }
        self.write_atomic(&payload_path, bytes)?;
        let entry = CacheEntry {
            key: key.to_string(),
            class: ArtifactClass::Image,
            created_at: Utc::now(),
            payload: meta,
        };
        let envelope = serde_json::to_vec_pretty(&entry)?;
        self.write_atomic(&self.envelope_path(ArtifactClass::Image, key), &envelope)?;
        Ok(payload_path)
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();
        for entry in std::fs::read_dir(self.root.join(ArtifactClass::Outline.dir()))? {
            let entry = entry?;
            if entry.path().extension().is_some_and(|e| e == "json") {
                stats.outline_count += 1;
            }
            stats.outline_bytes += entry.metadata()?.len();
        }
        for entry in std::fs::read_dir(self.root.join(ArtifactClass::Image.dir()))? {
            let entry = entry?;
            if entry.path().extension().is_some_and(|e| e == "json") {
                stats.image_count += 1;
            }
            stats.image_bytes += entry.metadata()?.len();
        }
        Ok(stats)
    }

    /// Remove entries older than `older_than`. Keys currently being produced
    /// (their single-flight lock is held) are skipped and picked up by a
    /// later pass.
    pub async fn evict(&self, older_than: std::time::Duration) -> Result<EvictOutcome, CacheError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .unwrap_or_else(|_| chrono::Duration::hours(0));
        let mut outcome = EvictOutcome::default();

        for class in [ArtifactClass::Outline, ArtifactClass::Image] {
            let dir = self.root.join(class.dir());
            let mut listing = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = listing.next_entry().await? {
                let path = entry.path();
                if !path.extension().is_some_and(|e| e == "json") {
                    continue;
                }
                let raw = tokio::fs::read(&path).await?;
                let parsed: CacheEntry<serde_json::Value> = match serde_json::from_slice(&raw) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable cache envelope");
                        continue;
                    }
                };
                if parsed.created_at >= cutoff {
                    continue;
                }
                let _guard: OwnedMutexGuard<()> =
                    match self.key_lock(&parsed.key).await.try_lock_owned() {
                        Ok(guard) => guard,
                        Err(_) => {
                            tracing::debug!(key = %parsed.key, "key in flight, skipping eviction");
                            continue;
                        }
                    };
                outcome.bytes_freed += entry.metadata().await?.len();
                if class == ArtifactClass::Image {
                    if let Ok(meta) = serde_json::from_value::<ImageMeta>(parsed.payload.clone()) {
                        let payload = self.payload_path(&parsed.key, &meta.media_type);
                        if let Ok(md) = tokio::fs::metadata(&payload).await {
                            outcome.bytes_freed += md.len();
                            tokio::fs::remove_file(&payload).await?;
                        }
                    }
                }
                tokio::fs::remove_file(&path).await?;
                outcome.removed += 1;
            }
        }
        tracing::info!(
            removed = outcome.removed,
            bytes_freed = outcome.bytes_freed,
            "cache eviction complete"
        );
        Ok(outcome)
    }
}

fn ext_from(media_type: &str) -> &'static str {
    match media_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ttl: Option<std::time::Duration>) -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache"), ttl).unwrap();
        (dir, store)
    }

    fn meta() -> ImageMeta {
        ImageMeta {
            prompt: "a slide".into(),
            model_id: "model-x".into(),
            media_type: "image/png".into(),
            style_text: Some("{\"palette\":[\"#112233\"]}".into()),
        }
    }

    #[test]
    fn test_compute_key_stable_and_distinct() {
        let a = compute_key(&["alpha", "beta"]);
        let b = compute_key(&["alpha", "beta"]);
        let c = compute_key(&["alpha", "gamma"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn test_outline_roundtrip() {
        let (_dir, store) = store(None);
        let key = compute_key(&["doc", "style"]);
        assert!(store.get_outline::<serde_json::Value>(&key).await.unwrap().is_none());
        let payload = serde_json::json!({"slides": [{"title": "Intro"}]});
        store.put_outline(&key, &payload).await.unwrap();
        let got: serde_json::Value = store.get_outline(&key).await.unwrap().unwrap();
        assert_eq!(got, payload);
    }

    #[tokio::test]
    async fn test_integrity_violation_detected() {
        let (_dir, store) = store(None);
        store
            .put_outline("aaaabbbbccccdddd", &serde_json::json!({"x": 1}))
            .await
            .unwrap();
        // Rename the envelope so the stored key no longer matches.
        let from = store.envelope_path(ArtifactClass::Outline, "aaaabbbbccccdddd");
        let to = store.envelope_path(ArtifactClass::Outline, "eeeeffff00001111");
        std::fs::rename(from, to).unwrap();
        let err = store
            .get_outline::<serde_json::Value>("eeeeffff00001111")
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Integrity { .. }));
    }

    #[tokio::test]
    async fn test_image_roundtrip_and_idempotent_put() {
        let (_dir, store) = store(None);
        let key = compute_key(&["slide0"]);
        let path1 = store.put_image(&key, b"pngbytes", meta()).await.unwrap();
        let before = std::fs::metadata(&path1).unwrap().modified().unwrap();
        let path2 = store.put_image(&key, b"pngbytes", meta()).await.unwrap();
        assert_eq!(path1, path2);
        let after = std::fs::metadata(&path2).unwrap().modified().unwrap();
        assert_eq!(before, after);
        let (path, got) = store.get_image(&key).await.unwrap().unwrap();
        assert_eq!(path, path1);
        assert_eq!(got, meta());
    }

    #[tokio::test]
    async fn test_put_overwrites_different_payload() {
        let (_dir, store) = store(None);
        let key = compute_key(&["slide1"]);
        store.put_image(&key, b"first", meta()).await.unwrap();
        let path = store.put_image(&key, b"second", meta()).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_zero_ttl_expires_everything() {
        let (_dir, store) = store(Some(std::time::Duration::ZERO));
        let key = compute_key(&["ephemeral"]);
        store
            .put_outline(&key, &serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert!(store.get_outline::<serde_json::Value>(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_counts_entries() {
        let (_dir, store) = store(None);
        store
            .put_outline(&compute_key(&["o1"]), &serde_json::json!({"a": 1}))
            .await
            .unwrap();
        store
            .put_image(&compute_key(&["i1"]), b"img", meta())
            .await
            .unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.outline_count, 1);
        assert_eq!(stats.image_count, 1);
        assert!(stats.outline_bytes > 0);
        assert!(stats.image_bytes > 0);
    }

    #[tokio::test]
    async fn test_evict_removes_old_and_skips_locked() {
        let (_dir, store) = store(None);
        let old_key = compute_key(&["old"]);
        let busy_key = compute_key(&["busy"]);
        store
            .put_outline(&old_key, &serde_json::json!({"v": 1}))
            .await
            .unwrap();
        store
            .put_outline(&busy_key, &serde_json::json!({"v": 2}))
            .await
            .unwrap();

        let lock = store.key_lock(&busy_key).await;
        let _held = lock.lock().await;

        let outcome = store.evict(std::time::Duration::ZERO).await.unwrap();
        assert_eq!(outcome.removed, 1);
        assert!(outcome.bytes_freed > 0);
        assert!(store
            .get_outline::<serde_json::Value>(&busy_key)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get_outline::<serde_json::Value>(&old_key)
            .await
            .unwrap()
            .is_none());
    }
}
