//! Cover art lookup and caching.
//!
//! Art is extracted from the media files' embedded tags on first request,
//! written to the artwork directory, and indexed in the store. Repeat
//! requests are served from the cache (with a `last_used_at` touch); the
//! size cap is enforced by opportunistic LRU eviction off the request path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use lofty::prelude::TaggedFileExt;
use lofty::probe::Probe;

use crate::store::{ArtworkEntry, Store};
use crate::utils::{artwork_key_for_album, artwork_key_for_file, now_millis};

/// A servable cover image.
#[derive(Debug, Clone)]
pub struct CoverImage {
    /// Raw image bytes.
    pub bytes: Bytes,
    /// Sniffed content type.
    pub content_type: &'static str,
}

/// Sniffs the content type of image bytes; JPEG when unsure (every client
/// renders it).
fn sniff_content_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else {
        "image/jpeg"
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/gif" => "gif",
        _ => "jpg",
    }
}

/// Serves and fills the artwork cache.
pub struct ArtworkService {
    store: Store,
    dir: PathBuf,
    cap_bytes: u64,
}

impl ArtworkService {
    /// Creates the service over the configured artwork directory.
    pub fn new(store: Store, dir: PathBuf, cap_bytes: u64) -> Self {
        Self {
            store,
            dir,
            cap_bytes,
        }
    }

    /// Cover for a specific media file: cache hit or embedded-tag extraction.
    pub async fn cover_for_file(self: &Arc<Self>, media_path: &str) -> Option<CoverImage> {
        let key = artwork_key_for_file(media_path);
        if let Some(image) = self.serve_cached(&key).await {
            return Some(image);
        }

        // Extraction parses the whole tag block; keep it off the runtime.
        let path = media_path.to_string();
        let extracted = tokio::task::spawn_blocking(move || extract_embedded(Path::new(&path)))
            .await
            .ok()??;

        let content_type = sniff_content_type(&extracted);
        let file_name = format!("{}.{}", key, extension_for(content_type));
        let local_path = self.dir.join(&file_name);
        if let Err(e) = tokio::fs::write(&local_path, &extracted).await {
            log::warn!("[Artwork] Cache write failed: {}", e);
            // Still serve what we extracted.
            return Some(CoverImage {
                bytes: Bytes::from(extracted),
                content_type,
            });
        }

        let entry = ArtworkEntry {
            key: key.clone(),
            artist: String::new(),
            album: String::new(),
            source_uri: Some(media_path.to_string()),
            local_path: local_path.display().to_string(),
            size_bytes: extracted.len() as u64,
            cached_at: now_millis(),
            last_used_at: now_millis(),
        };
        if let Err(e) = self.store.put_artwork(entry).await {
            log::warn!("[Artwork] Cache index failed: {}", e);
        }
        self.spawn_eviction();

        Some(CoverImage {
            bytes: Bytes::from(extracted),
            content_type,
        })
    }

    /// Cover for an artist/album pair; cache only (no media file to open).
    pub async fn cover_for_album(self: &Arc<Self>, artist: &str, album: &str) -> Option<CoverImage> {
        let key = artwork_key_for_album(artist, album);
        self.serve_cached(&key).await
    }

    /// Cover by raw cache key (what snapshots carry as `artwork_ref`).
    pub async fn cover_for_key(self: &Arc<Self>, key: &str) -> Option<CoverImage> {
        self.serve_cached(key).await
    }

    async fn serve_cached(&self, key: &str) -> Option<CoverImage> {
        let entry = self.store.get_artwork(key.to_string()).await.ok()??;
        match tokio::fs::read(&entry.local_path).await {
            Ok(bytes) => {
                if let Err(e) = self.store.touch_artwork(key.to_string()).await {
                    log::debug!("[Artwork] Touch failed: {}", e);
                }
                let content_type = sniff_content_type(&bytes);
                Some(CoverImage {
                    bytes: Bytes::from(bytes),
                    content_type,
                })
            }
            Err(e) => {
                log::debug!(
                    "[Artwork] Cached file {} unreadable ({}); treating as miss",
                    entry.local_path,
                    e
                );
                None
            }
        }
    }

    /// Runs LRU eviction in the background, never in the client path.
    fn spawn_eviction(self: &Arc<Self>) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            match service.store.evict_artwork_over(service.cap_bytes).await {
                Ok(paths) => {
                    for path in paths {
                        if let Err(e) = tokio::fs::remove_file(&path).await {
                            log::debug!("[Artwork] Evicted file removal failed: {}", e);
                        }
                    }
                }
                Err(e) => log::warn!("[Artwork] Eviction failed: {}", e),
            }
        });
    }
}

/// Reads the first embedded picture out of a media file's tags.
fn extract_embedded(path: &Path) -> Option<Vec<u8>> {
    let tagged = Probe::open(path).ok()?.read().ok()?;
    let tag = tagged.primary_tag().or_else(|| tagged.first_tag())?;
    let picture = tag.pictures().first()?;
    Some(picture.data().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use tempfile::TempDir;

    async fn service() -> (TempDir, Arc<ArtworkService>, Store) {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            db_path: dir.path().join("test.db"),
            tts_dir: dir.path().join("tts"),
            artwork_dir: dir.path().join("artwork"),
            ..StoreConfig::default()
        };
        let store = Store::open(&config).await.unwrap();
        let service = Arc::new(ArtworkService::new(
            store.clone(),
            config.artwork_dir.clone(),
            1024 * 1024,
        ));
        (dir, service, store)
    }

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[tokio::test]
    async fn cached_album_art_is_served_and_touched() {
        let (dir, service, store) = service().await;

        let image_path = dir.path().join("artwork").join("abc.png");
        tokio::fs::create_dir_all(image_path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&image_path, PNG_MAGIC).await.unwrap();

        let key = artwork_key_for_album("Miles Davis", "Kind of Blue");
        store
            .put_artwork(ArtworkEntry {
                key: key.clone(),
                artist: "Miles Davis".to_string(),
                album: "Kind of Blue".to_string(),
                source_uri: None,
                local_path: image_path.display().to_string(),
                size_bytes: PNG_MAGIC.len() as u64,
                cached_at: 1,
                last_used_at: 1,
            })
            .await
            .unwrap();

        let image = service
            .cover_for_album("Miles Davis", "Kind of Blue")
            .await
            .unwrap();
        assert_eq!(image.content_type, "image/png");

        let touched = store.get_artwork(key).await.unwrap().unwrap();
        assert!(touched.last_used_at > 1);
    }

    #[tokio::test]
    async fn uncached_album_art_is_a_miss() {
        let (_dir, service, _store) = service().await;
        assert!(service.cover_for_album("Nobody", "Nothing").await.is_none());
    }

    #[tokio::test]
    async fn non_media_file_yields_no_cover() {
        let (dir, service, _store) = service().await;
        let bogus = dir.path().join("not-audio.mp3");
        tokio::fs::write(&bogus, b"just text").await.unwrap();

        assert!(service
            .cover_for_file(&bogus.display().to_string())
            .await
            .is_none());
    }

    #[test]
    fn content_type_sniffing() {
        assert_eq!(sniff_content_type(PNG_MAGIC), "image/png");
        assert_eq!(sniff_content_type(b"GIF89a"), "image/gif");
        assert_eq!(sniff_content_type(&[0xFF, 0xD8, 0xFF]), "image/jpeg");
    }
}
