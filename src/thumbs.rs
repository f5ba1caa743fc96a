use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use tokio::fs;
use tracing::{debug, warn};

use crate::model::{is_safe_key, MediaItem};
use crate::request::{GetOptions, Transport};
use crate::{info_time, Error, Result, THUMB_INTERVAL_MS};

const KNOWN_EXTS: [&str; 4] = ["jpg", "png", "gif", "webp"];

/// Maps a declared content type to a file extension.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    match mime.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Thumbnails of one profile, stored as `<out>/<username>/thumbs/<shortcode>.<ext>`.
#[derive(Debug, Clone)]
pub struct ThumbStore {
    username: String,
    root: PathBuf,
}

impl ThumbStore {
    pub fn new(out_dir: &Path, username: &str) -> Self {
        Self {
            username: username.to_string(),
            root: out_dir.join(username).join("thumbs"),
        }
    }

    /// Stored thumbnail for `key`, whatever its extension.
    pub async fn get(&self, key: &str) -> Option<PathBuf> {
        for ext in KNOWN_EXTS {
            let path = self.path(key, ext).ok()?;
            if fs::try_exists(&path).await.unwrap_or(false) {
                return Some(path);
            }
        }
        None
    }

    pub async fn put(&self, key: &str, ext: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path(key, ext)?;
        fs::create_dir_all(&self.root).await?;
        fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Path of a stored thumbnail as seen from the rendered page in `<out>/`.
    pub fn relative(&self, path: &Path) -> String {
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}/thumbs/{file}", self.username)
    }

    /// Keys become file stems, so only `[A-Za-z0-9_-]` is accepted.
    fn path(&self, key: &str, ext: &str) -> Result<PathBuf> {
        if !is_safe_key(key) {
            return Err(Error::UnsafeKey(key.to_string()));
        }
        Ok(self.root.join(format!("{key}.{ext}")))
    }
}

/// Links every item to its stored thumbnail, downloading the missing ones when
/// `download` is set. Returns how many were downloaded.
pub async fn attach_thumbs(
    transport: &mut Transport,
    store: &ThumbStore,
    items: &mut [MediaItem],
    download: bool,
) -> usize {
    let start_time = Local::now();
    let mut downloaded = 0;

    for item in items.iter_mut() {
        if !is_safe_key(&item.shortcode) {
            if !item.shortcode.is_empty() {
                warn!("Skipping thumbnail of {}: unsafe short-code {:?}", item.id, item.shortcode);
            }
            continue;
        }
        if let Some(path) = store.get(&item.shortcode).await {
            item.local_thumb = Some(store.relative(&path));
            continue;
        }
        if !download || item.thumbnail_url.is_empty() {
            continue;
        }
        match fetch_thumb(transport, store, item).await {
            Ok(Some(path)) => {
                debug!("Stored thumbnail {}", path.display());
                item.local_thumb = Some(store.relative(&path));
                downloaded += 1;
            }
            Ok(None) => {}
            Err(e) => warn!("Couldn't store thumbnail for {}: {e}", item.shortcode),
        }
    }

    if downloaded > 0 {
        info_time!(start_time, "Downloaded {} thumbnails", downloaded);
    }
    downloaded
}

async fn fetch_thumb(
    transport: &mut Transport,
    store: &ThumbStore,
    item: &MediaItem,
) -> Result<Option<PathBuf>> {
    let opts = GetOptions::default()
        .stream()
        .min_interval(Duration::from_millis(THUMB_INTERVAL_MS));
    let Some(fetched) = transport.get(&item.thumbnail_url, opts).await else {
        return Ok(None);
    };
    let content_type = fetched.content_type.unwrap_or_default();
    let ext = extension_for(&content_type)
        .ok_or(Error::UnsupportedContentType(content_type))?;
    store.put(&item.shortcode, ext, &fetched.body).await.map(Some)
}
