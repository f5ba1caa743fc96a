use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::model::{is_safe_key, MediaItem, Profile};
use crate::paginate::ItemSink;
use crate::Result;

const EXT: &str = "json";
const PROFILE_FILE: &str = "profile.json";
/// File stem used for records without a usable short-code.
const NO_SHORTCODE: &str = "_";

/// Raw records on disk, one directory per profile: `<root>/<username>/m_<shortcode>.json`.
///
/// A file existing for a short-code means the record has been fetched, whatever its age.
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn profile_dir(&self, username: &str) -> PathBuf {
        self.root.join(username)
    }

    /// Short-codes that aren't plain `[A-Za-z0-9_-]` fall back to the sentinel stem.
    pub fn item_path(&self, username: &str, shortcode: Option<&str>) -> PathBuf {
        let stem = shortcode.filter(|s| is_safe_key(s)).unwrap_or(NO_SHORTCODE);
        self.profile_dir(username).join(format!("m_{stem}.{EXT}"))
    }

    pub async fn contains(&self, username: &str, shortcode: Option<&str>) -> bool {
        fs::try_exists(self.item_path(username, shortcode))
            .await
            .unwrap_or(false)
    }

    /// Writes one raw record, creating the profile directory if needed.
    pub async fn put(
        &self,
        username: &str,
        shortcode: Option<&str>,
        record: &Value,
    ) -> Result<PathBuf> {
        if let Some(code) = shortcode.filter(|s| !s.is_empty() && !is_safe_key(s)) {
            warn!("Short-code {code:?} isn't a safe file name, caching under `{NO_SHORTCODE}`");
        }
        let path = self.item_path(username, shortcode);
        write_json(&path, record).await?;
        debug!("Cached {}", path.display());
        Ok(path)
    }

    /// Reads every cached record of a profile. Entries that can't be read or parsed are
    /// logged and skipped, a missing directory is an empty cache.
    pub async fn get_all(&self, username: &str) -> Vec<Value> {
        let dir = self.profile_dir(username);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                info!("No cache for {username} at {}: {e}", dir.display());
                return Vec::new();
            }
        };

        let mut paths = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if is_item_file(&path) {
                        paths.push(path);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Stopped listing {}: {e}", dir.display());
                    break;
                }
            }
        }
        // Directory order is platform dependent.
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            match read_json(&path).await {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable cache entry {}: {e}", path.display()),
            }
        }
        records
    }

    pub async fn has_profile(&self, username: &str) -> bool {
        fs::try_exists(self.profile_dir(username).join(PROFILE_FILE))
            .await
            .unwrap_or(false)
    }

    pub async fn put_profile(&self, username: &str, profile: &Profile) -> Result<()> {
        let value = serde_json::to_value(profile)?;
        write_json(&self.profile_dir(username).join(PROFILE_FILE), &value).await
    }

    /// The stored profile snapshot, `None` when missing or corrupt.
    pub async fn get_profile(&self, username: &str) -> Option<Profile> {
        let path = self.profile_dir(username).join(PROFILE_FILE);
        let profile = read_json(&path)
            .await
            .and_then(|value| Ok(serde_json::from_value::<Profile>(value)?));
        match profile {
            Ok(profile) => Some(profile),
            Err(crate::Error::Io(e)) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Couldn't load cached profile {}: {e}", path.display());
                None
            }
        }
    }
}

/// Writes records through to the cache while a walk is running. Records already
/// cached are left alone unless `overwrite` is set.
pub struct CacheWriter<'a> {
    cache: &'a Cache,
    username: &'a str,
    overwrite: bool,
    pub written: usize,
    pub skipped: usize,
}

impl<'a> CacheWriter<'a> {
    pub fn new(cache: &'a Cache, username: &'a str, overwrite: bool) -> Self {
        Self {
            cache,
            username,
            overwrite,
            written: 0,
            skipped: 0,
        }
    }
}

impl ItemSink for CacheWriter<'_> {
    async fn accept(&mut self, raw: &Value, item: &MediaItem) {
        let shortcode = Some(item.shortcode.as_str()).filter(|s| !s.is_empty());
        if !self.overwrite && self.cache.contains(self.username, shortcode).await {
            self.skipped += 1;
            return;
        }
        match self.cache.put(self.username, shortcode, raw).await {
            Ok(_) => self.written += 1,
            Err(e) => warn!("Couldn't cache {}: {e}", item.id),
        }
    }
}

fn is_item_file(path: &Path) -> bool {
    let is_json = path.extension().is_some_and(|ext| ext == EXT);
    let is_item = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("m_"));
    is_json && is_item
}

async fn write_json(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, serde_json::to_vec(value)?).await?;
    Ok(())
}

async fn read_json(path: &Path) -> Result<Value> {
    let bytes = fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
