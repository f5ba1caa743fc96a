use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};
use tokio::{fs, fs::OpenOptions, io::AsyncWriteExt};

use crate::model::MediaItem;
use crate::Result;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `now|uploaded|likes|is_vid|code` for one item. Appending a batch of these on every
/// run tracks how like counts move over time.
pub fn dump_line(now: &DateTime<Local>, item: &MediaItem) -> String {
    let uploaded = item
        .taken_at
        .and_then(|ts| Local.timestamp_opt(ts, 0).single())
        .map(|date| date.format(DATE_FORMAT).to_string())
        .unwrap_or_else(|| "-".to_string());
    let is_vid = if item.is_video() { "True" } else { "False" };
    format!(
        "{}|{uploaded}|{}|{is_vid}|{}",
        now.format(DATE_FORMAT),
        item.likes,
        item.shortcode
    )
}

/// Appends one line per item, in the given order, to `<out_dir>/<username>.dump`.
pub async fn append_dump(
    out_dir: &Path,
    username: &str,
    items: &[MediaItem],
    now: DateTime<Local>,
) -> Result<PathBuf> {
    fs::create_dir_all(out_dir).await?;
    let path = out_dir.join(format!("{username}.dump"));

    let mut lines = String::new();
    for item in items {
        lines.push_str(&dump_line(&now, item));
        lines.push('\n');
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    file.write_all(lines.as_bytes()).await?;
    file.flush().await?;
    Ok(path)
}
