use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot of one remote account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub full_name: String,
    pub biography: String,
    pub followers: u64,
    pub avatar_url: Option<String>,
}

impl Profile {
    /// Builds a profile out of a `user` object. Every field is optional.
    pub fn from_user(user: &Value) -> Self {
        Self {
            id: str_at(user, &["id"]).unwrap_or_default(),
            username: str_at(user, &["username"]).unwrap_or_default(),
            full_name: str_at(user, &["full_name"]).unwrap_or_default(),
            biography: str_at(user, &["biography"]).unwrap_or_default(),
            followers: u64_at(user, &["edge_followed_by", "count"]).unwrap_or(0),
            avatar_url: str_at(user, &["profile_pic_url_hd"])
                .or_else(|| str_at(user, &["profile_pic_url"])),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Image,
    Video,
}

/// One post of a profile's timeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub shortcode: String,
    pub display_url: String,
    pub thumbnail_url: String,
    pub kind: MediaKind,
    pub likes: u64,
    pub comments: u64,
    pub captions: Vec<String>,
    /// Seconds since the epoch.
    pub taken_at: Option<i64>,
    pub location: Option<String>,
    /// Path of the downloaded thumbnail, relative to the rendered page.
    pub local_thumb: Option<String>,
}

impl MediaItem {
    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    /// Capture date in local time, or `-` when the record carries none.
    pub fn date_label(&self) -> String {
        self.taken_at
            .and_then(|ts| Local.timestamp_opt(ts, 0).single())
            .map(|date| date.format("%b %d, %y").to_string())
            .unwrap_or_else(|| "-".to_string())
    }

    pub fn caption(&self) -> String {
        self.captions.join("\n")
    }
}

/// Fills a `MediaItem` from a timeline `node`, field by field.
/// A missing or mistyped field falls back to its default instead of failing the record.
#[derive(Debug, Default)]
pub struct MediaItemBuilder {
    item: MediaItem,
}

impl MediaItemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_node(node: &Value) -> MediaItem {
        let mut builder = Self::new()
            .id(str_at(node, &["id"]))
            .shortcode(str_at(node, &["shortcode"]).or_else(|| str_at(node, &["code"])))
            .display_url(str_at(node, &["display_url"]).or_else(|| str_at(node, &["display_src"])))
            .video(node.get("is_video").and_then(Value::as_bool).unwrap_or(false))
            .likes(
                u64_at(node, &["edge_liked_by", "count"])
                    .or_else(|| u64_at(node, &["edge_media_preview_like", "count"]))
                    .or_else(|| u64_at(node, &["likes", "count"])),
            )
            .comments(
                u64_at(node, &["edge_media_to_comment", "count"])
                    .or_else(|| u64_at(node, &["comments", "count"])),
            )
            .captions(captions_of(node))
            .taken_at(
                node.get("taken_at_timestamp")
                    .or_else(|| node.get("date"))
                    .and_then(Value::as_i64),
            )
            .location(str_at(node, &["location", "name"]));

        let thumb = str_at(node, &["thumbnail_src"]).or_else(|| {
            node.get("thumbnail_resources")
                .and_then(Value::as_array)
                .and_then(|resources| resources.last())
                .and_then(|res| str_at(res, &["src"]))
        });
        builder = builder.thumbnail_url(thumb);
        builder.build()
    }

    pub fn id(mut self, id: Option<String>) -> Self {
        self.item.id = id.unwrap_or_default();
        self
    }

    pub fn shortcode(mut self, shortcode: Option<String>) -> Self {
        self.item.shortcode = shortcode.unwrap_or_default();
        self
    }

    pub fn display_url(mut self, url: Option<String>) -> Self {
        self.item.display_url = url.unwrap_or_default();
        self
    }

    pub fn thumbnail_url(mut self, url: Option<String>) -> Self {
        self.item.thumbnail_url = url.unwrap_or_default();
        self
    }

    pub fn video(mut self, is_video: bool) -> Self {
        self.item.kind = if is_video {
            MediaKind::Video
        } else {
            MediaKind::Image
        };
        self
    }

    pub fn likes(mut self, likes: Option<u64>) -> Self {
        self.item.likes = likes.unwrap_or(0);
        self
    }

    pub fn comments(mut self, comments: Option<u64>) -> Self {
        self.item.comments = comments.unwrap_or(0);
        self
    }

    pub fn captions(mut self, captions: Vec<String>) -> Self {
        self.item.captions = captions;
        self
    }

    pub fn taken_at(mut self, taken_at: Option<i64>) -> Self {
        self.item.taken_at = taken_at;
        self
    }

    pub fn location(mut self, location: Option<String>) -> Self {
        self.item.location = location;
        self
    }

    pub fn build(mut self) -> MediaItem {
        if self.item.thumbnail_url.is_empty() {
            self.item.thumbnail_url = self.item.display_url.clone();
        }
        self.item
    }
}

/// Whether a short-code can be used as a file stem: ASCII letters, digits, `_` and `-`.
pub fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Orders by likes, most liked first. Ties are broken on the identifier so the
/// ordering never depends on the input order.
pub fn sort_by_popularity(items: &mut [MediaItem]) {
    items.sort_by(|a, b| b.likes.cmp(&a.likes).then_with(|| a.id.cmp(&b.id)));
}

/// Flattens `edge_media_to_caption.edges[].node.text` into plain strings.
fn captions_of(node: &Value) -> Vec<String> {
    let Some(edges) = node
        .pointer("/edge_media_to_caption/edges")
        .and_then(Value::as_array)
    else {
        // Older records keep the caption as a plain string.
        return str_at(node, &["caption"]).into_iter().collect();
    };
    edges
        .iter()
        .filter_map(|edge| str_at(edge, &["node", "text"]))
        .collect()
}

fn str_at(value: &Value, path: &[&str]) -> Option<String> {
    walk(value, path)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn u64_at(value: &Value, path: &[&str]) -> Option<u64> {
    walk(value, path).and_then(Value::as_u64)
}

fn walk<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(key))
}
