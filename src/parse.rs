use scraper::{Html, Selector};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::model::Profile;
use crate::{Error, Result, SHARED_DATA_MARKER};

/// A response body, tagged by the shape it arrives in.
#[derive(Debug, Clone)]
pub enum RawPayload {
    /// A profile document with the user object embedded in a `<script>`.
    HtmlEmbedded(String),
    /// A `{"data":{"user":...}}` document from the query endpoint.
    GraphJson(Value),
}

/// One decoded batch of timeline items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Raw `node` records, in feed order.
    pub items: Vec<Value>,
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
    /// Total number of items of the profile. Only read on the first page.
    pub total_count: Option<u64>,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("embedded data marker `{0}` not found")]
    MarkerNotFound(&'static str),
    #[error("missing key `{0}`")]
    MissingKey(String),
    #[error("`{key}` is not {expected}")]
    WrongType { key: String, expected: &'static str },
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Selector(#[from] Error),
}

type DecodeResult<T> = core::result::Result<T, DecodeError>;

const HTML_USER_PATH: &[&str] = &["entry_data", "ProfilePage", "0", "graphql", "user"];
const GRAPH_USER_PATH: &[&str] = &["data", "user"];
const TIMELINE_KEY: &str = "edge_owner_to_timeline_media";

/// Decodes a payload into a [`Page`]. A payload missing any expected key is logged
/// and yields `None`.
pub fn decode(payload: &RawPayload, is_first_page: bool) -> Option<Page> {
    decode_payload(payload, is_first_page)
        .inspect_err(|e| warn!("Couldn't decode page: {e}"))
        .ok()
        .map(|(_, page)| page)
}

/// Decodes a profile document into the profile snapshot and its first page.
pub fn decode_profile(payload: &RawPayload) -> Option<(Profile, Page)> {
    decode_payload(payload, true)
        .inspect_err(|e| warn!("Couldn't decode profile document: {e}"))
        .ok()
}

/// Finds the `<script>` carrying the embedded JSON and parses it.
pub fn extract_shared_data(html: &str) -> DecodeResult<Value> {
    let doc = Html::parse_document(html);
    let script_selector = create_selector("script")?;

    let text = doc
        .select(&script_selector)
        .map(|script| script.text().collect::<String>())
        .find_map(|text| {
            text.trim_start()
                .strip_prefix(SHARED_DATA_MARKER)
                .map(str::to_string)
        })
        .ok_or(DecodeError::MarkerNotFound(SHARED_DATA_MARKER))?;

    let json = text.trim().trim_end_matches(';');
    Ok(serde_json::from_str(json)?)
}

/// Locates the user object for the payload's shape, then reads it and its timeline.
fn decode_payload(payload: &RawPayload, is_first_page: bool) -> DecodeResult<(Profile, Page)> {
    let extracted;
    let (data, user_path) = match payload {
        RawPayload::HtmlEmbedded(html) => {
            extracted = extract_shared_data(html)?;
            (&extracted, HTML_USER_PATH)
        }
        RawPayload::GraphJson(json) => (json, GRAPH_USER_PATH),
    };
    let user = traverse(data, user_path)?;
    let page = decode_timeline(user, is_first_page)?;
    Ok((Profile::from_user(user), page))
}

fn decode_timeline(user: &Value, is_first_page: bool) -> DecodeResult<Page> {
    let media = traverse(user, &[TIMELINE_KEY])?;
    let page_info = traverse(media, &["page_info"])?;

    let has_next_page = traverse(page_info, &["has_next_page"])?
        .as_bool()
        .ok_or_else(|| wrong_type("page_info.has_next_page", "a bool"))?;
    let end_cursor = page_info
        .get("end_cursor")
        .and_then(Value::as_str)
        .filter(|cursor| !cursor.is_empty())
        .map(str::to_string);

    let edges = traverse(media, &["edges"])?
        .as_array()
        .ok_or_else(|| wrong_type("edges", "an array"))?;
    // Each record is wrapped one level deep, edges without a node carry nothing.
    let items = edges
        .iter()
        .filter_map(|edge| edge.get("node").cloned())
        .collect();

    let total_count = if is_first_page {
        media.get("count").and_then(Value::as_u64)
    } else {
        None
    };

    Ok(Page {
        items,
        has_next_page,
        end_cursor,
        total_count,
    })
}

/// Walks `path` one key at a time. Numeric keys also index into arrays.
fn traverse<'a>(value: &'a Value, path: &[&str]) -> DecodeResult<&'a Value> {
    let mut current = value;
    for (depth, key) in path.iter().enumerate() {
        let next = match current {
            Value::Array(arr) => key.parse::<usize>().ok().and_then(|idx| arr.get(idx)),
            _ => current.get(key),
        };
        current = next
            .filter(|v| !v.is_null())
            .ok_or_else(|| DecodeError::MissingKey(path[..=depth].join(".")))?;
    }
    Ok(current)
}

fn wrong_type(key: &str, expected: &'static str) -> DecodeError {
    DecodeError::WrongType {
        key: key.to_string(),
        expected,
    }
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::InvalidSelector(sel_str.into()))
}
