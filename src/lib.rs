//! Fetches a profile's media feed page by page, caches every record on disk,
//! downloads thumbnails and renders a static gallery sorted by likes.

pub mod cache;
pub mod config;
pub mod dump;
mod error;
mod macros;
pub mod model;
pub mod paginate;
pub mod parse;
pub mod process;
pub mod render;
pub mod request;
pub mod session;
pub mod thumbs;

pub use error::{Error, Result};

pub const BASE_URL: &str = "https://www.instagram.com";
/// Persisted query used for every timeline page after the profile page.
pub const QUERY_HASH: &str = "42323d64886122307be10013ad2dcc44";
/// Items requested per timeline page.
pub const PAGE_SIZE: usize = 50;
/// Prefix of the `<script>` carrying the JSON embedded in profile documents.
pub const SHARED_DATA_MARKER: &str = "window._sharedData = ";
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                              (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

const DEFAULT_MAX_PAGES: usize = 50;
const DEFAULT_MAX_ITEMS: usize = 1000;
const DEFAULT_PER_PAGE: usize = 60;
/// Spacing used for thumbnail downloads instead of the default throttle interval.
const THUMB_INTERVAL_MS: u64 = 200;
