use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::{BASE_URL, DEFAULT_MAX_ITEMS, DEFAULT_MAX_PAGES, DEFAULT_PER_PAGE};

#[derive(Parser, Debug)]
#[command(name = "instagrab")]
#[command(
    about = "Fetch profile feeds, cache them and render a gallery sorted by likes",
    long_about = None
)]
#[command(version)]
pub struct Args {
    /// Profiles to fetch.
    #[arg(required = true)]
    pub usernames: Vec<String>,

    /// Refetch even when a cache exists and rewrite cached records.
    #[arg(short, long)]
    pub overwrite: bool,

    #[arg(long)]
    pub skip_thumbs: bool,

    /// Append one `now|uploaded|likes|is_vid|code` line per item to `<out-dir>/<user>.dump`
    /// instead of rendering a gallery. Always fetches live.
    #[arg(long)]
    pub dump: bool,

    /// Maximum number of pages to walk, the profile page included.
    #[arg(short = 'p', long, default_value_t = DEFAULT_MAX_PAGES)]
    pub max_pages: usize,

    /// Maximum number of items rendered.
    #[arg(short = 'n', long, default_value_t = DEFAULT_MAX_ITEMS)]
    pub max_items: usize,

    /// Items per gallery section.
    #[arg(long, default_value_t = DEFAULT_PER_PAGE)]
    pub per_page: usize,

    #[arg(long, value_enum, default_value_t = DisplaySize::Thumb)]
    pub size: DisplaySize,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    #[arg(long, default_value = "pkls")]
    pub cache_dir: PathBuf,

    #[arg(long, default_value = "html")]
    pub out_dir: PathBuf,

    #[arg(long, default_value = "session.txt")]
    pub session_file: PathBuf,

    #[arg(long, default_value = BASE_URL)]
    pub base_url: String,

    /// Minimum delay between two requests, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u64,

    #[arg(long, default_value_t = 20)]
    pub timeout_secs: u64,

    /// Retries after the first failed attempt.
    #[arg(long, default_value_t = 5)]
    pub retries: u32,

    /// First backoff delay in milliseconds, doubled on every retry.
    #[arg(long, default_value_t = 1000)]
    pub backoff_ms: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum DisplaySize {
    /// Small square thumbnails, served locally when downloaded.
    Thumb,
    /// Full resolution display images.
    Full,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Bounded exponential backoff shared by every transport call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay to wait before retry number `retry` (0 based).
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }

    /// Sum of every backoff delay taken before giving up.
    pub fn total_backoff(&self) -> Duration {
        (0..self.max_retries).map(|n| self.delay(n)).sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Immutable run configuration handed to every component.
#[derive(Clone, Debug)]
pub struct Config {
    pub usernames: Vec<String>,
    pub overwrite: bool,
    pub skip_thumbs: bool,
    pub dump: bool,
    pub max_pages: usize,
    pub max_items: usize,
    pub per_page: usize,
    pub size: DisplaySize,
    pub log_level: LogLevel,
    pub cache_dir: PathBuf,
    pub out_dir: PathBuf,
    pub session_file: PathBuf,
    pub base_url: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            usernames: args.usernames,
            overwrite: args.overwrite,
            skip_thumbs: args.skip_thumbs,
            dump: args.dump,
            max_pages: args.max_pages.max(1),
            max_items: args.max_items,
            per_page: args.per_page.max(1),
            size: args.size,
            log_level: args.log_level,
            cache_dir: args.cache_dir,
            out_dir: args.out_dir,
            session_file: args.session_file,
            base_url: args.base_url.trim_end_matches('/').to_string(),
            interval: Duration::from_millis(args.interval_ms),
            timeout: Duration::from_secs(args.timeout_secs),
            retry: RetryPolicy {
                max_retries: args.retries,
                base_delay: Duration::from_millis(args.backoff_ms),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            usernames: Vec::new(),
            overwrite: false,
            skip_thumbs: false,
            dump: false,
            max_pages: DEFAULT_MAX_PAGES,
            max_items: DEFAULT_MAX_ITEMS,
            per_page: DEFAULT_PER_PAGE,
            size: DisplaySize::Thumb,
            log_level: LogLevel::Info,
            cache_dir: PathBuf::from("pkls"),
            out_dir: PathBuf::from("html"),
            session_file: PathBuf::from("session.txt"),
            base_url: BASE_URL.to_string(),
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(20),
            retry: RetryPolicy::default(),
        }
    }
}
