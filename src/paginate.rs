use chrono::Local;
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::model::{MediaItem, MediaItemBuilder};
use crate::parse::{decode, Page, RawPayload};
use crate::request::{GetOptions, Transport};
use crate::session::Session;
use crate::{info_time, PAGE_SIZE, QUERY_HASH};

const SIGNATURE_HEADER: &str = "x-instagram-gis";

/// Where the walk over a profile's pages stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkState {
    /// Holding the first page, decoded from the profile document.
    Seeded,
    Fetching,
    /// The last page said there is nothing more.
    Exhausted,
    /// Stopped at the page limit.
    Capped,
    /// A page couldn't be fetched or decoded. Items gathered so far are kept.
    Failed,
}

impl WalkState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WalkState::Exhausted | WalkState::Capped | WalkState::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct Walk {
    pub items: Vec<MediaItem>,
    pub state: WalkState,
    /// Pages consumed, the seed included.
    pub pages: usize,
}

/// Source of every page after the first.
#[allow(async_fn_in_trait)]
pub trait PageSource {
    async fn next_page(&mut self, profile_id: &str, cursor: &str) -> Option<Page>;
}

/// Receives every record as the walk accumulates it.
#[allow(async_fn_in_trait)]
pub trait ItemSink {
    async fn accept(&mut self, raw: &Value, item: &MediaItem);
}

impl ItemSink for () {
    async fn accept(&mut self, _raw: &Value, _item: &MediaItem) {}
}

/// Pages from the query endpoint, signed with the session's token.
pub struct GraphQuery<'a> {
    transport: &'a mut Transport,
    session: &'a Session,
    base_url: &'a str,
}

impl<'a> GraphQuery<'a> {
    pub fn new(transport: &'a mut Transport, session: &'a Session, base_url: &'a str) -> Self {
        Self {
            transport,
            session,
            base_url,
        }
    }
}

/// `{"id":..,"first":..,"after":..}` as sent to the query endpoint.
pub fn query_variables(profile_id: &str, cursor: Option<&str>) -> String {
    let mut vars = json!({ "id": profile_id, "first": PAGE_SIZE });
    if let Some(cursor) = cursor {
        vars["after"] = Value::from(cursor);
    }
    vars.to_string()
}

impl PageSource for GraphQuery<'_> {
    async fn next_page(&mut self, profile_id: &str, cursor: &str) -> Option<Page> {
        if let Err(e) = self.session.require() {
            error!("{e}");
            return None;
        }
        let variables = query_variables(profile_id, Some(cursor));
        let url = reqwest::Url::parse_with_params(
            &format!("{}/graphql/query/", self.base_url),
            &[("query_hash", QUERY_HASH), ("variables", variables.as_str())],
        )
        .inspect_err(|e| error!("Couldn't build query url: {e}"))
        .ok()?;

        let mut opts = GetOptions::default();
        if let Some(signature) = self.session.signature(&variables) {
            match HeaderValue::from_str(&signature) {
                Ok(value) => opts = opts.header(HeaderName::from_static(SIGNATURE_HEADER), value),
                Err(e) => warn!("Unusable request signature: {e}"),
            }
        }

        let fetched = self.transport.get(url.as_str(), opts).await?;
        let json = serde_json::from_slice::<Value>(&fetched.body)
            .inspect_err(|e| warn!("Query response isn't json: {e}"))
            .ok()?;
        decode(&RawPayload::GraphJson(json), false)
    }
}

/// Walks every page after `seed` until the feed is exhausted, `max_pages` pages were
/// read or a page fails. Every accumulated record is handed to `sink` as it arrives.
///
/// The first page's total count caps `max_pages` to the pages that can hold items.
pub async fn fetch_all<S, K>(
    source: &mut S,
    profile_id: &str,
    max_pages: usize,
    seed: Page,
    sink: &mut K,
) -> Walk
where
    S: PageSource,
    K: ItemSink,
{
    let start_time = Local::now();
    let mut max_pages = max_pages.max(1);
    if let Some(total) = seed.total_count {
        let estimate = (total as usize).div_ceil(PAGE_SIZE).max(1);
        if estimate < max_pages {
            info!(
                "{total} items fit in {estimate} pages, lowering the page limit from {max_pages}"
            );
            max_pages = estimate;
        }
    }

    let mut state = WalkState::Seeded;
    let mut items = Vec::new();
    let mut pages = 1;
    let mut page = seed;

    while !state.is_terminal() {
        for raw in &page.items {
            let item = MediaItemBuilder::from_node(raw);
            sink.accept(raw, &item).await;
            items.push(item);
        }

        state = if !page.has_next_page {
            WalkState::Exhausted
        } else if pages >= max_pages {
            WalkState::Capped
        } else {
            WalkState::Fetching
        };
        if state != WalkState::Fetching {
            break;
        }

        let Some(cursor) = page.end_cursor.take() else {
            warn!("Page {pages} of {profile_id} has more items but no cursor");
            state = WalkState::Failed;
            break;
        };
        debug!("Fetching page {} of {profile_id} after {cursor}", pages + 1);
        match source.next_page(profile_id, &cursor).await {
            Some(next) => {
                page = next;
                pages += 1;
            }
            None => {
                state = WalkState::Failed;
            }
        }
    }

    match state {
        WalkState::Exhausted => info_time!(
            start_time,
            "Fetched all {} items of {} in {} pages",
            items.len(),
            profile_id,
            pages
        ),
        WalkState::Capped => info_time!(
            start_time,
            "Stopped at the page limit ({}) with {} items of {}",
            pages,
            items.len(),
            profile_id
        ),
        _ => warn!(
            "Page {} of {profile_id} failed, keeping the {} items fetched so far",
            pages + 1,
            items.len()
        ),
    }

    Walk {
        items,
        state,
        pages,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::{Config, RetryPolicy};
    use crate::parse::tests::{profile_html, timeline};
    use pretty_assertions::assert_eq;
    use reqwest::cookie::Jar;
    use wiremock::matchers::{header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Serves canned pages in order and records the cursors it was asked for.
    struct Stub {
        pages: VecDeque<Option<Page>>,
        cursors: Vec<String>,
    }

    impl Stub {
        fn new(pages: Vec<Option<Page>>) -> Self {
            Self {
                pages: pages.into(),
                cursors: Vec::new(),
            }
        }
    }

    impl PageSource for Stub {
        async fn next_page(&mut self, _profile_id: &str, cursor: &str) -> Option<Page> {
            self.cursors.push(cursor.to_string());
            self.pages.pop_front().flatten()
        }
    }

    /// Page `n` of a feed, holding items `n*10..n*10+2`.
    fn page(n: usize, has_next: bool, total: Option<u64>) -> Page {
        Page {
            items: (0..2).map(|i| json!({ "id": format!("{}", n * 10 + i) })).collect(),
            has_next_page: has_next,
            end_cursor: has_next.then(|| format!("cursor{n}")),
            total_count: total,
        }
    }

    fn ids(walk: &Walk) -> Vec<String> {
        walk.items.iter().map(|i| i.id.clone()).collect()
    }

    #[tokio::test]
    async fn stops_when_feed_is_exhausted() {
        let mut stub = Stub::new(vec![
            Some(page(2, true, None)),
            Some(page(3, false, None)),
            Some(page(4, false, None)),
        ]);
        let walk = fetch_all(&mut stub, "99", 50, page(1, true, None), &mut ()).await;
        assert_eq!(walk.state, WalkState::Exhausted);
        assert_eq!(walk.pages, 3);
        assert_eq!(ids(&walk), vec!["10", "11", "20", "21", "30", "31"]);
        assert_eq!(stub.cursors, vec!["cursor1", "cursor2"]);
    }

    #[tokio::test]
    async fn total_count_lowers_the_page_limit() {
        let pages = (2..=10).map(|n| Some(page(n, true, None))).collect();
        let mut stub = Stub::new(pages);
        let walk = fetch_all(&mut stub, "99", 50, page(1, true, Some(120)), &mut ()).await;
        assert_eq!(walk.state, WalkState::Capped);
        assert_eq!(walk.pages, 3);
        assert_eq!(stub.cursors.len(), 2);
    }

    #[tokio::test]
    async fn caller_limit_wins_when_lower() {
        let pages = (2..=10).map(|n| Some(page(n, true, None))).collect();
        let mut stub = Stub::new(pages);
        let walk = fetch_all(&mut stub, "99", 2, page(1, true, Some(1000)), &mut ()).await;
        assert_eq!(walk.state, WalkState::Capped);
        assert_eq!(walk.pages, 2);
        assert_eq!(stub.cursors.len(), 1);
    }

    #[tokio::test]
    async fn failure_keeps_items_fetched_so_far() {
        let mut stub = Stub::new(vec![
            Some(page(2, true, None)),
            None,
            Some(page(4, true, None)),
            Some(page(5, false, None)),
        ]);
        let walk = fetch_all(&mut stub, "99", 50, page(1, true, Some(250)), &mut ()).await;
        assert_eq!(walk.state, WalkState::Failed);
        assert_eq!(walk.pages, 2);
        assert_eq!(ids(&walk), vec!["10", "11", "20", "21"]);
        assert_eq!(stub.cursors.len(), 2);
    }

    #[tokio::test]
    async fn missing_cursor_fails_the_walk() {
        let mut seed = page(1, true, None);
        seed.end_cursor = None;
        let mut stub = Stub::new(vec![Some(page(2, false, None))]);
        let walk = fetch_all(&mut stub, "99", 50, seed, &mut ()).await;
        assert_eq!(walk.state, WalkState::Failed);
        assert_eq!(walk.items.len(), 2);
        assert!(stub.cursors.is_empty());
    }

    #[tokio::test]
    async fn single_page_feed_never_queries() {
        let mut stub = Stub::new(vec![]);
        let walk = fetch_all(&mut stub, "99", 0, page(1, false, Some(2)), &mut ()).await;
        assert_eq!(walk.state, WalkState::Exhausted);
        assert!(stub.cursors.is_empty());
    }

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl ItemSink for Recorder {
        async fn accept(&mut self, raw: &Value, item: &MediaItem) {
            assert_eq!(raw["id"].as_str(), Some(item.id.as_str()));
            self.0.push(item.id.clone());
        }
    }

    #[tokio::test]
    async fn every_record_reaches_the_sink() {
        let mut stub = Stub::new(vec![Some(page(2, false, None))]);
        let mut recorder = Recorder::default();
        fetch_all(&mut stub, "99", 50, page(1, true, None), &mut recorder).await;
        assert_eq!(recorder.0, vec!["10", "11", "20", "21"]);
    }

    #[test]
    fn variables_carry_cursor_only_when_present() {
        let first: Value = serde_json::from_str(&query_variables("99", None)).unwrap();
        assert_eq!(first, json!({ "id": "99", "first": 50 }));
        let with_cursor: Value = serde_json::from_str(&query_variables("99", Some("c1"))).unwrap();
        assert_eq!(with_cursor, json!({ "id": "99", "first": 50, "after": "c1" }));
    }

    #[tokio::test]
    async fn graph_query_fetches_signed_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "csrftoken=tok; Path=/")
                    .set_body_string(profile_html(json!({}))),
            )
            .mount(&server)
            .await;
        let body = json!({ "data": { "user": {
            "edge_owner_to_timeline_media": timeline(&["7", "8"], false, None, 0)
        } } });
        Mock::given(method("GET"))
            .and(path("/graphql/query/"))
            .and(query_param("query_hash", QUERY_HASH))
            .and(query_param("variables", query_variables("99", Some("c1"))))
            .and(header_exists("x-instagram-gis"))
            .and(header_exists("x-csrftoken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;

        let config = Config {
            interval: Duration::ZERO,
            retry: RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
            },
            ..Default::default()
        };
        let mut transport = Transport::new(&config, Arc::new(Jar::default())).unwrap();
        let mut session = Session::new();
        let base = server.uri();
        assert!(session.authenticate(&mut transport, &base).await);

        let mut source = GraphQuery::new(&mut transport, &session, &base);
        let page = source.next_page("99", "c1").await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(!page.has_next_page);
    }

    #[tokio::test]
    async fn graph_query_refuses_without_session() {
        let config = Config::default();
        let mut transport = Transport::new(&config, Arc::new(Jar::default())).unwrap();
        let session = Session::new();
        let mut source = GraphQuery::new(&mut transport, &session, "http://127.0.0.1:1");
        assert!(source.next_page("99", "c1").await.is_none());
    }
}
